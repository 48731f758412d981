mod reconciler;
mod snapshot;
mod store;

pub use reconciler::ReconcileError;
pub use reconciler::ReconcileSummary;
pub use reconciler::StoreFileSetReconciler;
pub use snapshot::FileSetSnapshot;
pub use store::RefreshPermit;
pub use store::Store;
