mod scheduler;
mod stop_signal;
mod time;

pub use scheduler::RefreshReport;
pub use scheduler::RefreshScheduler;
