use crate::refresher::stop_signal;
use crate::refresher::time::{Clock, SystemClock, Ticker};
use crate::region::ReplicaKey;
use crate::store::{ReconcileError, ReconcileSummary, Store, StoreFileSetReconciler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::Duration;

/// RefreshScheduler periodically reconciles every store of every registered secondary replica.
///
/// - Distinct stores are reconciled concurrently, at most `max_concurrent` at a time.
/// - A store whose previous pass is still running is skipped for this tick.
/// - A tick that runs longer than the interval causes the missed ticks to be dropped, not queued.
/// - `deregister` guarantees no pass touches the replica's stores once it returns.
///
/// The background task exits on the first wake-up after `shutdown()` or after the scheduler is
/// dropped.
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    stopper: stop_signal::Stopper,
}

struct Shared {
    logger: slog::Logger,
    reconciler: StoreFileSetReconciler,
    registrations: Mutex<HashMap<ReplicaKey, Registration>>,
    max_concurrent: usize,
}

#[derive(Clone)]
struct Registration {
    stores: Vec<Arc<Store>>,
    cancelled: Arc<AtomicBool>,
}

struct RefreshTask<C: Clock> {
    shared: Arc<Shared>,
    ticker: Ticker<C>,
    stop_check: stop_signal::StopCheck,
}

/// What one tick did, summed over all stores it visited.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub changed: usize,
    pub busy: usize,
    pub cancelled: usize,
    pub failed: usize,
}

enum PassOutcome {
    Refreshed(ReconcileSummary),
    Cancelled,
    Failed,
}

impl RefreshReport {
    fn record(&mut self, outcome: PassOutcome) {
        match outcome {
            PassOutcome::Refreshed(summary) => {
                self.refreshed += 1;
                if summary.changed() {
                    self.changed += 1;
                }
            }
            PassOutcome::Cancelled => self.cancelled += 1,
            PassOutcome::Failed => self.failed += 1,
        }
    }

    fn is_idle(&self) -> bool {
        self.changed == 0 && self.busy == 0 && self.cancelled == 0 && self.failed == 0
    }
}

impl RefreshScheduler {
    pub fn spawn(
        logger: slog::Logger,
        reconciler: StoreFileSetReconciler,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        let (task, scheduler) = RefreshTask::new(logger, reconciler, interval, max_concurrent, SystemClock);
        tokio::task::spawn(task.run());

        scheduler
    }

    /// Start refreshing `stores` on every tick. Re-registering a replica replaces its stores.
    pub fn register(&self, key: ReplicaKey, stores: Vec<Arc<Store>>) {
        let registration = Registration {
            stores,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let previous = self
            .shared
            .registrations
            .lock()
            .expect("RefreshScheduler.registrations mutex guard poison")
            .insert(key, registration);

        if let Some(previous) = previous {
            previous.cancelled.store(true, Ordering::Release);
        }
        slog::debug!(self.shared.logger, "Registered {:?} for store file refresh", key);
    }

    /// Stop refreshing the replica's stores and wait for any pass already running on them to
    /// finish. Returns false if the replica was not registered.
    pub async fn deregister(&self, key: ReplicaKey) -> bool {
        let removed = self
            .shared
            .registrations
            .lock()
            .expect("RefreshScheduler.registrations mutex guard poison")
            .remove(&key);

        let registration = match removed {
            Some(registration) => registration,
            None => return false,
        };

        // Any pass that takes a permit after this point sees the flag and backs off.
        registration.cancelled.store(true, Ordering::Release);
        for store in registration.stores.iter() {
            drop(store.begin_refresh().await);
        }

        slog::debug!(self.shared.logger, "Deregistered {:?} from store file refresh", key);
        true
    }

    pub fn is_registered(&self, key: ReplicaKey) -> bool {
        self.shared
            .registrations
            .lock()
            .expect("RefreshScheduler.registrations mutex guard poison")
            .contains_key(&key)
    }

    /// Run one tick now, independent of the timer.
    pub async fn refresh_now(&self) -> RefreshReport {
        self.shared.run_tick().await
    }

    pub fn shutdown(&self) {
        self.stopper.stop();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopper.is_stopped()
    }
}

impl Shared {
    async fn run_tick(&self) -> RefreshReport {
        let registrations: Vec<Registration> = self
            .registrations
            .lock()
            .expect("RefreshScheduler.registrations mutex guard poison")
            .values()
            .cloned()
            .collect();

        let slots = Arc::new(Semaphore::new(self.max_concurrent));
        let mut report = RefreshReport::default();
        let mut passes = Vec::new();

        for registration in registrations.iter() {
            for store in registration.stores.iter() {
                if registration.cancelled.load(Ordering::Acquire) {
                    report.cancelled += 1;
                    continue;
                }

                let slot = slots
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("RefreshScheduler semaphore is never closed");
                let permit = match store.try_begin_refresh() {
                    Some(permit) => permit,
                    None => {
                        report.busy += 1;
                        continue;
                    }
                };

                let store = store.clone();
                let cancelled = registration.cancelled.clone();
                let reconciler = self.reconciler.clone();
                passes.push(tokio::task::spawn_blocking(move || {
                    let _slot = slot;
                    if cancelled.load(Ordering::Acquire) {
                        return PassOutcome::Cancelled;
                    }

                    match reconciler.reconcile(&store, &permit) {
                        Ok(summary) => PassOutcome::Refreshed(summary),
                        Err(ReconcileError::StoreClosed) => PassOutcome::Cancelled,
                        Err(e) => {
                            slog::warn!(
                                store.logger(),
                                "Store file refresh failed, will retry next tick: {}",
                                error_chain(&e)
                            );
                            PassOutcome::Failed
                        }
                    }
                }));
            }
        }

        for pass in passes {
            match pass.await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    slog::error!(self.logger, "Store file refresh task panicked: {:?}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl<C: Clock> RefreshTask<C> {
    fn new(
        logger: slog::Logger,
        reconciler: StoreFileSetReconciler,
        interval: Duration,
        max_concurrent: usize,
        clock: C,
    ) -> (Self, RefreshScheduler) {
        let shared = Arc::new(Shared {
            logger,
            reconciler,
            registrations: Mutex::new(HashMap::new()),
            max_concurrent,
        });
        let (stopper, stop_check) = stop_signal::new();

        let task = RefreshTask {
            shared: shared.clone(),
            ticker: Ticker::new(clock, interval),
            stop_check,
        };
        let scheduler = RefreshScheduler { shared, stopper };

        (task, scheduler)
    }

    async fn run(mut self) {
        loop {
            self.ticker.wait().await;
            if self.stop_check.should_stop() {
                slog::debug!(self.shared.logger, "Store file refresh task stopped");
                return;
            }

            let report = self.shared.run_tick().await;
            if !report.is_idle() {
                slog::debug!(self.shared.logger, "Store file refresh tick: {:?}", report);
            }

            let skipped = self.ticker.advance_past_now();
            if skipped > 0 {
                slog::info!(
                    self.shared.logger,
                    "Store file refresh overran its interval, skipping {} tick(s)",
                    skipped
                );
            }
        }
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresher::time::{manual_clock, ManualTime};
    use crate::region::{RegionId, ReplicaId};
    use crate::storefile::{
        ListFilesError, LocalStoreFiles, OpenFileError, OpenOutcome, SequenceId, StoreFileMeta, StoreFileSystem,
        StoreLocation,
    };
    use bytes::Bytes;
    use std::io;
    use std::sync::mpsc;
    use tempfile::tempdir;
    use tokio::sync::mpsc as async_mpsc;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn location(family: &str) -> StoreLocation {
        StoreLocation {
            table: "t1".to_string(),
            region_id: RegionId::new(1),
            family: family.to_string(),
        }
    }

    fn secondary() -> ReplicaKey {
        ReplicaKey::new(RegionId::new(1), ReplicaId::new(1))
    }

    fn write(files: &LocalStoreFiles, family: &str, seq: u64) {
        let row = Bytes::from(seq.to_string());
        files
            .write(&location(family), SequenceId::new(seq), &[(row.clone(), row)])
            .unwrap();
    }

    /// Keep advancing time one step at a time until `condition` holds. The task picks its next
    /// deadline after a tick finishes, so advancing by exactly one interval can race it.
    async fn advance_until<F: Fn() -> bool>(time: &mut ManualTime, step: Duration, condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            time.advance(step);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Condition not met before sanity timeout");
    }

    #[tokio::test]
    async fn ticks_follow_the_clock() {
        let dir = tempdir().unwrap();
        let files = Arc::new(LocalStoreFiles::new(dir.path()));
        let interval = Duration::from_secs(2);
        let (clock, mut time) = manual_clock();
        let (task, scheduler) = RefreshTask::new(
            logger(),
            StoreFileSetReconciler::new(files.clone()),
            interval,
            2,
            clock,
        );
        let mut task_handle = tokio::task::spawn(task.run());

        let store = Arc::new(Store::new(logger(), location("f")));
        scheduler.register(secondary(), vec![store.clone()]);
        write(&files, "f", 1);

        // Not due yet.
        time.advance(interval / 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.file_count(), 0);

        advance_until(&mut time, interval / 2, || store.file_count() == 1).await;

        write(&files, "f", 2);
        advance_until(&mut time, interval, || store.file_count() == 2).await;

        // Stopped scheduler exits on its next wake-up without refreshing.
        scheduler.shutdown();
        write(&files, "f", 3);
        let mut exited = false;
        for _ in 0..500 {
            time.advance(interval);
            if let Ok(joined) = tokio::time::timeout(Duration::from_millis(10), &mut task_handle).await {
                joined.unwrap();
                exited = true;
                break;
            }
        }
        assert!(exited, "Refresh task did not exit after shutdown");
        assert_eq!(store.file_count(), 2);
    }

    #[tokio::test]
    async fn deregistered_stores_are_left_alone() {
        let dir = tempdir().unwrap();
        let files = Arc::new(LocalStoreFiles::new(dir.path()));
        let (clock, _time) = manual_clock();
        let (_task, scheduler) = RefreshTask::new(
            logger(),
            StoreFileSetReconciler::new(files.clone()),
            Duration::from_secs(2),
            4,
            clock,
        );

        let stores = vec![
            Arc::new(Store::new(logger(), location("a"))),
            Arc::new(Store::new(logger(), location("b"))),
        ];
        scheduler.register(secondary(), stores.clone());
        write(&files, "a", 1);
        write(&files, "b", 2);

        let report = scheduler.refresh_now().await;
        assert_eq!(report.refreshed, 2);
        assert_eq!(report.changed, 2);

        assert!(scheduler.deregister(secondary()).await);
        assert!(!scheduler.is_registered(secondary()));
        assert!(!scheduler.deregister(secondary()).await);

        write(&files, "a", 3);
        let report = scheduler.refresh_now().await;
        assert_eq!(report, RefreshReport::default());
        assert_eq!(stores[0].file_count(), 1);
    }

    /// Holds every listing until the test lets it through, reporting when one is waiting.
    struct GatedFiles {
        inner: LocalStoreFiles,
        listing: async_mpsc::UnboundedSender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl StoreFileSystem for GatedFiles {
        fn create_location(&self, location: &StoreLocation) -> io::Result<()> {
            self.inner.create_location(location)
        }

        fn list(&self, location: &StoreLocation) -> Result<Vec<StoreFileMeta>, ListFilesError> {
            let _ = self.listing.send(());
            // A dropped sender means the gate is open for good.
            let _ = self.release.lock().unwrap().recv();
            self.inner.list(location)
        }

        fn open(&self, logger: &slog::Logger, meta: &StoreFileMeta) -> Result<OpenOutcome, OpenFileError> {
            self.inner.open(logger, meta)
        }

        fn write(
            &self,
            location: &StoreLocation,
            sequence_id: SequenceId,
            entries: &[(Bytes, Bytes)],
        ) -> io::Result<StoreFileMeta> {
            self.inner.write(location, sequence_id, entries)
        }

        fn remove(&self, meta: &StoreFileMeta) -> io::Result<()> {
            self.inner.remove(meta)
        }
    }

    #[tokio::test]
    async fn deregister_waits_for_the_pass_in_flight() {
        let dir = tempdir().unwrap();
        let (listing_tx, mut listing) = async_mpsc::unbounded_channel();
        let (release, release_rx) = mpsc::channel();
        let files = Arc::new(GatedFiles {
            inner: LocalStoreFiles::new(dir.path()),
            listing: listing_tx,
            release: Mutex::new(release_rx),
        });
        write(&files.inner, "f", 1);

        let (clock, _time) = manual_clock();
        let (_task, scheduler) = RefreshTask::new(
            logger(),
            StoreFileSetReconciler::new(files.clone()),
            Duration::from_secs(2),
            4,
            clock,
        );
        let scheduler = Arc::new(scheduler);
        let store = Arc::new(Store::new(logger(), location("f")));
        scheduler.register(secondary(), vec![store.clone()]);

        let tick = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.refresh_now().await }
        });
        listing.recv().await.unwrap();

        let returned = Arc::new(AtomicBool::new(false));
        let deregistering = tokio::spawn({
            let scheduler = scheduler.clone();
            let returned = returned.clone();
            async move {
                let was_registered = scheduler.deregister(secondary()).await;
                returned.store(true, Ordering::SeqCst);
                was_registered
            }
        });

        // The pass is stuck listing; deregister must not come back before it does.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!returned.load(Ordering::SeqCst));
        assert!(!scheduler.is_registered(secondary()));

        release.send(()).unwrap();
        assert!(deregistering.await.unwrap());
        let report = tick.await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(store.file_count(), 1);

        // What close does next: release the handles. No later tick may touch the store.
        store.close().await;
        let closed_version = store.snapshot().version();
        drop(release);
        write(&files.inner, "f", 2);
        assert_eq!(scheduler.refresh_now().await, RefreshReport::default());
        assert!(store.is_closed());
        assert_eq!(store.snapshot().version(), closed_version);
        assert_eq!(store.file_count(), 0);
        assert!(listing.try_recv().is_err());
    }

    #[tokio::test]
    async fn one_failing_store_does_not_stop_the_others() {
        let dir = tempdir().unwrap();
        let files = Arc::new(LocalStoreFiles::new(dir.path()));
        let (clock, _time) = manual_clock();
        let (_task, scheduler) = RefreshTask::new(
            logger(),
            StoreFileSetReconciler::new(files.clone()),
            Duration::from_secs(2),
            1,
            clock,
        );

        // "missing" never gets a directory, so its listing fails every time.
        let healthy = Arc::new(Store::new(logger(), location("healthy")));
        let missing = Arc::new(Store::new(logger(), location("missing")));
        scheduler.register(secondary(), vec![missing.clone(), healthy.clone()]);
        write(&files, "healthy", 1);

        let report = scheduler.refresh_now().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(healthy.file_count(), 1);
        assert_eq!(missing.file_count(), 0);
    }

    #[tokio::test]
    async fn busy_store_is_skipped() {
        let dir = tempdir().unwrap();
        let files = Arc::new(LocalStoreFiles::new(dir.path()));
        let (clock, _time) = manual_clock();
        let (_task, scheduler) = RefreshTask::new(
            logger(),
            StoreFileSetReconciler::new(files.clone()),
            Duration::from_secs(2),
            4,
            clock,
        );
        let store = Arc::new(Store::new(logger(), location("f")));
        scheduler.register(secondary(), vec![store.clone()]);
        write(&files, "f", 1);

        let held = store.try_begin_refresh().unwrap();
        let report = scheduler.refresh_now().await;
        assert_eq!(report.busy, 1);
        assert_eq!(store.file_count(), 0);

        drop(held);
        let report = scheduler.refresh_now().await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(store.file_count(), 1);
    }
}
