use std::sync::Arc;

use crate::buffer::{DebounceBuffer, Forwarder};
use crate::config::Config;
use crate::dispatch::HttpCaller;
use crate::ledger::Ledger;
use crate::observability::Metrics;
use crate::scheduler::{CronClock, Dispatcher, TriggerSynchronizer};
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub buffer: DebounceBuffer,
    pub synchronizer: Arc<TriggerSynchronizer>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the buffer and scheduler around one ledger and one outbound caller.
    /// The cron clock is created stopped.
    pub fn new(config: Config, ledger: Ledger, caller: Arc<dyn HttpCaller>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let storage = Storage::new(ledger, &config.storage);
        let request_timeout = config.dispatch.request_timeout.as_duration();

        let forwarder = Forwarder::new(
            storage.clone(),
            caller.clone(),
            request_timeout,
            metrics.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            caller,
            request_timeout,
            metrics.clone(),
        ));
        let synchronizer = TriggerSynchronizer::new(storage.clone(), CronClock::new(), dispatcher);

        Self {
            config: Arc::new(config),
            storage,
            buffer: DebounceBuffer::new(forwarder),
            synchronizer: Arc::new(synchronizer),
            metrics,
        }
    }

    pub fn clock(&self) -> &CronClock {
        self.synchronizer.clock()
    }
}
