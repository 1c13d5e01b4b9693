//! # Watch Dispatcher
//!
//! One dispatcher per watched kind. It runs a list-then-watch loop against
//! the API server, keeps a local indexer of every object of the kind, and
//! fans out add/update/delete events to the handlers registered with it.
//!
//! ## Restart policy
//!
//! The watch stream is restarted (relist included) whenever it errors or
//! ends. The delay depends on the error class:
//!
//! - **410 Expired**: relist immediately
//! - **429 Throttled**: Fibonacci backoff
//! - **401/404/other**: the larger of the restart delay and the backoff
//!
//! The backoff resets after every successful event.
//!
//! ## Resync
//!
//! Every `resync_period` all indexed objects are re-delivered as updates
//! with the same object as old and new, so handlers can converge state that
//! drifted without a watch event. A zero period disables resync.

pub mod handler;
pub mod kinds;
pub mod translator;

pub use handler::{HandlerError, ResourceEventHandler, WatchedObject};
pub use kinds::WatchedKind;
pub use translator::EventTranslator;

use crate::config::DaemonConfig;
use crate::observability::metrics;
use crate::runtime::backoff::FibonacciBackoff;
use crate::runtime::error_policy::watch_restart_delay;
use futures::{pin_mut, StreamExt};
use kube::api::Api;
use kube_runtime::reflector::Store;
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// Timing knobs for watch stream restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    /// Minimum wait after a non-expiry stream error
    pub restart_delay: Duration,
    /// Wait after the stream ends without an error
    pub restart_delay_after_end: Duration,
}

impl RestartPolicy {
    #[must_use]
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            backoff_start: config.backoff_start_duration(),
            backoff_max: config.backoff_max_duration(),
            restart_delay: config.watch_restart_delay,
            restart_delay_after_end: config.watch_restart_delay_after_end,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

pub struct WatchDispatcher<K: WatchedKind> {
    api: Api<K>,
    resync_period: Duration,
    policy: RestartPolicy,
    translator: EventTranslator<K>,
}

impl<K: WatchedKind> std::fmt::Debug for WatchDispatcher<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchDispatcher")
            .field("kind", &self.translator.kind())
            .field("resync_period", &self.resync_period)
            .field("policy", &self.policy)
            .field("handlers", &self.translator.handler_names())
            .finish()
    }
}

impl<K: WatchedKind> WatchDispatcher<K> {
    #[must_use]
    pub fn new(api: Api<K>, resync_period: Duration, policy: RestartPolicy) -> Self {
        Self {
            api,
            resync_period,
            policy,
            translator: EventTranslator::new(),
        }
    }

    /// Register a handler; handlers are notified in registration order
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ResourceEventHandler<K>>) -> Self {
        self.add_handler(handler);
        self
    }

    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.translator.add_handler(handler);
    }

    /// Read handle on this dispatcher's indexer
    ///
    /// Empty until the first list completes.
    #[must_use]
    pub fn store(&self) -> Store<K> {
        self.translator.store()
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.translator.kind()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let span = tracing::info_span!("dispatcher.watch", resource.kind = self.kind());
        self.run_inner(shutdown).instrument(span).await;
    }

    async fn run_inner(mut self, shutdown: CancellationToken) {
        let kind = self.kind().to_string();
        let mut backoff = FibonacciBackoff::new(self.policy.backoff_start, self.policy.backoff_max);
        let mut resync = resync_interval(self.resync_period);

        info!(
            handlers = ?self.translator.handler_names(),
            resync_period_secs = self.resync_period.as_secs(),
            "Starting watch dispatcher"
        );

        loop {
            let stream = watcher(self.api.clone(), watcher::Config::default());
            pin_mut!(stream);

            let delay = loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Watch dispatcher stopped");
                        return;
                    }
                    _ = tick(resync.as_mut()) => {
                        self.translator.resync().await;
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            backoff.reset();
                            self.translator.apply(event).await;
                        }
                        Some(Err(e)) => {
                            let error_string = format!("{e:?}");
                            break watch_restart_delay(
                                &kind,
                                &error_string,
                                &mut backoff,
                                self.policy.restart_delay,
                            );
                        }
                        None => {
                            warn!(
                                "Watch stream ended, restarting in {} seconds...",
                                self.policy.restart_delay_after_end.as_secs()
                            );
                            break self.policy.restart_delay_after_end;
                        }
                    },
                }
            };

            metrics::increment_watch_restarts(&kind);
            if !delay.is_zero() {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Watch dispatcher stopped");
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn resync_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_from_config() {
        let config = DaemonConfig {
            backoff_start_ms: 250,
            backoff_max_ms: 4000,
            watch_restart_delay: Duration::from_secs(7),
            watch_restart_delay_after_end: Duration::from_secs(2),
            ..DaemonConfig::default()
        };

        let policy = RestartPolicy::from_config(&config);

        assert_eq!(policy.backoff_start, Duration::from_millis(250));
        assert_eq!(policy.backoff_max, Duration::from_millis(4000));
        assert_eq!(policy.restart_delay, Duration::from_secs(7));
        assert_eq!(policy.restart_delay_after_end, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_resync_period_disables_resync() {
        assert!(resync_interval(Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_interval_first_tick_after_one_period() {
        let start = Instant::now();
        let mut interval = resync_interval(Duration::from_secs(30));

        tick(interval.as_mut()).await;

        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
