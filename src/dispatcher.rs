use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{DispatchConfig, NotifierConfig};
use crate::delivery::{Deliverer, Transport};
use crate::error::{ConfigError, DispatchOutcome};
use crate::filter::{self, FilterDecision};
use crate::format::MessageFormatter;
use crate::metric_inc;
use crate::route;
use crate::types::Event;

#[cfg(feature = "http")]
use crate::delivery::HttpTransport;

/// Routes security findings to chat webhooks.
///
/// Cheap to clone; clones share the same configuration, transport and
/// shutdown state. Each event runs filter → route → format → deliver with
/// no state carried between events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<DispatchConfig>,
    formatter: MessageFormatter,
    deliverer: Deliverer,
    cancel: CancellationToken,
    tracker: TaskTracker,
    is_running: AtomicBool,
}

impl Dispatcher {
    /// Dispatcher delivering over HTTP with the policy's request timeout.
    #[cfg(feature = "http")]
    pub fn new(config: DispatchConfig) -> Self {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(config.delivery().request_timeout()));
        Self::new_with_transport(config, transport)
    }

    pub fn new_with_transport(config: DispatchConfig, transport: Arc<dyn Transport>) -> Self {
        let formatter = MessageFormatter::from_config(&config);
        let deliverer = Deliverer::new(transport, config.delivery().clone());

        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                formatter,
                deliverer,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                is_running: AtomicBool::new(true),
            }),
        }
    }

    /// Validate raw options and build an HTTP dispatcher.
    ///
    /// Returns `None` when the configuration is unusable; the reason is
    /// logged and the host carries on without this notifier.
    #[cfg(feature = "http")]
    pub fn setup(config: NotifierConfig) -> Option<Self> {
        validated(config).map(Self::new)
    }

    pub fn setup_with_transport(
        config: NotifierConfig,
        transport: Arc<dyn Transport>,
    ) -> Option<Self> {
        validated(config).map(|config| Self::new_with_transport(config, transport))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// Run the full pipeline for one event and wait for its outcome.
    pub async fn handle(&self, event: &Event) -> DispatchOutcome {
        self.inner.handle(event).await
    }

    /// Run the pipeline for `event` on its own task.
    ///
    /// Deliveries of different events proceed concurrently and may finish
    /// in any order.
    pub fn spawn(&self, event: Event) -> JoinHandle<DispatchOutcome> {
        let inner = self.inner.clone();
        self.inner
            .tracker
            .spawn(async move { inner.handle(&event).await })
    }

    /// Stop accepting events, cancel pending deliveries and wait for every
    /// spawned delivery to finish.
    pub async fn shutdown(&self) {
        self.inner.is_running.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

fn validated(config: NotifierConfig) -> Option<DispatchConfig> {
    match config.validate() {
        Ok(config) => Some(config),
        Err(ConfigError::NoEndpoints) => {
            tracing::warn!("no webhooks configured, notifier disabled");
            None
        }
        Err(err) => {
            tracing::warn!(error = %err, "invalid notifier config, notifier disabled");
            None
        }
    }
}

impl Inner {
    async fn handle(&self, event: &Event) -> DispatchOutcome {
        if !self.is_running.load(Ordering::SeqCst) {
            return DispatchOutcome::Shutdown;
        }

        if let FilterDecision::Reject(reason) = filter::check(event, &self.config) {
            metric_inc("notifier.dispatch.filtered");
            tracing::debug!(kind = %event.kind, %reason, "skipping event");
            return DispatchOutcome::Filtered(reason);
        }

        let Some(bucket) = route::bucket_for(event) else {
            metric_inc("notifier.dispatch.unrouted");
            tracing::debug!(kind = %event.kind, "event has neither severity nor category");
            return DispatchOutcome::Unrouted(None);
        };

        let Some(url) = self.config.endpoints().get(&bucket) else {
            metric_inc("notifier.dispatch.unrouted");
            tracing::debug!(kind = %event.kind, %bucket, "no webhook configured for bucket");
            return DispatchOutcome::Unrouted(Some(bucket));
        };

        let body = self.formatter.envelope(event);
        tracing::debug!(kind = %event.kind, %bucket, "dispatching event");

        self.deliverer
            .deliver(url, &body, &self.cancel)
            .await
            .into()
    }
}
