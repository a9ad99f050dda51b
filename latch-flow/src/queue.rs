//! Debounced single-consumer queue in front of the orchestrator.
//!
//! Provider callbacks re-fire in bursts; instead of timing-based flags, all
//! events go into one channel consumed by a single worker. Events arriving
//! within the debounce window of each other are coalesced and only the most
//! recent one is executed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use latch_core::ProviderEvent;

use crate::directory::TenantDirectory;
use crate::orchestrator::FlowOrchestrator;

pub struct EventQueue {
    tx: mpsc::UnboundedSender<ProviderEvent>,
    worker: JoinHandle<()>,
}

impl EventQueue {
    /// Spawn the consumer task. Outcomes are published on the
    /// orchestrator's outcome channel.
    pub fn start<D: TenantDirectory + 'static>(orchestrator: Arc<FlowOrchestrator<D>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProviderEvent>();
        let debounce = orchestrator.options().debounce_window;

        let worker = tokio::spawn(async move {
            info!(?debounce, "event queue started");
            while let Some(mut event) = rx.recv().await {
                // Coalesce: keep replacing with newer events until the
                // channel stays quiet for a full debounce window
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(newer)) => {
                            debug!(
                                superseded = event.kind.event_name(),
                                by = newer.kind.event_name(),
                                "coalesced burst event"
                            );
                            event = newer;
                        }
                        Ok(None) => {
                            // Channel closed; run the last event and stop
                            orchestrator.handle_event(event).await;
                            return;
                        }
                        Err(_) => break,
                    }
                }
                orchestrator.handle_event(event).await;
            }
        });

        Self { tx, worker }
    }

    /// Submit a provider event. Returns false if the queue has shut down.
    pub fn submit(&self, event: ProviderEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Stop accepting events; the worker drains what is queued and exits.
    pub fn shutdown(self) -> JoinHandle<()> {
        drop(self.tx);
        self.worker
    }
}
