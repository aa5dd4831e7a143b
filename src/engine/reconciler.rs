use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tracing::{debug, info, warn};

use crate::engine::session::{RefreshTrigger, SessionCore};
use crate::service::{DispatchBackend, PushSubscription};

/// Turns push notifications into refreshes. The first event after mount is
/// ignored and events queued during an in-flight operation collapse into one.
pub struct RealtimeReconciler<B> {
    core: Arc<SessionCore<B>>,
}

impl<B: DispatchBackend> RealtimeReconciler<B> {
    pub fn new(core: Arc<SessionCore<B>>) -> Self {
        Self { core }
    }

    pub async fn run(self, mut events: PushSubscription) {
        let session_id = self.core.id;
        let mut primed = false;

        while let Some(event) = events.next().await {
            if !primed {
                primed = true;
                debug!(%session_id, ?event, "initial push event ignored");
                continue;
            }

            let permit = loop {
                if self.core.tracker.in_flight() > 0 {
                    info!(%session_id, ?event, "refresh deferred until in-flight operations settle");
                    self.core.tracker.settled().await;
                }
                let permit = self.core.lock_refresh().await;
                if self.core.tracker.in_flight() == 0 {
                    break permit;
                }
            };

            let mut coalesced = 0usize;
            let mut closed = false;
            loop {
                match events.next().now_or_never() {
                    Some(Some(_)) => coalesced += 1,
                    Some(None) => {
                        closed = true;
                        break;
                    }
                    None => break,
                }
            }

            debug!(%session_id, ?event, coalesced, "refreshing on push event");
            if let Err(err) = self.core.refresh(RefreshTrigger::Push).await {
                warn!(%session_id, error = %err, "push-triggered refresh failed");
            }
            drop(permit);

            if closed {
                break;
            }
        }

        info!(%session_id, "push subscription closed");
    }
}
