//! Push notification routing.

use crate::error::SyncResult;
use crate::pipeline::{SyncOutcome, SyncPipeline, SyncTrigger};
use crate::remote::RemoteStore;
use serde_json::Value;
use std::sync::Arc;
use sublist_sync_protocol::notification::{self, DecodeError};
use sublist_sync_protocol::{ChangeKind, ChangeNotification};
use tracing::{debug, warn};

/// What happened to a routed push.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// The payload could not be decoded and was ignored.
    Dropped(DecodeError),
    /// A create or update was synced through the pipeline.
    Synced(SyncOutcome),
    /// A delete was applied to the local store.
    Deleted {
        /// False if no local row mirrored the record.
        removed: bool,
    },
}

/// Turns inbound push payloads into local changes.
pub struct NotificationRouter<R: RemoteStore> {
    pipeline: Arc<SyncPipeline<R>>,
}

impl<R: RemoteStore> NotificationRouter<R> {
    /// Routes into `pipeline`.
    pub fn new(pipeline: Arc<SyncPipeline<R>>) -> Self {
        Self { pipeline }
    }

    /// Returns the pipeline.
    pub fn pipeline(&self) -> &Arc<SyncPipeline<R>> {
        &self.pipeline
    }

    /// Routes one push payload.
    ///
    /// Undecodable payloads are logged and dropped, never an error.
    /// Deletions go straight to the local store without a remote fetch and
    /// without waiting for an active run; that run will not restore the row.
    pub async fn route(&self, payload: &Value) -> SyncResult<RouteOutcome> {
        match notification::decode(payload) {
            Ok(notification) => self.dispatch(notification).await,
            Err(error) => Ok(self.drop_payload(error)),
        }
    }

    /// Routes one push payload given as raw JSON bytes.
    pub async fn route_slice(&self, bytes: &[u8]) -> SyncResult<RouteOutcome> {
        match notification::decode_slice(bytes) {
            Ok(notification) => self.dispatch(notification).await,
            Err(error) => Ok(self.drop_payload(error)),
        }
    }

    fn drop_payload(&self, error: DecodeError) -> RouteOutcome {
        warn!(%error, "dropping undecodable push payload");
        RouteOutcome::Dropped(error)
    }

    async fn dispatch(&self, notification: ChangeNotification) -> SyncResult<RouteOutcome> {
        let ChangeNotification {
            kind, remote_id, ..
        } = notification;
        debug!(?kind, %remote_id, "routing change notification");

        match kind {
            ChangeKind::Created | ChangeKind::Updated => {
                let outcome = self
                    .pipeline
                    .trigger(SyncTrigger::Record { remote_id, kind })
                    .await?;
                Ok(RouteOutcome::Synced(outcome))
            }
            ChangeKind::Deleted => {
                let removed = self.pipeline.apply_remote_delete(&remote_id)?;
                if !removed {
                    debug!(%remote_id, "deleted record had no local row");
                }
                Ok(RouteOutcome::Deleted { removed })
            }
        }
    }
}
