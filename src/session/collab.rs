//! Interfaces to the services a form session drives but does not own

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::SessionEvent;
use crate::error::{LedgerError, PersistError};
use crate::state::config::AppliedConfiguration;
use crate::state::data::{FormAction, ImageDescriptor, TransformationRecord};
use crate::state::edit::EditType;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Per-user credit balance
pub trait CreditLedger: Send + Sync {
    /// Add `delta` to the user's balance and return the new balance
    fn update_credits(&self, user_id: &str, delta: i64) -> BoxFuture<Result<i64, LedgerError>>;
}

/// Requests the transformed image from the image service
pub trait Renderer: Send + Sync {
    /// Start rendering; call `done.finish()` once the image reflects `request.config`
    fn request_render(&self, request: RenderRequest, done: RenderCompletion);
}

/// Stores saved transformations
pub trait Persistence: Send + Sync {
    /// Insert (Add) or update (Update) a record and return its id
    fn save(&self, record: TransformationRecord, action: FormAction) -> BoxFuture<Result<i64, PersistError>>;
}

/// Everything the render collaborator needs for one apply
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub apply_id: u64,
    pub image: ImageDescriptor,
    pub edit_type: EditType,
    pub config: AppliedConfiguration,
}

/// One-shot signal that a render finished
///
/// Dropping it without calling `finish` also counts as finished so the
/// session cannot stay busy forever.
pub struct RenderCompletion {
    apply_id: u64,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl RenderCompletion {
    pub(crate) fn new(apply_id: u64, events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            apply_id,
            events: Some(events),
        }
    }

    pub fn apply_id(&self) -> u64 {
        self.apply_id
    }

    pub fn finish(mut self) {
        self.send();
    }

    fn send(&mut self) {
        if let Some(events) = self.events.take() {
            // The session may already be gone; nothing left to notify then
            let _ = events.send(SessionEvent::RenderFinished {
                apply_id: self.apply_id,
            });
        }
    }
}

impl Drop for RenderCompletion {
    fn drop(&mut self) {
        if self.events.is_some() {
            warn!(apply_id = self.apply_id, "render completion dropped without finish");
            self.send();
        }
    }
}

impl std::fmt::Debug for RenderCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCompletion")
            .field("apply_id", &self.apply_id)
            .field("pending", &self.events.is_some())
            .finish()
    }
}
