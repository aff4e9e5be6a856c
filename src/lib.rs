//! Client-side state engine for an image transformation form.
//!
//! A [`FormSession`] collects debounced user input into a [`PendingEdit`],
//! merges it into the [`AppliedConfiguration`] when the user applies, and
//! sequences the credit debit, render and save collaborators around that.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod debounce;
pub mod error;
pub mod session;
pub mod state;

pub use catalog::{AspectRatioCatalog, AspectRatioOption, EditorConfig, TransformationCatalog, TransformationType};
pub use debounce::Debouncer;
pub use error::{ApplyBlock, EditorError, FormError, LedgerError, PersistError, Result};
pub use session::collab::{BoxFuture, CreditLedger, Persistence, RenderCompletion, RenderRequest, Renderer};
pub use session::orchestrator::{ApplyOrchestrator, ApplyState, SaveState};
pub use session::{Collaborators, FormSession, SessionEvent, SessionOptions, SessionUpdate};
pub use state::config::{deep_merge, merge, try_merge, AppliedConfiguration};
pub use state::data::{FormAction, FormValues, ImageDescriptor, ImageRecord, TransformationRecord, UploadedImage};
pub use state::edit::{EditParams, EditType, PendingEdit, PendingEntry, TransformField};
pub use state::library::SqliteStore;
