//! A single transformation form session
//!
//! The session owns the pending edit, the applied configuration and the
//! image view state. Timers and collaborator calls run in the background and
//! report back through an event inbox; the owner drains it with [`FormSession::step`]
//! or [`FormSession::pump`], so all state changes happen on the owner's side.

pub mod collab;
pub mod orchestrator;

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::catalog::EditorConfig;
use crate::debounce::Debouncer;
use crate::error::{EditorError, LedgerError, PersistError, Result};
use crate::state::config::{try_merge, AppliedConfiguration};
use crate::state::data::{FormAction, FormValues, ImageDescriptor, ImageRecord, TransformationRecord, UploadedImage};
use crate::state::edit::{EditType, PendingEdit, PendingEntry, TransformField};

use collab::{CreditLedger, Persistence, RenderCompletion, RenderRequest, Renderer};
use orchestrator::{ApplyOrchestrator, ApplyState, SaveState};

/// How a session starts out
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    pub edit_type: EditType,
    pub action: FormAction,
    /// Existing record; seeds the image view, and the form too when `action` is `Update`
    pub data: Option<ImageRecord>,
    pub credit_balance: i64,
    /// Previously applied configuration, if any
    pub config: Option<AppliedConfiguration>,
}

impl SessionOptions {
    pub fn new(user_id: impl Into<String>, edit_type: EditType, credit_balance: i64) -> Self {
        Self {
            user_id: user_id.into(),
            edit_type,
            action: FormAction::Add,
            data: None,
            credit_balance,
            config: None,
        }
    }
}

/// External services a session talks to
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn CreditLedger>,
    pub renderer: Arc<dyn Renderer>,
    pub persistence: Arc<dyn Persistence>,
}

/// Completions delivered to the session inbox
#[derive(Debug)]
pub enum SessionEvent {
    FieldSettled {
        field: TransformField,
        edit_type: EditType,
        value: String,
    },
    RenderFinished {
        apply_id: u64,
    },
    CreditsSettled {
        apply_id: u64,
        outcome: std::result::Result<i64, LedgerError>,
    },
    SaveFinished {
        outcome: std::result::Result<i64, PersistError>,
    },
}

/// What changed after handling one event
#[derive(Debug)]
pub enum SessionUpdate {
    FieldSettled { field: TransformField, edit_type: EditType },
    RenderFinished { apply_id: u64 },
    CreditsDebited { apply_id: u64, balance: i64 },
    CreditDebitFailed { apply_id: u64, error: LedgerError },
    Saved { record_id: i64 },
    SaveFailed { error: PersistError },
}

type FieldKey = (TransformField, EditType);

pub struct FormSession {
    settings: Arc<EditorConfig>,
    user_id: String,
    edit_type: EditType,
    action: FormAction,
    record_id: Option<i64>,
    image: ImageDescriptor,
    form: FormValues,
    pending: Option<PendingEdit>,
    applied: Option<AppliedConfiguration>,
    orchestrator: ApplyOrchestrator,
    debouncer: Debouncer<FieldKey>,
    collaborators: Collaborators,
    events_tx: UnboundedSender<SessionEvent>,
    events_rx: UnboundedReceiver<SessionEvent>,
}

impl FormSession {
    pub fn new(settings: Arc<EditorConfig>, options: SessionOptions, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // The image view always starts from `data`; form values, id and
        // stored config only carry over when editing that record
        let image = options.data.as_ref().map(ImageRecord::image).unwrap_or_default();
        let existing = match options.action {
            FormAction::Update => options.data,
            FormAction::Add => None,
        };
        let (form, record_id, stored_config) = match existing {
            Some(record) => (record.form_values(), Some(record.id), record.config),
            None => (FormValues::default(), None, None),
        };

        info!(
            user_id = %options.user_id,
            edit_type = %options.edit_type,
            action = ?options.action,
            "form session started"
        );

        Self {
            debouncer: Debouncer::new(settings.debounce()),
            orchestrator: ApplyOrchestrator::new(options.credit_balance, settings.credit_fee),
            settings,
            user_id: options.user_id,
            edit_type: options.edit_type,
            action: options.action,
            record_id,
            image,
            form,
            pending: None,
            applied: options.config.or(stored_config),
            collaborators,
            events_tx,
            events_rx,
        }
    }

    // ========== Read access ==========

    pub fn edit_type(&self) -> EditType {
        self.edit_type
    }

    pub fn action(&self) -> FormAction {
        self.action
    }

    pub fn record_id(&self) -> Option<i64> {
        self.record_id
    }

    pub fn image(&self) -> &ImageDescriptor {
        &self.image
    }

    pub fn form(&self) -> &FormValues {
        &self.form
    }

    pub fn pending(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    pub fn applied(&self) -> Option<&AppliedConfiguration> {
        self.applied.as_ref()
    }

    pub fn apply_state(&self) -> ApplyState {
        self.orchestrator.apply_state()
    }

    pub fn save_state(&self) -> SaveState {
        self.orchestrator.save_state()
    }

    pub fn credit_balance(&self) -> i64 {
        self.orchestrator.credit_balance()
    }

    /// Whether the Apply button is enabled
    pub fn can_apply(&self) -> bool {
        self.orchestrator.check_apply(self.pending.is_some()).is_ok()
    }

    /// Whether the Save button is enabled
    pub fn can_save(&self) -> bool {
        !self.orchestrator.is_submitting()
    }

    /// Whether a typed value is still inside its quiet period
    pub fn is_settling(&self, field: TransformField, edit_type: EditType) -> bool {
        self.debouncer.is_pending(&(field, edit_type))
    }

    // ========== User input ==========

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.form.title = title.into();
    }

    /// Queue a typed value; it reaches the pending edit once the field goes quiet
    pub fn record_field_change(&mut self, field: TransformField, value: impl Into<String>, edit_type: EditType) -> Result<()> {
        if !edit_type.accepts(field) {
            return Err(EditorError::FieldNotApplicable { field, edit_type });
        }

        let value = value.into();
        let events = self.events_tx.clone();
        self.debouncer.schedule((field, edit_type), move || {
            let _ = events.send(SessionEvent::FieldSettled { field, edit_type, value });
        });
        Ok(())
    }

    /// Select a target aspect ratio from the catalog
    ///
    /// Updates the image dimensions and arms the session's edit type, so a
    /// ratio alone is enough to enable Apply. An unknown key changes nothing.
    pub fn select_aspect_ratio(&mut self, key: &str) -> Result<()> {
        let option = match self.settings.aspect_ratios.resolve(key) {
            Ok(option) => option.clone(),
            Err(err) => {
                warn!(key, "aspect ratio selection rejected");
                return Err(err);
            }
        };

        self.image.apply_ratio(&option);
        self.form.aspect_ratio = Some(option.key.clone());
        self.arm().params.set_aspect_ratio(&option.aspect_ratio);

        debug!(
            key,
            aspect_ratio = %option.aspect_ratio,
            width = option.width,
            height = option.height,
            "aspect ratio selected"
        );
        Ok(())
    }

    /// Seed the pending edit with the catalog defaults for this session's edit type
    pub fn arm_defaults(&mut self) {
        self.arm();
        debug!(edit_type = %self.edit_type, "edit type armed with defaults");
    }

    fn arm(&mut self) -> &mut PendingEntry {
        let defaults = self.settings.transformations.default_config(self.edit_type);
        self.pending
            .get_or_insert_with(PendingEdit::new)
            .arm(self.edit_type, &defaults)
    }

    /// Drop the pending edit and any values still settling
    pub fn discard_pending(&mut self) {
        self.debouncer.cancel_all();
        self.pending = None;
    }

    /// Adopt an image reported by the upload collaborator
    pub fn on_upload(&mut self, upload: UploadedImage) {
        info!(public_id = %upload.public_id, "image uploaded");
        self.form.public_id = upload.public_id.clone();
        self.image.public_id = upload.public_id;
        self.image.width = Some(upload.width);
        self.image.height = Some(upload.height);
        self.image.secure_url = Some(upload.secure_url);
    }

    // ========== Actions ==========

    /// Merge the pending edit into the applied configuration and start a render
    ///
    /// Merge, clear and state change happen before this returns. The credit
    /// debit runs in the background and is reported as a session event. If the
    /// merge fails nothing changes and no credit is spent.
    pub fn apply(&mut self) -> Result<u64> {
        self.orchestrator
            .check_apply(self.pending.is_some())
            .map_err(EditorError::ApplyBlocked)?;

        // A shape conflict rejects the apply and leaves the pending edit armed
        let next = match try_merge(self.pending.as_ref(), self.applied.as_ref()) {
            Ok(next) => next,
            Err(err) => {
                warn!(%err, "apply rejected, pending edit does not fit the applied configuration");
                return Err(err);
            }
        };
        self.pending = None;
        self.applied = Some(next.clone());
        let apply_id = self.orchestrator.begin_apply();

        info!(apply_id, edit_type = %self.edit_type, "applying transformation");

        let request = RenderRequest {
            apply_id,
            image: self.image.clone(),
            edit_type: self.edit_type,
            config: next,
        };
        let done = RenderCompletion::new(apply_id, self.events_tx.clone());
        self.collaborators.renderer.request_render(request, done);

        let debit = self
            .collaborators
            .ledger
            .update_credits(&self.user_id, self.orchestrator.fee());
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = debit.await;
            let _ = events.send(SessionEvent::CreditsSettled { apply_id, outcome });
        });

        Ok(apply_id)
    }

    /// Validate the form and hand the record to the persistence collaborator
    pub fn save(&mut self) -> Result<()> {
        if self.orchestrator.is_submitting() {
            return Err(EditorError::SaveInProgress);
        }
        self.form.validate()?;
        self.orchestrator.begin_save()?;

        let record = self.build_record();
        info!(action = ?self.action, public_id = %record.public_id, "saving transformation");

        let save = self.collaborators.persistence.save(record, self.action);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = save.await;
            let _ = events.send(SessionEvent::SaveFinished { outcome });
        });
        Ok(())
    }

    fn build_record(&self) -> TransformationRecord {
        TransformationRecord {
            id: self.record_id,
            title: self.form.title.clone(),
            edit_type: self.edit_type,
            public_id: self.form.public_id.clone(),
            secure_url: self.image.secure_url.clone(),
            width: self.image.width,
            height: self.image.height,
            aspect_ratio: self.form.aspect_ratio.clone(),
            color: self.form.color.clone(),
            prompt: self.form.prompt.clone(),
            config: self.applied.clone().unwrap_or_default(),
            author_id: self.user_id.clone(),
        }
    }

    // ========== Event loop ==========

    /// Wait for the next background completion and apply it
    pub async fn step(&mut self) -> Option<SessionUpdate> {
        let event = self.events_rx.recv().await?;
        Some(self.handle_event(event))
    }

    /// Apply every completion that is already waiting
    pub fn pump(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            updates.push(self.handle_event(event));
        }
        updates
    }

    fn handle_event(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::FieldSettled { field, edit_type, value } => {
                self.settle_field(field, edit_type, value);
                SessionUpdate::FieldSettled { field, edit_type }
            }
            SessionEvent::RenderFinished { apply_id } => {
                if self.orchestrator.finish_render(apply_id) {
                    info!(apply_id, "transformation rendered");
                }
                SessionUpdate::RenderFinished { apply_id }
            }
            SessionEvent::CreditsSettled { apply_id, outcome } => {
                self.orchestrator.settle_debit(apply_id, &outcome);
                match outcome {
                    Ok(balance) => {
                        debug!(apply_id, balance, "credits debited");
                        SessionUpdate::CreditsDebited { apply_id, balance }
                    }
                    Err(error) => {
                        // The merged configuration stays applied either way
                        warn!(apply_id, %error, "credit debit failed");
                        SessionUpdate::CreditDebitFailed { apply_id, error }
                    }
                }
            }
            SessionEvent::SaveFinished { outcome } => {
                self.orchestrator.finish_save();
                match outcome {
                    Ok(record_id) => {
                        info!(record_id, "transformation saved");
                        self.record_id = Some(record_id);
                        self.action = FormAction::Update;
                        SessionUpdate::Saved { record_id }
                    }
                    Err(error) => {
                        warn!(%error, "saving transformation failed");
                        SessionUpdate::SaveFailed { error }
                    }
                }
            }
        }
    }

    fn settle_field(&mut self, field: TransformField, edit_type: EditType, value: String) {
        let mut pending = self.pending.take().unwrap_or_default();
        match pending.record(edit_type, field, value.clone()) {
            Ok(()) => {
                debug!(%field, %edit_type, "field settled");
                match field {
                    TransformField::Prompt => self.form.prompt = Some(value),
                    TransformField::Color => self.form.color = Some(value),
                }
            }
            Err(err) => warn!(%err, "settled field dropped"),
        }
        self.pending = (!pending.is_empty()).then_some(pending);
    }
}

impl std::fmt::Debug for FormSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("user_id", &self.user_id)
            .field("edit_type", &self.edit_type)
            .field("action", &self.action)
            .field("pending", &self.pending)
            .field("applied", &self.applied)
            .field("apply_state", &self.orchestrator.apply_state())
            .field("save_state", &self.orchestrator.save_state())
            .finish()
    }
}

#[cfg(test)]
mod tests;
