use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use super::collab::{BoxFuture, CreditLedger, Persistence, RenderCompletion, RenderRequest, Renderer};
use super::orchestrator::{ApplyState, SaveState};
use super::*;
use crate::catalog::{AspectRatioCatalog, AspectRatioOption};
use crate::error::{ApplyBlock, FormError};

// ========== Fakes ==========

#[derive(Default)]
struct FakeLedger {
    calls: Mutex<Vec<(String, i64)>>,
    balance: Mutex<i64>,
    offline: bool,
    /// Hold every reply until `release` is called for it
    gated: bool,
    gates: Mutex<Vec<Option<oneshot::Sender<()>>>>,
}

impl FakeLedger {
    fn with_balance(balance: i64) -> Self {
        Self {
            balance: Mutex::new(balance),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }

    fn balance(&self) -> i64 {
        *self.balance.lock().unwrap()
    }

    /// Let the reply to the `index`-th call through
    fn release(&self, index: usize) {
        let gate = self.gates.lock().unwrap()[index].take();
        if let Some(gate) = gate {
            let _ = gate.send(());
        }
    }
}

impl CreditLedger for FakeLedger {
    fn update_credits(&self, user_id: &str, delta: i64) -> BoxFuture<std::result::Result<i64, LedgerError>> {
        self.calls.lock().unwrap().push((user_id.to_string(), delta));
        let outcome = if self.offline {
            Err(LedgerError::Unavailable("ledger offline".into()))
        } else {
            let mut balance = self.balance.lock().unwrap();
            *balance += delta;
            Ok(*balance)
        };
        if !self.gated {
            return Box::pin(async move { outcome });
        }
        let (gate, wait) = oneshot::channel();
        self.gates.lock().unwrap().push(Some(gate));
        Box::pin(async move {
            let _ = wait.await;
            outcome
        })
    }
}

/// Holds completions until the test finishes them
#[derive(Default)]
struct ManualRenderer {
    requests: Mutex<Vec<RenderRequest>>,
    completions: Mutex<Vec<RenderCompletion>>,
    drop_completions: bool,
}

impl ManualRenderer {
    fn finish_all(&self) {
        for done in self.completions.lock().unwrap().drain(..) {
            done.finish();
        }
    }

    fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Renderer for ManualRenderer {
    fn request_render(&self, request: RenderRequest, done: RenderCompletion) {
        self.requests.lock().unwrap().push(request);
        if !self.drop_completions {
            self.completions.lock().unwrap().push(done);
        }
    }
}

#[derive(Default)]
struct MemoryStore {
    saved: Mutex<Vec<(TransformationRecord, FormAction)>>,
}

impl Persistence for MemoryStore {
    fn save(&self, record: TransformationRecord, action: FormAction) -> BoxFuture<std::result::Result<i64, PersistError>> {
        let mut saved = self.saved.lock().unwrap();
        let id = record.id.unwrap_or(saved.len() as i64 + 1);
        saved.push((record, action));
        Box::pin(async move { Ok(id) })
    }
}

struct Harness {
    session: FormSession,
    ledger: Arc<FakeLedger>,
    renderer: Arc<ManualRenderer>,
    store: Arc<MemoryStore>,
}

fn settings() -> Arc<EditorConfig> {
    let mut options = AspectRatioCatalog::default().options().to_vec();
    options.push(AspectRatioOption {
        key: "square".into(),
        label: "Square".into(),
        aspect_ratio: "1:1".into(),
        width: 1000,
        height: 1000,
    });
    Arc::new(EditorConfig {
        aspect_ratios: AspectRatioCatalog::new(options),
        ..EditorConfig::default()
    })
}

fn build(options: SessionOptions, ledger: FakeLedger, renderer: ManualRenderer) -> Harness {
    let ledger = Arc::new(ledger);
    let renderer = Arc::new(renderer);
    let store = Arc::new(MemoryStore::default());
    let collaborators = Collaborators {
        ledger: ledger.clone(),
        renderer: renderer.clone(),
        persistence: store.clone(),
    };
    Harness {
        session: FormSession::new(settings(), options, collaborators),
        ledger,
        renderer,
        store,
    }
}

fn harness(edit_type: EditType, balance: i64) -> Harness {
    build(
        SessionOptions::new("u1", edit_type, balance),
        FakeLedger::with_balance(balance),
        ManualRenderer::default(),
    )
}

async fn step_until(session: &mut FormSession, mut wanted: impl FnMut(&SessionUpdate) -> bool) -> SessionUpdate {
    loop {
        let update = time::timeout(Duration::from_secs(60), session.step())
            .await
            .expect("no session event arrived")
            .expect("session inbox closed");
        if wanted(&update) {
            return update;
        }
    }
}

async fn settle(session: &mut FormSession) {
    step_until(session, |u| matches!(u, SessionUpdate::FieldSettled { .. })).await;
}

fn pending_config(session: &FormSession) -> Value {
    Value::Object(session.pending().map(PendingEdit::to_config).unwrap_or_default())
}

fn applied_config(session: &FormSession) -> Value {
    session.applied().cloned().unwrap_or_default().into_value()
}

// ========== Ratio selection ==========

#[test]
fn test_ratio_selection_arms_fill() {
    let mut h = harness(EditType::Fill, 5);
    h.session.on_upload(UploadedImage {
        public_id: "imaginify/dunes".into(),
        width: 640,
        height: 480,
        secure_url: "https://cdn.example/dunes.jpg".into(),
    });
    assert!(!h.session.can_apply());

    h.session.select_aspect_ratio("square").unwrap();

    let image = h.session.image();
    assert_eq!(image.public_id, "imaginify/dunes");
    assert_eq!(image.aspect_ratio.as_deref(), Some("1:1"));
    assert_eq!((image.width, image.height), (Some(1000), Some(1000)));
    assert_eq!(h.session.form().aspect_ratio.as_deref(), Some("square"));
    assert_eq!(
        pending_config(&h.session),
        json!({ "fill": { "fillBackground": true, "to": "1:1" } })
    );
    assert!(h.session.can_apply());
}

#[test]
fn test_unknown_ratio_changes_nothing() {
    let mut h = harness(EditType::Fill, 5);
    let before = h.session.image().clone();

    let err = h.session.select_aspect_ratio("2:1").unwrap_err();

    assert!(matches!(err, EditorError::UnknownRatioKey(_)));
    assert_eq!(h.session.image(), &before);
    assert!(h.session.pending().is_none());
    assert!(h.session.form().aspect_ratio.is_none());
}

#[test]
fn test_arm_defaults_for_parameterless_type() {
    let mut h = harness(EditType::Restore, 5);
    assert!(!h.session.can_apply());

    h.session.arm_defaults();

    assert_eq!(pending_config(&h.session), json!({ "restore": { "restore": true } }));
    assert!(h.session.can_apply());
}

// ========== Debounced fields ==========

#[tokio::test(start_paused = true)]
async fn test_typing_coalesces_per_field() {
    let mut h = harness(EditType::Remove, 5);
    let start = Instant::now();

    for value in ["c", "ca", "cat"] {
        h.session
            .record_field_change(TransformField::Prompt, value, EditType::Remove)
            .unwrap();
        time::sleep(Duration::from_millis(300)).await;
    }
    // last keystroke at 600ms; quiet period ends at 1600ms
    time::sleep(Duration::from_millis(699)).await;
    assert!(h.session.pump().is_empty());
    assert!(h.session.pending().is_none());
    assert!(h.session.is_settling(TransformField::Prompt, EditType::Remove));

    settle(&mut h.session).await;
    assert_eq!(Instant::now() - start, Duration::from_millis(1600));
    assert_eq!(pending_config(&h.session), json!({ "remove": { "prompt": "cat" } }));
    assert_eq!(h.session.form().prompt.as_deref(), Some("cat"));

    assert!(time::timeout(Duration::from_secs(10), h.session.step()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_fields_settle_independently() {
    let mut h = harness(EditType::Recolor, 5);

    h.session
        .record_field_change(TransformField::Prompt, "cat", EditType::Remove)
        .unwrap();
    h.session
        .record_field_change(TransformField::Color, "red", EditType::Recolor)
        .unwrap();
    settle(&mut h.session).await;
    settle(&mut h.session).await;

    assert_eq!(
        pending_config(&h.session),
        json!({ "remove": { "prompt": "cat" }, "recolor": { "to": "red" } })
    );
    assert_eq!(h.session.form().color.as_deref(), Some("red"));
}

#[tokio::test(start_paused = true)]
async fn test_color_keeps_prompt() {
    let mut h = harness(EditType::Recolor, 5);

    h.session
        .record_field_change(TransformField::Prompt, "shirt", EditType::Recolor)
        .unwrap();
    settle(&mut h.session).await;
    h.session
        .record_field_change(TransformField::Color, "teal", EditType::Recolor)
        .unwrap();
    settle(&mut h.session).await;

    assert_eq!(
        pending_config(&h.session),
        json!({ "recolor": { "prompt": "shirt", "to": "teal" } })
    );
}

#[test]
fn test_field_on_wrong_type_rejected() {
    let mut h = harness(EditType::Remove, 5);
    let err = h
        .session
        .record_field_change(TransformField::Color, "red", EditType::Remove)
        .unwrap_err();
    assert!(matches!(err, EditorError::FieldNotApplicable { .. }));
    assert!(!h.session.is_settling(TransformField::Color, EditType::Remove));
}

#[tokio::test(start_paused = true)]
async fn test_discard_cancels_settling_values() {
    let mut h = harness(EditType::Remove, 5);
    h.session.arm_defaults();
    h.session
        .record_field_change(TransformField::Prompt, "tree", EditType::Remove)
        .unwrap();

    h.session.discard_pending();

    assert!(h.session.pending().is_none());
    assert!(time::timeout(Duration::from_secs(5), h.session.step()).await.is_err());
    assert!(h.session.pending().is_none());
}

// ========== Apply ==========

#[tokio::test(start_paused = true)]
async fn test_apply_gating() {
    let mut h = harness(EditType::Remove, 5);
    assert!(matches!(
        h.session.apply(),
        Err(EditorError::ApplyBlocked(ApplyBlock::NothingPending))
    ));

    h.session
        .record_field_change(TransformField::Prompt, "cat", EditType::Remove)
        .unwrap();
    assert!(!h.session.can_apply());
    settle(&mut h.session).await;
    assert!(h.session.can_apply());

    let apply_id = h.session.apply().unwrap();
    assert_eq!(h.session.apply_state(), ApplyState::Transforming { apply_id });
    assert!(h.session.pending().is_none());
    assert!(!h.session.can_apply());

    // a new edit settles while the render is running
    h.session
        .record_field_change(TransformField::Prompt, "dog", EditType::Remove)
        .unwrap();
    settle(&mut h.session).await;
    assert!(h.session.pending().is_some());
    assert!(!h.session.can_apply());
    assert!(matches!(
        h.session.apply(),
        Err(EditorError::ApplyBlocked(ApplyBlock::Transforming))
    ));

    h.renderer.finish_all();
    step_until(&mut h.session, |u| matches!(u, SessionUpdate::RenderFinished { .. })).await;
    assert_eq!(h.session.apply_state(), ApplyState::Idle);
    assert!(h.session.can_apply());
}

#[tokio::test(start_paused = true)]
async fn test_apply_snapshot_is_atomic() {
    let mut h = harness(EditType::Remove, 5);
    h.session
        .record_field_change(TransformField::Prompt, "cat", EditType::Remove)
        .unwrap();
    settle(&mut h.session).await;

    // still inside its quiet period when apply runs
    h.session
        .record_field_change(TransformField::Prompt, "dog", EditType::Remove)
        .unwrap();
    h.session.apply().unwrap();

    assert!(h.session.pending().is_none());
    assert_eq!(applied_config(&h.session), json!({ "remove": { "prompt": "cat" } }));

    settle(&mut h.session).await;
    assert_eq!(pending_config(&h.session), json!({ "remove": { "prompt": "dog" } }));
    assert_eq!(applied_config(&h.session), json!({ "remove": { "prompt": "cat" } }));
}

#[tokio::test(start_paused = true)]
async fn test_apply_merges_into_previous_config() {
    let mut options = SessionOptions::new("u1", EditType::Fill, 5);
    options.config = Some(
        AppliedConfiguration::from_value(json!({ "fill": { "to": "16:9", "quality": 80 } })).unwrap(),
    );
    let mut h = build(options, FakeLedger::with_balance(5), ManualRenderer::default());

    h.session.select_aspect_ratio("square").unwrap();
    let apply_id = h.session.apply().unwrap();

    let expected = json!({ "fill": { "to": "1:1", "quality": 80, "fillBackground": true } });
    assert_eq!(applied_config(&h.session), expected);

    let requests = h.renderer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].apply_id, apply_id);
    assert_eq!(requests[0].edit_type, EditType::Fill);
    assert_eq!(requests[0].image.width, Some(1000));
    assert_eq!(requests[0].config.clone().into_value(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_apply_debits_one_credit() {
    let mut h = harness(EditType::Recolor, 5);
    for (field, value) in [
        (TransformField::Prompt, "car"),
        (TransformField::Prompt, "red car"),
        (TransformField::Color, "blue"),
    ] {
        h.session.record_field_change(field, value, EditType::Recolor).unwrap();
    }
    settle(&mut h.session).await;
    settle(&mut h.session).await;

    h.session.apply().unwrap();
    assert_eq!(h.ledger.calls(), vec![("u1".to_string(), -1)]);
    assert_eq!(h.session.credit_balance(), 4);

    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::CreditsDebited { .. })).await;
    assert!(matches!(update, SessionUpdate::CreditsDebited { balance: 4, .. }));
    assert_eq!(h.session.credit_balance(), 4);
    assert_eq!(h.ledger.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_debit_keeps_applied_config() {
    let ledger = FakeLedger {
        offline: true,
        ..FakeLedger::with_balance(5)
    };
    let mut h = build(
        SessionOptions::new("u1", EditType::Remove, 5),
        ledger,
        ManualRenderer::default(),
    );
    h.session
        .record_field_change(TransformField::Prompt, "lamp", EditType::Remove)
        .unwrap();
    settle(&mut h.session).await;

    h.session.apply().unwrap();
    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::CreditDebitFailed { .. })).await;

    assert!(matches!(
        update,
        SessionUpdate::CreditDebitFailed { error: LedgerError::Unavailable(_), .. }
    ));
    assert_eq!(h.ledger.calls(), vec![("u1".to_string(), -1)]);
    // no rollback, no re-arm; only the credit reservation is released
    assert_eq!(applied_config(&h.session), json!({ "remove": { "prompt": "lamp" } }));
    assert!(h.session.pending().is_none());
    assert_eq!(h.session.credit_balance(), 5);
    assert!(matches!(h.session.apply_state(), ApplyState::Transforming { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_credits_blocks_apply() {
    let mut h = harness(EditType::Fill, 0);
    h.session.select_aspect_ratio("3:4").unwrap();

    assert!(!h.session.can_apply());
    assert!(matches!(
        h.session.apply(),
        Err(EditorError::ApplyBlocked(ApplyBlock::InsufficientCredits { balance: 0, fee: -1 }))
    ));
    assert!(h.session.pending().is_some());
    assert!(h.session.applied().is_none());
    assert!(h.ledger.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shape_conflict_rejects_apply() {
    let mut options = SessionOptions::new("u1", EditType::Fill, 5);
    options.config = Some(AppliedConfiguration::from_value(json!({ "fill": true })).unwrap());
    let mut h = build(options, FakeLedger::with_balance(5), ManualRenderer::default());
    h.session.select_aspect_ratio("square").unwrap();
    let before = pending_config(&h.session);

    let err = h.session.apply().unwrap_err();

    assert!(matches!(err, EditorError::MergeInputInvalid { ref path } if path == "fill"));
    assert_eq!(pending_config(&h.session), before);
    assert_eq!(applied_config(&h.session), json!({ "fill": true }));
    assert_eq!(h.session.apply_state(), ApplyState::Idle);
    assert_eq!(h.session.credit_balance(), 5);
    assert!(h.ledger.calls().is_empty());
    assert!(h.renderer.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_debits_keep_newest_balance() {
    let ledger = FakeLedger {
        gated: true,
        ..FakeLedger::with_balance(2)
    };
    let mut h = build(SessionOptions::new("u1", EditType::Fill, 2), ledger, ManualRenderer::default());

    let mut apply_ids = Vec::new();
    for _ in 0..2 {
        h.session.select_aspect_ratio("square").unwrap();
        apply_ids.push(h.session.apply().unwrap());
        h.renderer.finish_all();
        step_until(&mut h.session, |u| matches!(u, SessionUpdate::RenderFinished { .. })).await;
    }
    assert_eq!(h.session.credit_balance(), 0);

    // the ledger answers the second debit first
    h.ledger.release(1);
    let newest = apply_ids[1];
    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::CreditsDebited { .. })).await;
    assert!(matches!(update, SessionUpdate::CreditsDebited { apply_id, balance: 0 } if apply_id == newest));

    h.ledger.release(0);
    let oldest = apply_ids[0];
    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::CreditsDebited { .. })).await;
    assert!(matches!(update, SessionUpdate::CreditsDebited { apply_id, balance: 1 } if apply_id == oldest));

    assert_eq!(h.ledger.balance(), 0);
    assert_eq!(h.session.credit_balance(), 0);
    h.session.select_aspect_ratio("square").unwrap();
    assert!(!h.session.can_apply());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_completion_returns_to_idle() {
    let renderer = ManualRenderer {
        drop_completions: true,
        ..Default::default()
    };
    let mut h = build(
        SessionOptions::new("u1", EditType::Fill, 5),
        FakeLedger::with_balance(5),
        renderer,
    );
    h.session.select_aspect_ratio("1:1").unwrap();
    let apply_id = h.session.apply().unwrap();

    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::RenderFinished { .. })).await;
    assert!(matches!(update, SessionUpdate::RenderFinished { apply_id: id } if id == apply_id));
    assert_eq!(h.session.apply_state(), ApplyState::Idle);
}

// ========== Save ==========

#[tokio::test(start_paused = true)]
async fn test_save_flow() {
    let mut h = harness(EditType::Recolor, 5);

    assert!(matches!(
        h.session.save(),
        Err(EditorError::Form(FormError::MissingImage))
    ));
    assert_eq!(h.session.save_state(), SaveState::Idle);

    h.session.on_upload(UploadedImage {
        public_id: "imaginify/car".into(),
        width: 800,
        height: 600,
        secure_url: "https://cdn.example/car.jpg".into(),
    });
    h.session.set_title("Blue car");
    h.session
        .record_field_change(TransformField::Color, "blue", EditType::Recolor)
        .unwrap();
    settle(&mut h.session).await;
    h.session.apply().unwrap();

    h.session.save().unwrap();
    assert_eq!(h.session.save_state(), SaveState::Submitting);
    assert!(!h.session.can_save());
    assert!(matches!(h.session.save(), Err(EditorError::SaveInProgress)));

    let update = step_until(&mut h.session, |u| matches!(u, SessionUpdate::Saved { .. })).await;
    assert!(matches!(update, SessionUpdate::Saved { record_id: 1 }));
    assert_eq!(h.session.save_state(), SaveState::Idle);
    assert_eq!(h.session.action(), FormAction::Update);
    assert_eq!(h.session.record_id(), Some(1));

    {
        let saved = h.store.saved.lock().unwrap();
        let (record, action) = &saved[0];
        assert_eq!(*action, FormAction::Add);
        assert_eq!(record.title, "Blue car");
        assert_eq!(record.public_id, "imaginify/car");
        assert_eq!(record.author_id, "u1");
        assert_eq!(record.color.as_deref(), Some("blue"));
        assert_eq!(record.width, Some(800));
        assert_eq!(record.config.clone().into_value(), json!({ "recolor": { "to": "blue" } }));
    }

    // a second save updates the same record
    h.session.save().unwrap();
    step_until(&mut h.session, |u| matches!(u, SessionUpdate::Saved { .. })).await;
    let saved = h.store.saved.lock().unwrap();
    assert_eq!(saved[1].1, FormAction::Update);
    assert_eq!(saved[1].0.id, Some(1));
}

#[test]
fn test_update_session_starts_from_record() {
    let record = ImageRecord {
        id: 9,
        title: "Garden".into(),
        edit_type: EditType::Remove,
        public_id: "imaginify/garden".into(),
        secure_url: None,
        width: Some(1024),
        height: Some(768),
        aspect_ratio: None,
        color: None,
        prompt: Some("hose".into()),
        config: Some(AppliedConfiguration::from_value(json!({ "remove": { "prompt": "hose" } })).unwrap()),
        author_id: "u1".into(),
        created_at: 0,
        updated_at: 0,
    };

    let mut options = SessionOptions::new("u1", EditType::Remove, 5);
    options.action = FormAction::Update;
    options.data = Some(record.clone());
    let h = build(options, FakeLedger::with_balance(5), ManualRenderer::default());

    assert_eq!(h.session.form().title, "Garden");
    assert_eq!(h.session.form().prompt.as_deref(), Some("hose"));
    assert_eq!(h.session.image().width, Some(1024));
    assert_eq!(h.session.record_id(), Some(9));
    assert_eq!(applied_config(&h.session), json!({ "remove": { "prompt": "hose" } }));

    // adding from a record only takes over its image
    let mut options = SessionOptions::new("u1", EditType::Remove, 5);
    options.data = Some(record);
    let h = build(options, FakeLedger::with_balance(5), ManualRenderer::default());
    assert_eq!(h.session.image().public_id, "imaginify/garden");
    assert_eq!((h.session.image().width, h.session.image().height), (Some(1024), Some(768)));
    assert_eq!(h.session.form(), &FormValues::default());
    assert!(h.session.applied().is_none());
    assert_eq!(h.session.record_id(), None);
}
