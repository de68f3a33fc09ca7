//! Session controller
//!
//! Drives one wizard instance: field edits, the debounced auto-save, the
//! save pipeline, navigation across the four steps, preview and completion,
//! and the excursion to a Broadcaster/Program side flow.
//!
//! Session state sits behind a tokio mutex that is never held across a
//! backing store call. Saves are serialized by a second lock and pick up the
//! inspection id once they hold it, so a save queued behind the creating save
//! updates that record. Navigation saves on steps without synchronous
//! validation run in the background. A result that arrives after a new
//! wizard instance started is dropped.

use crate::backend::{BackingStore, StoreError};
use crate::models::fields::{FieldValue, FieldValues};
use crate::models::records::{EntityKind, InspectionRecord};
use crate::models::session::{
    Advisory, AutosaveStatus, InspectionStatus, Session, SessionView, WizardPosition,
};
use crate::schema::{self, FieldKind, Step};
use crate::services::debounce::DebounceTimer;
use crate::services::draft_continuity::{DraftContinuity, SideExit, SideReturn};
use crate::services::entity_resolver::{EntityResolver, ResolutionOutcome};
use crate::services::entity_store::{self, EntityStore, SharedEntityStore};
use crate::services::erp;
use crate::services::partitioner::{build_completion_payload, build_step_payload, UnsetFields};
use crate::services::validation::{validate_step, FieldErrors};
use sitrep_common::events::{EventBus, SessionEvent};
use sitrep_common::ids::new_instance_token;
use sitrep_common::time::{self, Clock, SystemClock};
use sitrep_common::EntityId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Quiet period before an auto-save
pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_secs(10);

/// Lifetime of the entity cache
pub const DEFAULT_ENTITY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Misuse of the controller
///
/// Backing store failures during saves are not errors here; they are
/// reported through [`SaveOutcome`] and the session's advisories.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Field '{field}' is not part of {step}")]
    FieldNotInStep { field: String, step: String },

    #[error("Field '{0}' is calculated and cannot be edited")]
    ReadOnlyField(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cannot {action} from {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("Inspection is already completed")]
    Finished,

    #[error("Session was replaced while the operation was running")]
    Superseded,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Local(#[from] sitrep_common::Error),
}

fn invalid(from: WizardPosition, action: &'static str) -> SessionError {
    match from {
        WizardPosition::Completed => SessionError::Finished,
        other => SessionError::InvalidTransition {
            from: other.to_string(),
            action,
        },
    }
}

/// Result of one run of the save pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        inspection_id: EntityId,
        created: bool,
    },
    /// Nothing worth saving
    Skipped,
    /// Running in the background; the result shows up in the session's
    /// autosave status and events
    Pending,
    Failed(StoreError),
    /// Session was replaced while the save was in flight
    Stale,
}

impl SaveOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SaveOutcome::Saved { .. } => "saved",
            SaveOutcome::Skipped => "skipped",
            SaveOutcome::Pending => "pending",
            SaveOutcome::Failed(_) => "failed",
            SaveOutcome::Stale => "stale",
        }
    }
}

/// Result of `advance` / `preview`
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Moved {
        from: WizardPosition,
        to: WizardPosition,
        save: SaveOutcome,
    },
    /// Synchronous validation failed; the wizard stays put
    Blocked { errors: FieldErrors },
    /// Completion was refused or failed; the wizard stays put
    NotCompleted { message: String },
}

/// Collaborators shared by every session
#[derive(Clone)]
pub struct EngineServices {
    pub backend: Arc<dyn BackingStore>,
    pub entities: SharedEntityStore,
    pub drafts: DraftContinuity,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub debounce: Duration,
    pub entity_ttl: Duration,
}

impl EngineServices {
    pub fn new(backend: Arc<dyn BackingStore>, drafts: DraftContinuity, events: EventBus) -> Self {
        Self {
            backend,
            entities: EntityStore::shared(),
            drafts,
            clock: Arc::new(SystemClock),
            events,
            debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            entity_ttl: DEFAULT_ENTITY_CACHE_TTL,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_entity_ttl(mut self, entity_ttl: Duration) -> Self {
        self.entity_ttl = entity_ttl;
        self
    }
}

struct ControllerState {
    session: Session,
    timer: DebounceTimer,
}

struct Inner {
    services: EngineServices,
    resolver: EntityResolver,
    state: Mutex<ControllerState>,
    save_lock: Mutex<()>,
}

/// What a save works from, captured at its start
struct SaveSnapshot {
    instance: Uuid,
    step: Step,
    inspection_id: Option<EntityId>,
    fields: FieldValues,
    hydrated: bool,
}

/// Handle to the wizard session; clones share the session
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(services: EngineServices) -> Self {
        let resolver = EntityResolver::new(
            Arc::clone(&services.backend),
            Arc::clone(&services.entities),
            Arc::clone(&services.clock),
        );
        let mut session = Session::new(new_instance_token());
        session.hydrated = true;
        let timer = DebounceTimer::new(services.debounce);

        Self {
            inner: Arc::new(Inner {
                services,
                resolver,
                state: Mutex::new(ControllerState { session, timer }),
                save_lock: Mutex::new(()),
            }),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.inner.services
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.services.events
    }

    pub async fn view(&self) -> SessionView {
        self.inner.state.lock().await.session.view()
    }

    /// Full copy of the session state
    pub async fn snapshot(&self) -> Session {
        self.inner.state.lock().await.session.clone()
    }

    /// Start a new wizard instance at step 1
    ///
    /// With an id, step 1 is populated from the stored inspection. A load
    /// failure other than "not found" still starts the wizard, with an
    /// advisory; saves then leave unknown stored values untouched.
    pub async fn start(&self, inspection_id: Option<EntityId>) -> Result<SessionView, SessionError> {
        let services = &self.inner.services;
        entity_store::ensure_fresh(
            &services.entities,
            services.backend.as_ref(),
            services.clock.now(),
            services.entity_ttl,
        )
        .await;

        let mut session = Session::new(new_instance_token());
        session.hydrated = true;
        let mut load_error = None;

        if let Some(id) = inspection_id {
            match services.backend.get_inspection(&id).await {
                Ok(record) if record.is_completed() => return Err(SessionError::Finished),
                Ok(record) => {
                    session.fields = self.step_fields_from_record(Step::One, &record).await;
                }
                Err(e @ StoreError::NotFound(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(inspection_id = %id, "Could not load inspection, starting with empty step: {}", e);
                    session.hydrated = false;
                    load_error = Some(e);
                }
            }
            session.inspection_id = Some(id);
        }

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let from = state.session.position;
        state.timer.cancel();
        state.session = session;
        if let Some(e) = load_error {
            self.advise(
                &mut state.session,
                Advisory::LoadFailed {
                    message: e.user_message(),
                },
            );
        }
        info!(
            instance = %state.session.instance,
            inspection_id = ?state.session.inspection_id,
            "Started inspection wizard"
        );
        self.emit_step_changed(&state.session, from);
        Ok(state.session.view())
    }

    /// Record an edit on the active step and re-arm the auto-save timer
    pub async fn on_field_change(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<SessionView, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let session = &mut state.session;

        let step = session
            .step()
            .ok_or_else(|| invalid(session.position, "edit fields"))?;
        if schema::is_derived(name) {
            return Err(SessionError::ReadOnlyField(name.to_string()));
        }
        if !schema::is_editable(step, name) {
            return Err(SessionError::FieldNotInStep {
                field: name.to_string(),
                step: step.to_string(),
            });
        }

        let value = normalize(name, value.into())?;
        session.fields.set(name, value);
        session.dirty = true;
        session.validation_errors.remove(name);

        match step {
            Step::One => {
                let entities = self.inner.services.entities.read().await;
                if let Some(advisory) = apply_reference_rules(&mut session.fields, name, &entities) {
                    self.advise(session, advisory);
                }
            }
            Step::Four if erp::is_input(name) => {
                erp::recompute(&mut session.fields, &session.derived_inputs);
            }
            _ => {}
        }

        state.timer.arm(self.inner.services.clock.now());
        Ok(state.session.view())
    }

    /// Spawn the auto-save if the debounce timer has expired
    pub async fn poll_autosave(&self) -> Option<JoinHandle<SaveOutcome>> {
        let due = {
            let mut state = self.inner.state.lock().await;
            let now = self.inner.services.clock.now();
            state.timer.fire(now)
        };
        if !due {
            return None;
        }
        let controller = self.clone();
        Some(tokio::spawn(async move { controller.autosave_tick().await }))
    }

    /// Timer callback: save if the active step holds meaningful values
    pub async fn autosave_tick(&self) -> SaveOutcome {
        let meaningful = {
            let state = self.inner.state.lock().await;
            save_step(state.session.position)
                .is_some_and(|step| schema::is_meaningful(step, &state.session.fields))
        };
        if !meaningful {
            debug!("Auto-save skipped: nothing meaningful entered");
            return SaveOutcome::Skipped;
        }
        self.run_save().await
    }

    /// Save the active step now, cancelling any pending auto-save
    pub async fn save_now(&self) -> Result<SaveOutcome, SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            if save_step(state.session.position).is_none() {
                return Err(invalid(state.session.position, "save"));
            }
            state.timer.cancel();
        }
        Ok(self.run_save().await)
    }

    /// Save, then move forward; on step 4 or preview this completes the
    /// inspection
    ///
    /// Only steps with synchronous validation wait for the save, and only a
    /// validation failure there blocks the move. Other steps move at once
    /// while the save runs in the background.
    pub async fn advance(&self) -> Result<AdvanceOutcome, SessionError> {
        let position = self.inner.state.lock().await.session.position;
        match position {
            WizardPosition::Step(Step::Four) | WizardPosition::Preview => self.complete().await,
            WizardPosition::Step(step) => self.advance_from(step).await,
            other => Err(invalid(other, "advance")),
        }
    }

    async fn advance_from(&self, step: Step) -> Result<AdvanceOutcome, SessionError> {
        let sync = schema::has_sync_validation(step);
        let (instance, snapshot) = {
            let mut state = self.inner.state.lock().await;
            if state.session.position != WizardPosition::Step(step) {
                return Err(SessionError::Superseded);
            }
            if sync {
                let errors = validate_step(step, &state.session.fields);
                if !errors.is_empty() {
                    debug!(step = step.number(), "Advance blocked: {}", errors);
                    state.session.validation_errors = errors.clone();
                    return Ok(AdvanceOutcome::Blocked { errors });
                }
            }
            state.timer.cancel();
            let snapshot = if worth_saving(step, &state.session) {
                self.begin_save(&mut state.session)
            } else {
                None
            };
            (state.session.instance, snapshot)
        };

        let save = match snapshot {
            None => SaveOutcome::Skipped,
            Some(snapshot) if sync => self.save_snapshot(snapshot).await,
            Some(snapshot) => {
                self.spawn_save(snapshot);
                SaveOutcome::Pending
            }
        };
        match &save {
            SaveOutcome::Stale => return Err(SessionError::Superseded),
            SaveOutcome::Failed(StoreError::Validation(errors)) if sync => {
                return Ok(AdvanceOutcome::Blocked {
                    errors: errors.clone(),
                });
            }
            SaveOutcome::Failed(e) => {
                warn!(step = step.number(), "Advancing despite failed save: {}", e);
            }
            _ => {}
        }

        let next = step
            .next()
            .ok_or_else(|| invalid(WizardPosition::Step(step), "advance"))?;
        self.enter_step(instance, next).await?;
        Ok(AdvanceOutcome::Moved {
            from: WizardPosition::Step(step),
            to: WizardPosition::Step(next),
            save,
        })
    }

    /// Move back one step without saving; edits are carried forward
    pub async fn retreat(&self) -> Result<SessionView, SessionError> {
        let (instance, target) = {
            let mut state = self.inner.state.lock().await;
            let position = state.session.position;
            let target = match position {
                WizardPosition::Step(step) => step.prev().ok_or_else(|| invalid(position, "go back"))?,
                WizardPosition::Preview => Step::Four,
                other => return Err(invalid(other, "go back")),
            };
            state.timer.cancel();
            (state.session.instance, target)
        };

        self.enter_step(instance, target).await?;
        Ok(self.view().await)
    }

    /// Show the preview, saving step 4 in the background
    pub async fn preview(&self) -> Result<AdvanceOutcome, SessionError> {
        let mut state = self.inner.state.lock().await;
        let position = state.session.position;
        if position != WizardPosition::Step(Step::Four) {
            return Err(invalid(position, "preview"));
        }
        state.timer.cancel();

        let snapshot = if worth_saving(Step::Four, &state.session) {
            self.begin_save(&mut state.session)
        } else {
            None
        };
        let save = match snapshot {
            Some(snapshot) => {
                self.spawn_save(snapshot);
                SaveOutcome::Pending
            }
            None => SaveOutcome::Skipped,
        };

        let from = state.session.position;
        state.session.position = WizardPosition::Preview;
        self.emit_step_changed(&state.session, from);
        Ok(AdvanceOutcome::Moved {
            from,
            to: WizardPosition::Preview,
            save,
        })
    }

    /// Mark the inspection completed
    ///
    /// Unlike step saves, completion is not best-effort: without an
    /// identity, or when the store refuses, the wizard stays where it is.
    async fn complete(&self) -> Result<AdvanceOutcome, SessionError> {
        let (instance, from, needs_save) = {
            let mut state = self.inner.state.lock().await;
            state.timer.cancel();
            let session = &state.session;
            (
                session.instance,
                session.position,
                session.inspection_id.is_none() || session.dirty,
            )
        };

        if needs_save && self.run_save().await == SaveOutcome::Stale {
            return Err(SessionError::Superseded);
        }

        let _serial = self.inner.save_lock.lock().await;
        let (inspection_id, fields) = {
            let state = self.inner.state.lock().await;
            if state.session.instance != instance {
                return Err(SessionError::Superseded);
            }
            (
                state.session.inspection_id.clone(),
                state.session.fields.clone(),
            )
        };

        let Some(id) = inspection_id else {
            let message =
                "Inspection has not been saved yet - please save before completing".to_string();
            warn!("Completion refused: inspection has no identity");
            let mut state = self.inner.state.lock().await;
            self.advise(
                &mut state.session,
                Advisory::SaveFailed {
                    message: message.clone(),
                },
            );
            return Ok(AdvanceOutcome::NotCompleted { message });
        };

        let payload = build_completion_payload(&fields, time::now());
        let result = self
            .inner
            .services
            .backend
            .update_inspection(&id, &payload)
            .await;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.session.instance != instance {
            return Err(SessionError::Superseded);
        }
        let session = &mut state.session;

        match result {
            Ok(_) => {
                session.status = InspectionStatus::Completed;
                session.position = WizardPosition::Completed;
                session.dirty = false;
                session.autosave_status = AutosaveStatus::Saved;
                session.last_saved_at = Some(time::now());
                session.validation_errors = FieldErrors::new();
                state.timer.cancel();

                info!(inspection_id = %id, "Inspection completed");
                self.emit_status(session);
                self.inner
                    .services
                    .events
                    .emit_lossy(SessionEvent::InspectionCompleted {
                        instance,
                        inspection_id: id.to_string(),
                        timestamp: time::now(),
                    });
                self.emit_step_changed(session, from);

                Ok(AdvanceOutcome::Moved {
                    from,
                    to: WizardPosition::Completed,
                    save: SaveOutcome::Saved {
                        inspection_id: id,
                        created: false,
                    },
                })
            }
            Err(e) => {
                warn!(inspection_id = %id, "Completion failed: {}", e);
                let message = e.user_message();
                session.autosave_status = AutosaveStatus::Error;
                if let Some(errors) = e.field_errors() {
                    session.validation_errors = errors.clone();
                }
                self.advise(
                    session,
                    Advisory::SaveFailed {
                        message: message.clone(),
                    },
                );
                self.emit_status(session);
                Ok(AdvanceOutcome::NotCompleted { message })
            }
        }
    }

    /// Stash step 1 and leave for a side flow that creates `kind`
    pub async fn divert(
        &self,
        kind: EntityKind,
        prefill_name: Option<String>,
    ) -> Result<SideExit, SessionError> {
        let (instance, fields) = {
            let mut state = self.inner.state.lock().await;
            let position = state.session.position;
            if position != WizardPosition::Step(Step::One) {
                return Err(invalid(position, "leave for a side flow"));
            }
            state.timer.cancel();
            (state.session.instance, state.session.fields.clone())
        };

        self.inner.services.drafts.stash(&fields).await?;

        let mut state = self.inner.state.lock().await;
        if state.session.instance != instance {
            return Err(SessionError::Superseded);
        }
        let from = state.session.position;
        state.session.position = WizardPosition::Diverted;
        self.emit_step_changed(&state.session, from);
        info!(%kind, "Left wizard for side flow");

        let prefill_name = prefill_name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| fields.non_blank(kind.name_field()).map(str::to_string));
        Ok(SideExit {
            kind,
            prefill_name,
            return_to: Step::One.to_string(),
        })
    }

    /// Come back to step 1 from a side flow
    ///
    /// The stashed draft is laid over the current values, since the wizard
    /// may have been re-entered from the stored record in the meantime. The
    /// name of a newly created entity then overrides whatever was typed.
    pub async fn return_from_side_flow(
        &self,
        signal: SideReturn,
    ) -> Result<SessionView, SessionError> {
        let services = &self.inner.services;
        let instance = {
            let state = self.inner.state.lock().await;
            match state.session.position {
                WizardPosition::Diverted | WizardPosition::Step(Step::One) => {}
                other => return Err(invalid(other, "return from a side flow")),
            }
            state.session.instance
        };

        let restored = if signal.restore_draft {
            services.drafts.restore().await?
        } else {
            None
        };

        if signal.created.is_some() {
            if let Err(e) =
                entity_store::refresh(&services.entities, services.backend.as_ref(), services.clock.now())
                    .await
            {
                warn!("Entity cache refresh after side flow failed: {}", e);
            }
        }

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.session.instance != instance {
            return Err(SessionError::Superseded);
        }
        let session = &mut state.session;

        if let Some(restored) = restored {
            session.fields.merge_from(&restored);
        }
        if let Some(created) = &signal.created {
            let field = created.kind.name_field();
            session.fields.set(field, created.name.trim());
            let entities = services.entities.read().await;
            if let Some(advisory) = apply_reference_rules(&mut session.fields, field, &entities) {
                self.advise(session, advisory);
            }
        }

        let from = session.position;
        session.position = WizardPosition::Step(Step::One);
        session.dirty = true;
        state.timer.arm(services.clock.now());
        self.emit_step_changed(&state.session, from);
        info!(
            created = ?signal.created.as_ref().map(|c| c.kind),
            "Returned to wizard from side flow"
        );
        Ok(state.session.view())
    }

    /// Save the active step and wait for the result
    async fn run_save(&self) -> SaveOutcome {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            self.begin_save(&mut state.session)
        };
        match snapshot {
            Some(snapshot) => self.save_snapshot(snapshot).await,
            None => SaveOutcome::Skipped,
        }
    }

    /// Capture the active step for a save and mark the session as saving
    fn begin_save(&self, session: &mut Session) -> Option<SaveSnapshot> {
        let step = save_step(session.position)?;
        session.autosave_status = AutosaveStatus::Saving;
        self.emit_status(session);
        Some(SaveSnapshot {
            instance: session.instance,
            step,
            inspection_id: session.inspection_id.clone(),
            fields: session.fields.clone(),
            hydrated: session.hydrated,
        })
    }

    /// Write a captured step without holding up the caller
    fn spawn_save(&self, snapshot: SaveSnapshot) {
        let controller = self.clone();
        tokio::spawn(async move {
            let step = snapshot.step.number();
            let outcome = controller.save_snapshot(snapshot).await;
            debug!(step, result = outcome.label(), "Background save finished");
        });
    }

    /// The save pipeline
    async fn save_snapshot(&self, mut snapshot: SaveSnapshot) -> SaveOutcome {
        let services = &self.inner.services;
        let _serial = self.inner.save_lock.lock().await;

        if snapshot.inspection_id.is_none() {
            let state = self.inner.state.lock().await;
            if state.session.instance != snapshot.instance {
                return SaveOutcome::Stale;
            }
            snapshot.inspection_id = state.session.inspection_id.clone();
        }
        debug!(
            step = snapshot.step.number(),
            inspection_id = ?snapshot.inspection_id,
            "Saving inspection step"
        );

        let resolution = if snapshot.step == Step::One {
            entity_store::ensure_fresh(
                &services.entities,
                services.backend.as_ref(),
                services.clock.now(),
                services.entity_ttl,
            )
            .await;
            self.inner.resolver.resolve_references(&snapshot.fields).await
        } else {
            ResolutionOutcome::default()
        };

        let unset = if snapshot.hydrated {
            UnsetFields::Explicit
        } else {
            UnsetFields::Omit
        };
        let first_save = snapshot.inspection_id.is_none().then(time::today);
        let payload = build_step_payload(
            snapshot.step,
            &snapshot.fields,
            &resolution.references,
            first_save,
            unset,
        );

        let result = match &snapshot.inspection_id {
            Some(id) => services.backend.update_inspection(id, &payload).await,
            None => services.backend.create_inspection(&payload).await,
        };

        let mut state = self.inner.state.lock().await;
        let session = &mut state.session;
        let replaced = session.instance != snapshot.instance
            || (snapshot.inspection_id.is_some() && session.inspection_id != snapshot.inspection_id);
        if replaced {
            debug!(step = snapshot.step.number(), "Dropping save result for a replaced session");
            return SaveOutcome::Stale;
        }

        for advisory in resolution.advisories {
            self.advise(session, advisory);
        }

        match result {
            Ok(record) => {
                let created = snapshot.inspection_id.is_none();
                if created && session.inspection_id.is_none() {
                    session.inspection_id = Some(record.id.clone());
                    services.events.emit_lossy(SessionEvent::InspectionCreated {
                        instance: session.instance,
                        inspection_id: record.id.to_string(),
                        timestamp: time::now(),
                    });
                }
                session.autosave_status = AutosaveStatus::Saved;
                session.last_saved_at = Some(time::now());
                if save_step(session.position) == Some(snapshot.step)
                    && session.fields == snapshot.fields
                {
                    session.dirty = false;
                    session.validation_errors = FieldErrors::new();
                }
                self.emit_status(session);
                info!(
                    inspection_id = %record.id,
                    step = snapshot.step.number(),
                    created,
                    "Saved inspection step"
                );
                SaveOutcome::Saved {
                    inspection_id: record.id,
                    created,
                }
            }
            Err(e) => {
                warn!(
                    step = snapshot.step.number(),
                    inspection_id = ?snapshot.inspection_id,
                    retryable = e.is_retryable(),
                    "Save failed: {}", e
                );
                session.autosave_status = AutosaveStatus::Error;
                if save_step(session.position) == Some(snapshot.step) {
                    if let Some(errors) = e.field_errors() {
                        session.validation_errors = errors.clone();
                    }
                }
                self.advise(
                    session,
                    Advisory::SaveFailed {
                        message: e.user_message(),
                    },
                );
                self.emit_status(session);
                SaveOutcome::Failed(e)
            }
        }
    }

    /// Make `target` the active step, populated from the stored record
    /// overlaid with values carried from earlier visits
    async fn enter_step(&self, instance: Uuid, target: Step) -> Result<(), SessionError> {
        let inspection_id = {
            let mut state = self.inner.state.lock().await;
            if state.session.instance != instance {
                return Err(SessionError::Superseded);
            }
            let session = &mut state.session;
            let current = session.fields.clone();
            session.carried.merge_from(&current);
            session.inspection_id.clone()
        };

        let mut load_error = None;
        let record = match &inspection_id {
            Some(id) => match self.inner.services.backend.get_inspection(id).await {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(inspection_id = %id, step = target.number(), "Could not load inspection: {}", e);
                    load_error = Some(e);
                    None
                }
            },
            None => None,
        };
        let loaded = match &record {
            Some(record) => self.step_fields_from_record(target, record).await,
            None => FieldValues::new(),
        };

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.session.instance != instance {
            return Err(SessionError::Superseded);
        }
        let session = &mut state.session;

        let mut fields = loaded;
        fields.merge_from(&session.carried.filtered(|name| schema::is_session_field(target, name)));

        if target == Step::Four {
            let is_power = |name: &str| erp::POWER_FIELDS.contains(&name);
            let mut inputs = record
                .as_ref()
                .map(|r| FieldValues::from_json_object(&r.fields).filtered(is_power))
                .unwrap_or_default();
            inputs.merge_from(&session.carried.filtered(is_power));
            erp::recompute(&mut fields, &inputs);
            session.derived_inputs = inputs;
        }

        let from = session.position;
        session.position = WizardPosition::Step(target);
        session.fields = fields;
        session.hydrated = record.is_some() || inspection_id.is_none();
        session.dirty = false;
        session.validation_errors = FieldErrors::new();
        if let Some(e) = load_error {
            self.advise(
                session,
                Advisory::LoadFailed {
                    message: e.user_message(),
                },
            );
        }
        state.timer.cancel();

        debug!(step = target.number(), hydrated = state.session.hydrated, "Entered step");
        self.emit_step_changed(&state.session, from);
        Ok(())
    }

    /// Values of `step` held by a stored record
    ///
    /// Step 1 also recovers the typed names from the record's read-only name
    /// attributes, falling back to the entity cache.
    async fn step_fields_from_record(&self, step: Step, record: &InspectionRecord) -> FieldValues {
        let mut fields = FieldValues::from_json_object(&record.fields)
            .filtered(|name| schema::is_session_field(step, name));

        if step == Step::One {
            let entities = self.inner.services.entities.read().await;
            for kind in [EntityKind::Program, EntityKind::Broadcaster] {
                if fields.has_value(kind.name_field()) {
                    continue;
                }
                let name = record
                    .reference(kind.reference_field())
                    .and_then(|id| entities.name_of(kind, &id));
                if let Some(name) = name {
                    fields.set(kind.name_field(), name);
                }
            }
        }
        fields
    }

    fn advise(&self, session: &mut Session, advisory: Advisory) {
        self.inner.services.events.emit_lossy(SessionEvent::Advisory {
            instance: session.instance,
            message: advisory.message(),
            timestamp: time::now(),
        });
        session.push_advisory(advisory);
    }

    fn emit_status(&self, session: &Session) {
        self.inner
            .services
            .events
            .emit_lossy(SessionEvent::AutosaveStatusChanged {
                instance: session.instance,
                status: session.autosave_status.as_str().to_string(),
                last_saved_at: session.last_saved_at,
                timestamp: time::now(),
            });
    }

    fn emit_step_changed(&self, session: &Session, from: WizardPosition) {
        self.inner.services.events.emit_lossy(SessionEvent::StepChanged {
            instance: session.instance,
            from: from.to_string(),
            to: session.position.to_string(),
            timestamp: time::now(),
        });
    }
}

/// Step whose fields a save at `position` writes
fn save_step(position: WizardPosition) -> Option<Step> {
    match position {
        WizardPosition::Step(step) => Some(step),
        WizardPosition::Preview => Some(Step::Four),
        WizardPosition::Diverted | WizardPosition::Completed => None,
    }
}

/// A navigation save is issued for real input, or to push edits (including
/// cleared fields) to an existing record
fn worth_saving(step: Step, session: &Session) -> bool {
    schema::is_meaningful(step, &session.fields)
        || (session.inspection_id.is_some() && session.dirty)
}

fn normalize(name: &str, value: FieldValue) -> Result<FieldValue, SessionError> {
    match (schema::field_kind(name), value) {
        (Some(FieldKind::Flag), FieldValue::Text(text)) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(FieldValue::Flag(true)),
                "false" | "0" | "no" | "off" | "" => Ok(FieldValue::Flag(false)),
                _ => Err(SessionError::InvalidValue {
                    field: name.to_string(),
                    reason: format!("expected true or false, got \"{}\"", text),
                }),
            }
        }
        (Some(FieldKind::Text), FieldValue::Flag(_)) => Err(SessionError::InvalidValue {
            field: name.to_string(),
            reason: "expected text".to_string(),
        }),
        (_, value) => Ok(value),
    }
}

/// Step-1 auto-fill after `changed` was edited
///
/// A broadcaster name matching a cached Broadcaster copies its contact
/// fields. A program name matching a cached Program with associated
/// broadcasters fills in the first of them while no broadcaster is named.
fn apply_reference_rules(
    fields: &mut FieldValues,
    changed: &str,
    entities: &EntityStore,
) -> Option<Advisory> {
    match changed {
        "broadcaster_name" => {
            let contact = fields
                .non_blank("broadcaster_name")
                .and_then(|name| entities.broadcaster_contact_fields(name));
            if let Some(contact) = contact {
                fields.merge_from(&contact);
            }
            None
        }
        "program_name" if !fields.has_value("broadcaster_name") => {
            let suggested = fields
                .non_blank("program_name")
                .and_then(|program| entities.suggested_broadcaster(program))?;
            fields.set("broadcaster_name", suggested.clone());
            if let Some(contact) = entities.broadcaster_contact_fields(&suggested) {
                fields.merge_from(&contact);
            }
            Some(Advisory::BroadcasterSuggested { name: suggested })
        }
        _ => None,
    }
}
