//! In-process backing store
//!
//! Behaves like the REST store for everything the session engine relies on:
//! numeric identities, partial "set" updates, read-only `program_name` /
//! `broadcaster_name` on inspection records and `broadcaster_names` on
//! programs. Used by the binary's `--offline` mode and by tests, which can
//! inject failures, hold a call open and inspect every call made.

use super::{BackingStore, StoreError};
use crate::models::records::{Broadcaster, InspectionRecord, Payload, Program};
use crate::services::validation::FieldErrors;
use async_trait::async_trait;
use serde_json::Value;
use sitrep_common::EntityId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Backing store operation, used to target failures and holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetInspection,
    CreateInspection,
    UpdateInspection,
    ListBroadcasters,
    CreateBroadcaster,
    ListPrograms,
    CreateProgram,
    AddBroadcaster,
    RemoveBroadcaster,
}

/// One call as seen by the store
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub target: Option<EntityId>,
    pub payload: Option<Payload>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    inspections: BTreeMap<EntityId, (Option<String>, Payload)>,
    broadcasters: Vec<Broadcaster>,
    programs: Vec<Program>,
    associations: Vec<(EntityId, EntityId)>,
    failures: HashMap<Operation, VecDeque<StoreError>>,
    holds: HashMap<Operation, Arc<Notify>>,
    calls: Vec<RecordedCall>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::Numeric(self.next_id)
    }

    fn program_view(&self, program: &Program) -> Program {
        let broadcaster_names = self
            .associations
            .iter()
            .filter(|(p, _)| *p == program.id)
            .filter_map(|(_, b)| self.broadcasters.iter().find(|x| x.id == *b))
            .map(|b| b.name.clone())
            .collect();
        Program {
            broadcaster_names,
            ..program.clone()
        }
    }

    fn inspection_view(&self, id: &EntityId) -> Option<InspectionRecord> {
        let (status, stored) = self.inspections.get(id)?;
        let mut fields = stored.clone();

        let program_name = stored
            .get("program")
            .and_then(EntityId::from_json)
            .and_then(|r| self.programs.iter().find(|p| p.id == r))
            .map(|p| p.name.clone());
        let broadcaster_name = stored
            .get("broadcaster")
            .and_then(EntityId::from_json)
            .and_then(|r| self.broadcasters.iter().find(|b| b.id == r))
            .map(|b| b.name.clone());
        if let Some(name) = program_name {
            fields.insert("program_name".to_string(), Value::String(name));
        }
        if let Some(name) = broadcaster_name {
            fields.insert("broadcaster_name".to_string(), Value::String(name));
        }

        Some(InspectionRecord {
            id: id.clone(),
            status: status.clone(),
            fields,
        })
    }
}

/// In-memory [`BackingStore`]
#[derive(Clone, Default)]
pub struct MemoryBackingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next call of `operation` fail with `error`
    ///
    /// Multiple injected failures for one operation are consumed in order.
    pub fn fail_next(&self, operation: Operation, error: StoreError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Hold the next call of `operation` until the returned handle is notified
    pub fn hold_next(&self, operation: Operation) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.lock().holds.insert(operation, Arc::clone(&notify));
        notify
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls of one operation
    pub fn calls_of(&self, operation: Operation) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.calls_of(operation).len()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Add a broadcaster without recording a call
    pub fn seed_broadcaster(&self, name: &str, details: Payload) -> EntityId {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.broadcasters.push(Broadcaster {
            id: id.clone(),
            name: name.to_string(),
            details,
        });
        id
    }

    /// Add a program, optionally associated with existing broadcasters
    pub fn seed_program(&self, name: &str, broadcasters: &[EntityId]) -> EntityId {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.programs.push(Program {
            id: id.clone(),
            name: name.to_string(),
            description: None,
            broadcaster_names: Vec::new(),
        });
        for b in broadcasters {
            state.associations.push((id.clone(), b.clone()));
        }
        id
    }

    /// Add an inspection record without recording a call
    pub fn seed_inspection(&self, status: &str, fields: Payload) -> EntityId {
        let mut state = self.lock();
        let id = state.allocate_id();
        state
            .inspections
            .insert(id.clone(), (Some(status.to_string()), fields));
        id
    }

    /// Current stored view of an inspection
    pub fn inspection(&self, id: &EntityId) -> Option<InspectionRecord> {
        self.lock().inspection_view(id)
    }

    pub fn broadcaster_count(&self) -> usize {
        self.lock().broadcasters.len()
    }

    pub fn program_count(&self) -> usize {
        self.lock().programs.len()
    }

    /// True if `broadcaster` is associated with `program`
    pub fn is_associated(&self, program: &EntityId, broadcaster: &EntityId) -> bool {
        self.lock()
            .associations
            .iter()
            .any(|(p, b)| p == program && b == broadcaster)
    }

    /// Record the call, then apply any hold and injected failure
    async fn begin(
        &self,
        operation: Operation,
        target: Option<&EntityId>,
        payload: Option<&Payload>,
    ) -> Result<(), StoreError> {
        let hold = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                operation,
                target: target.cloned(),
                payload: payload.cloned(),
            });
            state.holds.remove(&operation)
        };

        if let Some(notify) = hold {
            notify.notified().await;
        }

        let mut state = self.lock();
        match state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn required_name(attributes: &Payload) -> Result<String, StoreError> {
    match attributes.get("name").and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => {
            let mut errors = FieldErrors::new();
            errors.add("name", "This field may not be blank.");
            Err(StoreError::Validation(errors))
        }
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn get_inspection(&self, id: &EntityId) -> Result<InspectionRecord, StoreError> {
        self.begin(Operation::GetInspection, Some(id), None).await?;
        self.lock()
            .inspection_view(id)
            .ok_or_else(|| StoreError::NotFound(format!("GET /inspections/{}", id)))
    }

    async fn create_inspection(&self, payload: &Payload) -> Result<InspectionRecord, StoreError> {
        self.begin(Operation::CreateInspection, None, Some(payload))
            .await?;
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut fields = payload.clone();
        let status = fields
            .remove("status")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| Some("draft".to_string()));
        state.inspections.insert(id.clone(), (status, fields));
        state
            .inspection_view(&id)
            .ok_or_else(|| StoreError::NotFound(format!("POST /inspections -> {}", id)))
    }

    async fn update_inspection(
        &self,
        id: &EntityId,
        payload: &Payload,
    ) -> Result<InspectionRecord, StoreError> {
        self.begin(Operation::UpdateInspection, Some(id), Some(payload))
            .await?;
        let mut state = self.lock();
        let Some((status, stored)) = state.inspections.get_mut(id) else {
            return Err(StoreError::NotFound(format!("PUT /inspections/{}", id)));
        };
        for (key, value) in payload {
            match key.as_str() {
                // Read-only on the real store
                "id" | "program_name" | "broadcaster_name" => {}
                "status" => *status = value.as_str().map(str::to_string),
                _ => {
                    stored.insert(key.clone(), value.clone());
                }
            }
        }
        state
            .inspection_view(id)
            .ok_or_else(|| StoreError::NotFound(format!("PUT /inspections/{}", id)))
    }

    async fn list_broadcasters(&self) -> Result<Vec<Broadcaster>, StoreError> {
        self.begin(Operation::ListBroadcasters, None, None).await?;
        Ok(self.lock().broadcasters.clone())
    }

    async fn create_broadcaster(&self, attributes: &Payload) -> Result<Broadcaster, StoreError> {
        self.begin(Operation::CreateBroadcaster, None, Some(attributes))
            .await?;
        let name = required_name(attributes)?;
        let mut details = attributes.clone();
        details.remove("name");
        details.remove("id");

        let mut state = self.lock();
        let broadcaster = Broadcaster {
            id: state.allocate_id(),
            name,
            details,
        };
        state.broadcasters.push(broadcaster.clone());
        Ok(broadcaster)
    }

    async fn list_programs(&self) -> Result<Vec<Program>, StoreError> {
        self.begin(Operation::ListPrograms, None, None).await?;
        let state = self.lock();
        Ok(state.programs.iter().map(|p| state.program_view(p)).collect())
    }

    async fn create_program(&self, attributes: &Payload) -> Result<Program, StoreError> {
        self.begin(Operation::CreateProgram, None, Some(attributes))
            .await?;
        let name = required_name(attributes)?;
        let description = attributes
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut state = self.lock();
        let program = Program {
            id: state.allocate_id(),
            name,
            description,
            broadcaster_names: Vec::new(),
        };
        state.programs.push(program.clone());
        Ok(program)
    }

    async fn add_broadcaster_to_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError> {
        self.begin(Operation::AddBroadcaster, Some(program), None)
            .await?;
        let mut state = self.lock();
        if !state.programs.iter().any(|p| p.id == *program) {
            return Err(StoreError::NotFound(format!("program {}", program)));
        }
        if !state.broadcasters.iter().any(|b| b.id == *broadcaster) {
            return Err(StoreError::NotFound(format!("broadcaster {}", broadcaster)));
        }
        let pair = (program.clone(), broadcaster.clone());
        if !state.associations.contains(&pair) {
            state.associations.push(pair);
        }
        Ok(())
    }

    async fn remove_broadcaster_from_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError> {
        self.begin(Operation::RemoveBroadcaster, Some(program), None)
            .await?;
        let mut state = self.lock();
        state
            .associations
            .retain(|(p, b)| !(p == program && b == broadcaster));
        Ok(())
    }
}
