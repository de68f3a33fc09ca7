//! Entity resolution: typed names → durable identities
//!
//! A name already in the entity cache resolves to the cached identity. An
//! unknown name is created on the backing store, inserted into the cache and
//! the cache is re-fetched. Program resolves before Broadcaster, and when
//! either was just created the two are associated. Creation and association
//! failures become advisories; they never fail the inspection save.

use crate::backend::{BackingStore, StoreError};
use crate::models::fields::FieldValues;
use crate::models::records::{EntityKind, Payload};
use crate::models::session::Advisory;
use crate::schema::BROADCASTER_CONTACT_FIELDS;
use crate::services::entity_store::{self, SharedEntityStore};
use crate::services::partitioner::References;
use serde_json::Value;
use sitrep_common::time::Clock;
use sitrep_common::EntityId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity produced by [`EntityResolver::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: EntityId,
    /// True when the entity was created by this call
    pub created: bool,
}

/// Result of resolving both step-1 references
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionOutcome {
    pub references: References,
    pub advisories: Vec<Advisory>,
}

/// Find-or-create resolver over the shared entity cache
#[derive(Clone)]
pub struct EntityResolver {
    backend: Arc<dyn BackingStore>,
    entities: SharedEntityStore,
    clock: Arc<dyn Clock>,
}

impl EntityResolver {
    pub fn new(
        backend: Arc<dyn BackingStore>,
        entities: SharedEntityStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            entities,
            clock,
        }
    }

    /// Resolve `name` to an identity, creating the entity if it is unknown
    ///
    /// Blank names resolve to `None` without any call.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: Payload,
    ) -> Result<Option<Resolved>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        if let Some(id) = self.entities.read().await.find(kind, name) {
            debug!(%kind, name, id = %id, "Resolved from entity cache");
            return Ok(Some(Resolved { id, created: false }));
        }

        let mut attributes = attributes;
        attributes.insert("name".to_string(), Value::String(name.to_string()));

        let id = match kind {
            EntityKind::Program => {
                let program = self.backend.create_program(&attributes).await?;
                let id = program.id.clone();
                self.entities.write().await.upsert_program(program);
                id
            }
            EntityKind::Broadcaster => {
                let broadcaster = self.backend.create_broadcaster(&attributes).await?;
                let id = broadcaster.id.clone();
                self.entities.write().await.upsert_broadcaster(broadcaster);
                id
            }
        };
        info!(%kind, name, id = %id, "Created entity");

        self.refresh_after_create(kind, name, &id).await;
        Ok(Some(Resolved { id, created: true }))
    }

    /// Re-fetch the cache, keeping the created entity if the listing lags
    async fn refresh_after_create(&self, kind: EntityKind, name: &str, id: &EntityId) {
        let before = self.entities.read().await.clone();
        if let Err(e) =
            entity_store::refresh(&self.entities, self.backend.as_ref(), self.clock.now()).await
        {
            warn!(%kind, "Entity cache refresh after creation failed: {}", e);
        }

        let mut cache = self.entities.write().await;
        if cache.find(kind, name).is_none() {
            match kind {
                EntityKind::Program => {
                    if let Some(p) = before.programs().iter().find(|p| p.id == *id) {
                        cache.upsert_program(p.clone());
                    }
                }
                EntityKind::Broadcaster => {
                    if let Some(b) = before.broadcasters().iter().find(|b| b.id == *id) {
                        cache.upsert_broadcaster(b.clone());
                    }
                }
            }
        }
    }

    /// Resolve the program and broadcaster named in step-1 `fields`
    pub async fn resolve_references(&self, fields: &FieldValues) -> ResolutionOutcome {
        let mut outcome = ResolutionOutcome::default();
        let program_name = fields.non_blank("program_name").map(str::to_string);
        let broadcaster_name = fields.non_blank("broadcaster_name").map(str::to_string);

        let program = match &program_name {
            Some(name) => {
                self.resolve_or_advise(
                    EntityKind::Program,
                    name,
                    program_attributes(broadcaster_name.as_deref()),
                    &mut outcome.advisories,
                )
                .await
            }
            None => None,
        };

        let broadcaster = match &broadcaster_name {
            Some(name) => {
                self.resolve_or_advise(
                    EntityKind::Broadcaster,
                    name,
                    broadcaster_attributes(fields),
                    &mut outcome.advisories,
                )
                .await
            }
            None => None,
        };

        if let (Some(p), Some(b), Some(p_name), Some(b_name)) =
            (&program, &broadcaster, &program_name, &broadcaster_name)
        {
            if p.created || b.created {
                match self.backend.add_broadcaster_to_program(&p.id, &b.id).await {
                    Ok(()) => {
                        debug!(program = %p.id, broadcaster = %b.id, "Associated broadcaster with program");
                        self.entities.write().await.note_association(&p.id, b_name);
                    }
                    Err(e) => {
                        warn!(program = %p.id, broadcaster = %b.id, "Could not associate broadcaster with program: {}", e);
                        outcome.advisories.push(Advisory::AssociationFailed {
                            program: p_name.clone(),
                            broadcaster: b_name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        outcome.references = References {
            program: program.map(|r| r.id),
            broadcaster: broadcaster.map(|r| r.id),
        };
        outcome
    }

    async fn resolve_or_advise(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: Payload,
        advisories: &mut Vec<Advisory>,
    ) -> Option<Resolved> {
        match self.resolve(kind, name, attributes).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(%kind, name, "Entity creation failed, saving without reference: {}", e);
                advisories.push(Advisory::EntityCreationFailed {
                    entity: kind,
                    name: name.to_string(),
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

/// Attributes for a new Program
pub fn program_attributes(broadcaster_name: Option<&str>) -> Payload {
    let mut attributes = Payload::new();
    attributes.insert(
        "description".to_string(),
        Value::String(format!(
            "Program for {}",
            broadcaster_name.unwrap_or("inspection")
        )),
    );
    attributes
}

/// Attributes for a new Broadcaster: the step-1 contact fields
pub fn broadcaster_attributes(fields: &FieldValues) -> Payload {
    BROADCASTER_CONTACT_FIELDS
        .iter()
        .map(|name| {
            let value = fields.text(name).unwrap_or("").to_string();
            (name.to_string(), Value::String(value))
        })
        .collect()
}
