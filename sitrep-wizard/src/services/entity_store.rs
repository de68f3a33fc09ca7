//! Client-side cache of Broadcaster and Program records
//!
//! Lookups are by exact name after trimming surrounding whitespace; case is
//! significant. The cache is refreshed from the backing store after every
//! creation and whenever it is older than the configured lifetime.

use crate::backend::{BackingStore, StoreError};
use crate::models::fields::FieldValues;
use crate::models::records::{Broadcaster, EntityKind, Program};
use crate::schema::BROADCASTER_CONTACT_FIELDS;
use sitrep_common::EntityId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared handle to the entity cache
pub type SharedEntityStore = Arc<RwLock<EntityStore>>;

/// Cached reference entities
#[derive(Debug, Default, Clone)]
pub struct EntityStore {
    broadcasters: Vec<Broadcaster>,
    programs: Vec<Program>,
    refreshed_at: Option<Instant>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedEntityStore {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn broadcasters(&self) -> &[Broadcaster] {
        &self.broadcasters
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn find_broadcaster(&self, name: &str) -> Option<&Broadcaster> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.broadcasters.iter().find(|b| b.name.trim() == name)
    }

    pub fn find_program(&self, name: &str) -> Option<&Program> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.programs.iter().find(|p| p.name.trim() == name)
    }

    /// Identity of the entity of `kind` named `name`
    pub fn find(&self, kind: EntityKind, name: &str) -> Option<EntityId> {
        match kind {
            EntityKind::Broadcaster => self.find_broadcaster(name).map(|b| b.id.clone()),
            EntityKind::Program => self.find_program(name).map(|p| p.id.clone()),
        }
    }

    /// Name of the entity of `kind` with identity `id`
    pub fn name_of(&self, kind: EntityKind, id: &EntityId) -> Option<String> {
        match kind {
            EntityKind::Broadcaster => self
                .broadcasters
                .iter()
                .find(|b| b.id == *id)
                .map(|b| b.name.clone()),
            EntityKind::Program => self
                .programs
                .iter()
                .find(|p| p.id == *id)
                .map(|p| p.name.clone()),
        }
    }

    /// Insert or replace a broadcaster (matched by identity)
    pub fn upsert_broadcaster(&mut self, broadcaster: Broadcaster) {
        match self.broadcasters.iter_mut().find(|b| b.id == broadcaster.id) {
            Some(existing) => *existing = broadcaster,
            None => self.broadcasters.push(broadcaster),
        }
    }

    /// Insert or replace a program (matched by identity)
    pub fn upsert_program(&mut self, program: Program) {
        match self.programs.iter_mut().find(|p| p.id == program.id) {
            Some(existing) => *existing = program,
            None => self.programs.push(program),
        }
    }

    /// Record a new program ↔ broadcaster association locally
    pub fn note_association(&mut self, program: &EntityId, broadcaster_name: &str) {
        if let Some(p) = self.programs.iter_mut().find(|p| p.id == *program) {
            if !p.broadcaster_names.iter().any(|n| n == broadcaster_name) {
                p.broadcaster_names.push(broadcaster_name.to_string());
            }
        }
    }

    pub fn replace_broadcasters(&mut self, broadcasters: Vec<Broadcaster>) {
        self.broadcasters = broadcasters;
    }

    pub fn replace_programs(&mut self, programs: Vec<Program>) {
        self.programs = programs;
    }

    pub fn mark_refreshed(&mut self, now: Instant) {
        self.refreshed_at = Some(now);
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    /// Never refreshed, or refreshed more than `ttl` ago
    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= ttl,
        }
    }

    /// Step-1 contact fields taken from the cached broadcaster `name`
    pub fn broadcaster_contact_fields(&self, name: &str) -> Option<FieldValues> {
        let broadcaster = self.find_broadcaster(name)?;
        let mut fields = FieldValues::new();
        for field in BROADCASTER_CONTACT_FIELDS {
            let value = broadcaster
                .details
                .get(*field)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            fields.set(*field, value);
        }
        Some(fields)
    }

    /// First broadcaster associated with the cached program `program_name`
    pub fn suggested_broadcaster(&self, program_name: &str) -> Option<String> {
        self.find_program(program_name)?
            .broadcaster_names
            .iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .map(str::to_string)
    }
}

/// Re-fetch both lists from the backing store
///
/// A list that fails to load keeps its previous contents; the first error is
/// returned after both lists were attempted.
pub async fn refresh(
    store: &SharedEntityStore,
    backend: &dyn BackingStore,
    now: Instant,
) -> Result<(), StoreError> {
    let broadcasters = backend.list_broadcasters().await;
    let programs = backend.list_programs().await;

    let mut cache = store.write().await;
    let mut first_error = None;

    match broadcasters {
        Ok(list) => {
            debug!(count = list.len(), "Refreshed broadcaster cache");
            cache.replace_broadcasters(list);
        }
        Err(e) => {
            warn!("Broadcaster list refresh failed, keeping cached entries: {}", e);
            first_error = Some(e);
        }
    }
    match programs {
        Ok(list) => {
            debug!(count = list.len(), "Refreshed program cache");
            cache.replace_programs(list);
        }
        Err(e) => {
            warn!("Program list refresh failed, keeping cached entries: {}", e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            cache.mark_refreshed(now);
            Ok(())
        }
    }
}

/// Refresh only when the cache is stale; failures are logged, not returned
pub async fn ensure_fresh(
    store: &SharedEntityStore,
    backend: &dyn BackingStore,
    now: Instant,
    ttl: Duration,
) {
    if !store.read().await.is_stale(now, ttl) {
        return;
    }
    if let Err(e) = refresh(store, backend, now).await {
        warn!("Entity cache refresh failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackingStore, Operation};
    use crate::models::records::Payload;
    use serde_json::json;

    fn broadcaster(id: i64, name: &str) -> Broadcaster {
        Broadcaster {
            id: EntityId::Numeric(id),
            name: name.to_string(),
            details: json!({ "town": "Garoua", "contact_email": "a@b.cm" })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_exact_trimmed_case_sensitive_lookup() {
        let mut store = EntityStore::new();
        store.upsert_broadcaster(broadcaster(1, "ABC Radio"));

        assert!(store.find_broadcaster("ABC Radio").is_some());
        assert!(store.find_broadcaster("  ABC Radio ").is_some());
        assert!(store.find_broadcaster("abc radio").is_none());
        assert!(store.find_broadcaster("").is_none());
    }

    #[test]
    fn test_upsert_replaces_by_identity() {
        let mut store = EntityStore::new();
        store.upsert_broadcaster(broadcaster(1, "Old"));
        store.upsert_broadcaster(broadcaster(1, "New"));
        assert_eq!(store.broadcasters().len(), 1);
        assert_eq!(
            store.name_of(EntityKind::Broadcaster, &EntityId::Numeric(1)).as_deref(),
            Some("New")
        );
    }

    #[test]
    fn test_contact_fields_cover_every_contact_field() {
        let mut store = EntityStore::new();
        store.upsert_broadcaster(broadcaster(1, "CRTV"));

        let fields = store.broadcaster_contact_fields("CRTV").unwrap();
        assert_eq!(fields.len(), BROADCASTER_CONTACT_FIELDS.len());
        assert_eq!(fields.text("town"), Some("Garoua"));
        assert_eq!(fields.text("po_box"), Some(""));
        assert!(store.broadcaster_contact_fields("Unknown").is_none());
    }

    #[test]
    fn test_suggested_broadcaster() {
        let mut store = EntityStore::new();
        store.upsert_program(Program {
            id: EntityId::Numeric(5),
            name: "Morning Show".to_string(),
            description: None,
            broadcaster_names: vec!["CRTV".to_string(), "Canal 2".to_string()],
        });
        assert_eq!(store.suggested_broadcaster("Morning Show").as_deref(), Some("CRTV"));
        assert_eq!(store.suggested_broadcaster("Evening Show"), None);
    }

    #[test]
    fn test_staleness() {
        let mut store = EntityStore::new();
        let t0 = Instant::now();
        let ttl = Duration::from_secs(300);
        assert!(store.is_stale(t0, ttl));

        store.mark_refreshed(t0);
        assert!(!store.is_stale(t0 + Duration::from_secs(299), ttl));
        assert!(store.is_stale(t0 + Duration::from_secs(300), ttl));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_entries() {
        let backend = MemoryBackingStore::new();
        backend.seed_broadcaster("CRTV", Payload::new());
        let store = EntityStore::shared();
        let now = Instant::now();

        refresh(&store, &backend, now).await.unwrap();
        assert_eq!(store.read().await.broadcasters().len(), 1);

        backend.seed_broadcaster("Canal 2", Payload::new());
        backend.fail_next(Operation::ListBroadcasters, StoreError::Network("down".into()));
        assert!(refresh(&store, &backend, now).await.is_err());
        assert_eq!(store.read().await.broadcasters().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_fresh_cache() {
        let backend = MemoryBackingStore::new();
        let store = EntityStore::shared();
        let now = Instant::now();
        let ttl = Duration::from_secs(300);

        ensure_fresh(&store, &backend, now, ttl).await;
        ensure_fresh(&store, &backend, now + Duration::from_secs(10), ttl).await;
        assert_eq!(backend.count(Operation::ListBroadcasters), 1);

        ensure_fresh(&store, &backend, now + Duration::from_secs(301), ttl).await;
        assert_eq!(backend.count(Operation::ListBroadcasters), 2);
    }
}
