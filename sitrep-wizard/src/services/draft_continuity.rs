//! Draft continuity across side flows
//!
//! Leaving the wizard to create a Broadcaster or Program stashes the current
//! field values in a single local slot. Returning restores them once; the
//! slot is consumed by the first restore.

use crate::db::draft_slot;
use crate::models::fields::FieldValues;
use crate::models::records::EntityKind;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitrep_common::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Local slot key for the stashed draft
pub const DRAFT_SLOT_KEY: &str = "inspection_draft";

const SNAPSHOT_VERSION: u32 = 1;

/// Stored form of a stashed draft
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftSnapshot {
    pub version: u32,
    pub fields: FieldValues,
    pub stashed_at: DateTime<Utc>,
}

/// Where the wizard goes when it diverts to a side flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SideExit {
    pub kind: EntityKind,
    /// Name typed by the inspector, offered as the new entity's name
    pub prefill_name: Option<String>,
    /// Position to come back to
    pub return_to: String,
}

/// Entity created by a side flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedEntity {
    pub kind: EntityKind,
    pub name: String,
}

/// Signal sent when a side flow hands control back to the wizard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SideReturn {
    #[serde(default)]
    pub created: Option<CreatedEntity>,
    #[serde(default)]
    pub restore_draft: bool,
}

/// Stash/restore of in-progress field values
#[derive(Clone)]
pub struct DraftContinuity {
    pool: SqlitePool,
}

impl DraftContinuity {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Overwrite the slot with `fields`
    pub async fn stash(&self, fields: &FieldValues) -> Result<()> {
        let snapshot = DraftSnapshot {
            version: SNAPSHOT_VERSION,
            fields: fields.clone(),
            stashed_at: sitrep_common::time::now(),
        };
        let encoded = serde_json::to_string(&snapshot)?;

        retry_on_lock("stash_draft", DEFAULT_MAX_LOCK_WAIT_MS, || {
            draft_slot::put_slot(&self.pool, DRAFT_SLOT_KEY, &encoded)
        })
        .await?;

        debug!(fields = fields.len(), "Stashed inspection draft");
        Ok(())
    }

    /// Take the stashed values, leaving the slot empty
    ///
    /// A snapshot that cannot be read is discarded and treated as absent.
    pub async fn restore(&self) -> Result<Option<FieldValues>> {
        let raw = retry_on_lock("restore_draft", DEFAULT_MAX_LOCK_WAIT_MS, || {
            draft_slot::take_slot(&self.pool, DRAFT_SLOT_KEY)
        })
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<DraftSnapshot>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                debug!(fields = snapshot.fields.len(), "Restored inspection draft");
                Ok(Some(snapshot.fields))
            }
            Ok(snapshot) => {
                warn!(version = snapshot.version, "Discarding draft with unknown version");
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable draft: {}", e);
                Ok(None)
            }
        }
    }

    /// True if a draft is waiting in the slot
    pub async fn has_draft(&self) -> Result<bool> {
        Ok(draft_slot::peek_slot(&self.pool, DRAFT_SLOT_KEY)
            .await?
            .is_some())
    }
}
