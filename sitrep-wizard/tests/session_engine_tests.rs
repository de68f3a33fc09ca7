//! End-to-end behaviour of the inspection session engine against the
//! in-memory backing store

use serde_json::json;
use sitrep_common::events::{EventBus, SessionEvent};
use sitrep_common::time::ManualClock;
use sitrep_common::EntityId;
use sitrep_wizard::backend::memory::{MemoryBackingStore, Operation};
use sitrep_wizard::backend::{BackingStore, StoreError};
use sitrep_wizard::db::{init_database, init_memory_database};
use sitrep_wizard::models::fields::FieldValues;
use sitrep_wizard::models::records::{EntityKind, Payload};
use sitrep_wizard::models::session::{Advisory, AutosaveStatus};
use sitrep_wizard::schema::{self, Step};
use sitrep_wizard::services::draft_continuity::CreatedEntity;
use sitrep_wizard::services::validation::FieldErrors;
use sitrep_wizard::services::{
    AdvanceOutcome, DraftContinuity, EngineServices, SaveOutcome, SessionController, SessionError,
    SideReturn,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const QUIET: Duration = Duration::from_secs(10);

struct Harness {
    controller: SessionController,
    backend: MemoryBackingStore,
    clock: ManualClock,
    events: EventBus,
}

async fn harness() -> Harness {
    let backend = MemoryBackingStore::new();
    let clock = ManualClock::new();
    let events = EventBus::new(256);
    let drafts = DraftContinuity::new(init_memory_database().await.unwrap());
    let services = EngineServices::new(Arc::new(backend.clone()), drafts, events.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_debounce(QUIET);
    Harness {
        controller: SessionController::new(services),
        backend,
        clock,
        events,
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn moved_to(outcome: &AdvanceOutcome) -> Option<String> {
    match outcome {
        AdvanceOutcome::Moved { to, .. } => Some(to.to_string()),
        _ => None,
    }
}

#[tokio::test]
async fn test_edit_burst_saves_once_with_final_values() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();

    for (i, name) in ["Mont", "Mont Fe", "Mont Febe"].into_iter().enumerate() {
        if i > 0 {
            h.clock.advance(Duration::from_secs(3));
        }
        h.controller
            .on_field_change("transmitting_site_name", name)
            .await
            .unwrap();
        assert!(h.controller.poll_autosave().await.is_none());
    }

    h.clock.advance(Duration::from_secs(9));
    assert!(h.controller.poll_autosave().await.is_none());

    h.clock.advance(Duration::from_secs(1));
    let handle = h.controller.poll_autosave().await.unwrap();
    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { created: true, .. }));

    assert!(h.controller.poll_autosave().await.is_none());
    let saves = h.backend.calls_of(Operation::CreateInspection);
    assert_eq!(saves.len(), 1);
    assert_eq!(h.backend.count(Operation::UpdateInspection), 0);
    assert_eq!(
        saves[0].payload.as_ref().unwrap()["transmitting_site_name"],
        json!("Mont Febe")
    );
}

#[tokio::test]
async fn test_every_save_payload_stays_within_one_step() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();

    let edits: [(&str, &str); 4] = [
        ("transmitting_site_name", "Mont Febe"),
        ("tower_type", "guyed"),
        ("amplifier_actual_reading", "100"),
        ("antenna_gain", "10"),
    ];
    for (i, (field, value)) in edits.iter().enumerate() {
        h.controller.on_field_change(field, *value).await.unwrap();
        h.controller.save_now().await.unwrap();
        if i < 3 {
            assert!(moved_to(&h.controller.advance().await.unwrap()).is_some());
        }
    }

    let top_level: HashSet<&str> = schema::CREATION_FIELDS
        .iter()
        .chain(schema::REFERENCE_FIELDS)
        .copied()
        .collect();
    let writes: Vec<_> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c.operation,
                Operation::CreateInspection | Operation::UpdateInspection
            )
        })
        .collect();
    assert!(writes.len() >= 4);

    let mut steps_seen = HashSet::new();
    for call in &writes {
        let payload = call.payload.as_ref().unwrap();
        let steps: HashSet<Step> = payload
            .keys()
            .filter(|k| !top_level.contains(k.as_str()))
            .map(|k| schema::step_of(k).unwrap_or_else(|| panic!("unknown key {}", k)))
            .collect();
        assert_eq!(steps.len(), 1, "payload spans steps: {:?}", payload.keys());
        steps_seen.extend(steps);
    }
    assert_eq!(steps_seen.len(), 4);

    let id = h.controller.view().await.inspection_id.unwrap();
    let record = h.backend.inspection(&id).unwrap();
    assert_eq!(record.fields["transmitting_site_name"], json!("Mont Febe"));
    assert_eq!(record.fields["tower_type"], json!("guyed"));
    assert_eq!(record.fields["amplifier_actual_reading"], json!("100"));
    assert_eq!(record.fields["antenna_gain"], json!("10"));
}

#[tokio::test]
async fn test_reused_names_are_created_once() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.on_field_change("program_name", "Morning News").await.unwrap();
    h.controller.on_field_change("broadcaster_name", "CRTV").await.unwrap();
    h.controller.save_now().await.unwrap();

    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.save_now().await.unwrap();

    assert_eq!(h.backend.count(Operation::CreateProgram), 1);
    assert_eq!(h.backend.count(Operation::CreateBroadcaster), 1);
    assert_eq!(h.backend.count(Operation::AddBroadcaster), 1);

    let update = &h.backend.calls_of(Operation::UpdateInspection)[0];
    let update_payload = update.payload.as_ref().unwrap();
    assert!(update_payload.contains_key("program"));
    assert!(update_payload.contains_key("broadcaster"));
    assert!(!update_payload.contains_key("program_name"));
}

#[tokio::test]
async fn test_draft_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("sitrep.db")).await.unwrap();
    let drafts = DraftContinuity::new(pool);

    let fields: FieldValues = [
        ("program_name", "Morning News"),
        ("transmitting_site_name", "Mont Febe"),
    ]
    .into_iter()
    .collect();

    drafts.stash(&fields).await.unwrap();
    assert_eq!(drafts.restore().await.unwrap(), Some(fields));
    assert_eq!(drafts.restore().await.unwrap(), None);
}

#[tokio::test]
async fn test_network_failure_does_not_block_advance() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.backend.fail_next(
        Operation::CreateInspection,
        StoreError::Network("connection refused".into()),
    );

    let outcome = h.controller.advance().await.unwrap();
    match outcome {
        AdvanceOutcome::Moved { to, save, .. } => {
            assert_eq!(to.to_string(), "step2");
            assert!(matches!(save, SaveOutcome::Failed(StoreError::Network(_))));
        }
        other => panic!("expected move, got {:?}", other),
    }

    let view = h.controller.view().await;
    assert_eq!(view.step, Some(2));
    assert_eq!(view.autosave_status, AutosaveStatus::Error);
    assert!(view.advisories.iter().any(|a| matches!(
        a,
        Advisory::SaveFailed { message } if message.starts_with("Network error")
    )));
}

#[tokio::test]
async fn test_failed_association_still_saves_inspection() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.on_field_change("program_name", "Evening Show").await.unwrap();
    h.controller.on_field_change("broadcaster_name", "Canal 2").await.unwrap();
    h.backend.fail_next(
        Operation::AddBroadcaster,
        StoreError::Network("reset by peer".into()),
    );

    let outcome = h.controller.save_now().await.unwrap();
    let SaveOutcome::Saved { inspection_id, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };

    let view = h.controller.view().await;
    assert_eq!(view.autosave_status, AutosaveStatus::Saved);
    assert!(view
        .advisories
        .iter()
        .any(|a| matches!(a, Advisory::AssociationFailed { .. })));

    let programs = h.backend.list_programs().await.unwrap();
    let program = programs.iter().find(|p| p.name == "Evening Show").unwrap();
    let record = h.backend.inspection(&inspection_id).unwrap();
    assert_eq!(record.reference("program"), Some(program.id.clone()));
    assert_eq!(record.fields["program_name"], json!("Evening Show"));
}

#[tokio::test]
async fn test_entity_creation_failure_saves_without_reference() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.on_field_change("program_name", "Evening Show").await.unwrap();
    h.backend.fail_next(
        Operation::CreateProgram,
        StoreError::Network("timeout".into()),
    );

    let outcome = h.controller.save_now().await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));

    let create = &h.backend.calls_of(Operation::CreateInspection)[0];
    assert!(!create.payload.as_ref().unwrap().contains_key("program"));
    assert!(h
        .controller
        .view()
        .await
        .advisories
        .iter()
        .any(|a| matches!(a, Advisory::EntityCreationFailed { .. })));
}

#[tokio::test]
async fn test_result_for_replaced_session_is_dropped() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Old site")
        .await
        .unwrap();

    let hold = h.backend.hold_next(Operation::CreateInspection);
    let controller = h.controller.clone();
    let in_flight = tokio::spawn(async move { controller.save_now().await });
    while h.backend.count(Operation::CreateInspection) == 0 {
        tokio::task::yield_now().await;
    }

    h.controller.start(None).await.unwrap();
    hold.notify_one();

    let outcome = in_flight.await.unwrap().unwrap();
    assert_eq!(outcome, SaveOutcome::Stale);

    let view = h.controller.view().await;
    assert!(view.inspection_id.is_none());
    assert!(view.fields.is_empty());
    assert_eq!(view.autosave_status, AutosaveStatus::Idle);
}

#[tokio::test]
async fn test_off_air_without_reason_blocks_step_one() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.on_field_change("air_status", "off_air").await.unwrap();

    let outcome = h.controller.advance().await.unwrap();
    let AdvanceOutcome::Blocked { errors } = outcome else {
        panic!("expected blocked, got {:?}", outcome);
    };
    assert!(errors.get("off_air_reason").is_some());
    assert_eq!(h.controller.view().await.step, Some(1));
    assert_eq!(h.backend.count(Operation::CreateInspection), 0);

    h.controller
        .on_field_change("off_air_reason", "Transmitter repair")
        .await
        .unwrap();
    let outcome = h.controller.advance().await.unwrap();
    assert_eq!(moved_to(&outcome).as_deref(), Some("step2"));
}

#[tokio::test]
async fn test_store_validation_blocks_only_step_one() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();

    let mut errors = FieldErrors::new();
    errors.add("transmitting_site_name", "Ensure this field has no more than 5 characters.");
    h.backend
        .fail_next(Operation::CreateInspection, StoreError::Validation(errors));

    let outcome = h.controller.advance().await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Blocked { .. }));
    let view = h.controller.view().await;
    assert_eq!(view.step, Some(1));
    assert!(view.validation_errors.get("transmitting_site_name").is_some());

    assert!(moved_to(&h.controller.advance().await.unwrap()).is_some());

    // Step 2 treats the same failure as a warning
    h.controller.on_field_change("tower_type", "guyed").await.unwrap();
    let mut errors = FieldErrors::new();
    errors.add("tower_type", "Not a valid choice.");
    h.backend
        .fail_next(Operation::UpdateInspection, StoreError::Validation(errors));
    let outcome = h.controller.advance().await.unwrap();
    assert_eq!(moved_to(&outcome).as_deref(), Some("step3"));
}

#[tokio::test]
async fn test_retreat_carries_unsaved_edits_without_saving() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.advance().await.unwrap();
    h.controller.on_field_change("tower_type", "self-supporting").await.unwrap();

    let writes_before = h.backend.count(Operation::UpdateInspection);
    let view = h.controller.retreat().await.unwrap();
    assert_eq!(view.step, Some(1));
    assert_eq!(view.fields.text("transmitting_site_name"), Some("Mont Febe"));
    assert_eq!(h.backend.count(Operation::UpdateInspection), writes_before);

    h.controller.advance().await.unwrap();
    let view = h.controller.view().await;
    assert_eq!(view.step, Some(2));
    assert_eq!(view.fields.text("tower_type"), Some("self-supporting"));
}

#[tokio::test]
async fn test_step_four_reads_power_from_step_three() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.advance().await.unwrap();
    h.controller.advance().await.unwrap();
    h.controller
        .on_field_change("exciter_actual_reading", "100 W")
        .await
        .unwrap();
    h.controller.advance().await.unwrap();

    h.controller.on_field_change("antenna_gain", "10").await.unwrap();
    h.controller
        .on_field_change("estimated_feeder_losses", "1.5")
        .await
        .unwrap();
    let view = h
        .controller
        .on_field_change("estimated_antenna_losses", "0.5")
        .await
        .unwrap();

    assert_eq!(view.fields.text("effective_radiated_power_dbw"), Some("28.00"));
    assert_eq!(view.fields.text("effective_radiated_power"), Some("0.631"));

    let err = h
        .controller
        .on_field_change("exciter_actual_reading", "200")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::FieldNotInStep { .. }));
}

#[tokio::test]
async fn test_zero_power_clears_erp_outputs() {
    let h = harness().await;
    let id = h.backend.seed_inspection(
        "draft",
        payload(json!({
            "amplifier_actual_reading": "0",
            "effective_radiated_power": "9.999",
            "effective_radiated_power_dbw": "39.99"
        })),
    );
    h.controller.start(Some(id)).await.unwrap();
    for _ in 0..3 {
        h.controller.advance().await.unwrap();
    }

    let view = h.controller.on_field_change("antenna_gain", "10").await.unwrap();
    assert_eq!(view.fields.text("effective_radiated_power"), Some(""));
    assert_eq!(view.fields.text("effective_radiated_power_dbw"), Some(""));
}

#[tokio::test]
async fn test_complete_from_preview() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    for _ in 0..3 {
        h.controller.advance().await.unwrap();
    }
    h.controller
        .on_field_change("technical_personnel", "E. Nkemelu")
        .await
        .unwrap();

    let outcome = h.controller.preview().await.unwrap();
    assert_eq!(moved_to(&outcome).as_deref(), Some("preview"));

    let outcome = h.controller.advance().await.unwrap();
    assert_eq!(moved_to(&outcome).as_deref(), Some("completed"));

    let id = h.controller.view().await.inspection_id.unwrap();
    let record = h.backend.inspection(&id).unwrap();
    assert!(record.is_completed());
    assert!(record.fields.contains_key("completed_at"));
    assert_eq!(record.fields["technical_personnel"], json!("E. Nkemelu"));

    assert!(matches!(
        h.controller.advance().await,
        Err(SessionError::Finished)
    ));
    assert!(matches!(
        h.controller.on_field_change("antenna_gain", "3").await,
        Err(SessionError::Finished)
    ));
}

#[tokio::test]
async fn test_completion_failure_keeps_step_four() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    for _ in 0..3 {
        h.controller.advance().await.unwrap();
    }
    h.backend.fail_next(
        Operation::CreateInspection,
        StoreError::Network("unreachable".into()),
    );

    let outcome = h.controller.advance().await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::NotCompleted { .. }));
    assert_eq!(h.controller.view().await.step, Some(4));
}

#[tokio::test]
async fn test_side_flow_round_trip() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.on_field_change("program_name", "Morning News").await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.on_field_change("broadcaster_name", "CRT").await.unwrap();

    let exit = h
        .controller
        .divert(EntityKind::Broadcaster, Some("CRTV".to_string()))
        .await
        .unwrap();
    assert_eq!(exit.kind, EntityKind::Broadcaster);
    assert_eq!(exit.prefill_name.as_deref(), Some("CRTV"));
    assert_eq!(exit.return_to, "step1");
    assert_eq!(h.controller.view().await.position, "diverted");
    assert!(h.controller.on_field_change("town", "Limbe").await.is_err());

    // The side flow creates the broadcaster on its own
    h.backend
        .create_broadcaster(&payload(json!({ "name": "CRTV", "town": "Limbe" })))
        .await
        .unwrap();

    let view = h
        .controller
        .return_from_side_flow(SideReturn {
            created: Some(CreatedEntity {
                kind: EntityKind::Broadcaster,
                name: "CRTV".to_string(),
            }),
            restore_draft: true,
        })
        .await
        .unwrap();

    assert_eq!(view.step, Some(1));
    assert!(view.dirty);
    assert_eq!(view.fields.text("broadcaster_name"), Some("CRTV"));
    assert_eq!(view.fields.text("program_name"), Some("Morning News"));
    assert_eq!(view.fields.text("transmitting_site_name"), Some("Mont Febe"));
    assert_eq!(view.fields.text("town"), Some("Limbe"));

    h.clock.advance(QUIET);
    let outcome = h.controller.poll_autosave().await.unwrap().await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    assert_eq!(h.backend.count(Operation::CreateBroadcaster), 1);
}

#[tokio::test]
async fn test_side_flow_return_without_entity() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.divert(EntityKind::Program, None).await.unwrap();

    let view = h
        .controller
        .return_from_side_flow(SideReturn {
            created: None,
            restore_draft: true,
        })
        .await
        .unwrap();
    assert_eq!(view.fields.text("transmitting_site_name"), Some("Mont Febe"));
    assert!(view.fields.text("program_name").is_none());
}

#[tokio::test]
async fn test_unloaded_step_does_not_blank_stored_values() {
    let h = harness().await;
    let id = h.backend.seed_inspection(
        "draft",
        payload(json!({ "transmitting_site_name": "Stored", "town": "Kumba" })),
    );
    h.backend.fail_next(
        Operation::GetInspection,
        StoreError::Unexpected {
            status: 503,
            body: String::new(),
        },
    );

    h.controller.start(Some(id.clone())).await.unwrap();
    h.controller.on_field_change("land_owner_name", "Council").await.unwrap();
    h.controller.save_now().await.unwrap();

    let update = &h.backend.calls_of(Operation::UpdateInspection)[0];
    let keys: Vec<&String> = update.payload.as_ref().unwrap().keys().collect();
    assert_eq!(keys, vec!["land_owner_name"]);

    let record = h.backend.inspection(&id).unwrap();
    assert_eq!(record.fields["town"], json!("Kumba"));
}

#[tokio::test]
async fn test_start_recovers_names_from_record() {
    let h = harness().await;
    let broadcaster = h.backend.seed_broadcaster("CRTV", Payload::new());
    let program = h.backend.seed_program("Morning News", &[broadcaster.clone()]);
    let id = h.backend.seed_inspection(
        "draft",
        payload(json!({ "program": program.to_json(), "broadcaster": broadcaster.to_json() })),
    );

    let view = h.controller.start(Some(id)).await.unwrap();
    assert_eq!(view.fields.text("program_name"), Some("Morning News"));
    assert_eq!(view.fields.text("broadcaster_name"), Some("CRTV"));
}

#[tokio::test]
async fn test_unknown_inspection_fails_to_start() {
    let h = harness().await;
    let err = h
        .controller
        .start(Some(EntityId::Numeric(404)))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_events_follow_the_save() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    let mut rx = h.events.subscribe();

    h.controller
        .on_field_change("transmitting_site_name", "Mont Febe")
        .await
        .unwrap();
    h.controller.save_now().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(match &event {
            SessionEvent::AutosaveStatusChanged { status, .. } => format!("status:{}", status),
            other => other.event_type().to_string(),
        });
    }
    assert_eq!(
        seen,
        vec!["status:saving", "InspectionCreated", "status:saved"]
    );
}

#[tokio::test]
async fn test_side_flow_restores_edits_over_reloaded_record() {
    let h = harness().await;
    let id = h.backend.seed_inspection(
        "draft",
        payload(json!({ "transmitting_site_name": "Old Site", "town": "Kumba" })),
    );
    h.controller.start(Some(id.clone())).await.unwrap();
    h.controller
        .on_field_change("transmitting_site_name", "New Site")
        .await
        .unwrap();
    h.controller.on_field_change("program_name", "Evening Show").await.unwrap();
    h.controller.divert(EntityKind::Program, None).await.unwrap();

    // Coming back through the entry point reloads step 1 from the record
    let view = h.controller.start(Some(id)).await.unwrap();
    assert_eq!(view.fields.text("transmitting_site_name"), Some("Old Site"));

    h.backend
        .create_program(&payload(json!({ "name": "Evening Show Live" })))
        .await
        .unwrap();
    let view = h
        .controller
        .return_from_side_flow(SideReturn {
            created: Some(CreatedEntity {
                kind: EntityKind::Program,
                name: "Evening Show Live".to_string(),
            }),
            restore_draft: true,
        })
        .await
        .unwrap();

    assert_eq!(view.fields.text("transmitting_site_name"), Some("New Site"));
    assert_eq!(view.fields.text("program_name"), Some("Evening Show Live"));
    assert_eq!(view.fields.text("town"), Some("Kumba"));
    assert!(view.dirty);
}

#[tokio::test]
async fn test_advance_from_step_two_does_not_wait_for_save() {
    let h = harness().await;
    let id = h.backend.seed_inspection("draft", Payload::new());
    h.controller.start(Some(id.clone())).await.unwrap();
    h.controller.advance().await.unwrap();
    h.controller.on_field_change("tower_type", "guyed").await.unwrap();
    let hold = h.backend.hold_next(Operation::UpdateInspection);

    let outcome = tokio::time::timeout(Duration::from_secs(2), h.controller.advance())
        .await
        .expect("advance waited for a stalled save")
        .unwrap();
    match outcome {
        AdvanceOutcome::Moved { to, save, .. } => {
            assert_eq!(to.to_string(), "step3");
            assert_eq!(save, SaveOutcome::Pending);
        }
        other => panic!("expected move, got {:?}", other),
    }
    let view = h.controller.view().await;
    assert_eq!(view.step, Some(3));
    assert_eq!(view.autosave_status, AutosaveStatus::Saving);

    hold.notify_one();
    while h.controller.view().await.autosave_status == AutosaveStatus::Saving {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.controller.view().await.autosave_status, AutosaveStatus::Saved);
    let record = h.backend.inspection(&id).unwrap();
    assert_eq!(record.fields["tower_type"], json!("guyed"));
}

#[tokio::test]
async fn test_save_queued_behind_background_create_updates_it() {
    let h = harness().await;
    h.controller.start(None).await.unwrap();
    h.controller.advance().await.unwrap();
    h.controller.on_field_change("tower_type", "guyed").await.unwrap();
    let hold = h.backend.hold_next(Operation::CreateInspection);

    let outcome = h.controller.advance().await.unwrap();
    assert_eq!(moved_to(&outcome).as_deref(), Some("step3"));
    while h.backend.count(Operation::CreateInspection) == 0 {
        tokio::task::yield_now().await;
    }

    h.controller
        .on_field_change("amplifier_actual_reading", "100")
        .await
        .unwrap();
    let controller = h.controller.clone();
    let queued = tokio::spawn(async move { controller.save_now().await });
    hold.notify_one();

    let outcome = queued.await.unwrap().unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { created: false, .. }));
    assert_eq!(h.backend.count(Operation::CreateInspection), 1);
    assert_eq!(h.backend.count(Operation::UpdateInspection), 1);

    let id = h.controller.view().await.inspection_id.unwrap();
    let record = h.backend.inspection(&id).unwrap();
    assert_eq!(record.fields["tower_type"], json!("guyed"));
    assert_eq!(record.fields["amplifier_actual_reading"], json!("100"));
}
