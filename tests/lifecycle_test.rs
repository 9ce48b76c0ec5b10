//! Request lifecycle integration tests
//!
//! Drives the request store through complete journeys:
//! - happy path from creation to review
//! - transition guards and terminal states
//! - the concurrent accept race (exactly one winner)
//! - note threading and review rollups

use std::sync::Arc;

use curbside::db::schemas::{NoteAuthor, RequestNote, ServiceRequestDoc, ServiceType};
use curbside::directory::ProviderDirectory;
use curbside::geo::LatLng;
use curbside::requests::{AcceptOutcome, RequestStatus, RequestStore};
use curbside::types::CurbsideError;

fn midtown() -> LatLng {
    LatLng {
        latitude: 40.7549,
        longitude: -73.9840,
    }
}

fn towing_request() -> ServiceRequestDoc {
    ServiceRequestDoc::new(
        midtown(),
        ServiceType::Towing,
        "Dead transmission, blocking a loading dock".to_string(),
    )
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_full_journey_from_creation_to_review() {
    let store = RequestStore::memory_only();

    let created = store.create(towing_request()).await.unwrap();
    assert_eq!(created.status, RequestStatus::Pending);
    assert!(created.accepted_by.is_none());
    assert!(created.accepted_at.is_none());

    let outcome = store
        .accept(&created.request_id, "mech-1", Some(120.0))
        .await
        .unwrap();
    let accepted = match outcome {
        AcceptOutcome::Accepted(doc) => doc,
        AcceptOutcome::AlreadyResolved(_) => panic!("first accept must win"),
    };
    assert_eq!(accepted.status, RequestStatus::Accepted);
    assert_eq!(accepted.accepted_by.as_deref(), Some("mech-1"));
    assert_eq!(accepted.estimated_cost, Some(120.0));
    assert!(accepted.accepted_at.is_some());

    let in_progress = store
        .update_status(&created.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap();
    assert_eq!(in_progress.status, RequestStatus::InProgress);

    let completed = store
        .update_status(&created.request_id, RequestStatus::Completed, Some(135.5))
        .await
        .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(completed.actual_cost, Some(135.5));
    assert!(completed.completed_at.is_some());

    let reviewed = store
        .submit_review(&created.request_id, 5, Some("Fast and careful".to_string()))
        .await
        .unwrap();
    assert_eq!(reviewed.rating, Some(5));
    assert_eq!(reviewed.review.as_deref(), Some("Fast and careful"));
}

// =============================================================================
// Transition Guards
// =============================================================================

#[tokio::test]
async fn test_cancel_allowed_while_pending_or_accepted() {
    let store = RequestStore::memory_only();

    let pending = store.create(towing_request()).await.unwrap();
    let cancelled = store
        .update_status(&pending.request_id, RequestStatus::Cancelled, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let accepted = store.create(towing_request()).await.unwrap();
    store
        .accept(&accepted.request_id, "mech-1", None)
        .await
        .unwrap();
    let cancelled = store
        .update_status(&accepted.request_id, RequestStatus::Cancelled, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_rejected_once_work_started() {
    let store = RequestStore::memory_only();

    let request = store.create(towing_request()).await.unwrap();
    store
        .accept(&request.request_id, "mech-1", None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap();

    let err = store
        .update_status(&request.request_id, RequestStatus::Cancelled, None)
        .await
        .unwrap_err();
    match err {
        CurbsideError::InvalidTransition { from, to } => {
            assert_eq!(from, RequestStatus::InProgress);
            assert_eq!(to, RequestStatus::Cancelled);
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_states_reject_every_transition() {
    let store = RequestStore::memory_only();

    let request = store.create(towing_request()).await.unwrap();
    store
        .accept(&request.request_id, "mech-1", None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::Completed, None)
        .await
        .unwrap();

    for next in [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::InProgress,
        RequestStatus::Cancelled,
    ] {
        assert!(
            store
                .update_status(&request.request_id, next, None)
                .await
                .is_err(),
            "completed request must not move to {}",
            next
        );
    }
}

#[tokio::test]
async fn test_skipping_accepted_is_rejected() {
    let store = RequestStore::memory_only();

    let request = store.create(towing_request()).await.unwrap();
    let err = store
        .update_status(&request.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CurbsideError::InvalidTransition { .. }));
}

// =============================================================================
// Accept Race
// =============================================================================

#[tokio::test]
async fn test_concurrent_accepts_produce_exactly_one_winner() {
    let store = Arc::new(RequestStore::memory_only());
    let request = store.create(towing_request()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..24 {
        let store = Arc::clone(&store);
        let request_id = request.request_id.clone();
        handles.push(tokio::spawn(async move {
            let provider_id = format!("mech-{}", i);
            (
                provider_id.clone(),
                store.accept(&request_id, &provider_id, None).await,
            )
        }));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for handle in handles {
        let (provider_id, outcome) = handle.await.unwrap();
        match outcome.unwrap() {
            AcceptOutcome::Accepted(_) => winners.push(provider_id),
            AcceptOutcome::AlreadyResolved(doc) => losers.push(doc),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one accept may win");
    assert_eq!(losers.len(), 23);

    // Every loser observed the winner's resolution, not some interim state
    for doc in losers {
        assert_eq!(doc.status, RequestStatus::Accepted);
        assert_eq!(doc.accepted_by.as_deref(), Some(winners[0].as_str()));
    }
}

#[tokio::test]
async fn test_accept_after_cancellation_reports_current_state() {
    let store = RequestStore::memory_only();

    let request = store.create(towing_request()).await.unwrap();
    store
        .update_status(&request.request_id, RequestStatus::Cancelled, None)
        .await
        .unwrap();

    match store
        .accept(&request.request_id, "mech-late", None)
        .await
        .unwrap()
    {
        AcceptOutcome::AlreadyResolved(doc) => {
            assert_eq!(doc.status, RequestStatus::Cancelled);
            assert!(doc.accepted_by.is_none());
        }
        AcceptOutcome::Accepted(_) => panic!("cancelled request must not be acceptable"),
    }
}

// =============================================================================
// Notes and Review
// =============================================================================

#[tokio::test]
async fn test_notes_thread_in_order() {
    let store = RequestStore::memory_only();
    let request = store.create(towing_request()).await.unwrap();

    store
        .add_note(
            &request.request_id,
            RequestNote {
                message: "I'm in the garage under the mall".to_string(),
                author: NoteAuthor::Customer,
                timestamp: bson::DateTime::now(),
            },
        )
        .await
        .unwrap();
    let updated = store
        .add_note(
            &request.request_id,
            RequestNote {
                message: "On my way, 15 minutes out".to_string(),
                author: NoteAuthor::Mechanic,
                timestamp: bson::DateTime::now(),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.notes.len(), 2);
    assert_eq!(updated.notes[0].author, NoteAuthor::Customer);
    assert_eq!(updated.notes[1].author, NoteAuthor::Mechanic);
    assert_eq!(updated.notes[1].message, "On my way, 15 minutes out");
}

#[tokio::test]
async fn test_review_requires_completion_and_happens_once() {
    let store = RequestStore::memory_only();
    let request = store.create(towing_request()).await.unwrap();

    // Not completed yet
    assert!(store
        .submit_review(&request.request_id, 4, None)
        .await
        .is_err());

    store
        .accept(&request.request_id, "mech-1", None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::Completed, None)
        .await
        .unwrap();

    store
        .submit_review(&request.request_id, 4, None)
        .await
        .unwrap();

    // Second review bounces
    assert!(store
        .submit_review(&request.request_id, 1, Some("changed my mind".to_string()))
        .await
        .is_err());
}

#[tokio::test]
async fn test_review_rollup_updates_provider_aggregate() {
    let store = RequestStore::memory_only();
    let directory = ProviderDirectory::memory_only();

    let mut provider = curbside::db::schemas::ProviderDoc::new(
        "mech-1".to_string(),
        "Hudson Towing".to_string(),
        midtown(),
        vec![ServiceType::Towing],
    );
    provider.rating = 4.0;
    provider.review_count = 1;
    directory.register(provider).await.unwrap();

    let request = store.create(towing_request()).await.unwrap();
    store
        .accept(&request.request_id, "mech-1", None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::InProgress, None)
        .await
        .unwrap();
    store
        .update_status(&request.request_id, RequestStatus::Completed, None)
        .await
        .unwrap();
    store
        .submit_review(&request.request_id, 5, None)
        .await
        .unwrap();

    let (rating, count) = directory.record_review("mech-1", 5).await.unwrap();
    assert_eq!(count, 2);
    assert!((rating - 4.5).abs() < 1e-9);

    let stored = directory.get("mech-1").unwrap();
    assert_eq!(stored.review_count, 2);
    assert!((stored.rating - 4.5).abs() < 1e-9);
}
