//! Dispatch fan-out integration tests
//!
//! Wires the real stack together (request store, provider directory,
//! presence registry, dispatch coordinator) and verifies:
//! - the presence partition: live push vs fallback delivery
//! - report accounting across successes and failures
//! - the end-to-end flow where two notified mechanics race to accept

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

use curbside::auth::{JwtValidator, Role, TokenInput};
use curbside::db::schemas::{ProviderDoc, ServiceRequestDoc, ServiceType};
use curbside::directory::ProviderDirectory;
use curbside::dispatch::{DispatchConfig, DispatchCoordinator};
use curbside::geo::LatLng;
use curbside::live::{ChannelHandle, LiveEvent, LiveHub};
use curbside::presence::PresenceRegistry;
use curbside::requests::{AcceptOutcome, RequestStatus, RequestStore};
use curbside::types::Result;

const BASE: LatLng = LatLng {
    latitude: 40.7128,
    longitude: -74.0060,
};

const KM_LAT: f64 = 1.0 / 110.574;

// =============================================================================
// Test Fixtures
// =============================================================================

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    async fn recipients(&self) -> Vec<String> {
        let mut seen: Vec<String> = self
            .sent
            .lock()
            .await
            .iter()
            .map(|(to, _)| to.clone())
            .collect();
        seen.sort();
        seen
    }
}

#[async_trait::async_trait]
impl curbside::notify::Notifier for RecordingNotifier {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<()> {
        self.sent.lock().await.push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct Stack {
    requests: Arc<RequestStore>,
    directory: Arc<ProviderDirectory>,
    presence: Arc<PresenceRegistry>,
    validator: Arc<JwtValidator>,
    notifier: Arc<RecordingNotifier>,
    hub: Arc<LiveHub>,
}

impl Stack {
    fn new() -> Self {
        let validator = Arc::new(JwtValidator::new_dev());
        let hub = Arc::new(LiveHub::new());
        Self {
            requests: Arc::new(RequestStore::memory_only()),
            directory: Arc::new(ProviderDirectory::memory_only()),
            presence: Arc::new(PresenceRegistry::new(
                Arc::clone(&validator),
                Arc::clone(&hub),
            )),
            validator,
            notifier: Arc::new(RecordingNotifier::default()),
            hub,
        }
    }

    fn coordinator(&self, config: DispatchConfig) -> DispatchCoordinator {
        DispatchCoordinator::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.directory),
            Arc::clone(&self.presence),
            self.notifier.clone(),
            config,
        )
    }

    async fn add_provider(&self, id: &str, km_north: f64, address: Option<&str>) {
        let mut doc = ProviderDoc::new(
            id.to_string(),
            format!("{} Auto", id),
            LatLng {
                latitude: BASE.latitude + km_north * KM_LAT,
                longitude: BASE.longitude,
            },
            vec![ServiceType::Towing, ServiceType::TireRepair],
        );
        doc.contact_address = address.map(String::from);
        self.directory.register(doc).await.unwrap();
    }

    /// Connect a provider's live channel, as the WebSocket identify step would
    fn bring_online(&self, id: &str) -> UnboundedReceiver<LiveEvent> {
        let token = self
            .validator
            .generate_token(TokenInput {
                subject: id.to_string(),
                role: Role::Mechanic,
                name: None,
            })
            .unwrap();
        let (handle, rx) = ChannelHandle::new();
        self.presence.identify(&token, handle).unwrap();
        rx
    }

    async fn create_towing_request(&self) -> ServiceRequestDoc {
        self.requests
            .create(ServiceRequestDoc::new(
                BASE,
                ServiceType::Towing,
                "Blown tire on the bridge".to_string(),
            ))
            .await
            .unwrap()
    }
}

// =============================================================================
// Partition and Accounting
// =============================================================================

#[tokio::test]
async fn test_live_candidates_get_events_offline_get_fallback() {
    let stack = Stack::new();
    stack.add_provider("online-1", 1.0, Some("online-1@example.com")).await;
    stack.add_provider("offline-1", 2.0, Some("offline-1@example.com")).await;
    stack.add_provider("offline-2", 3.0, Some("offline-2@example.com")).await;

    let mut rx = stack.bring_online("online-1");

    let request = stack.create_towing_request().await;
    let coordinator = stack.coordinator(DispatchConfig::default());
    let report = coordinator.dispatch(&request.request_id).await.unwrap();

    assert_eq!(report.total_candidates, 3);
    assert_eq!(report.live_notified, 1);
    assert_eq!(report.offline_notified, 2);
    assert!(report.failed_deliveries.is_empty());

    // The live mechanic got a structured offer
    match rx.try_recv().unwrap() {
        LiveEvent::RequestNew {
            request_id,
            service_type,
            distance_km,
            ..
        } => {
            assert_eq!(request_id, request.request_id);
            assert_eq!(service_type, ServiceType::Towing);
            assert!(distance_km < 1.5);
        }
        other => panic!("expected RequestNew, got {:?}", other),
    }

    // The offline mechanics were reached through the relay, not the channel
    assert_eq!(
        stack.notifier.recipients().await,
        ["offline-1@example.com", "offline-2@example.com"]
    );
}

#[tokio::test]
async fn test_report_accounts_for_every_candidate() {
    let stack = Stack::new();
    stack.add_provider("online-1", 1.0, Some("a@example.com")).await;
    stack.add_provider("reachable", 2.0, Some("b@example.com")).await;
    // No fallback address registered; delivery has nowhere to go
    stack.add_provider("unreachable", 3.0, None).await;

    let _rx = stack.bring_online("online-1");

    let request = stack.create_towing_request().await;
    let report = stack
        .coordinator(DispatchConfig::default())
        .dispatch(&request.request_id)
        .await
        .unwrap();

    assert_eq!(report.total_candidates, 3);
    assert_eq!(
        report.live_notified + report.offline_notified + report.failed_deliveries.len(),
        report.total_candidates
    );
    assert_eq!(report.failed_deliveries.len(), 1);
    assert_eq!(report.failed_deliveries[0].provider_id, "unreachable");
}

#[tokio::test]
async fn test_configured_radius_limits_fan_out() {
    let stack = Stack::new();
    stack.add_provider("close", 3.0, Some("close@example.com")).await;
    stack.add_provider("edge", 8.0, Some("edge@example.com")).await;

    let request = stack.create_towing_request().await;
    let report = stack
        .coordinator(DispatchConfig {
            radius_km: 5.0,
            ..DispatchConfig::default()
        })
        .dispatch(&request.request_id)
        .await
        .unwrap();

    assert_eq!(report.total_candidates, 1);
    assert_eq!(stack.notifier.recipients().await, ["close@example.com"]);
}

#[tokio::test]
async fn test_no_candidates_is_a_quiet_success() {
    let stack = Stack::new();
    stack.add_provider("far-away", 120.0, Some("far@example.com")).await;

    let request = stack.create_towing_request().await;
    let report = stack
        .coordinator(DispatchConfig::default())
        .dispatch(&request.request_id)
        .await
        .unwrap();

    assert_eq!(report.total_candidates, 0);
    assert_eq!(report.live_notified, 0);
    assert_eq!(report.offline_notified, 0);
    assert!(report.failed_deliveries.is_empty());
    assert!(stack.notifier.recipients().await.is_empty());
}

// =============================================================================
// End-to-End Race
// =============================================================================

#[tokio::test]
async fn test_notified_mechanics_race_and_one_wins() {
    let stack = Stack::new();
    stack.add_provider("racer-1", 1.0, Some("r1@example.com")).await;
    stack.add_provider("racer-2", 2.0, Some("r2@example.com")).await;

    let mut rx1 = stack.bring_online("racer-1");
    let mut rx2 = stack.bring_online("racer-2");

    let request = stack.create_towing_request().await;
    let report = stack
        .coordinator(DispatchConfig::default())
        .dispatch(&request.request_id)
        .await
        .unwrap();
    assert_eq!(report.live_notified, 2);

    // Both got the offer
    assert!(matches!(rx1.try_recv(), Ok(LiveEvent::RequestNew { .. })));
    assert!(matches!(rx2.try_recv(), Ok(LiveEvent::RequestNew { .. })));

    // Both accept; the store lets exactly one through
    let first = stack
        .requests
        .accept(&request.request_id, "racer-1", Some(90.0))
        .await
        .unwrap();
    let second = stack
        .requests
        .accept(&request.request_id, "racer-2", Some(80.0))
        .await
        .unwrap();

    let winner = match first {
        AcceptOutcome::Accepted(doc) => doc,
        AcceptOutcome::AlreadyResolved(_) => panic!("first accept should win"),
    };
    assert_eq!(winner.status, RequestStatus::Accepted);
    assert_eq!(winner.accepted_by.as_deref(), Some("racer-1"));
    assert_eq!(winner.estimated_cost, Some(90.0));

    match second {
        AcceptOutcome::AlreadyResolved(doc) => {
            assert_eq!(doc.accepted_by.as_deref(), Some("racer-1"));
            // The loser's estimate never landed
            assert_eq!(doc.estimated_cost, Some(90.0));
        }
        AcceptOutcome::Accepted(_) => panic!("second accept must lose"),
    }
}

#[tokio::test]
async fn test_disconnect_moves_candidate_to_fallback_side() {
    let stack = Stack::new();
    stack.add_provider("flapper", 1.0, Some("flapper@example.com")).await;

    let rx = stack.bring_online("flapper");
    let channel_id = stack.presence.channel_of("flapper").unwrap().channel_id();
    drop(rx);
    stack.presence.remove_channel(channel_id);

    let request = stack.create_towing_request().await;
    let report = stack
        .coordinator(DispatchConfig::default())
        .dispatch(&request.request_id)
        .await
        .unwrap();

    // Once offline, the mechanic is reached through the relay like anyone else
    assert_eq!(report.live_notified, 0);
    assert_eq!(report.offline_notified, 1);
    assert_eq!(stack.notifier.recipients().await, ["flapper@example.com"]);
}

// =============================================================================
// Hub Broadcasts
// =============================================================================

#[tokio::test]
async fn test_presence_changes_are_broadcast_to_watchers() {
    let stack = Stack::new();
    stack.add_provider("watched", 1.0, None).await;

    let mut watcher = stack.hub.subscribe();

    let rx = stack.bring_online("watched");
    match watcher.try_recv().unwrap() {
        LiveEvent::ProviderOnline { provider_id, .. } => assert_eq!(provider_id, "watched"),
        other => panic!("expected ProviderOnline, got {:?}", other),
    }

    let channel_id = stack.presence.channel_of("watched").unwrap().channel_id();
    drop(rx);
    stack.presence.remove_channel(channel_id);
    match watcher.try_recv().unwrap() {
        LiveEvent::ProviderOffline { provider_id, .. } => assert_eq!(provider_id, "watched"),
        other => panic!("expected ProviderOffline, got {:?}", other),
    }
}
