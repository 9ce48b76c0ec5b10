//! Dispatch coordinator: matching, partitioning, and bounded fan-out

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::db::schemas::ServiceRequestDoc;
use crate::directory::ProviderDirectory;
use crate::live::{now_iso, LiveEvent};
use crate::matching::Candidate;
use crate::notify::Notifier;
use crate::presence::PresenceRegistry;
use crate::requests::RequestStore;
use crate::types::Result;

/// Configuration for the dispatch fan-out
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Candidate search radius in kilometres
    pub radius_km: f64,
    /// Per-send timeout for fallback deliveries in milliseconds
    pub send_timeout_ms: u64,
    /// Maximum concurrent fallback sends
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            radius_km: 10.0,
            send_timeout_ms: 5000,
            max_in_flight: 16,
        }
    }
}

/// A delivery that did not reach its candidate
#[derive(Debug, Clone, Serialize)]
pub struct FailedDelivery {
    pub provider_id: String,
    pub reason: String,
}

/// Outcome summary returned to the request-creation path
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub request_id: String,
    pub total_candidates: usize,
    pub live_notified: usize,
    pub offline_notified: usize,
    pub failed_deliveries: Vec<FailedDelivery>,
}

/// Orchestrates candidate matching and notification delivery for one request
pub struct DispatchCoordinator {
    requests: Arc<RequestStore>,
    directory: Arc<ProviderDirectory>,
    presence: Arc<PresenceRegistry>,
    notifier: Arc<dyn Notifier>,
    /// Candidate search radius
    radius_km: f64,
    /// Per-send timeout for fallback deliveries
    send_timeout: Duration,
    /// Semaphore to limit concurrent fallback sends
    semaphore: Arc<Semaphore>,
}

impl DispatchCoordinator {
    pub fn new(
        requests: Arc<RequestStore>,
        directory: Arc<ProviderDirectory>,
        presence: Arc<PresenceRegistry>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            requests,
            directory,
            presence,
            notifier,
            radius_km: config.radius_km,
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        }
    }

    /// Match, partition, and notify. Individual delivery failures land in the
    /// report, never as an error; the only error here is an unknown request.
    pub async fn dispatch(&self, request_id: &str) -> Result<DispatchReport> {
        let request = self.requests.get(request_id).await?;
        let candidates =
            self.directory
                .find_candidates(request.latlng(), self.radius_km, request.service_type);

        let mut report = DispatchReport {
            request_id: request.request_id.clone(),
            total_candidates: candidates.len(),
            live_notified: 0,
            offline_notified: 0,
            failed_deliveries: Vec::new(),
        };

        if candidates.is_empty() {
            info!(request_id = %report.request_id, "dispatch found no candidates");
            return Ok(report);
        }

        // Partition by presence at this instant. A candidate may flip while
        // the fan-out runs; a late notification just loses the accept race.
        let (live, offline): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|candidate| self.presence.is_online(&candidate.provider.provider_id));

        debug!(
            request_id = %report.request_id,
            live = live.len(),
            offline = offline.len(),
            "dispatching to candidates"
        );

        // Live deliveries queue onto the connection's channel without
        // awaiting the peer.
        for candidate in &live {
            let provider_id = candidate.provider.provider_id.as_str();
            let delivered = self
                .presence
                .channel_of(provider_id)
                .is_some_and(|channel| channel.push(Self::offer_event(&request, candidate)));
            if delivered {
                report.live_notified += 1;
            } else {
                // Connection dropped between the partition and the push
                report.failed_deliveries.push(FailedDelivery {
                    provider_id: provider_id.to_string(),
                    reason: "live channel closed".to_string(),
                });
            }
        }

        // Fallback sends run concurrently under the semaphore, each with its
        // own timeout so one slow recipient cannot stall the batch.
        let mut sends: JoinSet<std::result::Result<String, FailedDelivery>> = JoinSet::new();
        for candidate in offline {
            let provider_id = candidate.provider.provider_id.clone();
            let Some(address) = candidate.provider.contact_address.clone() else {
                report.failed_deliveries.push(FailedDelivery {
                    provider_id,
                    reason: "no contact address on record".to_string(),
                });
                continue;
            };
            let notifier = Arc::clone(&self.notifier);
            let semaphore = Arc::clone(&self.semaphore);
            let send_timeout = self.send_timeout;
            let subject = Self::offer_subject(&request);
            let body = Self::offer_message(&request, &candidate);
            sends.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| FailedDelivery {
                    provider_id: provider_id.clone(),
                    reason: "send queue closed".to_string(),
                })?;
                match tokio::time::timeout(send_timeout, notifier.send(&address, &subject, &body))
                    .await
                {
                    Ok(Ok(())) => Ok(provider_id),
                    Ok(Err(err)) => Err(FailedDelivery {
                        provider_id,
                        reason: err.to_string(),
                    }),
                    Err(_) => Err(FailedDelivery {
                        provider_id,
                        reason: format!("send timed out after {}ms", send_timeout.as_millis()),
                    }),
                }
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(Ok(provider_id)) => {
                    report.offline_notified += 1;
                    debug!(%provider_id, "fallback message sent");
                }
                Ok(Err(failure)) => {
                    warn!(
                        provider_id = %failure.provider_id,
                        reason = %failure.reason,
                        "fallback delivery failed"
                    );
                    report.failed_deliveries.push(failure);
                }
                Err(join_error) => {
                    warn!(error = %join_error, "fallback send task failed to complete");
                    report.failed_deliveries.push(FailedDelivery {
                        provider_id: "unknown".to_string(),
                        reason: "send task panicked".to_string(),
                    });
                }
            }
        }

        info!(
            request_id = %report.request_id,
            total = report.total_candidates,
            live = report.live_notified,
            offline = report.offline_notified,
            failed = report.failed_deliveries.len(),
            "dispatch complete"
        );

        Ok(report)
    }

    fn offer_event(request: &ServiceRequestDoc, candidate: &Candidate) -> LiveEvent {
        let center = request.latlng();
        LiveEvent::RequestNew {
            request_id: request.request_id.clone(),
            service_type: request.service_type,
            description: request.description.clone(),
            latitude: center.latitude,
            longitude: center.longitude,
            distance_km: candidate.distance_km,
            timestamp: now_iso(),
        }
    }

    fn offer_subject(request: &ServiceRequestDoc) -> String {
        format!("New {} request near you", request.service_type)
    }

    fn offer_message(request: &ServiceRequestDoc, candidate: &Candidate) -> String {
        let center = request.latlng();
        format!(
            "New service request near you!\n\nService: {}\nDescription: {}\nLocation: {:.4}, {:.4}\nDistance: {} km\n\nOpen your dashboard to accept this request.",
            request.service_type,
            request.description,
            center.latitude,
            center.longitude,
            candidate.distance_km,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::auth::{JwtValidator, Role, TokenInput};
    use crate::db::schemas::{ProviderDoc, ServiceType};
    use crate::geo::LatLng;
    use crate::live::{ChannelHandle, LiveHub};
    use crate::types::CurbsideError;

    const BASE: LatLng = LatLng {
        latitude: 40.0,
        longitude: -74.0,
    };

    /// Notifier double that records every send
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_to(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(to, _, _)| to.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    /// Notifier double that rejects every send
    struct FailingNotifier;

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<()> {
            Err(CurbsideError::Delivery(format!("relay rejected message for {to}")))
        }
    }

    /// Notifier double that never answers in time
    struct SlowNotifier;

    #[async_trait::async_trait]
    impl Notifier for SlowNotifier {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    struct Harness {
        requests: Arc<RequestStore>,
        directory: Arc<ProviderDirectory>,
        presence: Arc<PresenceRegistry>,
        validator: Arc<JwtValidator>,
    }

    fn harness() -> Harness {
        let validator = Arc::new(JwtValidator::new_dev());
        let hub = Arc::new(LiveHub::new());
        Harness {
            requests: Arc::new(RequestStore::memory_only()),
            directory: Arc::new(ProviderDirectory::memory_only()),
            presence: Arc::new(PresenceRegistry::new(Arc::clone(&validator), hub)),
            validator,
        }
    }

    fn coordinator(harness: &Harness, notifier: Arc<dyn Notifier>, config: DispatchConfig) -> DispatchCoordinator {
        DispatchCoordinator::new(
            Arc::clone(&harness.requests),
            Arc::clone(&harness.directory),
            Arc::clone(&harness.presence),
            notifier,
            config,
        )
    }

    /// Degrees of latitude that put a provider roughly `km` north of BASE
    fn lat_offset_for_km(km: f64) -> f64 {
        km / 110.574
    }

    fn provider_near(id: &str, km_north: f64, address: Option<&str>) -> ProviderDoc {
        let location = LatLng {
            latitude: BASE.latitude + lat_offset_for_km(km_north),
            longitude: BASE.longitude,
        };
        let mut doc = ProviderDoc::new(
            id.to_string(),
            format!("{id} Garage"),
            location,
            vec![ServiceType::TireRepair, ServiceType::BatteryService],
        );
        doc.contact_address = address.map(|a| a.to_string());
        doc
    }

    async fn pending_request(harness: &Harness) -> ServiceRequestDoc {
        let request = ServiceRequestDoc::new(
            BASE,
            ServiceType::TireRepair,
            "flat rear tire on the shoulder".to_string(),
        );
        harness.requests.create(request).await.unwrap()
    }

    fn mechanic_token(harness: &Harness, provider_id: &str) -> String {
        harness
            .validator
            .generate_token(TokenInput {
                subject: provider_id.to_string(),
                role: Role::Mechanic,
                name: None,
            })
            .unwrap()
    }

    /// Identifies the provider and returns the connection's event receiver
    fn bring_online(
        harness: &Harness,
        provider_id: &str,
    ) -> tokio::sync::mpsc::UnboundedReceiver<LiveEvent> {
        let (handle, rx) = ChannelHandle::new();
        let token = mechanic_token(harness, provider_id);
        harness.presence.identify(&token, handle).unwrap();
        rx
    }

    #[tokio::test]
    async fn test_dispatch_partitions_by_presence() {
        let harness = harness();
        for (id, km) in [("p-live", 2.0), ("p-mail-1", 4.0), ("p-mail-2", 6.0)] {
            let doc = provider_near(id, km, Some(&format!("{id}@example.com")));
            harness.directory.register(doc).await.unwrap();
        }
        let mut live_rx = bring_online(&harness, "p-live");

        let recorder = Arc::new(RecordingNotifier::new());
        let coordinator = coordinator(&harness, recorder.clone(), DispatchConfig::default());
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.total_candidates, 3);
        assert_eq!(report.live_notified, 1);
        assert_eq!(report.offline_notified, 2);
        assert!(report.failed_deliveries.is_empty());

        match live_rx.try_recv().unwrap() {
            LiveEvent::RequestNew {
                request_id,
                distance_km,
                ..
            } => {
                assert_eq!(request_id, request.request_id);
                assert!(distance_km > 1.5 && distance_km < 2.5);
            }
            other => panic!("expected a request offer, got {other:?}"),
        }

        let mut addresses = recorder.sent_to();
        addresses.sort();
        assert_eq!(addresses, vec!["p-mail-1@example.com", "p-mail-2@example.com"]);
    }

    #[tokio::test]
    async fn test_failed_sends_land_in_the_report() {
        let harness = harness();
        for id in ["p-1", "p-2"] {
            let doc = provider_near(id, 3.0, Some(&format!("{id}@example.com")));
            harness.directory.register(doc).await.unwrap();
        }

        let coordinator = coordinator(&harness, Arc::new(FailingNotifier), DispatchConfig::default());
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.total_candidates, 2);
        assert_eq!(report.offline_notified, 0);
        assert_eq!(report.failed_deliveries.len(), 2);
        for failure in &report.failed_deliveries {
            assert!(failure.reason.contains("relay rejected"));
        }
    }

    #[tokio::test]
    async fn test_candidate_without_address_is_reported_not_fatal() {
        let harness = harness();
        harness
            .directory
            .register(provider_near("p-silent", 3.0, None))
            .await
            .unwrap();
        harness
            .directory
            .register(provider_near("p-ok", 5.0, Some("ok@example.com")))
            .await
            .unwrap();

        let recorder = Arc::new(RecordingNotifier::new());
        let coordinator = coordinator(&harness, recorder.clone(), DispatchConfig::default());
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.offline_notified, 1);
        assert_eq!(report.failed_deliveries.len(), 1);
        assert_eq!(report.failed_deliveries[0].provider_id, "p-silent");
        assert!(report.failed_deliveries[0].reason.contains("no contact address"));
        assert_eq!(recorder.sent_to(), vec!["ok@example.com"]);
    }

    #[tokio::test]
    async fn test_slow_sends_hit_the_per_send_timeout() {
        let harness = harness();
        harness
            .directory
            .register(provider_near("p-slow", 3.0, Some("slow@example.com")))
            .await
            .unwrap();

        let config = DispatchConfig {
            send_timeout_ms: 20,
            ..DispatchConfig::default()
        };
        let coordinator = coordinator(&harness, Arc::new(SlowNotifier), config);
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.offline_notified, 0);
        assert_eq!(report.failed_deliveries.len(), 1);
        assert!(report.failed_deliveries[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_closed_live_channel_is_reported() {
        let harness = harness();
        harness
            .directory
            .register(provider_near("p-gone", 2.0, Some("gone@example.com")))
            .await
            .unwrap();
        let rx = bring_online(&harness, "p-gone");
        // Connection task went away but presence has not caught up yet
        drop(rx);

        let recorder = Arc::new(RecordingNotifier::new());
        let coordinator = coordinator(&harness, recorder.clone(), DispatchConfig::default());
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.live_notified, 0);
        assert_eq!(report.failed_deliveries.len(), 1);
        assert_eq!(report.failed_deliveries[0].reason, "live channel closed");
        // The fallback channel was not consulted for a live-partitioned candidate
        assert!(recorder.sent_to().is_empty());
    }

    #[tokio::test]
    async fn test_no_candidates_yields_an_empty_report() {
        let harness = harness();
        let coordinator = coordinator(
            &harness,
            Arc::new(RecordingNotifier::new()),
            DispatchConfig::default(),
        );
        let request = pending_request(&harness).await;

        let report = coordinator.dispatch(&request.request_id).await.unwrap();

        assert_eq!(report.total_candidates, 0);
        assert_eq!(report.live_notified, 0);
        assert_eq!(report.offline_notified, 0);
        assert!(report.failed_deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_dispatching_an_unknown_request_fails() {
        let harness = harness();
        let coordinator = coordinator(
            &harness,
            Arc::new(RecordingNotifier::new()),
            DispatchConfig::default(),
        );

        let err = coordinator.dispatch("no-such-request").await.unwrap_err();
        assert!(matches!(err, CurbsideError::NotFound(_)));
    }
}
