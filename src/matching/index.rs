//! In-memory provider index and ranked candidate search

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::db::schemas::{ProviderDoc, ServiceType};
use crate::geo::{distance_km, round1, LatLng};

/// One provider matched for a request, with its distance from the scene
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub provider: ProviderDoc,
    pub distance_km: f64,
}

/// Thread-safe provider index, keyed by provider id.
///
/// Mirrors the persistent directory so candidate search never waits on
/// the database. Writes flow through the directory, which updates both.
#[derive(Default)]
pub struct MatchingIndex {
    providers: DashMap<String, ProviderDoc>,
}

impl MatchingIndex {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Insert or replace a provider
    pub fn upsert(&self, provider: ProviderDoc) {
        debug!(
            "Matching index: upserted {}, count={}",
            provider.provider_id,
            self.providers.len()
        );
        self.providers.insert(provider.provider_id.clone(), provider);
    }

    /// Remove a provider by id
    pub fn remove(&self, provider_id: &str) {
        if self.providers.remove(provider_id).is_some() {
            debug!(
                "Matching index: removed {}, count={}",
                provider_id,
                self.providers.len()
            );
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderDoc> {
        self.providers.get(provider_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Flip a provider's availability. Returns false when unknown.
    pub fn set_availability(&self, provider_id: &str, is_available: bool) -> bool {
        match self.providers.get_mut(provider_id) {
            Some(mut entry) => {
                entry.is_available = is_available;
                true
            }
            None => false,
        }
    }

    /// Move a provider. Returns false when unknown.
    pub fn set_location(&self, provider_id: &str, location: LatLng) -> bool {
        match self.providers.get_mut(provider_id) {
            Some(mut entry) => {
                entry.location = location.into();
                true
            }
            None => false,
        }
    }

    /// Refresh the rating rollup after a review lands. Returns false when unknown.
    pub fn set_rating(&self, provider_id: &str, rating: f64, review_count: i64) -> bool {
        match self.providers.get_mut(provider_id) {
            Some(mut entry) => {
                entry.rating = rating;
                entry.review_count = review_count;
                true
            }
            None => false,
        }
    }

    /// Find available providers offering `service` within `radius_km` of
    /// `center`, sorted best-first.
    ///
    /// Ranking: rating descending, then review count descending, then
    /// distance ascending. The radius check is boundary-inclusive.
    pub fn find_candidates(
        &self,
        center: LatLng,
        radius_km: f64,
        service: ServiceType,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .providers
            .iter()
            .filter_map(|entry| {
                let provider = entry.value();
                if !provider.is_available || !provider.offers(service) {
                    return None;
                }
                let distance = distance_km(center, provider.latlng());
                // Boundary inclusive
                if distance > radius_km {
                    return None;
                }
                Some(Candidate {
                    provider: provider.clone(),
                    distance_km: round1(distance),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.provider
                .rating
                .total_cmp(&a.provider.rating)
                .then_with(|| b.provider.review_count.cmp(&a.provider.review_count))
                .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        });

        candidates
    }
}
