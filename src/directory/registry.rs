//! Provider registry backed by MongoDB with an in-memory mirror
//!
//! Every write lands in MongoDB first (when configured), then in the
//! matching index, so candidate search always sees the latest state.
//! In dev mode the registry runs memory-only.

use std::sync::Arc;

use bson::{doc, DateTime};
use tracing::{info, warn};

use crate::db::schemas::{
    provider::provider_filter, GeoPoint, ProviderDoc, ServiceType, PROVIDER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::geo::LatLng;
use crate::matching::{Candidate, MatchingIndex};
use crate::types::{CurbsideError, Result};

/// Provider directory with optional persistence
pub struct ProviderDirectory {
    collection: Option<MongoCollection<ProviderDoc>>,
    index: Arc<MatchingIndex>,
}

impl ProviderDirectory {
    /// Create a directory backed by MongoDB and hydrate the index
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo.collection::<ProviderDoc>(PROVIDER_COLLECTION).await?;
        let index = Arc::new(MatchingIndex::new());

        let providers = collection.find_many(doc! {}).await?;
        let count = providers.len();
        for provider in providers {
            index.upsert(provider);
        }
        info!("Loaded {} providers into matching index", count);

        Ok(Self {
            collection: Some(collection),
            index,
        })
    }

    /// Create a memory-only directory (dev mode)
    pub fn memory_only() -> Self {
        Self {
            collection: None,
            index: Arc::new(MatchingIndex::new()),
        }
    }

    /// Register a new provider or update an existing one.
    ///
    /// Rating rollups survive re-registration; everything else the
    /// caller sends replaces the stored profile.
    pub async fn register(&self, provider: ProviderDoc) -> Result<ProviderDoc> {
        let provider_id = provider.provider_id.clone();

        let mut stored = provider;
        if let Some(collection) = &self.collection {
            if let Some(existing) = collection.find_one(provider_filter(&provider_id)).await? {
                collection
                    .update_one(
                        doc! { "_id": existing._id },
                        doc! {
                            "$set": {
                                "business_name": &stored.business_name,
                                "contact_address": stored.contact_address.as_deref(),
                                "owner_ref": stored.owner_ref.as_deref(),
                                "location": bson::to_bson(&stored.location)?,
                                "services_offered": bson::to_bson(&stored.services_offered)?,
                                "is_available": stored.is_available,
                                "weekly_hours": bson::to_bson(&stored.weekly_hours)?,
                                "metadata.updated_at": DateTime::now(),
                            }
                        },
                    )
                    .await?;

                info!("Updated existing provider: {}", provider_id);

                // Rollups are owned by reviews, never by registration
                stored._id = existing._id;
                stored.rating = existing.rating;
                stored.review_count = existing.review_count;
                stored.metadata = existing.metadata;
            } else {
                let id = collection.insert_one(stored.clone()).await?;
                info!("Registered new provider: {}", provider_id);
                stored._id = Some(id);
            }
        } else if let Some(existing) = self.index.get(&provider_id) {
            stored.rating = existing.rating;
            stored.review_count = existing.review_count;
        }

        self.index.upsert(stored.clone());
        Ok(stored)
    }

    /// Look up one provider
    pub fn get(&self, provider_id: &str) -> Option<ProviderDoc> {
        self.index.get(provider_id)
    }

    /// List every known provider id with its current profile
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Flip availability for a provider
    pub async fn set_availability(&self, provider_id: &str, is_available: bool) -> Result<()> {
        if !self.index.contains(provider_id) {
            return Err(CurbsideError::NotFound(format!("provider {}", provider_id)));
        }

        if let Some(collection) = &self.collection {
            collection
                .update_one(
                    provider_filter(provider_id),
                    doc! {
                        "$set": {
                            "is_available": is_available,
                            "metadata.updated_at": DateTime::now(),
                        }
                    },
                )
                .await?;
        }

        self.index.set_availability(provider_id, is_available);
        info!(
            "Provider {} is now {}",
            provider_id,
            if is_available { "available" } else { "unavailable" }
        );
        Ok(())
    }

    /// Move a provider to a new location
    pub async fn set_location(&self, provider_id: &str, location: LatLng) -> Result<()> {
        if !self.index.contains(provider_id) {
            return Err(CurbsideError::NotFound(format!("provider {}", provider_id)));
        }

        if let Some(collection) = &self.collection {
            collection
                .update_one(
                    provider_filter(provider_id),
                    doc! {
                        "$set": {
                            "location": bson::to_bson(&GeoPoint::new(location))?,
                            "metadata.updated_at": DateTime::now(),
                        }
                    },
                )
                .await?;
        }

        self.index.set_location(provider_id, location);
        Ok(())
    }

    /// Fold a review into the provider's rating rollup.
    ///
    /// Returns the new (rating, review_count) pair.
    pub async fn record_review(&self, provider_id: &str, rating: i32) -> Result<(f64, i64)> {
        let current = self
            .index
            .get(provider_id)
            .ok_or_else(|| CurbsideError::NotFound(format!("provider {}", provider_id)))?;

        let new_count = current.review_count + 1;
        let new_rating =
            (current.rating * current.review_count as f64 + rating as f64) / new_count as f64;

        if let Some(collection) = &self.collection {
            collection
                .update_one(
                    provider_filter(provider_id),
                    doc! {
                        "$set": {
                            "rating": new_rating,
                            "review_count": new_count,
                            "metadata.updated_at": DateTime::now(),
                        }
                    },
                )
                .await?;
        }

        if !self.index.set_rating(provider_id, new_rating, new_count) {
            warn!("Provider {} vanished from index during review", provider_id);
        }

        Ok((new_rating, new_count))
    }

    /// Ranked candidate search, boundary inclusive
    pub fn find_candidates(
        &self,
        center: LatLng,
        radius_km: f64,
        service: ServiceType,
    ) -> Vec<Candidate> {
        self.index.find_candidates(center, radius_km, service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_provider(id: &str) -> ProviderDoc {
        ProviderDoc::new(
            id.to_string(),
            "Roadside Heroes".to_string(),
            LatLng::new(19.0760, 72.8777),
            vec![ServiceType::TireRepair, ServiceType::BatteryService],
        )
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let directory = ProviderDirectory::memory_only();
        directory.register(sample_provider("prov-1")).await.unwrap();

        let found = directory.get("prov-1").unwrap();
        assert_eq!(found.business_name, "Roadside Heroes");
        assert_eq!(directory.count(), 1);
        assert!(directory.get("prov-2").is_none());
    }

    #[tokio::test]
    async fn test_reregistration_preserves_rollups() {
        let directory = ProviderDirectory::memory_only();
        directory.register(sample_provider("prov-1")).await.unwrap();
        directory.record_review("prov-1", 5).await.unwrap();
        directory.record_review("prov-1", 3).await.unwrap();

        let mut renamed = sample_provider("prov-1");
        renamed.business_name = "Roadside Legends".to_string();
        let stored = directory.register(renamed).await.unwrap();

        assert_eq!(stored.business_name, "Roadside Legends");
        assert_eq!(stored.review_count, 2);
        assert!((stored.rating - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_review_rollup_math() {
        let directory = ProviderDirectory::memory_only();
        directory.register(sample_provider("prov-1")).await.unwrap();

        let (rating, count) = directory.record_review("prov-1", 5).await.unwrap();
        assert_eq!(count, 1);
        assert!((rating - 5.0).abs() < 1e-9);

        let (rating, count) = directory.record_review("prov-1", 4).await.unwrap();
        assert_eq!(count, 2);
        assert!((rating - 4.5).abs() < 1e-9);

        let (rating, count) = directory.record_review("prov-1", 3).await.unwrap();
        assert_eq!(count, 3);
        assert!((rating - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_availability_gates_candidates() {
        let directory = ProviderDirectory::memory_only();
        directory.register(sample_provider("prov-1")).await.unwrap();

        let center = LatLng::new(19.0760, 72.8777);
        assert_eq!(
            directory
                .find_candidates(center, 10.0, ServiceType::TireRepair)
                .len(),
            1
        );

        directory.set_availability("prov-1", false).await.unwrap();
        assert!(directory
            .find_candidates(center, 10.0, ServiceType::TireRepair)
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_errors() {
        let directory = ProviderDirectory::memory_only();

        assert!(matches!(
            directory.set_availability("ghost", true).await,
            Err(CurbsideError::NotFound(_))
        ));
        assert!(matches!(
            directory.record_review("ghost", 5).await,
            Err(CurbsideError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_location_moves_candidate() {
        let directory = ProviderDirectory::memory_only();
        directory.register(sample_provider("prov-1")).await.unwrap();

        // Move the provider far away
        directory
            .set_location("prov-1", LatLng::new(28.6139, 77.2090))
            .await
            .unwrap();

        let center = LatLng::new(19.0760, 72.8777);
        assert!(directory
            .find_candidates(center, 10.0, ServiceType::TireRepair)
            .is_empty());
    }
}
