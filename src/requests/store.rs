//! Service request persistence with compare-and-set lifecycle updates
//!
//! Every state change is conditional on the state the caller observed,
//! applied as one atomic operation. Under MongoDB that is a filtered
//! find-and-update; in memory-only dev mode the map entry's shard lock
//! serializes the check and the write.

use bson::{doc, DateTime};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use super::lifecycle::RequestStatus;
use crate::db::schemas::{
    request::request_filter, RequestNote, ServiceRequestDoc, ServiceType,
    SERVICE_REQUEST_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::geo::{distance_km, round1, LatLng};
use crate::types::{CurbsideError, Result};

/// How an accept attempt ended
#[derive(Debug)]
pub enum AcceptOutcome {
    /// This caller won the request
    Accepted(ServiceRequestDoc),
    /// Someone else resolved the request first; carries the current state
    AlreadyResolved(ServiceRequestDoc),
}

/// A pending request with its distance from a provider
#[derive(Debug, Clone, Serialize)]
pub struct NearbyRequest {
    pub request: ServiceRequestDoc,
    pub distance_km: f64,
}

/// Request store with optional persistence
pub struct RequestStore {
    collection: Option<MongoCollection<ServiceRequestDoc>>,
    memory: DashMap<String, ServiceRequestDoc>,
}

impl RequestStore {
    /// Create a store backed by MongoDB
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo
            .collection::<ServiceRequestDoc>(SERVICE_REQUEST_COLLECTION)
            .await?;
        Ok(Self {
            collection: Some(collection),
            memory: DashMap::new(),
        })
    }

    /// Create a memory-only store (dev mode)
    pub fn memory_only() -> Self {
        Self {
            collection: None,
            memory: DashMap::new(),
        }
    }

    /// Persist a new request
    pub async fn create(&self, mut request: ServiceRequestDoc) -> Result<ServiceRequestDoc> {
        if let Some(collection) = &self.collection {
            let id = collection.insert_one(request.clone()).await?;
            request._id = Some(id);
        } else {
            self.memory
                .insert(request.request_id.clone(), request.clone());
        }

        info!(
            "Created request {} ({} at {:.4},{:.4})",
            request.request_id,
            request.service_type,
            request.latlng().latitude,
            request.latlng().longitude
        );
        Ok(request)
    }

    /// Fetch one request by id
    pub async fn get(&self, request_id: &str) -> Result<ServiceRequestDoc> {
        let found = if let Some(collection) = &self.collection {
            collection.find_one(request_filter(request_id)).await?
        } else {
            self.memory.get(request_id).map(|entry| entry.clone())
        };

        found.ok_or_else(|| CurbsideError::NotFound(format!("request {}", request_id)))
    }

    /// Attempt to win a pending request for `provider_id`.
    ///
    /// Exactly one concurrent caller gets `Accepted`; the rest get
    /// `AlreadyResolved` with the state that beat them. Losing is not an
    /// error and not retryable.
    pub async fn accept(
        &self,
        request_id: &str,
        provider_id: &str,
        estimated_cost: Option<f64>,
    ) -> Result<AcceptOutcome> {
        if let Some(collection) = &self.collection {
            let mut set = doc! {
                "status": RequestStatus::Accepted.as_str(),
                "accepted_by": provider_id,
                "accepted_at": DateTime::now(),
                "metadata.updated_at": DateTime::now(),
            };
            if let Some(cost) = estimated_cost {
                set.insert("estimated_cost", cost);
            }

            let won = collection
                .find_one_and_update(
                    doc! {
                        "request_id": request_id,
                        "status": RequestStatus::Pending.as_str(),
                    },
                    doc! { "$set": set },
                )
                .await?;

            match won {
                Some(updated) => {
                    info!("Request {} accepted by {}", request_id, provider_id);
                    Ok(AcceptOutcome::Accepted(updated))
                }
                // Lost the race, or the request never existed
                None => {
                    let current = self.get(request_id).await?;
                    Ok(AcceptOutcome::AlreadyResolved(current))
                }
            }
        } else {
            // The shard lock from get_mut covers the check and the write
            let Some(mut entry) = self.memory.get_mut(request_id) else {
                return Err(CurbsideError::NotFound(format!("request {}", request_id)));
            };

            if entry.status != RequestStatus::Pending {
                return Ok(AcceptOutcome::AlreadyResolved(entry.clone()));
            }

            entry.status = RequestStatus::Accepted;
            entry.accepted_by = Some(provider_id.to_string());
            entry.accepted_at = Some(DateTime::now());
            entry.estimated_cost = estimated_cost;
            entry.metadata.touch();

            info!("Request {} accepted by {}", request_id, provider_id);
            Ok(AcceptOutcome::Accepted(entry.clone()))
        }
    }

    /// Move a request to `next`, conditional on the state not changing
    /// underneath the caller.
    ///
    /// `actual_cost` is recorded when the move is to `Completed`.
    pub async fn update_status(
        &self,
        request_id: &str,
        next: RequestStatus,
        actual_cost: Option<f64>,
    ) -> Result<ServiceRequestDoc> {
        if let Some(collection) = &self.collection {
            let observed = self.get(request_id).await?;
            if !observed.status.can_transition_to(next) {
                return Err(CurbsideError::InvalidTransition {
                    from: observed.status,
                    to: next,
                });
            }

            let mut set = doc! {
                "status": next.as_str(),
                "metadata.updated_at": DateTime::now(),
            };
            if next == RequestStatus::Completed {
                set.insert("completed_at", DateTime::now());
                if let Some(cost) = actual_cost {
                    set.insert("actual_cost", cost);
                }
            }

            let updated = collection
                .find_one_and_update(
                    doc! {
                        "request_id": request_id,
                        "status": observed.status.as_str(),
                    },
                    doc! { "$set": set },
                )
                .await?;

            match updated {
                Some(updated) => {
                    info!("Request {} moved to {}", request_id, next);
                    Ok(updated)
                }
                // Someone moved it first; report against the fresh state
                None => {
                    let fresh = self.get(request_id).await?;
                    Err(CurbsideError::InvalidTransition {
                        from: fresh.status,
                        to: next,
                    })
                }
            }
        } else {
            let Some(mut entry) = self.memory.get_mut(request_id) else {
                return Err(CurbsideError::NotFound(format!("request {}", request_id)));
            };

            if !entry.status.can_transition_to(next) {
                return Err(CurbsideError::InvalidTransition {
                    from: entry.status,
                    to: next,
                });
            }

            entry.status = next;
            if next == RequestStatus::Completed {
                entry.completed_at = Some(DateTime::now());
                if actual_cost.is_some() {
                    entry.actual_cost = actual_cost;
                }
            }
            entry.metadata.touch();

            info!("Request {} moved to {}", request_id, next);
            Ok(entry.clone())
        }
    }

    /// Append a note to an open request
    pub async fn add_note(&self, request_id: &str, note: RequestNote) -> Result<ServiceRequestDoc> {
        let current = self.get(request_id).await?;
        if current.status.is_terminal() {
            return Err(CurbsideError::invalid("request is closed"));
        }

        if let Some(collection) = &self.collection {
            let updated = collection
                .find_one_and_update(
                    request_filter(request_id),
                    doc! {
                        "$push": { "notes": bson::to_bson(&note)? },
                        "$set": { "metadata.updated_at": DateTime::now() },
                    },
                )
                .await?;

            updated.ok_or_else(|| CurbsideError::NotFound(format!("request {}", request_id)))
        } else {
            let Some(mut entry) = self.memory.get_mut(request_id) else {
                return Err(CurbsideError::NotFound(format!("request {}", request_id)));
            };
            entry.notes.push(note);
            entry.metadata.touch();
            Ok(entry.clone())
        }
    }

    /// Record a one-time review on a completed request
    pub async fn submit_review(
        &self,
        request_id: &str,
        rating: i32,
        review: Option<String>,
    ) -> Result<ServiceRequestDoc> {
        let current = self.get(request_id).await?;
        if current.status != RequestStatus::Completed {
            return Err(CurbsideError::invalid(
                "only completed requests can be reviewed",
            ));
        }
        if current.rating.is_some() {
            return Err(CurbsideError::invalid("request already reviewed"));
        }

        if let Some(collection) = &self.collection {
            let mut set = doc! {
                "rating": rating,
                "metadata.updated_at": DateTime::now(),
            };
            if let Some(text) = &review {
                set.insert("review", text);
            }

            // The null match covers racing reviewers: the second one
            // finds the rating already present and falls through.
            let updated = collection
                .find_one_and_update(
                    doc! {
                        "request_id": request_id,
                        "status": RequestStatus::Completed.as_str(),
                        "rating": bson::Bson::Null,
                    },
                    doc! { "$set": set },
                )
                .await?;

            updated.ok_or_else(|| CurbsideError::invalid("request already reviewed"))
        } else {
            let Some(mut entry) = self.memory.get_mut(request_id) else {
                return Err(CurbsideError::NotFound(format!("request {}", request_id)));
            };
            if entry.rating.is_some() {
                return Err(CurbsideError::invalid("request already reviewed"));
            }
            entry.rating = Some(rating);
            entry.review = review;
            entry.metadata.touch();
            Ok(entry.clone())
        }
    }

    /// Pending requests near a point, newest first.
    ///
    /// `services` narrows to the service types a provider offers; empty
    /// means no narrowing. `cutoff` drops everything older than the
    /// catch-up window.
    pub async fn list_pending_near(
        &self,
        center: LatLng,
        radius_km: f64,
        services: &[ServiceType],
        cutoff: DateTime,
    ) -> Result<Vec<NearbyRequest>> {
        if let Some(collection) = &self.collection {
            let mut filter = doc! {
                "status": RequestStatus::Pending.as_str(),
                "location": {
                    "$geoWithin": {
                        "$centerSphere": [
                            [center.longitude, center.latitude],
                            crate::geo::radius_to_radians(radius_km),
                        ]
                    }
                },
                "metadata.created_at": { "$gte": cutoff },
            };
            if !services.is_empty() {
                let names: Vec<bson::Bson> = services
                    .iter()
                    .map(|s| bson::Bson::String(s.as_str().to_string()))
                    .collect();
                filter.insert("service_type", doc! { "$in": names });
            }

            let found = collection
                .find_many_sorted(filter, doc! { "metadata.created_at": -1 })
                .await?;

            Ok(found
                .into_iter()
                .map(|request| {
                    let distance = distance_km(center, request.latlng());
                    NearbyRequest {
                        request,
                        distance_km: round1(distance),
                    }
                })
                .collect())
        } else {
            let mut found: Vec<NearbyRequest> = self
                .memory
                .iter()
                .filter_map(|entry| {
                    let request = entry.value();
                    if request.status != RequestStatus::Pending {
                        return None;
                    }
                    if !services.is_empty() && !services.contains(&request.service_type) {
                        return None;
                    }
                    match request.metadata.created_at {
                        Some(created) if created >= cutoff => {}
                        _ => return None,
                    }
                    let distance = distance_km(center, request.latlng());
                    // Boundary inclusive
                    if distance > radius_km {
                        return None;
                    }
                    Some(NearbyRequest {
                        request: request.clone(),
                        distance_km: round1(distance),
                    })
                })
                .collect();

            found.sort_by_key(|item| std::cmp::Reverse(item.request.metadata.created_at));
            Ok(found)
        }
    }

    /// Requests a provider has accepted, newest first
    pub async fn list_for_provider(&self, provider_id: &str) -> Result<Vec<ServiceRequestDoc>> {
        if let Some(collection) = &self.collection {
            collection
                .find_many_sorted(
                    doc! { "accepted_by": provider_id },
                    doc! { "metadata.created_at": -1 },
                )
                .await
        } else {
            let mut found: Vec<ServiceRequestDoc> = self
                .memory
                .iter()
                .filter(|entry| entry.value().accepted_by.as_deref() == Some(provider_id))
                .map(|entry| entry.value().clone())
                .collect();
            found.sort_by_key(|request| std::cmp::Reverse(request.metadata.created_at));
            Ok(found)
        }
    }
}
