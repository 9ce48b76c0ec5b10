//! Presence registry for live mechanic connections
//!
//! Thread-safe map from provider id to the connection currently speaking
//! for it. A provider has at most one live channel; identifying again from
//! a second device replaces the first. Disconnects are idempotent and a
//! stale disconnect never knocks a newer connection offline.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{JwtValidator, Role};
use crate::live::{now_iso, ChannelHandle, LiveEvent, LiveHub};
use crate::types::Result;

/// One online mechanic
struct PresenceEntry {
    channel: ChannelHandle,
    since: DateTime<Utc>,
}

/// Snapshot row for the online listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub provider_id: String,
    pub online_since: String,
}

/// Presence registry
pub struct PresenceRegistry {
    /// Online mechanics indexed by provider id
    entries: DashMap<String, PresenceEntry>,
    /// Reverse index from connection to provider id
    by_channel: DashMap<Uuid, String>,
    validator: Arc<JwtValidator>,
    hub: Arc<LiveHub>,
}

impl PresenceRegistry {
    pub fn new(validator: Arc<JwtValidator>, hub: Arc<LiveHub>) -> Self {
        Self {
            entries: DashMap::new(),
            by_channel: DashMap::new(),
            validator,
            hub,
        }
    }

    /// Verify a mechanic token and bind its provider id to `channel`.
    ///
    /// Returns the provider id on success. An already-online provider is
    /// rebound to the new channel without a second online event.
    pub fn identify(&self, token: &str, channel: ChannelHandle) -> Result<String> {
        let claims = self.validator.verify_role(token, Role::Mechanic)?;
        let provider_id = claims.sub;

        // A connection re-identifying as a different provider releases its
        // old binding first.
        let bound = self
            .by_channel
            .get(&channel.channel_id())
            .map(|entry| entry.value().clone());
        if let Some(bound) = bound {
            if bound != provider_id {
                self.remove_channel(channel.channel_id());
            }
        }

        let entry = PresenceEntry {
            channel: channel.clone(),
            since: Utc::now(),
        };

        let previous = self.entries.insert(provider_id.clone(), entry);
        if let Some(previous) = &previous {
            // The replaced connection may still disconnect later; unlink it
            // now so that disconnect cannot take the new channel offline.
            self.by_channel.remove(&previous.channel.channel_id());
            debug!("Provider {} rebound to a new channel", provider_id);
        }
        self.by_channel
            .insert(channel.channel_id(), provider_id.clone());

        if previous.is_none() {
            info!("Provider {} is online, count={}", provider_id, self.entries.len());
            self.hub.broadcast(LiveEvent::ProviderOnline {
                provider_id: provider_id.clone(),
                timestamp: now_iso(),
            });
        }

        Ok(provider_id)
    }

    /// Drop the presence bound to `channel_id`, if it is still current.
    ///
    /// Safe to call more than once per connection; only the first call
    /// for a still-bound channel emits an offline event.
    pub fn remove_channel(&self, channel_id: Uuid) {
        let Some((_, provider_id)) = self.by_channel.remove(&channel_id) else {
            return;
        };

        let removed = self
            .entries
            .remove_if(&provider_id, |_, entry| {
                entry.channel.channel_id() == channel_id
            });

        if removed.is_some() {
            info!(
                "Provider {} went offline, count={}",
                provider_id,
                self.entries.len()
            );
            self.hub.broadcast(LiveEvent::ProviderOffline {
                provider_id,
                timestamp: now_iso(),
            });
        }
    }

    /// Whether a provider has a live connection right now
    pub fn is_online(&self, provider_id: &str) -> bool {
        self.entries.contains_key(provider_id)
    }

    /// Targeted send handle for an online provider
    pub fn channel_of(&self, provider_id: &str) -> Option<ChannelHandle> {
        self.entries
            .get(provider_id)
            .map(|entry| entry.channel.clone())
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Everyone currently online, for the operational listing
    pub fn online_snapshot(&self) -> Vec<PresenceSnapshot> {
        self.entries
            .iter()
            .map(|entry| PresenceSnapshot {
                provider_id: entry.key().clone(),
                online_since: entry.value().since.to_rfc3339(),
            })
            .collect()
    }
}
