//! API key lifecycle. The raw key leaves this module exactly once, in the
//! creation result; everything else sees only its SHA-256 hash.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use creatorpulse_common::{mask_key, GatewayError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

/// How long a validated hash→id mapping stays cached.
const VALIDATION_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_month: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: String,
    /// sha256 hex of the raw key; the raw key itself is never stored.
    pub hashed_key: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub rate_limits: RateLimits,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ApiKey {
    /// Active and unexpired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    /// `"*"` grants everything; otherwise the exact permission must be held.
    pub fn has_permission(&self, required: &str) -> bool {
        self.permissions.iter().any(|p| p == "*" || p == required)
    }
}

/// Creation/rotation result. `raw_key` is shown to the caller once and
/// cannot be recovered afterwards.
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub key: ApiKey,
    pub raw_key: String,
}

pub fn hash_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn generate_raw_key() -> String {
    format!(
        "cp_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[derive(Debug)]
struct CacheEntry {
    key_id: String,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, ApiKey>,
    id_by_hash: HashMap<String, String>,
    validation_cache: HashMap<String, CacheEntry>,
}

pub struct ApiKeyManager {
    inner: Mutex<Inner>,
}

impl ApiKeyManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        permissions: Vec<String>,
        rate_limits: RateLimits,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CreatedKey {
        let raw_key = generate_raw_key();
        let key = ApiKey {
            id: Uuid::new_v4().to_string(),
            hashed_key: hash_key(&raw_key),
            name: name.into(),
            permissions,
            rate_limits,
            created_at: now,
            last_used_at: None,
            expires_at,
            is_active: true,
            metadata: None,
        };

        let mut inner = self.inner.lock().expect("key manager lock poisoned");
        inner
            .id_by_hash
            .insert(key.hashed_key.clone(), key.id.clone());
        inner.by_id.insert(key.id.clone(), key.clone());

        info!(key_id = %key.id, name = %key.name, masked = %mask_key(&raw_key), "API key created");
        CreatedKey { key, raw_key }
    }

    /// Validate a raw key, returning its record. Uses a TTL cache over the
    /// hash lookup; validity itself is always re-checked so deactivation and
    /// expiry take effect immediately.
    pub fn validate(&self, raw_key: &str, now: DateTime<Utc>) -> Result<ApiKey, GatewayError> {
        let hashed = hash_key(raw_key);
        let mut inner = self.inner.lock().expect("key manager lock poisoned");

        let key_id = match inner.validation_cache.get(&hashed) {
            Some(entry)
                if now - entry.cached_at
                    < chrono::Duration::from_std(VALIDATION_CACHE_TTL)
                        .unwrap_or_else(|_| chrono::Duration::zero()) =>
            {
                Some(entry.key_id.clone())
            }
            _ => None,
        };
        let key_id = match key_id {
            Some(id) => id,
            None => {
                let id = inner
                    .id_by_hash
                    .get(&hashed)
                    .cloned()
                    .ok_or(GatewayError::InvalidApiKey)?;
                inner.validation_cache.insert(
                    hashed.clone(),
                    CacheEntry {
                        key_id: id.clone(),
                        cached_at: now,
                    },
                );
                id
            }
        };

        let key = inner
            .by_id
            .get_mut(&key_id)
            .ok_or(GatewayError::InvalidApiKey)?;
        if !key.is_valid(now) {
            return Err(GatewayError::InvalidApiKey);
        }
        key.last_used_at = Some(now);
        Ok(key.clone())
    }

    pub fn get(&self, id: &str) -> Option<ApiKey> {
        self.inner
            .lock()
            .expect("key manager lock poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// Issue a successor with identical permissions and limits and
    /// deactivate the old key, atomically under the manager lock.
    pub fn rotate(&self, id: &str, now: DateTime<Utc>) -> Result<CreatedKey, GatewayError> {
        let mut inner = self.inner.lock().expect("key manager lock poisoned");

        let old = inner
            .by_id
            .get(id)
            .cloned()
            .ok_or(GatewayError::InvalidApiKey)?;

        let raw_key = generate_raw_key();
        let new_key = ApiKey {
            id: Uuid::new_v4().to_string(),
            hashed_key: hash_key(&raw_key),
            name: old.name.clone(),
            permissions: old.permissions.clone(),
            rate_limits: old.rate_limits.clone(),
            created_at: now,
            last_used_at: None,
            expires_at: old.expires_at,
            is_active: true,
            metadata: old.metadata.clone(),
        };

        inner
            .id_by_hash
            .insert(new_key.hashed_key.clone(), new_key.id.clone());
        inner.by_id.insert(new_key.id.clone(), new_key.clone());
        if let Some(old_entry) = inner.by_id.get_mut(id) {
            old_entry.is_active = false;
        }
        inner.validation_cache.remove(&old.hashed_key);

        info!(old_id = %id, new_id = %new_key.id, "API key rotated");
        Ok(CreatedKey {
            key: new_key,
            raw_key,
        })
    }

    pub fn revoke(&self, id: &str, reason: Option<&str>) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("key manager lock poisoned");
        let key = inner.by_id.get_mut(id).ok_or(GatewayError::InvalidApiKey)?;
        key.is_active = false;
        let hashed = key.hashed_key.clone();
        inner.validation_cache.remove(&hashed);
        info!(key_id = %id, reason = reason.unwrap_or("unspecified"), "API key revoked");
        Ok(())
    }

    /// Drop cache entries older than the TTL. Run from the same sweeper
    /// cadence as the rate-limit windows.
    pub fn sweep_cache(&self, now: DateTime<Utc>) {
        let ttl = chrono::Duration::from_std(VALIDATION_CACHE_TTL)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.lock().expect("key manager lock poisoned");
        inner
            .validation_cache
            .retain(|_, entry| now - entry.cached_at < ttl);
    }
}

impl Default for ApiKeyManager {
    fn default() -> Self {
        Self::new()
    }
}
