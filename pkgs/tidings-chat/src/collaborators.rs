//! External collaborators: identity, profiles and blob storage
//!
//! The messaging core never owns these concerns. Hosts plug in their own
//! implementations; the in-memory ones here serve tests and the demo.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};

/// Supplies the signed-in user, if any
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Identity fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Display data for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Hydration lookup for display names and avatars.
///
/// Implementations report backend failures as [`ChatError::Profile`]; the
/// conversation list then shows bare user ids.
///
/// [`ChatError::Profile`]: crate::error::ChatError::Profile
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Profiles of the requested users; unknown users are simply absent
    async fn profiles(&self, user_ids: &[String]) -> Result<HashMap<String, Profile>>;
}

/// Accepts file bytes and returns a durable URL
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, bytes: Bytes, content_type: &str) -> Result<String>;
}

/// Profile directory backed by a map
#[derive(Default)]
pub struct InMemoryProfiles {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles
            .write()
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfiles {
    async fn profiles(&self, user_ids: &[String]) -> Result<HashMap<String, Profile>> {
        let profiles = self.profiles.read();
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

/// Blob storage that keeps uploads in memory under `memory://` URLs
#[derive(Default)]
pub struct InMemoryBlobStorage {
    blobs: RwLock<HashMap<String, (String, Bytes)>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type and bytes stored under `url`
    pub fn get(&self, url: &str) -> Option<(String, Bytes)> {
        self.blobs.read().get(url).cloned()
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn upload(&self, bytes: Bytes, content_type: &str) -> Result<String> {
        if bytes.is_empty() {
            return Err(ChatError::Blob("refusing to store an empty upload".into()));
        }
        let url = format!("memory://{}", Uuid::new_v4());
        self.blobs
            .write()
            .insert(url.clone(), (content_type.to_string(), bytes));
        Ok(url)
    }
}
