use std::sync::Arc;

use shared::{
    domain::{Profile, ProfileDraft},
    error::ValidationError,
};
use storage::KeyValueStore;
use thiserror::Error;
use tracing::{info, warn};

pub const PROFILE_KEY: &str = "profile";

/// The persistence layer could not be read or written. Callers treat the
/// profile as absent and unwritable rather than failing the session.
#[derive(Debug, Clone, Error)]
#[error("profile storage unavailable: {0}")]
pub struct StorageUnavailable(pub String);

#[derive(Debug, Clone, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageUnavailable),
}

/// Durable home of the single commute profile.
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<Profile>, StorageUnavailable> {
        let raw = self
            .store
            .get(PROFILE_KEY)
            .await
            .map_err(|err| StorageUnavailable(format!("{err:#}")))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let profile = match serde_json::from_str::<Profile>(&raw) {
            Ok(profile) => profile,
            Err(err) => {
                warn!("profile: stored record is unreadable, treating as absent: {err}");
                return Ok(None);
            }
        };
        if let Err(err) = profile.validate() {
            warn!("profile: stored record failed validation, treating as absent: {err}");
            return Ok(None);
        }
        Ok(Some(profile))
    }

    /// Validates the form input and overwrites the stored profile. Nothing is
    /// written when validation fails.
    pub async fn save(&self, draft: ProfileDraft) -> Result<Profile, ProfileError> {
        let profile = draft.into_profile()?;
        self.save_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn save_profile(&self, profile: &Profile) -> Result<(), ProfileError> {
        profile.validate()?;
        let raw = serde_json::to_string(profile)
            .map_err(|err| StorageUnavailable(format!("failed to encode profile: {err}")))?;
        self.store
            .set(PROFILE_KEY, &raw)
            .await
            .map_err(|err| StorageUnavailable(format!("{err:#}")))?;
        info!(home = %profile.home, station = %profile.station, "profile: saved");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StorageUnavailable> {
        self.store
            .delete(PROFILE_KEY)
            .await
            .map_err(|err| StorageUnavailable(format!("{err:#}")))?;
        info!("profile: cleared");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/profile_store_tests.rs"]
mod tests;
