use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::presets::ProviderId;
use crate::profiles::infer_provider;

/**
 * \brief Named connection profile, persisted as one record of the profile list.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredProfile")]
pub struct Profile {
    /** \brief Opaque identifier, assigned once and never reused */
    pub id: String,
    /** \brief Display label */
    pub name: String,
    /** \brief Provider tag; decides wire shape and canonical endpoint */
    pub provider: ProviderId,
    pub base_url: String,
    /** \brief API key (stored in plain text alongside the profile) */
    pub api_key: String,
    pub model: String,
    /** \brief Read-only built-in profile; exactly one per collection */
    pub is_default: bool,
    /** \brief Created but not yet confirmed by the user */
    pub is_draft: bool,
}

/**
 * \brief Profile record as read from storage; fields written by older versions may be absent.
 */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredProfile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    is_draft: bool,
}

impl From<StoredProfile> for Profile {
    fn from(stored: StoredProfile) -> Self {
        // a record without a provider tag takes the one its endpoint implies
        let provider = match stored.provider.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => ProviderId::parse(tag),
            _ => infer_provider(&stored.base_url),
        };
        Self {
            id: stored.id,
            name: stored.name,
            provider,
            base_url: stored.base_url,
            api_key: stored.api_key,
            model: stored.model,
            is_default: stored.is_default,
            is_draft: stored.is_draft,
        }
    }
}

/**
 * \brief Upsert payload for `ProfileManager::save_profile`.
 * \details Absent `id` creates a new profile; absent `provider` is inferred from `base_url`.
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderId>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

impl ProfileInput {
    /**
     * \brief Settings-form checks run before saving.
     * \details An OpenAI-compatible (custom) endpoint needs both an explicit base URL and model.
     */
    pub fn validate(&self) -> Result<(), LlmError> {
        let provider = self
            .provider
            .unwrap_or_else(|| infer_provider(self.base_url.as_deref().unwrap_or("")));
        if provider != ProviderId::Custom {
            return Ok(());
        }
        if self.base_url.as_deref().unwrap_or("").trim().is_empty() {
            return Err(LlmError::MissingBaseUrl);
        }
        if self.model.as_deref().unwrap_or("").trim().is_empty() {
            return Err(LlmError::MissingModel);
        }
        Ok(())
    }
}
