use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use uuid::Uuid;

use crate::db::ProfileStore;
use crate::error::LlmError;
use crate::models::{Profile, ProfileInput};
use crate::presets::{PresetCatalog, ProviderId};
use crate::telemetry;

const NEW_PROFILE_NAME: &str = "New Profile";

/**
 * \brief Infer a provider from its endpoint host; unknown or empty endpoints are `Custom`.
 */
pub fn infer_provider(base_url: &str) -> ProviderId {
    let u = base_url.to_lowercase();
    if u.is_empty() {
        ProviderId::Custom
    } else if u.contains("openrouter.ai") {
        ProviderId::OpenRouter
    } else if u.contains("api.openai.com") {
        ProviderId::OpenAi
    } else if u.contains("anthropic.com") {
        ProviderId::Anthropic
    } else if u.contains("deepseek.com") {
        ProviderId::DeepSeek
    } else {
        ProviderId::Custom
    }
}

fn new_profile_id() -> String {
    format!("p-{}", Uuid::new_v4().simple())
}

/**
 * \brief CRUD and selection over connection profiles.
 * \details Owns the single read-only default profile. Every mutation rewrites the whole
 *          collection through the store; mutations are serialized by an internal lock.
 */
pub struct ProfileManager {
    store: ProfileStore,
    catalog: PresetCatalog,
    /** \brief Credential backfilled into the default profile; empty disables backfill. */
    default_api_key: String,
    write_lock: Mutex<()>,
}

impl ProfileManager {
    pub fn new(store: ProfileStore, catalog: PresetCatalog, default_api_key: impl Into<String>) -> Self {
        Self {
            store,
            catalog,
            default_api_key: default_api_key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, LlmError> {
        self.write_lock
            .lock()
            .map_err(|_| LlmError::Store(anyhow!("profile lock poisoned")))
    }

    /**
     * \brief Make sure a default profile exists; idempotent.
     */
    pub fn ensure_default_profile(&self) -> Result<(), LlmError> {
        let _guard = self.lock()?;
        self.ensure_default_locked()
    }

    fn ensure_default_locked(&self) -> Result<(), LlmError> {
        let mut profiles = self.store.get_profiles()?;
        match profiles.iter().position(|p| p.is_default) {
            None => {
                let preset = self.catalog.primary();
                let def = Profile {
                    id: new_profile_id(),
                    name: format!("Default ({})", display_provider(preset.provider)),
                    provider: preset.provider,
                    base_url: preset.base_url.clone(),
                    api_key: self.default_api_key.clone(),
                    model: preset.model.clone(),
                    is_default: true,
                    is_draft: false,
                };
                let def_id = def.id.clone();
                profiles.insert(0, def);
                self.store.set_profiles(&profiles)?;
                if self.store.get_active_id()?.is_empty() {
                    self.store.set_active_id(&def_id)?;
                }
                telemetry::log_event("profiles", &format!("synthesized default id={}", def_id));
            }
            Some(idx) => {
                if profiles[idx].api_key.is_empty() && !self.default_api_key.is_empty() {
                    profiles[idx].api_key = self.default_api_key.clone();
                    self.store.set_profiles(&profiles)?;
                }
            }
        }
        Ok(())
    }

    /** \brief All profiles, default first. */
    pub fn get_profiles(&self) -> Result<Vec<Profile>, LlmError> {
        let _guard = self.lock()?;
        self.ensure_default_locked()?;
        Ok(self.store.get_profiles()?)
    }

    pub fn get_active_profile_id(&self) -> Result<String, LlmError> {
        Ok(self.store.get_active_id()?)
    }

    pub fn set_active_profile_id(&self, id: &str) -> Result<(), LlmError> {
        let _guard = self.lock()?;
        Ok(self.store.set_active_id(id)?)
    }

    /**
     * \brief Resolve the active profile, repointing a stale active id at the first profile.
     */
    pub fn get_active_profile(&self) -> Result<Profile, LlmError> {
        let _guard = self.lock()?;
        self.ensure_default_locked()?;
        let id = self.store.get_active_id()?;
        let mut profiles = self.store.get_profiles()?;
        if let Some(pos) = profiles.iter().position(|p| p.id == id) {
            return Ok(profiles.swap_remove(pos));
        }
        if profiles.is_empty() {
            return Err(LlmError::NoActiveProfile);
        }
        let first = profiles.swap_remove(0);
        self.store.set_active_id(&first.id)?;
        Ok(first)
    }

    /**
     * \brief Upsert a profile by id.
     * \details Writes aimed at the default profile return it unchanged. Non-custom providers
     *          always get the catalog endpoint.
     */
    pub fn save_profile(&self, input: ProfileInput) -> Result<Profile, LlmError> {
        let _guard = self.lock()?;
        self.save_locked(input)
    }

    fn save_locked(&self, input: ProfileInput) -> Result<Profile, LlmError> {
        let mut profiles = self.store.get_profiles()?;
        let existing_idx = input
            .id
            .as_deref()
            .and_then(|id| profiles.iter().position(|p| p.id == id));
        if let Some(idx) = existing_idx {
            if profiles[idx].is_default {
                return Ok(profiles[idx].clone());
            }
        }

        // at most one draft: a draft write replaces any other draft
        let mut existing_idx = existing_idx;
        if input.is_draft {
            self.discard_drafts_locked(input.id.as_deref())?;
            profiles = self.store.get_profiles()?;
            existing_idx = input
                .id
                .as_deref()
                .and_then(|id| profiles.iter().position(|p| p.id == id));
        }

        let input_base = input.base_url.unwrap_or_default();
        let provider = input.provider.unwrap_or_else(|| infer_provider(&input_base));
        let base_url = self
            .catalog
            .canonical_base_url(provider)
            .map(str::to_string)
            .unwrap_or(input_base);

        let record = Profile {
            id: input
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_profile_id),
            name: input
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| NEW_PROFILE_NAME.to_string()),
            provider,
            base_url,
            api_key: input.api_key.unwrap_or_default(),
            model: input.model.unwrap_or_default(),
            is_default: false,
            is_draft: input.is_draft,
        };

        match existing_idx {
            Some(idx) => profiles[idx] = record.clone(),
            None => profiles.push(record.clone()),
        }
        self.store.set_profiles(&profiles)?;
        telemetry::log_event(
            "profiles",
            &format!(
                "save id={} provider={} draft={}",
                record.id, record.provider, record.is_draft
            ),
        );
        Ok(record)
    }

    /**
     * \brief Remove a profile. The default profile is protected.
     * \details Unknown ids are a no-op. If the active profile is removed, the first remaining
     *          profile becomes active.
     */
    pub fn delete_profile(&self, id: &str) -> Result<(), LlmError> {
        let _guard = self.lock()?;
        self.delete_locked(id)
    }

    fn delete_locked(&self, id: &str) -> Result<(), LlmError> {
        let mut profiles = self.store.get_profiles()?;
        let Some(idx) = profiles.iter().position(|p| p.id == id) else {
            return Ok(());
        };
        if profiles[idx].is_default {
            return Err(LlmError::ProtectedProfile);
        }
        profiles.remove(idx);
        self.store.set_profiles(&profiles)?;
        if self.store.get_active_id()? == id {
            let next = profiles.first().map(|p| p.id.as_str()).unwrap_or("");
            self.store.set_active_id(next)?;
        }
        telemetry::log_event("profiles", &format!("delete id={}", id));
        Ok(())
    }

    fn discard_drafts_locked(&self, keep: Option<&str>) -> Result<(), LlmError> {
        let drafts: Vec<String> = self
            .store
            .get_profiles()?
            .into_iter()
            .filter(|p| p.is_draft && !p.is_default && Some(p.id.as_str()) != keep)
            .map(|p| p.id)
            .collect();
        for id in drafts {
            self.delete_locked(&id)?;
        }
        Ok(())
    }

    /**
     * \brief Start a new unconfirmed profile from the primary preset and activate it.
     * \details At most one draft exists; an earlier draft is discarded.
     */
    pub fn create_draft(&self) -> Result<Profile, LlmError> {
        let _guard = self.lock()?;
        self.ensure_default_locked()?;
        self.discard_drafts_locked(None)?;
        let preset = self.catalog.primary();
        let draft = self.save_locked(ProfileInput {
            name: Some(NEW_PROFILE_NAME.to_string()),
            provider: Some(preset.provider),
            base_url: Some(preset.base_url.clone()),
            api_key: Some(String::new()),
            model: Some(preset.model.clone()),
            is_draft: true,
            ..Default::default()
        })?;
        self.store.set_active_id(&draft.id)?;
        Ok(draft)
    }

    /**
     * \brief Activate an existing profile, discarding any other draft.
     */
    pub fn select_profile(&self, id: &str) -> Result<Option<Profile>, LlmError> {
        let _guard = self.lock()?;
        let Some(profile) = self.store.get_profiles()?.into_iter().find(|p| p.id == id) else {
            return Ok(None);
        };
        self.discard_drafts_locked(Some(id))?;
        self.store.set_active_id(id)?;
        Ok(Some(profile))
    }
}

fn display_provider(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::OpenRouter => "OpenRouter",
        ProviderId::OpenAi => "OpenAI",
        ProviderId::Anthropic => "Anthropic",
        ProviderId::DeepSeek => "DeepSeek",
        ProviderId::Custom => "Custom",
    }
}
