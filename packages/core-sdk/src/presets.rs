use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/** \brief Model used for OpenAI-compatible calls when the profile leaves it empty. */
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
/** \brief Model used for Anthropic-style calls when the profile leaves it empty. */
pub const DEFAULT_ANTHROPIC_MODEL: &str = "anthropic/claude-sonnet-4.5";

/**
 * \brief Provider identifiers a profile can carry.
 * \details Serialized as the lower-case tags used by the persisted profile records;
 *          unknown tags read back as `Custom`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderId {
    OpenRouter,
    OpenAi,
    Anthropic,
    DeepSeek,
    #[default]
    Custom,
}

/** \brief Wire dialect spoken by a provider. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAiCompatible,
    Anthropic,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::OpenRouter,
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::DeepSeek,
        ProviderId::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "openrouter",
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::Custom => "custom",
        }
    }

    /** \brief Lenient parse; anything unrecognised is `Custom`. */
    pub fn parse(value: &str) -> ProviderId {
        match value.trim().to_ascii_lowercase().as_str() {
            "openrouter" => ProviderId::OpenRouter,
            "openai" => ProviderId::OpenAi,
            "anthropic" | "claude" => ProviderId::Anthropic,
            "deepseek" => ProviderId::DeepSeek,
            _ => ProviderId::Custom,
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderId::Anthropic => ProviderFamily::Anthropic,
            _ => ProviderFamily::OpenAiCompatible,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for ProviderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ProviderId::parse(&raw))
    }
}

impl ProviderFamily {
    /** \brief Built-in model name used when a profile does not set one. */
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAiCompatible => DEFAULT_OPENAI_MODEL,
            ProviderFamily::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAiCompatible => "LLM",
            ProviderFamily::Anthropic => "Anthropic",
        }
    }
}

/**
 * \brief Canonical connection defaults for one known provider.
 */
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub provider: ProviderId,
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub docs: String,
    /** \brief Model substituted after sustained rate limiting, if any. */
    pub fallback_model: Option<String>,
}

/**
 * \brief Static table of provider presets.
 * \details The first entry is the primary provider used to synthesize the default profile.
 */
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: Vec<Preset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetCatalog {
    pub fn builtin() -> Self {
        fn preset(
            provider: ProviderId,
            name: &str,
            base_url: &str,
            model: &str,
            docs: &str,
            fallback_model: Option<&str>,
        ) -> Preset {
            Preset {
                provider,
                name: name.to_string(),
                base_url: base_url.to_string(),
                model: model.to_string(),
                docs: docs.to_string(),
                fallback_model: fallback_model.map(str::to_string),
            }
        }

        Self {
            presets: vec![
                preset(
                    ProviderId::OpenRouter,
                    "OpenRouter (Default)",
                    "https://openrouter.ai/api/v1/chat/completions",
                    "qwen/qwen3-235b-a22b:free",
                    "https://openrouter.ai",
                    Some("gpt-4o-mini"),
                ),
                preset(
                    ProviderId::OpenAi,
                    "OpenAI",
                    "https://api.openai.com/v1/chat/completions",
                    "gpt-4o-mini",
                    "https://platform.openai.com/docs",
                    Some("gpt-4o-mini"),
                ),
                preset(
                    ProviderId::Anthropic,
                    "Anthropic",
                    "https://api.anthropic.com/v1/messages",
                    "anthropic/claude-sonnet-4.5",
                    "https://docs.anthropic.com",
                    Some("claude-3-5-haiku-latest"),
                ),
                preset(
                    ProviderId::DeepSeek,
                    "DeepSeek",
                    "https://api.deepseek.com/v1/chat/completions",
                    "deepseek/deepseek-chat-v3.1:free",
                    "https://platform.deepseek.com",
                    Some("deepseek-chat"),
                ),
            ],
        }
    }

    /**
     * \brief Re-point a provider's canonical endpoint (self-hosted gateways, tests).
     */
    pub fn with_base_url(mut self, provider: ProviderId, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if let Some(p) = self.presets.iter_mut().find(|p| p.provider == provider) {
            p.base_url = base_url;
        }
        self
    }

    pub fn get(&self, provider: ProviderId) -> Option<&Preset> {
        self.presets.iter().find(|p| p.provider == provider)
    }

    pub fn primary(&self) -> &Preset {
        &self.presets[0]
    }

    pub fn all(&self) -> &[Preset] {
        &self.presets
    }

    /** \brief Canonical endpoint for non-custom providers. */
    pub fn canonical_base_url(&self, provider: ProviderId) -> Option<&str> {
        if provider == ProviderId::Custom {
            return None;
        }
        self.get(provider).map(|p| p.base_url.as_str())
    }

    pub fn fallback_model(&self, provider: ProviderId) -> Option<&str> {
        self.get(provider).and_then(|p| p.fallback_model.as_deref())
    }
}
