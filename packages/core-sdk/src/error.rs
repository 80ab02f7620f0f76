use std::fmt;

use serde_json::Value;
use thiserror::Error;

const OPENROUTER_PRIVACY_URL: &str = "https://openrouter.ai/settings/privacy";

/**
 * \brief Error taxonomy surfaced by profile management and `analyze`.
 * \details Terminal HTTP failures render their friendly message through `Display`,
 *          so front-ends can show `err.to_string()` verbatim.
 */
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("No active LLM profile")]
    NoActiveProfile,
    #[error("Base URL is missing for the active profile")]
    MissingBaseUrl,
    #[error("API Key is missing for the active profile")]
    MissingApiKey,
    #[error("Model is missing for the OpenAI Compatible provider. Please specify a model in LLM Settings.")]
    MissingModel,
    #[error("Canceled")]
    Canceled,
    #[error("{message}")]
    RateLimited {
        provider_message: String,
        message: String,
    },
    #[error("{message}")]
    ServerError {
        status: u16,
        provider_message: String,
        message: String,
    },
    #[error("Unexpected {family} response shape")]
    UnexpectedResponseShape { family: &'static str },
    #[error("Cannot delete default profile")]
    ProtectedProfile,
    #[error("{message}")]
    RequestFailed {
        /** \brief HTTP status, `None` when no response arrived */
        status: Option<u16>,
        provider_message: String,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LlmError {
    /** \brief HTTP status attached to the failure, if it came from a response. */
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited { .. } => Some(429),
            LlmError::ServerError { status, .. } => Some(*status),
            LlmError::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /** \brief Precondition failures raised before any network I/O. */
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LlmError::NoActiveProfile
                | LlmError::MissingBaseUrl
                | LlmError::MissingApiKey
                | LlmError::MissingModel
        )
    }
}

/**
 * \brief Outcome of an attempt that produced no usable response.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    /** \brief Transport failure, no HTTP response */
    Network,
    Http(u16),
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStatus::Network => f.write_str("network"),
            FailureStatus::Http(code) => write!(f, "{}", code),
        }
    }
}

/**
 * \brief Extract the provider's own error text from a response body.
 * \details Prefers the `error.message` field of a JSON error envelope, falls back to the raw body.
 */
pub fn provider_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/**
 * \brief Render a failure into a human-readable message with a remediation hint.
 */
pub fn friendly_message(status: FailureStatus, provider_message: &str, base_url: &str) -> String {
    let trimmed = provider_message.trim();
    let base = format!(
        "LLM request failed ({}): {}",
        status,
        if trimmed.is_empty() { "Unknown error" } else { trimmed }
    );

    let code = match status {
        FailureStatus::Network | FailureStatus::Http(0) => {
            return format!(
                "{}\nHint: This may be a network or CORS issue. Check connectivity and that the provider accepts requests from this client.",
                base
            );
        }
        FailureStatus::Http(code) => code,
    };

    match code {
        401 | 403 => format!(
            "{}\nHint: Check API key/organization permissions and that the selected model is allowed for your account.",
            base
        ),
        404 => {
            let lowered = trimmed.to_lowercase();
            if base_url.to_lowercase().contains("openrouter")
                && lowered.contains("no endpoints found matching your data policy")
            {
                format!(
                    "LLM request failed (404): OpenRouter blocked this request due to your data policy. Enable \"Free model publication\" or pick a non-free model.\nAction: Visit {} to adjust your Data Policy.\nProvider message: {}",
                    OPENROUTER_PRIVACY_URL, trimmed
                )
            } else {
                format!(
                    "{}\nHint: Verify the Base URL and Model. Some providers use different endpoints or model names.",
                    base
                )
            }
        }
        429 => format!(
            "{}\nHint: You hit a rate limit. Wait and retry, switch to a lighter model, or try again later.",
            base
        ),
        400 => format!(
            "{}\nHint: The provider rejected the request. Check your model name, base URL, and request size (try turning off full JSON).",
            base
        ),
        500..=599 => format!(
            "{}\nHint: Provider error. Try again later; if it persists, change the model or provider.",
            base
        ),
        _ => base,
    }
}

/**
 * \brief Map a terminal failure onto the error taxonomy.
 */
pub fn classify_failure(status: FailureStatus, provider_message: &str, base_url: &str) -> LlmError {
    let message = friendly_message(status, provider_message, base_url);
    let provider_message = provider_message.trim().to_string();
    match status {
        FailureStatus::Http(429) => LlmError::RateLimited {
            provider_message,
            message,
        },
        FailureStatus::Http(code @ 500..=599) => LlmError::ServerError {
            status: code,
            provider_message,
            message,
        },
        FailureStatus::Http(code) => LlmError::RequestFailed {
            status: Some(code),
            provider_message,
            message,
        },
        FailureStatus::Network => LlmError::RequestFailed {
            status: None,
            provider_message,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_message_prefers_error_envelope() {
        let body = r#"{"error":{"message":"model not found","code":404}}"#;
        assert_eq!(provider_message_from_body(body), "model not found");
        assert_eq!(provider_message_from_body("plain failure"), "plain failure");
    }

    #[test]
    fn test_friendly_message_includes_status_text_and_hint() {
        let msg = friendly_message(FailureStatus::Http(401), "bad key", "https://api.openai.com");
        assert!(msg.starts_with("LLM request failed (401): bad key"));
        assert!(msg.contains("Check API key"));

        let msg = friendly_message(FailureStatus::Network, "", "");
        assert!(msg.starts_with("LLM request failed (network): Unknown error"));
    }

    #[test]
    fn test_openrouter_data_policy_gets_named_remediation() {
        let msg = friendly_message(
            FailureStatus::Http(404),
            "No endpoints found matching your data policy",
            "https://openrouter.ai/api/v1/chat/completions",
        );
        assert!(msg.contains(OPENROUTER_PRIVACY_URL));

        let other = friendly_message(
            FailureStatus::Http(404),
            "No endpoints found matching your data policy",
            "https://api.openai.com/v1/chat/completions",
        );
        assert!(!other.contains(OPENROUTER_PRIVACY_URL));
        assert!(other.contains("Verify the Base URL"));
    }

    #[test]
    fn test_classify_failure_variants() {
        assert!(classify_failure(FailureStatus::Http(429), "slow down", "").is_rate_limited());
        assert!(matches!(
            classify_failure(FailureStatus::Http(503), "", ""),
            LlmError::ServerError { status: 503, .. }
        ));
        let err = classify_failure(FailureStatus::Http(400), "too big", "");
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("too big"));
        assert_eq!(classify_failure(FailureStatus::Network, "refused", "").status(), None);
    }
}
