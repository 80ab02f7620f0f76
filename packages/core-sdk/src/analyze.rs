use std::{sync::Arc, time::Duration};

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{classify_failure, provider_message_from_body, FailureStatus, LlmError};
use crate::llm::{adapter_for, CompletionRequest, ProviderAdapter};
use crate::models::Profile;
use crate::presets::ProviderId;
use crate::profiles::ProfileManager;
use crate::prompt::{self, Prompt, PromptOptions};
use crate::report::StartupReport;
use crate::telemetry;

/** \brief Receives human-readable progress lines (retry countdowns, fallback switches). */
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/**
 * \brief Backoff timing between attempts.
 */
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /** \brief Upper bound (exclusive) of the random jitter added to each delay */
    pub max_jitter: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(600),
            max_jitter: Duration::from_millis(250),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /**
     * \brief Delay before the attempt following `attempt` (1-based).
     * \details A server-provided retry-after wins but is still clamped to `max_delay`.
     */
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server) = retry_after.filter(|d| !d.is_zero()) {
            return server.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        } else {
            Duration::ZERO
        };
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

/**
 * \brief Orchestrator tunables.
 */
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub retry: RetryPolicy,
    pub default_attempts: u32,
    /** \brief Attempt budget for the single fallback-model round */
    pub fallback_attempts: u32,
    pub temperature: f64,
    pub prompt: PromptOptions,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_attempts: 3,
            fallback_attempts: 2,
            temperature: 0.2,
            prompt: PromptOptions::default(),
        }
    }
}

/**
 * \brief Per-call options for `Analyzer::analyze`.
 */
#[derive(Clone, Default)]
pub struct AnalyzeOptions {
    pub on_status: Option<StatusCallback>,
    pub cancellation_token: CancellationToken,
    /** \brief Send the whole report instead of the compact prompt */
    pub full_json: bool,
    /** \brief Attempt budget; `None` uses the configured default */
    pub attempts: Option<u32>,
    /** \brief Switch to the provider's fallback model after sustained rate limiting */
    pub allow_fallback: bool,
}

impl AnalyzeOptions {
    fn notify(&self, message: &str) {
        if let Some(cb) = &self.on_status {
            cb(message);
        }
    }
}

/** \brief Everything one dispatch round needs; resolved once per `analyze` call. */
struct Dispatch<'a> {
    profile: &'a Profile,
    adapter: &'a dyn ProviderAdapter,
    prompt: &'a Prompt,
    options: &'a AnalyzeOptions,
}

/**
 * \brief Top-level entry point: resolves the active profile, builds the prompt and
 *        drives the provider call with retry, cancellation and fallback.
 */
#[derive(Clone)]
pub struct Analyzer {
    manager: Arc<ProfileManager>,
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(manager: Arc<ProfileManager>, config: AnalyzerConfig) -> Self {
        Self::with_client(manager, config, reqwest::Client::new())
    }

    pub fn with_client(manager: Arc<ProfileManager>, config: AnalyzerConfig, client: reqwest::Client) -> Self {
        Self {
            manager,
            client,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<ProfileManager> {
        &self.manager
    }

    /**
     * \brief Analyze a report with the active profile and return the model's narrative.
     */
    pub async fn analyze(&self, report: &StartupReport, options: AnalyzeOptions) -> Result<String, LlmError> {
        // read once; concurrent profile edits do not affect this call
        let profile = self.manager.get_active_profile()?;
        let model = resolve_model(&profile)?;

        if options.cancellation_token.is_cancelled() {
            return Err(LlmError::Canceled);
        }

        let prompt = if options.full_json {
            prompt::build_full(report)
        } else {
            prompt::build(report, self.config.prompt)
        };
        let adapter = adapter_for(&profile);
        let dispatch = Dispatch {
            profile: &profile,
            adapter: adapter.as_ref(),
            prompt: &prompt,
            options: &options,
        };
        let attempts = options
            .attempts
            .filter(|a| *a > 0)
            .unwrap_or(self.config.default_attempts);

        telemetry::log_event(
            "llm.analyze",
            &format!(
                "start provider={} model={} variant={} bytes={} attempts={}",
                profile.provider,
                model,
                if options.full_json { "full" } else { "compact" },
                prompt.user.len(),
                attempts
            ),
        );

        match self.dispatch(&dispatch, &model, attempts).await {
            Err(err) if err.is_rate_limited() && options.allow_fallback => {
                let fallback = self
                    .manager
                    .catalog()
                    .fallback_model(profile.provider)
                    .filter(|m| *m != model)
                    .map(str::to_string);
                let Some(fallback) = fallback else {
                    return Err(err);
                };
                if options.cancellation_token.is_cancelled() {
                    return Err(LlmError::Canceled);
                }
                options.notify(&format!("Rate limited. Trying fallback model: {} ...", fallback));
                telemetry::log_event(
                    "llm.analyze",
                    &format!("fallback provider={} from={} to={}", profile.provider, model, fallback),
                );
                self.dispatch(&dispatch, &fallback, self.config.fallback_attempts)
                    .await
            }
            other => other,
        }
    }

    /**
     * \brief Bounded retry loop for one model. Attempts are strictly sequential.
     */
    async fn dispatch(&self, ctx: &Dispatch<'_>, model: &str, attempts: u32) -> Result<String, LlmError> {
        let attempts = attempts.max(1);
        let token = &ctx.options.cancellation_token;

        for attempt in 1..=attempts {
            if token.is_cancelled() {
                return Err(LlmError::Canceled);
            }

            let request = CompletionRequest {
                model,
                system: &ctx.prompt.system,
                user: &ctx.prompt.user,
                temperature: self.config.temperature,
            };
            let outcome = ctx.adapter.build_request(&self.client, &request).send().await;

            let (status, provider_message, retry_after) = match outcome {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => {
                        let json = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
                        let content = ctx.adapter.extract_content(&json);
                        if content.is_empty() {
                            telemetry::log_error(
                                "llm.analyze",
                                &format!("unexpected response shape provider={}", ctx.profile.provider),
                            );
                            return Err(LlmError::UnexpectedResponseShape {
                                family: ctx.adapter.family().label(),
                            });
                        }
                        return Ok(content);
                    }
                    // a body cut off mid-read counts as a transport failure
                    Err(err) => (FailureStatus::Network, err.to_string(), None),
                },
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    let retry_after = parse_retry_after(resp.headers());
                    let body = resp.text().await.unwrap_or_default();
                    (
                        FailureStatus::Http(code),
                        provider_message_from_body(&body),
                        retry_after,
                    )
                }
                Err(err) => (FailureStatus::Network, err.to_string(), None),
            };

            let remaining = attempt < attempts;
            let retry = match status {
                FailureStatus::Http(429) if remaining => {
                    let delay = self.config.retry.backoff(attempt, retry_after);
                    Some((
                        delay,
                        format!(
                            "Rate limited, retrying in {}s (attempt {}/{})...",
                            ceil_secs(delay),
                            attempt + 1,
                            attempts
                        ),
                    ))
                }
                FailureStatus::Http(code) if code >= 500 && remaining => {
                    let delay = self.config.retry.backoff(attempt, None);
                    Some((
                        delay,
                        format!(
                            "Server error {}, retrying in {}s (attempt {}/{})...",
                            code,
                            ceil_secs(delay),
                            attempt + 1,
                            attempts
                        ),
                    ))
                }
                FailureStatus::Network if remaining => {
                    let delay = self.config.retry.backoff(attempt, None);
                    Some((
                        delay,
                        format!(
                            "Network error, retrying in {}s (attempt {}/{})...",
                            ceil_secs(delay),
                            attempt + 1,
                            attempts
                        ),
                    ))
                }
                _ => None,
            };

            match retry {
                Some((delay, message)) => {
                    telemetry::log_event(
                        "llm.retry",
                        &format!(
                            "status={} model={} attempt={}/{} delay_ms={}",
                            status,
                            model,
                            attempt,
                            attempts,
                            delay.as_millis()
                        ),
                    );
                    ctx.options.notify(&message);
                    wait(delay, token).await?;
                }
                None => {
                    let err = classify_failure(status, &provider_message, &ctx.profile.base_url);
                    telemetry::log_error(
                        "llm.analyze",
                        &format!("failed status={} model={} attempt={}", status, model, attempt),
                    );
                    return Err(err);
                }
            }
        }

        Err(LlmError::RequestFailed {
            status: None,
            provider_message: String::new(),
            message: "LLM request failed: retries exhausted".to_string(),
        })
    }
}

/**
 * \brief Precondition checks run before any I/O; returns the model to use.
 */
fn resolve_model(profile: &Profile) -> Result<String, LlmError> {
    if profile.base_url.trim().is_empty() {
        return Err(LlmError::MissingBaseUrl);
    }
    if profile.api_key.trim().is_empty() {
        return Err(LlmError::MissingApiKey);
    }
    if !profile.model.trim().is_empty() {
        return Ok(profile.model.clone());
    }
    if profile.provider == ProviderId::Custom {
        return Err(LlmError::MissingModel);
    }
    Ok(profile.provider.family().default_model().to_string())
}

/** \brief Sleep that a cancellation turns into `Canceled` immediately. */
async fn wait(delay: Duration, token: &CancellationToken) -> Result<(), LlmError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LlmError::Canceled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}

fn ceil_secs(delay: Duration) -> u128 {
    delay.as_millis().div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProfileStore;
    use crate::presets::PresetCatalog;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1, None), Duration::from_millis(600));
        assert_eq!(policy.backoff(2, None), Duration::from_millis(1200));
        assert_eq!(policy.backoff(3, None), Duration::from_millis(2400));
        assert_eq!(policy.backoff(10, None), Duration::from_millis(30_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.backoff(1, None);
            assert!(d >= Duration::from_millis(600) && d < Duration::from_millis(850));
        }
    }

    #[test]
    fn test_retry_after_is_preferred_but_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(120))),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_parse_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    fn profile(provider: ProviderId, base_url: &str, api_key: &str, model: &str) -> Profile {
        Profile {
            id: "p-test".into(),
            name: "test".into(),
            provider,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            is_default: false,
            is_draft: false,
        }
    }

    #[test]
    fn test_preconditions() {
        assert!(matches!(
            resolve_model(&profile(ProviderId::OpenAi, "", "k", "")),
            Err(LlmError::MissingBaseUrl)
        ));
        assert!(matches!(
            resolve_model(&profile(ProviderId::OpenAi, "http://x", "", "")),
            Err(LlmError::MissingApiKey)
        ));
        assert!(matches!(
            resolve_model(&profile(ProviderId::Custom, "http://x", "k", "")),
            Err(LlmError::MissingModel)
        ));
        assert_eq!(
            resolve_model(&profile(ProviderId::OpenAi, "http://x", "k", "")).expect("default"),
            "gpt-4o-mini"
        );
        assert_eq!(
            resolve_model(&profile(ProviderId::Anthropic, "http://x", "k", "")).expect("default"),
            "anthropic/claude-sonnet-4.5"
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_io() {
        let manager = Arc::new(ProfileManager::new(
            ProfileStore::in_memory(),
            PresetCatalog::builtin(),
            "",
        ));
        let analyzer = Analyzer::new(manager, AnalyzerConfig::default());
        let err = analyzer
            .analyze(&StartupReport::parse("{}"), AnalyzeOptions::default())
            .await
            .expect_err("no key");
        assert!(matches!(err, LlmError::MissingApiKey));
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_wait_is_aborted_by_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wait(Duration::from_secs(60), &token).await.expect_err("canceled");
        assert!(matches!(err, LlmError::Canceled));
    }
}
