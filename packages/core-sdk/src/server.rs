use std::{convert::Infallible, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::{
    analyze::AnalyzeOptions,
    config::Core,
    error::LlmError,
    models::{Profile, ProfileInput},
    presets::Preset,
    report::{calculate_metrics, top_steps, Metrics, StartupEvent, StartupReport},
    telemetry,
};

type ApiError = (StatusCode, String);

/**
 * \brief Start the local dashboard server: JSON API plus static dashboard files.
 * \param addr listen address such as "127.0.0.1:5173"
 */
pub async fn run(addr: &str, core: Core) -> Result<()> {
    let app = router(core);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(core: Core) -> Router {
    let static_handler =
        ServeDir::new(core.config.ui_dir.clone()).append_index_html_on_directories(true);
    let static_service = get_service(static_handler);

    Router::new()
        .route("/api/presets", get(list_presets))
        .route("/api/profiles", get(get_profiles).post(save_profile))
        .route("/api/profiles/draft", post(create_draft))
        .route("/api/profiles/{id}", delete(delete_profile))
        .route("/api/profiles/{id}/select", post(select_profile))
        .route("/api/config", post(set_config))
        .route("/api/metrics", post(report_metrics))
        .route("/api/analyze", post(analyze_sse))
        .route("/api/health", get(health_check))
        .fallback_service(static_service)
        .with_state(Arc::new(core))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProfileItem {
    id: String,
    name: String,
    provider: String,
    base_url: String,
    /** \brief Empty for the default profile, whose credential is never echoed. */
    api_key: String,
    has_api_key: bool,
    model: String,
    is_default: bool,
    is_draft: bool,
    is_active: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProfilesState {
    profiles: Vec<ProfileItem>,
    active_profile_id: String,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ConfigRequest {
    telemetry_enabled: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    metrics: Metrics,
    top_steps: Vec<StartupEvent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    /** \brief The report document, or its text. */
    report: Value,
    #[serde(default)]
    full_json: bool,
    #[serde(default)]
    attempts: Option<u32>,
    #[serde(default)]
    allow_fallback: bool,
}

fn to_item(p: Profile, active_id: &str) -> ProfileItem {
    ProfileItem {
        is_active: p.id == active_id,
        has_api_key: !p.api_key.is_empty(),
        api_key: if p.is_default { String::new() } else { p.api_key },
        id: p.id,
        name: p.name,
        provider: p.provider.to_string(),
        base_url: p.base_url,
        model: p.model,
        is_default: p.is_default,
        is_draft: p.is_draft,
    }
}

fn build_profiles_state(core: &Core) -> Result<ProfilesState, LlmError> {
    // resolving the active profile also heals a stale pointer
    let active = core.manager.get_active_profile()?;
    let profiles = core.manager.get_profiles()?;
    let telemetry_enabled = core.store.get_telemetry_enabled()?;
    Ok(ProfilesState {
        profiles: profiles
            .into_iter()
            .map(|p| to_item(p, &active.id))
            .collect(),
        active_profile_id: active.id,
        telemetry_enabled,
    })
}

fn report_from_value(value: Value) -> StartupReport {
    match value {
        Value::String(text) => StartupReport::parse(&text),
        other => StartupReport::new(other),
    }
}

async fn list_presets(State(core): State<Arc<Core>>) -> Json<Vec<Preset>> {
    Json(core.manager.catalog().all().to_vec())
}

async fn get_profiles(State(core): State<Arc<Core>>) -> Result<Json<ProfilesState>, ApiError> {
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

/**
 * \brief Upsert a profile; a confirmed (non-draft) save also activates it.
 */
async fn save_profile(
    State(core): State<Arc<Core>>,
    Json(input): Json<ProfileInput>,
) -> Result<Json<ProfilesState>, ApiError> {
    input.validate().map_err(llm_err)?;
    let saved = core.manager.save_profile(input).map_err(llm_err)?;
    if !saved.is_draft {
        core.manager
            .set_active_profile_id(&saved.id)
            .map_err(llm_err)?;
    }
    telemetry::log_event(
        "server.profile",
        &format!("save id={} provider={}", saved.id, saved.provider),
    );
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

async fn create_draft(State(core): State<Arc<Core>>) -> Result<Json<ProfilesState>, ApiError> {
    core.manager.create_draft().map_err(llm_err)?;
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

async fn delete_profile(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> Result<Json<ProfilesState>, ApiError> {
    core.manager.delete_profile(&id).map_err(llm_err)?;
    telemetry::log_event("server.profile", &format!("delete id={}", id));
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

async fn select_profile(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> Result<Json<ProfilesState>, ApiError> {
    if core.manager.select_profile(&id).map_err(llm_err)?.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("profile {} not found", id)));
    }
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

async fn set_config(
    State(core): State<Arc<Core>>,
    Json(input): Json<ConfigRequest>,
) -> Result<Json<ProfilesState>, ApiError> {
    core.store
        .set_telemetry_enabled(input.telemetry_enabled)
        .map_err(internal_err)?;
    telemetry::set_enabled(input.telemetry_enabled);
    Ok(Json(build_profiles_state(&core).map_err(llm_err)?))
}

async fn report_metrics(Json(report): Json<Value>) -> Json<MetricsResponse> {
    let events = report_from_value(report).events();
    Json(MetricsResponse {
        metrics: calculate_metrics(&events),
        top_steps: top_steps(&events, 10),
    })
}

/**
 * \brief Analysis as Server-Sent Events: `status` lines, then one `result` or `error`.
 * \details Dropping the connection cancels the analysis.
 */
async fn analyze_sse(
    State(core): State<Arc<Core>>,
    Json(req): Json<AnalyzeRequest>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let token = CancellationToken::new();
    let done = CancellationToken::new();

    let status_tx = tx.clone();
    let options = AnalyzeOptions {
        on_status: Some(Arc::new(move |msg: &str| {
            let _ = status_tx.send(Ok(Event::default().event("status").data(sse_data(msg))));
        })),
        cancellation_token: token.clone(),
        full_json: req.full_json,
        attempts: req.attempts,
        allow_fallback: req.allow_fallback,
    };

    {
        let tx = tx.clone();
        let done = done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    telemetry::log_event("server.analyze", "client disconnected, canceling");
                    token.cancel();
                }
                _ = done.cancelled() => {}
            }
        });
    }

    let report = report_from_value(req.report);
    let analyzer = core.analyzer.clone();
    tokio::spawn(async move {
        let result = analyzer.analyze(&report, options).await;
        done.cancel();
        let event = match result {
            Ok(text) => Event::default().event("result").data(sse_data(&text)),
            Err(e) => {
                telemetry::log_error("server.analyze", &e.to_string());
                Event::default().event("error").data(sse_data(&e.to_string()))
            }
        };
        let _ = tx.send(Ok(event));
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::new())
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({"ok": true}))
}

fn sse_data(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn llm_err(e: LlmError) -> ApiError {
    let status = match &e {
        LlmError::ProtectedProfile => StatusCode::FORBIDDEN,
        err if err.is_precondition() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
