use crate::allowlist;
use crate::auth::{self, AuthApi, AuthClient};
use crate::chat::{self, AiGatewayClient, ChatApi, ChatError, ChatTurn};
use crate::config::Settings;
use crate::error::GatewayError;
use crate::identity::{PirateApi, PirateClient};
use crate::rate_limit::{MemoryRateLimiter, RateDecision, RateLimiter};
use crate::tmdb::{MetadataApi, TmdbClient, UpstreamError};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024; // request bodies are small JSON envelopes

#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataApi>,
    pub auth: Arc<dyn AuthApi>,
    pub chat: Arc<dyn ChatApi>,
    pub pirates: Arc<dyn PirateApi>,
    pub limiter: Arc<dyn RateLimiter>,
    pub settings: Settings,
}

pub async fn run_server() -> Result<()> {
    let settings = Settings::from_env();
    let metadata: Arc<dyn MetadataApi> = Arc::new(TmdbClient::from_env()?);
    let auth: Arc<dyn AuthApi> = Arc::new(AuthClient::from_env()?);
    let chat: Arc<dyn ChatApi> = Arc::new(AiGatewayClient::from_env()?);
    let pirates: Arc<dyn PirateApi> = Arc::new(PirateClient::from_env()?);
    let limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::new(
        settings.window_ms,
        settings.sweep_threshold,
    ));

    if !metadata.configured() {
        warn!("Metadata upstream credential is not set; proxy requests will fail");
    }
    info!(
        "Rate limits: {} guest / {} authenticated per {}s window",
        settings.guest_max,
        settings.auth_max,
        settings.window_ms / 1000
    );

    let state = AppState {
        metadata,
        auth,
        chat,
        pirates,
        limiter,
        settings: settings.clone(),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/tmdb-proxy", any(proxy_handler))
        .route("/chat-recommend", any(chat_handler))
        .route("/pirate-identity", any(identity_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct ProxyRequest {
    endpoint: Option<String>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match proxy(&state, method, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// The proxy state machine. Every branch is terminal: exactly one response
/// per request, no retries.
async fn proxy(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, GatewayError> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }
    if method != Method::POST {
        return Err(GatewayError::MethodNotAllowed);
    }
    if !state.metadata.configured() {
        error!("Metadata upstream credential is not set");
        return Err(GatewayError::Misconfigured("Movie database"));
    }

    let caller = auth::identify(state.auth.as_ref(), headers).await;
    let max = if caller.is_authenticated() {
        state.settings.auth_max
    } else {
        state.settings.guest_max
    };
    let decision = state.limiter.check(&caller.rate_key(), max).await;
    if !decision.allowed {
        warn!("Rate limit exceeded for {}", caller.rate_key());
        return Err(GatewayError::RateLimited {
            retry_after_secs: reset_secs(&decision),
        });
    }

    let request: ProxyRequest = serde_json::from_slice(body).map_err(|e| {
        debug!("Rejecting request: invalid JSON body: {}", e);
        GatewayError::InvalidRequest("Invalid request body")
    })?;
    let Some(endpoint) = request.endpoint.as_deref().filter(|e| e.starts_with('/')) else {
        return Err(GatewayError::InvalidRequest("Invalid endpoint"));
    };
    if !allowlist::is_allowed(endpoint) {
        warn!("Endpoint not allowed: {}", endpoint);
        return Err(GatewayError::EndpointForbidden);
    }

    let params = string_params(request.params);
    debug!(
        "Proxying {} for {} ({} remaining)",
        endpoint,
        caller.rate_key(),
        decision.remaining
    );
    let data = state
        .metadata
        .fetch(endpoint, &params)
        .await
        .map_err(|err| match err {
            UpstreamError::Status(code) => {
                warn!("Upstream error {} for {}", code, endpoint);
                GatewayError::Upstream(code)
            }
            other => {
                error!("Upstream fetch failed for {}: {}", endpoint, other);
                GatewayError::Internal("Failed to fetch movie data")
            }
        })?;

    let mut response = (StatusCode::OK, Json(data)).into_response();
    rate_headers(response.headers_mut(), &decision);
    Ok(response)
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

async fn chat_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match chat_recommend(&state, method, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn chat_recommend(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, GatewayError> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }
    if method != Method::POST {
        return Err(GatewayError::MethodNotAllowed);
    }

    // Unlike the proxy, chat requires a resolved user.
    let Some(bearer) = auth::bearer_token(headers) else {
        return Err(GatewayError::Unauthorized("Authorization required"));
    };
    let user_id = match state.auth.resolve_user(bearer).await {
        Ok(Some(id)) => id,
        _ => return Err(GatewayError::Unauthorized("Unauthorized")),
    };

    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|_| GatewayError::InvalidRequest("Invalid request body"))?;

    let reply = state
        .chat
        .complete(&request.history, &request.message)
        .await
        .map_err(|err| match err {
            ChatError::RateLimited => GatewayError::AiRateLimited,
            ChatError::CreditsExhausted => GatewayError::AiCreditsExhausted,
            ChatError::NotConfigured => GatewayError::Misconfigured("AI service"),
            ChatError::Other(e) => {
                error!("AI gateway request failed: {:?}", e);
                GatewayError::Internal("AI service error")
            }
        })?;

    let cards = chat::recommend_cards(state.metadata.as_ref(), &reply, &request.message).await;
    info!("Chat reply with {} cards for user {}", cards.len(), user_id);

    Ok(Json(json!({
        "response": chat::strip_brackets(&reply),
        "movies": cards,
    }))
    .into_response())
}

async fn identity_handler(State(state): State<AppState>, method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    match state.pirates.random_pirate().await {
        Ok(pirate) => Json(pirate).into_response(),
        Err(err) => {
            error!("Failed to fetch pirate identity: {:?}", err);
            GatewayError::Internal("Failed to fetch pirate identity").into_response()
        }
    }
}

/// Caller params are string-valued; anything else is dropped, not coerced.
fn string_params(params: Option<Map<String, Value>>) -> HashMap<String, String> {
    params
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            _ => None,
        })
        .collect()
}

fn reset_secs(decision: &RateDecision) -> i64 {
    let ms = decision.reset_in_ms;
    let d = ms / 1000;
    let r = ms % 1000;
    if r > 0 { d + 1 } else { d }
}

fn rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    if let Ok(remaining) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", remaining);
    }
    if let Ok(reset) = HeaderValue::from_str(&reset_secs(decision).to_string()) {
        headers.insert("X-RateLimit-Reset", reset);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_params_are_dropped() {
        let mut params = Map::new();
        params.insert("page".to_string(), json!("2"));
        params.insert("junk".to_string(), json!(7));
        params.insert("flag".to_string(), json!(true));
        let filtered = string_params(Some(params));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn reset_seconds_round_up() {
        let decision = RateDecision {
            allowed: false,
            remaining: 0,
            reset_in_ms: 1_001,
        };
        assert_eq!(reset_secs(&decision), 2);
    }
}
