//! Bootstrap HTTP gate: setup, login, sessions, and allow-listed static
//! assets.
//!
//! The gate is a small state machine keyed on whether a credential
//! exists. Before setup every GET renders the setup form and the only
//! accepted POST is `/setup`. After setup the normal login/session flow
//! applies and `/setup` is locked out with 405.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::hub::HubHandle;
use crate::pages;
use crate::session::{Session, SessionRegistry};

/// Page served to authenticated users at the root.
pub const ENTRY_PAGE: &str = "player.html";

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionRegistry>,
    pub hub: HubHandle,
}

/// Builds the gate router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/setup", get(get_setup).post(post_setup))
        .route("/login", get(get_login).post(post_login))
        .route("/logout", get(get_logout))
        .route("/ws_token", get(get_ws_token))
        .fallback(static_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CredentialForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Parses cookie pairs from a `Cookie` header value.
fn parse_cookies(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        Some((name.trim(), value.trim()))
    })
}

/// Resolves the session carried by the request's cookie, if any.
fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let token = parse_cookies(cookie_header)
        .find(|(name, _)| *name == state.config.session_cookie)
        .map(|(_, value)| value)?;
    state.sessions.get(token)
}

fn session_cookie(state: &AppState, token: &str) -> String {
    format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Strict",
        state.config.session_cookie
    )
}

/// 302 redirect, matching what the proxy gate emits for the same flows.
fn redirect(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn clear_session_cookie(state: &AppState) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0",
        state.config.session_cookie
    )
}

async fn get_root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.credentials.is_configured() {
        return Html(pages::setup_page(None)).into_response();
    }
    if session_from_headers(&state, &headers).is_none() {
        return redirect("/login");
    }
    redirect(&format!("/{ENTRY_PAGE}"))
}

async fn get_setup(State(state): State<AppState>) -> Response {
    if state.credentials.is_configured() {
        return redirect("/login");
    }
    Html(pages::setup_page(None)).into_response()
}

async fn post_setup(State(state): State<AppState>, body: String) -> Response {
    if state.credentials.is_configured() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let form: CredentialForm = match serde_urlencoded::from_str(&body) {
        Ok(form) => form,
        Err(err) => {
            debug!(error = %err, "setup form failed to parse");
            return (
                StatusCode::BAD_REQUEST,
                Html(pages::setup_page(Some("could not read the form"))),
            )
                .into_response();
        }
    };

    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::setup_page(Some("username and password are required"))),
        )
            .into_response();
    }

    if let Err(err) = state.credentials.save(username, &form.password) {
        warn!(error = %err, "failed to save credential during setup");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::setup_page(Some("could not save the account, try again"))),
        )
            .into_response();
    }

    info!(username = %username, "credential created through setup");
    redirect("/login")
}

async fn get_login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.credentials.is_configured() {
        return redirect("/setup");
    }
    if session_from_headers(&state, &headers).is_some() {
        return redirect("/");
    }
    let username = state
        .credentials
        .load()
        .map(|record| record.username)
        .unwrap_or_default();
    Html(pages::login_page(None, &username)).into_response()
}

async fn post_login(State(state): State<AppState>, body: String) -> Response {
    if !state.credentials.is_configured() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let form: CredentialForm = match serde_urlencoded::from_str(&body) {
        Ok(form) => form,
        Err(err) => {
            debug!(error = %err, "login form failed to parse");
            return (
                StatusCode::BAD_REQUEST,
                Html(pages::login_page(Some("could not read the form"), "")),
            )
                .into_response();
        }
    };

    let username = form.username.trim();
    if !state.credentials.verify(username, &form.password) {
        debug!(username = %username, "login rejected");
        return Html(pages::login_page(
            Some("account or password incorrect"),
            username,
        ))
        .into_response();
    }

    let token = state.sessions.create(username);
    info!(username = %username, "login succeeded");
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, session_cookie(&state, &token)),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response()
}

async fn get_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        if let Some((_, token)) = parse_cookies(cookie_header)
            .find(|(name, _)| *name == state.config.session_cookie)
        {
            if state.sessions.delete(token).is_some() {
                debug!("session deleted on logout");
            }
        }
    }
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, clear_session_cookie(&state)),
            (header::LOCATION, "/login".to_string()),
        ],
    )
        .into_response()
}

/// Hands the session token back to page scripts for the WebSocket
/// handshake. Cookie-authenticated only.
async fn get_ws_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let token = parse_cookies(cookie_header)
        .find(|(name, _)| *name == state.config.session_cookie)
        .map(|(_, value)| value.to_string());

    match token {
        Some(token) if state.sessions.get(&token).is_some() => (
            [(header::CACHE_CONTROL, "no-store")],
            Json(serde_json::json!({ "token": token })),
        )
            .into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Fallback handler gating the static allow-list.
async fn static_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().trim_start_matches('/').to_string();

    if !state.credentials.is_configured() {
        if request.method() == &axum::http::Method::GET {
            return Html(pages::setup_page(None)).into_response();
        }
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    if session_from_headers(&state, request.headers()).is_none() {
        // The entry page redirects humans to the login form; everything
        // else is an API-style denial.
        if path == ENTRY_PAGE {
            return redirect("/login");
        }
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if !is_allowed_asset(&path) {
        return StatusCode::NOT_FOUND.into_response();
    }
    serve_static_file(&state, &path).await
}

/// The allow-list: the entry page and the assets tree. Everything else
/// is 404 even when present on disk.
fn is_allowed_asset(path: &str) -> bool {
    if path == ENTRY_PAGE {
        return true;
    }
    if !path.starts_with("assets/") {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

async fn serve_static_file(state: &AppState, path: &str) -> Response {
    let full: PathBuf = state.config.static_dir.join(path);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let mut response = (
                [(header::CONTENT_TYPE, content_type_for(path))],
                bytes,
            )
                .into_response();
            if path == ENTRY_PAGE {
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    header::HeaderValue::from_static("no-store"),
                );
            }
            response
        }
        Err(err) => {
            debug!(path = %full.display(), error = %err, "static asset not readable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}
