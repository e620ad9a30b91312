//! End-to-end tests for the bootstrap HTTP gate: first-run setup, login,
//! session cookie, token handoff, and the static allow-list.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use gymgate::config::Config;
use gymgate::credentials::CredentialStore;
use gymgate::hub;
use gymgate::routes::{create_router, AppState};
use gymgate::session::SessionRegistry;

struct Harness {
    router: Router,
    state: AppState,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = Config {
        credential_file: dir.path().join("auth.json"),
        static_dir: dir.path().to_path_buf(),
        session_ttl: Duration::from_secs(60),
        ..Config::default()
    };
    let state = AppState {
        config: Arc::new(config),
        credentials: Arc::new(CredentialStore::new(dir.path().join("auth.json"))),
        sessions: Arc::new(SessionRegistry::new(Duration::from_secs(60))),
        hub: hub::spawn().0,
    };
    Harness {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

fn get(path: &str) -> Request<Body> {
    Request::get(path).body(Body::empty()).unwrap()
}

fn get_with_cookie(path: &str, cookie: &str) -> Request<Body> {
    Request::get(path)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_form(path: &str, body: &str) -> Request<Body> {
    Request::post(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn setup_then_login_issues_session_cookie() {
    let h = harness();

    // Before setup every GET shows the setup form.
    let response = h.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("/setup"));

    // POST to anything but /setup is refused before setup.
    let response = h
        .router
        .clone()
        .oneshot(post_form("/login", "username=a&password=b"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    // Setup succeeds and redirects to the login form.
    let response = h
        .router
        .clone()
        .oneshot(post_form("/setup", "username=admin&password=secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");

    // A second setup attempt is locked out.
    let response = h
        .router
        .clone()
        .oneshot(post_form("/setup", "username=eve&password=pwned"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    // Wrong password re-renders the login form with the username kept.
    let response = h
        .router
        .clone()
        .oneshot(post_form("/login", "username=admin&password=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("account or password incorrect"));
    assert!(text.contains(r#"value="admin""#));

    // Correct login sets the session cookie and redirects home.
    let response = h
        .router
        .clone()
        .oneshot(post_form("/login", "username=admin&password=secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("gymgate_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
}

#[tokio::test]
async fn ws_token_requires_a_session_cookie() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();

    let response = h.router.clone().oneshot(get("/ws_token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/ws_token", "gymgate_session=bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = h.state.sessions.create("admin");
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie(
            "/ws_token",
            &format!("gymgate_session={token}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let text = body_text(response).await;
    assert_eq!(
        text,
        serde_json::json!({ "token": token }).to_string()
    );
}

#[tokio::test]
async fn root_redirects_anonymous_users_to_login() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();

    let response = h.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");

    let response = h.router.clone().oneshot(get("/player.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");

    // Non-entry paths get a bare 401 instead of a redirect.
    let response = h
        .router
        .clone()
        .oneshot(get("/assets/sounds/count.mp3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn static_allow_list_is_enforced_for_authenticated_users() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();
    let token = h.state.sessions.create("admin");
    let cookie = format!("gymgate_session={token}");

    let dir = h.state.config.static_dir.clone();
    std::fs::write(dir.join("player.html"), "<html>player</html>").unwrap();
    std::fs::create_dir_all(dir.join("assets/sounds")).unwrap();
    std::fs::write(dir.join("assets/sounds/count.mp3"), b"mp3").unwrap();
    std::fs::write(dir.join("notes.txt"), "private").unwrap();

    // Entry page is served with no-store.
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/player.html", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    // Allow-listed asset is served with its content type.
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/assets/sounds/count.mp3", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");

    // On-disk but not allow-listed is a 404.
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/notes.txt", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Allow-listed but missing from disk is also a 404.
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/assets/missing.mp3", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_deletes_the_session_and_expires_the_cookie() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();
    let token = h.state.sessions.create("admin");
    let cookie = format!("gymgate_session={token}");

    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/logout", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("Max-Age=0"));

    assert!(h.state.sessions.get(&token).is_none());
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/ws_token", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_users_are_routed_to_the_entry_page() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();
    let token = h.state.sessions.create("admin");
    let cookie = format!("gymgate_session={token}");

    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/player.html");

    // The login form is skipped while the session is live.
    let response = h
        .router
        .clone()
        .oneshot(get_with_cookie("/login", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");
}

#[tokio::test]
async fn get_setup_redirects_once_configured() {
    let h = harness();
    h.state.credentials.save("admin", "secret").unwrap();

    let response = h.router.clone().oneshot(get("/setup")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");
}
