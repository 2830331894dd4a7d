use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .nest("/api", auth::router())
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// Credentialed CORS for the configured origins, permissive otherwise.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    const STRONG: &str = "VeryStrongPassword123!@#WithEnoughLength";

    struct TestResponse {
        status: StatusCode,
        set_cookie: Option<String>,
        body: Value,
    }

    async fn send(app: &Router, req: Request<Body>) -> TestResponse {
        let res = app.clone().oneshot(req).await.expect("router never fails");
        let status = res.status();
        let set_cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_owned());
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            set_cookie,
            body,
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::post(uri);
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        req.body(Body::empty()).unwrap()
    }

    fn get_with_bearer(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut req = Request::get(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        req.body(Body::empty()).unwrap()
    }

    /// "refreshToken=abc; Path=..." -> "refreshToken=abc"
    fn cookie_pair(set_cookie: &str) -> String {
        set_cookie.split(';').next().unwrap().to_owned()
    }

    async fn register(app: &Router, email: &str) -> TestResponse {
        send(
            app,
            post_json(
                "/api/auth/register",
                json!({ "email": email, "password": STRONG, "displayName": "Refresh User" }),
            ),
        )
        .await
    }

    async fn login(app: &Router, email: &str, password: &str) -> TestResponse {
        send(
            app,
            post_json("/api/auth/login", json!({ "email": email, "password": password })),
        )
        .await
    }

    fn app() -> Router {
        build_app(AppState::fake())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app();
        let res = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["status"], "ok");
    }

    #[tokio::test]
    async fn register_returns_created_profile_without_digest() {
        let app = app();
        let res = register(&app, "  User@Example.com ").await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["email"], "user@example.com");
        assert_eq!(res.body["displayName"], "Refresh User");
        assert!(res.body["id"].is_string());
        assert!(res.body["createdAt"].is_string());
        let text = res.body.to_string().to_lowercase();
        assert!(!text.contains("password"));
        assert!(!text.contains("hash"));
    }

    #[tokio::test]
    async fn register_duplicate_is_conflict() {
        let app = app();
        assert_eq!(register(&app, "dup@example.com").await.status, StatusCode::CREATED);
        let res = register(&app, " DUP@Example.com").await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "Email already in use");
    }

    #[tokio::test]
    async fn register_validation_carries_reason() {
        let app = app();
        let res = send(
            &app,
            post_json(
                "/api/auth/register",
                json!({ "email": "weak@example.com", "password": "short", "displayName": "Weak" }),
            ),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["reason"], "weak_password");

        let res = send(&app, post_json("/api/auth/register", json!({ "email": "x@y.co" }))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["reason"], "missing_fields");
    }

    #[tokio::test]
    async fn unreadable_bodies_get_the_error_shape() {
        let app = app();
        let res = send(&app, post_json("/api/auth/register", json!({ "email": 5 }))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["reason"], "invalid_body");
        assert_eq!(res.body["error"], "Malformed request body");

        let req = Request::post("/api/auth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["reason"], "invalid_body");

        let req = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid email or password");
    }

    #[tokio::test]
    async fn login_sets_refresh_cookie_and_token() {
        let app = app();
        let created = register(&app, "login@example.com").await;
        let res = login(&app, "login@example.com", STRONG).await;

        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body["accessToken"].is_string());
        assert_eq!(res.body["user"]["id"], created.body["id"]);
        assert_eq!(res.body["user"]["displayName"], "Refresh User");

        let cookie = res.set_cookie.expect("refresh cookie");
        assert!(cookie.starts_with("refreshToken="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/api/auth/refresh"));
    }

    #[tokio::test]
    async fn login_failures_look_identical() {
        let app = app();
        register(&app, "known@example.com").await;

        let wrong = login(&app, "known@example.com", "Nope-nope-nope-nope-nope-nope-123!").await;
        let unknown = login(&app, "ghost@example.com", STRONG).await;

        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.body, unknown.body);
        assert!(wrong.set_cookie.is_none());
    }

    #[tokio::test]
    async fn refresh_rotation_and_reuse_scenario() {
        let app = app();
        register(&app, "user@example.com").await;
        let logged_in = login(&app, "user@example.com", STRONG).await;
        let r1 = cookie_pair(&logged_in.set_cookie.unwrap());

        let first = send(&app, post_with_cookie("/api/auth/refresh", Some(&r1))).await;
        assert_eq!(first.status, StatusCode::OK);
        assert!(first.body["accessToken"].is_string());
        let r2 = cookie_pair(&first.set_cookie.unwrap());
        assert_ne!(r1, r2);

        let reuse = send(&app, post_with_cookie("/api/auth/refresh", Some(&r1))).await;
        assert_eq!(reuse.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reuse.body["error"], "Session compromised. Please log in again.");

        let after = send(&app, post_with_cookie("/api/auth/refresh", Some(&r2))).await;
        assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_unauthorized() {
        let app = app();
        let res = send(&app, post_with_cookie("/api/auth/refresh", None)).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Missing refresh token");

        let res = send(
            &app,
            post_with_cookie("/api/auth/refresh", Some("refreshToken=bogus")),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid refresh token");
    }

    #[tokio::test]
    async fn logout_clears_cookie_and_revokes_token() {
        let app = app();
        register(&app, "bye@example.com").await;
        let logged_in = login(&app, "bye@example.com", STRONG).await;
        let r1 = cookie_pair(&logged_in.set_cookie.unwrap());

        let out = send(&app, post_with_cookie("/api/auth/logout", Some(&r1))).await;
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(out.body["message"], "Logged out successfully");
        let cleared = out.set_cookie.expect("clearing cookie");
        assert!(cleared.starts_with("refreshToken=;"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(cleared.contains("Path=/api/auth/refresh"));

        let res = send(&app, post_with_cookie("/api/auth/refresh", Some(&r1))).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_without_cookie_still_succeeds() {
        let app = app();
        let out = send(&app, post_with_cookie("/api/auth/logout", None)).await;
        assert_eq!(out.status, StatusCode::OK);
        assert!(out.set_cookie.is_some());
    }

    #[tokio::test]
    async fn me_returns_profile_for_valid_token() {
        let app = app();
        let created = register(&app, "me@example.com").await;
        let logged_in = login(&app, "me@example.com", STRONG).await;
        let token = logged_in.body["accessToken"].as_str().unwrap().to_owned();

        let res = send(&app, get_with_bearer("/api/auth/me", Some(&token))).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["id"], created.body["id"]);
        assert_eq!(res.body["email"], "me@example.com");
        assert!(res.body["createdAt"].is_string());
    }

    #[tokio::test]
    async fn me_rejects_missing_malformed_and_tampered_tokens() {
        let app = app();
        let res = send(&app, get_with_bearer("/api/auth/me", None)).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Missing access token");

        let req = Request::get("/api/auth/me")
            .header(header::AUTHORIZATION, "Token abc")
            .body(Body::empty())
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid authorization format");

        let res = send(&app, get_with_bearer("/api/auth/me", Some("a.b.c"))).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid access token");
    }

    #[tokio::test]
    async fn me_distinguishes_expired_from_forged_tokens() {
        let state = AppState::fake();
        let keys = state.sessions.keys().clone();
        let app = build_app(state);
        let created = register(&app, "clock@example.com").await;
        let user_id: uuid::Uuid = created.body["id"].as_str().unwrap().parse().unwrap();

        let stale = keys
            .sign_at(user_id, time::OffsetDateTime::now_utc() - time::Duration::hours(1))
            .unwrap();
        let res = send(&app, get_with_bearer("/api/auth/me", Some(&stale))).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Access token expired");

        // Graft another subject's claims onto this user's signature.
        let own = keys.sign_access(user_id).unwrap();
        let other = keys.sign_access(uuid::Uuid::new_v4()).unwrap();
        let own: Vec<&str> = own.split('.').collect();
        let other: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", own[0], other[1], own[2]);
        let res = send(&app, get_with_bearer("/api/auth/me", Some(&forged))).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid access token");
    }

    #[tokio::test]
    async fn me_for_vanished_subject_is_not_found() {
        let state = AppState::fake();
        let token = state.sessions.keys().sign_access(uuid::Uuid::new_v4()).unwrap();
        let app = build_app(state);
        let res = send(&app, get_with_bearer("/api/auth/me", Some(&token))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_route_echoes_subject() {
        let state = AppState::fake();
        let user_id = uuid::Uuid::new_v4();
        let token = state.sessions.keys().sign_access(user_id).unwrap();
        let app = build_app(state);
        let res = send(&app, get_with_bearer("/api/protected", Some(&token))).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["userId"], user_id.to_string());
    }
}
