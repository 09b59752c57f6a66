//! Shared helpers for router integration tests.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use roster_api::{AppState, config::ApiConfig};
use roster_core::storage::StorageClient;
use serde_json::Value;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret";

pub async fn app() -> (Router, AppState) {
    let config = ApiConfig {
        jwt_secret: SECRET.into(),
        ..ApiConfig::default()
    };
    let state = AppState::new(config, StorageClient::in_memory("test"))
        .await
        .expect("app state");
    (roster_api::router(state.clone()), state)
}

pub struct Reply {
    pub status: StatusCode,
    pub set_cookies: Vec<String>,
    pub json: Value,
}

impl Reply {
    /// Value of the `jwt` cookie set by this response, if any.
    pub fn token(&self) -> Option<String> {
        self.set_cookies.iter().find_map(|c| {
            c.strip_prefix("jwt=")
                .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
        })
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Reply {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::COOKIE, format!("jwt={token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let set_cookies = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    Reply {
        status,
        set_cookies,
        json,
    }
}

/// Register `username` and return its token.
pub async fn register(app: &Router, username: &str) -> String {
    let reply = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(serde_json::json!({
            "username": username,
            "email": format!("{username}@x.com"),
            "password": "secret1",
            "confirmPassword": "secret1",
        })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "register {username}: {:?}", reply.json);
    reply.token().expect("jwt cookie")
}

pub async fn login(app: &Router, username: &str) -> String {
    let reply = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(serde_json::json!({ "username": username, "password": "secret1" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    reply.token().expect("jwt cookie")
}
