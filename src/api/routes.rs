//! HTTP route definitions.

use std::sync::Arc;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{accounts, auth, completions, groups, tasks, users};
use crate::config::Config;
use crate::engine::{Core, CoreContext};
use crate::seed;
use crate::store::create_backends;

/// Shared application state.
pub struct AppState {
    pub core: Core,
}

/// Build the router over an existing state.
pub fn app(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .merge(accounts::public_routes());

    let protected_routes = Router::new()
        .merge(accounts::routes())
        .merge(groups::routes())
        .merge(tasks::routes())
        .merge(completions::routes())
        .merge(users::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_user,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let (store, identity) = create_backends(config.store_type, config.data_dir.clone()).await?;
    tracing::info!(
        "Store initialized (persistent: {})",
        store.is_persistent()
    );

    let core = Core::from_config(CoreContext::new(store, identity), &config);

    if config.seed_demo {
        seed::seed_demo(&core).await?;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { core });
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::USER_HEADER;
    use crate::store::StoreType;
    use reqwest::Method;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    struct TestServer {
        base: String,
        http: reqwest::Client,
    }

    impl TestServer {
        async fn start() -> Self {
            let (store, identity) = create_backends(StoreType::Memory, PathBuf::new())
                .await
                .unwrap();
            let core = Core::new(CoreContext::new(store, identity), 20);
            let state = Arc::new(AppState { core });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app(state)).await.unwrap();
            });
            Self {
                base: format!("http://{}", addr),
                http: reqwest::Client::new(),
            }
        }

        async fn call(
            &self,
            method: Method,
            path: &str,
            user: Option<i64>,
            body: Option<Value>,
        ) -> (u16, Value) {
            let mut req = self.http.request(method, format!("{}{}", self.base, path));
            if let Some(id) = user {
                req = req.header(USER_HEADER, id.to_string());
            }
            if let Some(body) = body {
                req = req.json(&body);
            }
            let resp = req.send().await.unwrap();
            let status = resp.status().as_u16();
            let json = resp.json::<Value>().await.unwrap_or(Value::Null);
            (status, json)
        }

        async fn register(&self, username: &str) -> i64 {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/api/auth/register",
                    None,
                    Some(json!({
                        "email": format!("{username}@example.com"),
                        "username": username,
                        "password": "secret123",
                    })),
                )
                .await;
            assert_eq!(status, 201, "{body}");
            body["user"]["id"].as_i64().unwrap()
        }
    }

    #[tokio::test]
    async fn test_caller_must_be_identified() {
        let server = TestServer::start().await;

        let (status, body) = server.call(Method::GET, "/api/health", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");

        let (status, body) = server
            .call(Method::GET, "/api/groups/my-groups", None, None)
            .await;
        assert_eq!(status, 401);
        assert!(body["error"].is_string());

        let (status, body) = server
            .call(Method::POST, "/api/groups", Some(1), Some(json!({"name": "G"})))
            .await;
        assert_eq!(status, 401);
        assert_eq!(body["error"], "Unknown user");
    }

    #[tokio::test]
    async fn test_register_login_and_profile() {
        let server = TestServer::start().await;
        let alice = server.register("alice").await;

        let (status, body) = server
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "email": "ALICE@example.com",
                    "username": "alice2",
                    "password": "secret123",
                })),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "User with this email already exists");

        let (status, body) = server
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"email": "alice@example.com", "password": "wrong"})),
            )
            .await;
        assert_eq!(status, 401);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, body) = server
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"email": "alice@example.com", "password": "secret123"})),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["user"]["id"], alice);
        assert!(body["user"].get("passwordHash").is_none());

        let (status, body) = server
            .call(
                Method::PUT,
                "/api/users/profile",
                Some(alice),
                Some(json!({"firstName": "Alice"})),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["user"]["firstName"], "Alice");

        let (status, body) = server
            .call(Method::GET, "/api/auth/me", Some(alice), None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["user"]["username"], "alice");
        assert_eq!(body["user"]["firstName"], "Alice");
    }

    #[tokio::test]
    async fn test_group_task_completion_flow() {
        let server = TestServer::start().await;
        let alice = server.register("alice").await;
        let bob = server.register("bob").await;

        let (status, body) = server
            .call(Method::POST, "/api/groups", Some(alice), Some(json!({"name": "  "})))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Group name is required");

        let (status, group) = server
            .call(
                Method::POST,
                "/api/groups",
                Some(alice),
                Some(json!({"name": "Readers"})),
            )
            .await;
        assert_eq!(status, 200);
        let group_id = group["id"].as_i64().unwrap();
        let code = group["inviteCode"].as_str().unwrap().to_string();

        let (status, body) = server
            .call(
                Method::POST,
                "/api/groups/join",
                Some(bob),
                Some(json!({"inviteCode": "NOPE"})),
            )
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "Invalid invite code");

        let detail_path = format!("/api/groups/{group_id}");
        let (status, body) = server.call(Method::GET, &detail_path, Some(bob), None).await;
        assert_eq!(status, 403);
        assert_eq!(body["error"], "You are not a member of this group");

        let (status, body) = server
            .call(
                Method::POST,
                "/api/groups/join",
                Some(bob),
                Some(json!({"inviteCode": code})),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["members"].as_array().unwrap().len(), 2);

        let (status, task) = server
            .call(
                Method::POST,
                &format!("/api/groups/{group_id}/daily-tasks"),
                Some(alice),
                Some(json!({"title": "Read 20 pages"})),
            )
            .await;
        assert_eq!(status, 200);
        let task_id = task["id"].as_i64().unwrap();

        let complete_path = format!("/api/tasks/complete/daily/{task_id}");
        let (status, completion) = server
            .call(
                Method::POST,
                &complete_path,
                Some(bob),
                Some(json!({"proofImageUrl": "/uploads/proofs/b.png"})),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(completion["dailyTaskId"], task_id);
        assert_eq!(completion["isVerified"], false);
        let completion_id = completion["id"].as_i64().unwrap();

        let (status, body) = server
            .call(
                Method::POST,
                &complete_path,
                Some(bob),
                Some(json!({"proofImageUrl": "/uploads/proofs/b2.png"})),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Task already completed today");

        let verify_path = format!("/api/completions/{completion_id}/verify");
        let (status, body) = server.call(Method::POST, &verify_path, Some(bob), None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "You cannot verify your own completion");

        let (status, body) = server.call(Method::POST, &verify_path, Some(alice), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["isVerified"], true);
        assert_eq!(body["verifiedBy"]["username"], "alice");

        let (status, body) = server.call(Method::POST, &verify_path, Some(alice), None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Completion already verified");

        let (status, body) = server.call(Method::GET, &detail_path, Some(bob), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["dailyTasks"][0]["creator"]["username"], "alice");
    }
}
