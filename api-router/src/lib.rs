use api_state::ApiState;
use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use middleware_api_auth::api_auth;
use rate_limit::rate_limit;
use routes::{auth, chat, liveness::live, readiness::ready, tasks, users};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod api_state;
pub mod cookies;
pub mod error;
mod middleware_api_auth;
pub mod rate_limit;
pub mod routes;

/// JSON API, meant to be nested under `/api`.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes and session bootstrap
    let public = Router::new()
        .route("/health", get(live))
        .route("/health/db", get(ready))
        .merge(auth::router());

    // Everything else resolves the caller from the access token
    let protected = Router::new()
        .merge(auth::session_router())
        .merge(users::router())
        .merge(tasks::router())
        .merge(chat::router())
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public
        .merge(protected)
        .layer(from_fn_with_state(app_state.clone(), rate_limit))
        .layer(cors_layer(&app_state.config.cors_origins_list()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc, sync::Mutex};

    use assistant_pipeline::{Oracle, OracleReply, ToolCallRequest, ToolDefinition, TranscriptEntry};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use common::{
        error::AppError,
        storage::{
            db::SurrealDbClient,
            types::{
                task::{Task, TaskFilter},
                user::User,
            },
        },
        utils::config::AppConfig,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    struct QueuedOracle {
        replies: Mutex<VecDeque<OracleReply>>,
    }

    #[async_trait]
    impl Oracle for QueuedOracle {
        fn name(&self) -> &'static str {
            "queued"
        }

        async fn respond(
            &self,
            _transcript: &[TranscriptEntry],
            _tools: &[ToolDefinition],
        ) -> Result<OracleReply, AppError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::OracleUnavailable("no scripted reply left".into()))
        }
    }

    struct TestApp {
        router: Router,
        state: ApiState,
    }

    async fn test_app(config: AppConfig, replies: Vec<OracleReply>) -> TestApp {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("schema");

        let oracle = Arc::new(QueuedOracle {
            replies: Mutex::new(replies.into()),
        });
        let state = ApiState::new(&config, db, oracle);
        let router = Router::new()
            .nest("/api", api_routes(&state))
            .with_state(state.clone());

        TestApp { router, state }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    /// Registers a user and returns (user id, access token, refresh token).
    async fn register(router: &Router, email: &str) -> (String, String, String) {
        let response = send(
            router,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                &json!({
                    "email": email,
                    "password": "supersecret",
                    "full_name": "Test User"
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health_routes_are_public() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;

        let response = send(&app.router, get_request("/api/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app.router, get_request("/api/health/db", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;

        let response = send(&app.router, get_request("/api/tasks", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app.router, get_request("/api/tasks", Some("garbage"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_sets_cookies_and_derives_username() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;

        let response = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                &json!({
                    "email": "Jane.Doe@Example.com",
                    "password": "supersecret",
                    "full_name": "Jane Doe"
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));

        let body = body_json(response).await;
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["username"], "jane.doe");
        assert!(body["user"].get("password").is_none());

        let duplicate = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                &json!({
                    "email": "jane.doe@example.com",
                    "password": "supersecret",
                    "full_name": "Jane Again"
                }),
            ),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_and_cookie_auth() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;
        register(&app.router, "carol@example.com").await;

        let bad = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                &json!({"email": "carol@example.com", "password": "wrong-password"}),
            ),
        )
        .await;
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

        let good = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                &json!({"email": "carol@example.com", "password": "supersecret"}),
            ),
        )
        .await;
        assert_eq!(good.status(), StatusCode::OK);
        let access = body_json(good).await["access_token"]
            .as_str()
            .unwrap()
            .to_string();

        let verify = send(
            &app.router,
            Request::builder()
                .uri("/api/auth/verify")
                .header(header::COOKIE, format!("access_token={access}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(verify.status(), StatusCode::OK);
        let body = body_json(verify).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["user"]["email"], "carol@example.com");
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;
        let (_, access, refresh) = register(&app.router, "dave@example.com").await;

        // An access token is not accepted as a refresh token.
        let wrong_kind = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/refresh",
                None,
                &json!({"refresh_token": access}),
            ),
        )
        .await;
        assert_eq!(wrong_kind.status(), StatusCode::UNAUTHORIZED);

        let rotated = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/refresh",
                None,
                &json!({"refresh_token": refresh}),
            ),
        )
        .await;
        assert_eq!(rotated.status(), StatusCode::OK);
        let new_refresh = body_json(rotated).await["refresh_token"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(new_refresh, refresh);

        let replayed = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/refresh",
                None,
                &json!({"refresh_token": refresh}),
            ),
        )
        .await;
        assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);

        let logout = send(
            &app.router,
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(header::COOKIE, format!("refresh_token={new_refresh}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(logout.status(), StatusCode::OK);
        assert!(logout
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .all(|v| v.to_str().unwrap().contains("Max-Age=0")));

        let after_logout = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/refresh",
                None,
                &json!({"refresh_token": new_refresh}),
            ),
        )
        .await;
        assert_eq!(after_logout.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_password_change_revokes_refresh_tokens() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;
        let (_, access, refresh) = register(&app.router, "erin@example.com").await;

        let wrong_old = send(
            &app.router,
            json_request(
                "PUT",
                "/api/users/password",
                Some(&access),
                &json!({"old_password": "not-the-password", "new_password": "brandnewsecret"}),
            ),
        )
        .await;
        assert!(wrong_old.status().is_client_error());

        let changed = send(
            &app.router,
            json_request(
                "PUT",
                "/api/users/password",
                Some(&access),
                &json!({"old_password": "supersecret", "new_password": "brandnewsecret"}),
            ),
        )
        .await;
        assert_eq!(changed.status(), StatusCode::OK);

        let stale = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/refresh",
                None,
                &json!({"refresh_token": refresh}),
            ),
        )
        .await;
        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

        let login = send(
            &app.router,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                &json!({"email": "erin@example.com", "password": "brandnewsecret"}),
            ),
        )
        .await;
        assert_eq!(login.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_task_crud_and_ownership() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;
        let (_, alice, _) = register(&app.router, "alice@example.com").await;
        let (_, bob, _) = register(&app.router, "bob@example.com").await;

        let created = send(
            &app.router,
            json_request(
                "POST",
                "/api/tasks",
                Some(&alice),
                &json!({"title": "Buy milk", "priority": "high"}),
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let task = body_json(created).await;
        let task_id = task["id"].as_str().unwrap().to_string();
        assert_eq!(task["status"], "pending");
        assert_eq!(task["priority"], "high");

        let uri = format!("/api/tasks/{task_id}");
        let foreign = send(&app.router, get_request(&uri, Some(&bob))).await;
        assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

        let completed = send(
            &app.router,
            json_request("PATCH", &uri, Some(&alice), &json!({"status": "completed"})),
        )
        .await;
        assert_eq!(completed.status(), StatusCode::OK);
        assert!(!body_json(completed).await["completed_at"].is_null());

        let listed = send(
            &app.router,
            get_request("/api/tasks?status_filter=completed&limit=10", Some(&alice)),
        )
        .await;
        assert_eq!(listed.status(), StatusCode::OK);
        let page = body_json(listed).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["limit"], 10);
        assert_eq!(page["items"][0]["id"], task_id.as_str());

        let bad_limit = send(&app.router, get_request("/api/tasks?limit=500", Some(&alice))).await;
        assert_eq!(bad_limit.status(), StatusCode::BAD_REQUEST);

        let bad_id = send(&app.router, get_request("/api/tasks/not-a-uuid", Some(&alice))).await;
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

        let deleted = send(
            &app.router,
            Request::builder()
                .method("DELETE")
                .uri(&uri)
                .header(header::AUTHORIZATION, format!("Bearer {alice}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = send(&app.router, get_request(&uri, Some(&alice))).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_turn_runs_tools() {
        let app = test_app(
            AppConfig::for_tests(),
            vec![
                OracleReply::ToolCalls(vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "add_task".to_string(),
                    arguments: json!({"title": "buy milk"}),
                }]),
                OracleReply::FinalText("Added 'buy milk' to your list.".to_string()),
            ],
        )
        .await;
        let (user_id, token, _) = register(&app.router, "erin@example.com").await;

        let response = send(
            &app.router,
            json_request(
                "POST",
                &format!("/api/{user_id}/chat"),
                Some(&token),
                &json!({"message": "add a task to buy milk"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "Added 'buy milk' to your list.");
        assert_eq!(body["tool_calls"][0]["tool"], "add_task");
        assert_eq!(body["tool_calls"][0]["args"]["title"], "buy milk");
        assert!(body["tool_calls"][0]["result"]
            .as_str()
            .unwrap()
            .starts_with("Task created with ID:"));

        let conversation_id = body["conversation_id"].as_str().unwrap();
        let detail = send(
            &app.router,
            get_request(
                &format!("/api/{user_id}/conversations/{conversation_id}"),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(detail.status(), StatusCode::OK);
        let detail = body_json(detail).await;
        let roles: Vec<&str> = detail["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

        let tasks = Task::list_for_user(
            &user_id,
            TaskFilter::default(),
            0,
            10,
            &app.state.db,
        )
        .await
        .expect("list tasks");
        assert_eq!(tasks.total, 1);
        assert_eq!(tasks.items[0].title, "buy milk");
    }

    #[tokio::test]
    async fn test_chat_rejects_other_users_path() {
        let app = test_app(
            AppConfig::for_tests(),
            vec![OracleReply::FinalText("hi".to_string())],
        )
        .await;
        let (_, token, _) = register(&app.router, "frank@example.com").await;
        let (other_id, _, _) = register(&app.router, "grace@example.com").await;

        let response = send(
            &app.router,
            json_request(
                "POST",
                &format!("/api/{other_id}/chat"),
                Some(&token),
                &json!({"message": "hello"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let conversations = User::get_user_conversations(&other_id, &app.state.db)
            .await
            .expect("conversations");
        assert!(conversations.is_empty());
    }

    #[tokio::test]
    async fn test_chat_oracle_outage_is_503() {
        let app = test_app(AppConfig::for_tests(), vec![]).await;
        let (user_id, token, _) = register(&app.router, "heidi@example.com").await;

        let response = send(
            &app.router,
            json_request(
                "POST",
                &format!("/api/{user_id}/chat"),
                Some(&token),
                &json!({"message": "hello"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bad_conversation = send(
            &app.router,
            json_request(
                "POST",
                &format!("/api/{user_id}/chat"),
                Some(&token),
                &json!({"message": "hello", "conversation_id": "nope"}),
            ),
        )
        .await;
        assert_eq!(bad_conversation.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_and_rejection() {
        let mut config = AppConfig::for_tests();
        config.rate_limit_per_minute = 2;
        let app = test_app(config, vec![]).await;

        let first = send(&app.router, get_request("/api/tasks", None)).await;
        assert_eq!(
            first.headers().get("x-ratelimit-limit").unwrap(),
            &HeaderValue::from_static("2")
        );
        assert_eq!(
            first.headers().get("x-ratelimit-remaining").unwrap(),
            &HeaderValue::from_static("1")
        );

        send(&app.router, get_request("/api/tasks", None)).await;
        let limited = send(&app.router, get_request("/api/tasks", None)).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let health = send(&app.router, get_request("/api/health", None)).await;
        assert_eq!(health.status(), StatusCode::OK);
    }
}
