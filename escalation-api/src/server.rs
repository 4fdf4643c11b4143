use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use escalation_engine::EscalationTask;
use std::env;
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;

fn cors_layer() -> CorsLayer {
    if let Ok(origins) = env::var("CORS_ORIGINS") {
        let mut cors = CorsLayer::new();
        for origin in origins.split(',').map(|s| s.trim()) {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
    }
}

pub fn router(task: EscalationTask) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/cron/check-overdue", post(handlers::check_overdue))
        .route("/api/cron/cleanup-push-tokens", post(handlers::cleanup_push_tokens))
        .route("/api/cron/run", post(handlers::run_all))
        .route("/api/cron/tickets/:id/history", get(handlers::ticket_history))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(task))
                .layer(middleware::from_fn(auth::cron_auth_middleware))
                .layer(cors_layer()),
        )
}

pub async fn run<S>(task: EscalationTask, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let server = &task.context().config.server;
    let host: std::net::IpAddr = server.host.parse()?;
    let addr = SocketAddr::from((host, server.api_port));
    if server.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set, trigger routes will answer 503");
    }

    let app = router(task.clone());
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use escalation_core::channel::{
        CallbackChannel, CallbackPayload, CallbackResponse, PushChannel, PushNotification,
        PushReport,
    };
    use escalation_core::config::Config;
    use escalation_core::error::DeliveryError;
    use escalation_core::memory_store::MemoryStore;
    use escalation_core::types::{
        Assignee, DevicePlatform, DeviceSubscription, Priority, Ticket, TicketStatus, UserId,
    };
    use escalation_core::EscalationContext;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    struct AcceptingCallback;

    #[async_trait]
    impl CallbackChannel for AcceptingCallback {
        fn target(&self) -> Option<&str> {
            Some("https://hooks.example.test/escalate")
        }

        async fn post(&self, _payload: &CallbackPayload) -> Result<CallbackResponse, DeliveryError> {
            Ok(CallbackResponse {
                status: 202,
                body: "queued".to_string(),
            })
        }
    }

    struct SilentPush;

    #[async_trait]
    impl PushChannel for SilentPush {
        async fn send_to_user(
            &self,
            _user: UserId,
            _notification: &PushNotification,
        ) -> Result<PushReport, DeliveryError> {
            Ok(PushReport::from_counts(1, 0))
        }
    }

    fn task(secret: Option<&str>, store: Arc<MemoryStore>) -> EscalationTask {
        let mut config = Config::default();
        config.server.cron_secret = secret.map(str::to_string);
        config.callback.ticket_delay_ms = 0;
        let ctx = EscalationContext::new(config, store, Arc::new(AcceptingCallback), Arc::new(SilentPush));
        EscalationTask::new(ctx)
    }

    fn app(secret: Option<&str>, store: Arc<MemoryStore>) -> Router {
        router(task(secret, store))
    }

    fn overdue_ticket() -> Ticket {
        let due = Utc::now() - Duration::hours(3);
        Ticket {
            id: 42,
            code: "MX-042".to_string(),
            title: "Hydraulic leak".to_string(),
            description: None,
            priority: Priority::Critical,
            status: TicketStatus::Received,
            machine_id: None,
            scheduled_date: Some(due),
            assignee: Some(Assignee::User(5)),
            reported_by: None,
            created_at: due,
            deleted_at: None,
        }
    }

    fn request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app(None, Arc::new(MemoryStore::new()))
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_requires_secret() {
        let store = Arc::new(MemoryStore::new());

        let missing = app(Some(SECRET), store.clone())
            .oneshot(request("POST", "/api/cron/check-overdue", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app(Some(SECRET), store.clone())
            .oneshot(request("POST", "/api/cron/check-overdue", Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let unconfigured = app(None, store)
            .oneshot(request("POST", "/api/cron/check-overdue", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(unconfigured.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_check_overdue_escalates_and_history_shows_it() {
        let store = Arc::new(MemoryStore::new());
        store.insert_ticket(overdue_ticket()).unwrap();

        let response = app(Some(SECRET), store.clone())
            .oneshot(request("POST", "/api/cron/check-overdue", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["group"], "escalation");
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["report"]["callbacks_sent"], 1);
        assert_eq!(body["report"]["pushes_sent"], 1);

        let history = app(Some(SECRET), store)
            .oneshot(request("GET", "/api/cron/tickets/42/history", Some(&format!("Bearer {}", SECRET))))
            .await
            .unwrap();
        assert_eq!(history.status(), StatusCode::OK);
        let body = json_body(history).await;
        assert_eq!(body["callbacks"].as_array().unwrap().len(), 1);
        assert_eq!(body["callbacks"][0]["outcome"]["status"], 202);
        assert_eq!(body["pushes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_push_tokens_reports_counts() {
        let store = Arc::new(MemoryStore::new());
        let stale = Utc::now() - Duration::days(45);
        store
            .insert_subscription(DeviceSubscription {
                id: 1,
                user_id: 5,
                device_token: "token-1".to_string(),
                platform: DevicePlatform::Ios,
                device_name: None,
                created_at: stale,
                last_used: stale,
            })
            .unwrap();

        let response = app(Some(SECRET), store.clone())
            .oneshot(request("POST", "/api/cron/cleanup-push-tokens", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["report"]["deleted"], 1);
        assert_eq!(body["report"]["remaining"], 0);
        assert!(store.subscriptions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_during_running_invocation_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_ticket(overdue_ticket()).unwrap();
        let task = task(Some(SECRET), store.clone());
        let running = task.try_acquire().unwrap();

        for uri in ["/api/cron/check-overdue", "/api/cron/cleanup-push-tokens", "/api/cron/run"] {
            let response = router(task.clone())
                .oneshot(request("POST", uri, Some(SECRET)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CONFLICT, "{}", uri);
        }
        assert!(store.push_logs().unwrap().is_empty());

        drop(running);
        let response = router(task)
            .oneshot(request("POST", "/api/cron/check-overdue", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.push_logs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_run_returns_summary() {
        let response = app(Some(SECRET), Arc::new(MemoryStore::new()))
            .oneshot(request("POST", "/api/cron/run", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["groups"].as_array().unwrap().len(), 3);
        assert_eq!(body["tick"]["schedule"], "manual");
    }
}
