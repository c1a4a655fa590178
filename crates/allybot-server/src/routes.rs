use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use allybot_gateway::{DispatchError, Dispatcher};
use allybot_types::events::PlatformEvent;

/// Shared state for the ingress handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub ingress_token: String,
}

pub fn router(state: AppState) -> Router {
    let ingress = Router::new()
        .route("/events", post(post_event))
        .layer(middleware::from_fn_with_state(state.clone(), require_ingress_token))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(ingress)
        .layer(TraceLayer::new_for_http())
}

/// Rejects requests without `Authorization: Bearer <ingress token>`.
async fn require_ingress_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token != state.ingress_token {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

/// Accepts one platform event. The event is processed after the response;
/// 503 tells the bridge to redeliver.
async fn post_event(State(state): State<AppState>, Json(event): Json<PlatformEvent>) -> StatusCode {
    match state.dispatcher.dispatch(event) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(DispatchError::Busy) => {
            warn!("Event queue full, asking the bridge to retry");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(DispatchError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use allybot_db::Database;
    use allybot_engine::testing::{Call, MockPlatform};
    use allybot_engine::{Engine, EngineSettings};
    use allybot_gateway::EventLoop;

    use super::*;

    fn app() -> (Router, EventLoop, Arc<MockPlatform>) {
        let platform = Arc::new(MockPlatform::default());
        let engine = Engine::new(
            Arc::new(Database::open_in_memory().unwrap()),
            platform.clone(),
            None,
            EngineSettings {
                alliances: Default::default(),
                admin_role: "ADMIN".into(),
                admin_contact: None,
                log_channel: None,
            },
        );
        let (dispatcher, event_loop) = Dispatcher::new(Arc::new(engine));
        let state = AppState {
            dispatcher,
            ingress_token: "secret".into(),
        };
        (router(state), event_loop, platform)
    }

    const EVENT: &str = r#"{"type":"CommandInvoked","data":{
        "interaction":{"id":"1","token":"tok","application_id":"2"},
        "community_id":"1","user_id":"7","name":"roles","options":{}}}"#;

    fn post(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/events").header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let (app, _loop, _) = app();
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_require_the_ingress_token() {
        let (app, _loop, _) = app();
        for auth in [None, Some("Bearer wrong"), Some("secret")] {
            let resp = app.clone().oneshot(post(auth, EVENT)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn accepted_events_reach_the_engine() {
        let (app, event_loop, platform) = app();
        let resp = app.oneshot(post(Some("Bearer secret"), EVENT)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        // The router (and its dispatcher) is gone, so the loop drains and stops
        event_loop.run().await;
        assert_eq!(
            platform.calls(),
            vec![Call::Reply { content: "No emoji roles are configured.".into() }]
        );
    }

    #[tokio::test]
    async fn malformed_events_are_client_errors() {
        let (app, _loop, _) = app();
        let resp = app
            .oneshot(post(Some("Bearer secret"), r#"{"type":"Unknown"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn stopped_loop_asks_for_redelivery() {
        let (app, event_loop, _) = app();
        drop(event_loop);
        let resp = app.oneshot(post(Some("Bearer secret"), EVENT)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
