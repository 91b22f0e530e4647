//! HTTP signaling endpoint
//!
//! `POST /offer` dispatches on the message `type`:
//! - `offer` with `sdp`: returns the answer as `{"sdp": ..., "type": "answer"}`
//! - `request`: returns a server offer as `{"id": ..., "sdp": ..., "type": "offer"}`
//! - `answer` with `id` and `sdp`: completes that session, returns `{}`
//!
//! `GET /health` reports the live viewer count.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use log::{info, warn};
use rtc_fanout::{SessionDescription, SignalingMessage, StreamError, StreamHub};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Run the HTTP server until `shutdown` resolves
pub async fn run_http_server(
    host: &str,
    port: u16,
    max_body_bytes: usize,
    hub: Arc<StreamHub>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);

    let app = Router::new()
        .route("/offer", post(offer_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(hub);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status_for(error: &StreamError) -> StatusCode {
    match error {
        StreamError::MalformedOffer(_) => StatusCode::BAD_REQUEST,
        StreamError::SessionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
        StreamError::UnknownSession(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Signaling handler
async fn offer_handler(State(hub): State<Arc<StreamHub>>, body: String) -> Response {
    match dispatch(&hub, &body).await {
        Ok(reply) => json_response(StatusCode::OK, reply),
        Err(e) => {
            warn!("Signaling rejected: {}", e);
            let payload = json!({ "error": e.to_string() });
            json_response(status_for(&e), payload.to_string())
        }
    }
}

async fn dispatch(hub: &StreamHub, body: &str) -> Result<String, StreamError> {
    match SignalingMessage::from_json(body)? {
        SignalingMessage::Offer { sdp } => hub.handle_offer(SessionDescription::offer(sdp)).await?.to_json(),
        SignalingMessage::Request => hub.handle_request().await?.to_json(),
        SignalingMessage::Answer { id, sdp } => {
            hub.handle_answer(&id, SessionDescription::answer(sdp)).await?;
            Ok("{}".to_string())
        }
    }
}

/// Health check handler
async fn health_handler(State(hub): State<Arc<StreamHub>>) -> Response {
    let payload = json!({
        "status": "healthy",
        "sessions": hub.session_count(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    json_response(StatusCode::OK, payload.to_string())
}
