//! HTTP and WebSocket transport.
//!
//! The transport only moves bytes. Every live connection gets its own
//! session worker; the upload endpoint runs a throwaway session for a single
//! frame.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Query, State,
    },
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use squat_core::{Error, Timestamp};
use squat_form::Difficulty;
use squat_session::{
    negotiate_profile, run_frame, spawn_session, FeedbackPayload, PoseEstimator, SessionDriver,
    SessionHandle,
};

use crate::config::ApiConfig;
use crate::envelope::decode_envelope;
use crate::state::AppState;

pub const FEEDBACK_HEADER: &str = "x-squat-feedback";

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.http.max_frame_bytes;

    Router::new()
        .route("/live-feed", get(live_feed))
        .route("/api/v1/upload-frame", post(upload_frame))
        .route("/api/v1/rep-events", get(rep_events))
        .route("/api/v1/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(
    config: ApiConfig,
    estimator: Option<Arc<dyn PoseEstimator>>,
) -> std::io::Result<()> {
    let addr = config.http.bind_addr;
    match &estimator {
        Some(estimator) => info!(estimator = estimator.name(), "Pose estimator attached"),
        None => info!("No pose estimator attached, frames must carry landmarks"),
    }

    let app = router(AppState::new(config, estimator));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await
}

fn error_body(error: &Error) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

fn error_response(status: StatusCode, error: &Error) -> Response {
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}

// ── Live feed ────────────────────────────────────────────────────────────────

async fn live_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.http.max_frame_bytes)
        .on_upgrade(move |socket| handle_live_feed(socket, state))
}

/// Queue one binary message on the session; the reply is an error body if
/// the message could not be queued.
fn submit_frame(handle: &SessionHandle, data: &[u8], max_frame_bytes: usize) -> Option<String> {
    let request = match decode_envelope(data, max_frame_bytes) {
        Ok(envelope) => envelope.into_request(Timestamp::now()),
        Err(e) => {
            debug!(session = %handle.id(), error = %e, "Rejected frame");
            return Some(error_body(&e));
        }
    };

    match handle.try_submit(request) {
        Ok(true) => None,
        Ok(false) => {
            debug!(session = %handle.id(), "Session busy, dropping frame");
            None
        }
        Err(e) => Some(error_body(&e)),
    }
}

async fn handle_live_feed(socket: WebSocket, state: AppState) {
    let _guard = state.track_session();
    let (mut sink, mut stream) = socket.split();
    let settings = &state.config.session;
    let max_frame_bytes = state.config.http.max_frame_bytes;

    // The first text message names the difficulty. A frame sent before it is
    // kept and processed under the default profile.
    let mut early_frame = None;
    let mut closed = false;
    let selector = async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    early_frame = Some(data);
                    return None;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    closed = true;
                    return None;
                }
                Some(Ok(_)) => {}
            }
        }
    };
    let selection = negotiate_profile(selector, settings.difficulty_wait()).await;
    if closed {
        debug!("Client left before selecting a difficulty");
        return;
    }

    if let Some(notice) = selection.notice() {
        let notice = serde_json::json!({ "notice": notice }).to_string();
        if sink.send(Message::Text(notice.into())).await.is_err() {
            return;
        }
    }

    let driver = SessionDriver::with_profile(
        selection.into_profile(),
        settings.live(),
        state.codec.clone(),
    );
    let (handle, mut outputs) = spawn_session(
        driver,
        state.estimator.clone(),
        state.events.clone(),
        settings.frame_queue,
    );

    if let Some(data) = early_frame.take() {
        if let Some(reply) = submit_frame(&handle, &data, max_frame_bytes) {
            let _ = sink.send(Message::Text(reply.into())).await;
        }
    }

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(reply) = submit_frame(&handle, &data, max_frame_bytes) {
                        if sink.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Text(_))) => {
                    debug!(session = %handle.id(), "Ignoring text after difficulty selection");
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            output = outputs.recv() => match output {
                Some(Ok(output)) => {
                    if sink.send(Message::Binary(output.image.into())).await.is_err() {
                        break;
                    }
                    let feedback = match serde_json::to_string(&output.feedback) {
                        Ok(json) => json,
                        Err(e) => error_body(&e.into()),
                    };
                    if sink.send(Message::Text(feedback.into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    if sink.send(Message::Text(error_body(&e).into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Unblock the worker before waiting for it
    drop(outputs);
    match handle.abort().await {
        Ok(summary) => info!(
            session = %summary.session_id,
            reps = summary.rep_count,
            improper = summary.improper_rep_count,
            "Live feed closed"
        ),
        Err(e) => warn!(error = %e, "Session worker did not stop cleanly"),
    }
}

// ── Single-frame upload ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub difficulty: Option<String>,
}

async fn upload_frame(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let difficulty = query
        .difficulty
        .unwrap_or_else(|| Difficulty::default().as_str().to_string());

    let mut driver = match SessionDriver::new(
        &difficulty,
        state.config.session.upload(),
        state.codec.clone(),
    ) {
        Ok(driver) => driver,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let request = match decode_envelope(&body, state.config.http.max_frame_bytes) {
        Ok(envelope) => envelope.into_request(Timestamp::now()),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let output = match run_frame(&mut driver, state.estimator.as_deref(), request).await {
        Ok(output) => output,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e),
    };

    let feedback = match feedback_header(&output.feedback) {
        Ok(value) => value,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };
    let content_type = if output.annotated {
        HeaderValue::from_static(state.codec.content_type())
    } else {
        HeaderValue::from_static("application/octet-stream")
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (HeaderName::from_static(FEEDBACK_HEADER), feedback),
        ],
        output.image,
    )
        .into_response()
}

fn feedback_header(feedback: &FeedbackPayload) -> Result<HeaderValue, Error> {
    let json = serde_json::to_string(feedback)?;
    HeaderValue::from_str(&json)
        .map_err(|e| Error::Serialization(format!("feedback header: {e}")))
}

// ── Rep events ───────────────────────────────────────────────────────────────

async fn rep_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_rep_events(socket, state))
}

async fn handle_rep_events(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();
    info!("Rep event subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Could not serialize rep event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Rep event subscriber lagging");
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    info!("Rep event subscriber disconnected");
}

// ── Health ───────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.active_sessions(),
        "estimator": state.estimator.as_ref().map(|e| e.name().to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{encode_envelope, FrameHeader};
    use axum::body::to_bytes;
    use image::RgbImage;
    use squat_form::synthetic::SquatPose;
    use squat_session::{FrameCodec, JpegCodec};

    fn state() -> AppState {
        AppState::new(ApiConfig::default(), None)
    }

    fn frame_bytes(knee: Option<f64>) -> Bytes {
        let frame = RgbImage::from_pixel(400, 480, image::Rgb([80, 80, 80]));
        let jpeg = JpegCodec::default().encode(&frame).unwrap();
        let header = FrameHeader {
            timestamp_ms: Some(0),
            landmarks: knee.map(|k| SquatPose::standing().knee_vertical(k).build()),
        };
        Bytes::from(encode_envelope(&header, &jpeg).unwrap())
    }

    fn query(difficulty: Option<&str>) -> Query<UploadQuery> {
        Query(UploadQuery {
            difficulty: difficulty.map(str::to_string),
        })
    }

    fn feedback(response: &Response) -> FeedbackPayload {
        let value = response.headers().get(FEEDBACK_HEADER).unwrap();
        serde_json::from_str(value.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_annotates_frame() {
        let response =
            upload_frame(State(state()), query(Some("pro")), frame_bytes(Some(50.0))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let payload = feedback(&response);
        assert_eq!(payload.state, squat_form::SquatState::Transition);
        assert_eq!(payload.rep_count, 0);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(&[0xff, 0xd8]));
    }

    #[tokio::test]
    async fn test_upload_without_landmarks() {
        let response = upload_frame(State(state()), query(None), frame_bytes(None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload = feedback(&response);
        assert!(payload.messages.iter().any(|m| m == "NO POSE DETECTED"));
    }

    #[tokio::test]
    async fn test_upload_unknown_difficulty_rejected() {
        let response =
            upload_frame(State(state()), query(Some("expert")), frame_bytes(None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("expert"));
    }

    #[tokio::test]
    async fn test_upload_bad_envelope_rejected() {
        let response = upload_frame(
            State(state()),
            query(None),
            Bytes::from_static(&[9, 0, 0, 0, b'{']),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_undecodable_image() {
        let header = FrameHeader::default();
        let body = Bytes::from(encode_envelope(&header, b"definitely not a jpeg").unwrap());
        let response = upload_frame(State(state()), query(None), body).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let state = state();
        let _guard = state.track_session();

        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 1);
        assert!(body["estimator"].is_null());
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }
}
