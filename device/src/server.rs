use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::stream::{self, Stream};
use motion_cam_common::frame::Frame;
use motion_cam_detector::{SettingsUpdate, SharedEngine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clock::MonotonicClock;

const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=frame";

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub engine: SharedEngine,
    /// Latest captured frame, `None` until the first capture.
    pub frames: watch::Receiver<Option<Frame>>,
    pub clock: MonotonicClock,
}

impl AppState {
    fn latest_frame(&self) -> Option<Frame> {
        self.frames.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FrameInfo {
    size: usize,
    width: u32,
    height: u32,
    timestamp: u64,
}

/// Form body of `POST /motion/settings`. Values are parsed by hand so a bad
/// number is a 400 rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
struct SettingsForm {
    enable: Option<String>,
    threshold: Option<String>,
    pixel_threshold: Option<String>,
    cooldown_ms: Option<String>,
}

impl SettingsForm {
    fn into_update(self) -> Result<SettingsUpdate, String> {
        Ok(SettingsUpdate {
            enabled: self.enable.map(|v| v == "1" || v == "true"),
            motion_threshold: parse_field("threshold", self.threshold)?,
            pixel_threshold: parse_field("pixel_threshold", self.pixel_threshold)?,
            cooldown_ms: parse_field("cooldown_ms", self.cooldown_ms)?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, String> {
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|_| format!("invalid {name}: {v:?} is not a number"))
    })
    .transpose()
}

#[derive(Debug, Serialize)]
struct SettingsResponse {
    motion_detection: bool,
    threshold: u32,
    pixel_threshold: u32,
    cooldown_ms: u64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    motion_detection_enabled: bool,
    cooldown_ms: u64,
    time_since_last_ms: u64,
    can_trigger: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn no_frame() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "no frame captured yet").into_response()
}

/// GET /stream
async fn stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("live stream client connected");
    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(live_parts(state.frames.clone())),
    )
}

/// One multipart part per new frame. Ends when the capture side drops the
/// watch sender.
fn live_parts(
    frames: watch::Receiver<Option<Frame>>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(frames, |mut frames| async move {
        loop {
            frames.changed().await.ok()?;
            let latest = frames.borrow_and_update().clone();
            if let Some(frame) = latest {
                return Some((Ok(encode_part(&frame)), frames));
            }
        }
    })
}

fn encode_part(frame: &Frame) -> Bytes {
    let header = format!(
        "\r\n--frame\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        frame.format.mime_type(),
        frame.len()
    );
    let mut part = Vec::with_capacity(header.len() + frame.len());
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.data());
    Bytes::from(part)
}

/// GET /capture
async fn capture(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.latest_frame() else {
        return no_frame();
    };
    (
        [
            (header::CONTENT_TYPE, frame.format.mime_type()),
            (header::CONTENT_DISPOSITION, "inline; filename=capture.jpg"),
        ],
        frame.bytes(),
    )
        .into_response()
}

/// GET /info
async fn frame_info(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.latest_frame() else {
        return no_frame();
    };
    Json(FrameInfo {
        size: frame.len(),
        width: frame.width,
        height: frame.height,
        timestamp: frame.captured_at_ms,
    })
    .into_response()
}

/// GET /base64
async fn frame_base64(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.latest_frame() else {
        return no_frame();
    };
    (
        [(header::CONTENT_TYPE, "text/plain")],
        STANDARD.encode(frame.data()),
    )
        .into_response()
}

/// POST /motion/settings
async fn motion_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Response {
    let applied = form
        .into_update()
        .and_then(|update| state.engine.apply(&update).map_err(|e| e.to_string()));

    match applied {
        Ok(settings) => {
            info!(
                enabled = settings.enabled,
                threshold = settings.motion_threshold,
                pixel_threshold = settings.pixel_threshold,
                cooldown_ms = settings.cooldown_ms,
                "motion settings updated"
            );
            Json(SettingsResponse {
                motion_detection: settings.enabled,
                threshold: settings.motion_threshold,
                pixel_threshold: settings.pixel_threshold,
                cooldown_ms: settings.cooldown_ms,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "rejected motion settings");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response()
        }
    }
}

/// GET /motion/status
async fn motion_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.engine.status(state.clock.now_ms());
    Json(StatusResponse {
        motion_detection_enabled: status.enabled,
        cooldown_ms: status.cooldown_ms,
        time_since_last_ms: status.time_since_last_ms,
        can_trigger: status.can_trigger,
    })
}

/// POST /motion/trigger
async fn motion_trigger(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.request_manual_trigger();
    info!("manual motion trigger requested");
    Json(json!({
        "status": "triggered",
        "message": "Motion trigger activated",
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/capture", get(capture))
        .route("/info", get(frame_info))
        .route("/base64", get(frame_base64))
        .route("/motion/settings", post(motion_settings))
        .route("/motion/status", get(motion_status))
        .route("/motion/trigger", post(motion_trigger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use futures_util::StreamExt;
    use motion_cam_common::config::MotionConfig;
    use motion_cam_detector::MotionEngine;
    use serde_json::Value;
    use tower::ServiceExt;

    fn setup() -> (Router, SharedEngine, watch::Sender<Option<Frame>>) {
        let engine = SharedEngine::new(MotionEngine::new(&MotionConfig::default()).unwrap());
        let (tx, rx) = watch::channel(None);
        let state = Arc::new(AppState {
            engine: engine.clone(),
            frames: rx,
            clock: MonotonicClock::start(),
        });
        (router(state), engine, tx)
    }

    fn frame(data: &'static [u8]) -> Frame {
        Frame::jpeg(data, 1_234, 1).unwrap()
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn form_req(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn frame_routes_are_unavailable_before_first_capture() {
        let (app, _engine, _tx) = setup();
        for uri in ["/capture", "/info", "/base64"] {
            let (status, _) = call(app.clone(), get_req(uri)).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        }
    }

    #[tokio::test]
    async fn latest_frame_is_served() {
        let (app, _engine, tx) = setup();
        tx.send_replace(Some(frame(b"\xFF\xD8jpeg")));

        let (status, body) = call(app.clone(), get_req("/capture")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"\xFF\xD8jpeg");

        let (_, body) = call(app.clone(), get_req("/info")).await;
        let info: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["size"], 6);
        assert_eq!(info["timestamp"], 1_234);

        let (_, body) = call(app, get_req("/base64")).await;
        assert_eq!(&body[..], STANDARD.encode(b"\xFF\xD8jpeg").as_bytes());
    }

    #[tokio::test]
    async fn settings_form_updates_engine() {
        let (app, engine, _tx) = setup();
        let (status, body) = call(
            app,
            form_req(
                "/motion/settings",
                "enable=0&threshold=4000&pixel_threshold=40&cooldown_ms=500",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["motion_detection"], false);
        assert_eq!(doc["threshold"], 4000);
        assert_eq!(doc["pixel_threshold"], 40);
        assert_eq!(doc["cooldown_ms"], 500);

        let settings = engine.settings();
        assert!(!settings.enabled);
        assert_eq!(settings.motion_threshold, 4000);
    }

    #[tokio::test]
    async fn invalid_settings_change_nothing() {
        let (app, engine, _tx) = setup();
        let before = engine.settings();

        let (status, body) = call(
            app.clone(),
            form_req("/motion/settings", "threshold=4000&pixel_threshold=0"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert!(doc["error"].as_str().unwrap().contains("pixel_threshold"));

        let (status, _) = call(app, form_req("/motion/settings", "cooldown_ms=soon")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(engine.settings(), before);
    }

    #[tokio::test]
    async fn trigger_and_status() {
        let (app, engine, _tx) = setup();

        let (status, body) = call(
            app.clone(),
            Request::builder()
                .method("POST")
                .uri("/motion/trigger")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["status"], "triggered");
        assert!(engine.decide(&[1; 16], 0).emit());

        let (_, body) = call(app, get_req("/motion/status")).await;
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["motion_detection_enabled"], true);
        assert_eq!(doc["cooldown_ms"], 2_000);
        assert!(doc["time_since_last_ms"].is_u64());
        assert!(doc["can_trigger"].is_boolean());
    }

    #[tokio::test]
    async fn stream_route_sets_multipart_content_type() {
        let (app, _engine, _tx) = setup();
        let response = app.oneshot(get_req("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace;boundary=frame"
        );
    }

    #[tokio::test]
    async fn live_parts_follow_the_watch_channel() {
        let (tx, rx) = watch::channel(None);
        let mut parts = std::pin::pin!(live_parts(rx));

        tx.send_replace(Some(frame(b"abc")));
        let part = parts.next().await.unwrap().unwrap();
        assert_eq!(
            &part[..],
            b"\r\n--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc"
        );

        drop(tx);
        assert!(parts.next().await.is_none());
    }
}
