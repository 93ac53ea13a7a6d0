//! HTTP control API for the reader.
//!
//! Lets a UI (or curl) drive the reader: status, voices, start/stop,
//! voice and story selection, replacement text, and the narration track.
//! Binds to 127.0.0.1 on the configured port.

use std::path::PathBuf;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::service::{ReaderHandle, ReaderStatus};
use crate::voice::VoiceDescriptor;

#[derive(Clone)]
pub struct ApiState {
    pub reader: ReaderHandle,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SetVoiceRequest {
    voice: String,
}

#[derive(Deserialize)]
struct SelectStoryRequest {
    story: String,
}

#[derive(Deserialize)]
struct SetContentRequest {
    text: String,
}

#[derive(Deserialize)]
struct SaveTrackRequest {
    path: PathBuf,
}

#[derive(Serialize)]
struct VoicesResponse {
    selected: String,
    voices: Vec<VoiceDescriptor>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }

    fn from_result(status: &str, result: Result<(), String>) -> Json<Self> {
        match result {
            Ok(()) => Json(Self::ok(status)),
            Err(e) => Json(Self::err(e)),
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/voices", get(handle_voices))
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .route("/toggle", post(handle_toggle))
        .route("/set-voice", post(handle_set_voice))
        .route("/select-story", post(handle_select_story))
        .route("/content", post(handle_set_content))
        .route("/track/play", post(handle_track_play))
        .route("/track/pause", post(handle_track_pause))
        .route("/track/save", post(handle_track_save))
        .with_state(state)
}

/// Start the API server as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind reader API on {addr}: {e}");
            return;
        }
    };
    info!("Reader API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Reader API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<ReaderStatus> {
    Json(state.reader.status())
}

async fn handle_voices(State(state): State<ApiState>) -> Json<VoicesResponse> {
    let status = state.reader.status();
    Json(VoicesResponse {
        selected: status.voice_id,
        voices: status.voices,
    })
}

async fn handle_start(State(state): State<ApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result("reading", state.reader.start().await)
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result("stopped", state.reader.stop().await)
}

async fn handle_toggle(State(state): State<ApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result("toggled", state.reader.toggle().await)
}

async fn handle_set_voice(
    State(state): State<ApiState>,
    Json(req): Json<SetVoiceRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /set-voice: {}", req.voice);
    SimpleResponse::from_result("ok", state.reader.set_voice(&req.voice).await)
}

async fn handle_select_story(
    State(state): State<ApiState>,
    Json(req): Json<SelectStoryRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /select-story: {}", req.story);
    SimpleResponse::from_result("ok", state.reader.select_story(&req.story).await)
}

async fn handle_set_content(
    State(state): State<ApiState>,
    Json(req): Json<SetContentRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /content: {} chars", req.text.chars().count());
    SimpleResponse::from_result("ok", state.reader.set_content(req.text).await)
}

async fn handle_track_play(State(state): State<ApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result("playing", state.reader.play_track().await)
}

async fn handle_track_pause(State(state): State<ApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result("paused", state.reader.pause_track().await)
}

async fn handle_track_save(
    State(state): State<ApiState>,
    Json(req): Json<SaveTrackRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /track/save: {}", req.path.display());
    SimpleResponse::from_result("saved", state.reader.save_track(req.path).await)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::service::tests::harness;

    async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    #[tokio::test(start_paused = true)]
    async fn status_and_voices_reflect_the_reader() {
        let h = harness();
        let app = router(ApiState {
            reader: h.handle.clone(),
        });

        let (code, status) = call(&app, "GET", "/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["is_reading"], false);
        assert_eq!(status["voice_id"], "google-normal");
        assert_eq!(status["current_index"], Value::Null);

        let (_, voices) = call(&app, "GET", "/voices", None).await;
        assert_eq!(voices["selected"], "google-normal");
        assert_eq!(voices["voices"].as_array().unwrap().len(), 3);
        assert_eq!(voices["voices"][1]["backend"], "remote-online");
    }

    #[tokio::test(start_paused = true)]
    async fn story_selection_and_reading() {
        let h = harness();
        let app = router(ApiState {
            reader: h.handle.clone(),
        });

        let (_, body) = call(&app, "POST", "/select-story", Some(r#"{"story":"tam-cam"}"#)).await;
        assert_eq!(body["status"], "ok");

        let (_, body) = call(&app, "POST", "/start", None).await;
        assert_eq!(body["status"], "reading");
        let mut rx = h.handle.subscribe();
        rx.wait_for(|s| s.is_reading).await.unwrap();

        let (_, status) = call(&app, "GET", "/status", None).await;
        assert_eq!(status["story_id"], "tam-cam");
        assert_eq!(status["current_index"], 0);

        let (_, body) = call(&app, "POST", "/stop", None).await;
        assert_eq!(body["status"], "stopped");
        rx.wait_for(|s| !s.is_reading).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bad_requests_report_errors() {
        let h = harness();
        let app = router(ApiState {
            reader: h.handle.clone(),
        });

        let (_, body) = call(&app, "POST", "/set-voice", Some(r#"{"voice":"nobody"}"#)).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Unknown voice: nobody");

        let (_, body) = call(&app, "POST", "/track/play", None).await;
        assert_eq!(body["status"], "error");

        let (_, body) = call(&app, "POST", "/start", None).await;
        assert_eq!(body["status"], "error");
        assert!(!h.handle.status().is_reading);

        let (code, _) = call(&app, "POST", "/set-voice", Some("{}")).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test(start_paused = true)]
    async fn content_replacement_resegments() {
        let h = harness();
        let app = router(ApiState {
            reader: h.handle.clone(),
        });
        call(&app, "POST", "/select-story", Some(r#"{"story":"cay-khe"}"#)).await;

        let text = serde_json::json!({ "text": "Ngày xưa. Có một cây khế! Chim bay đến? Trả vàng." });
        let (_, body) = call(&app, "POST", "/content", Some(&text.to_string())).await;
        assert_eq!(body["status"], "ok");

        let (_, status) = call(&app, "GET", "/status", None).await;
        assert_eq!(status["sentence_count"], 4);
        assert_eq!(status["story_id"], "cay-khe");

        let (_, body) = call(&app, "POST", "/content", Some(r#"{"text":""}"#)).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn loaded_track_can_be_saved() {
        let h = harness();
        let app = router(ApiState {
            reader: h.handle.clone(),
        });
        let path = h.dir.path().join("tam-cam.wav");
        let request = serde_json::json!({ "path": path }).to_string();

        let (_, body) = call(&app, "POST", "/track/save", Some(&request)).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "No narration track loaded");

        call(&app, "POST", "/select-story", Some(r#"{"story":"tam-cam"}"#)).await;
        let (_, body) = call(&app, "POST", "/track/save", Some(&request)).await;
        assert_eq!(body["status"], "saved");
        assert!(path.exists());
    }
}
