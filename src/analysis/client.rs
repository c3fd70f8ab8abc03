//! HTTP client for the vision analysis service

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::types::{AnnotatedVideo, Exercise, FrameResult, VideoUpload};
use super::VisionService;
use crate::capture::SampledFrame;
use crate::error::AnalysisError;
use crate::ServiceConfig;

const ANALYZE_PATH: &str = "/vision/analyze";
const STREAM_FRAME_PATH: &str = "/vision/stream-frame";
const HEALTH_PATH: &str = "/health";
const EXERCISES_PATH: &str = "/exercises";

/// reqwest-backed [`VisionService`]
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    http: Client,
    base_url: String,
    frame_timeout: Option<Duration>,
    video_timeout: Option<Duration>,
}

impl HttpAnalysisClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, AnalysisError> {
        let http = Client::builder()
            .user_agent(concat!("posecoach/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            frame_timeout: config.frame_timeout_ms.map(Duration::from_millis),
            video_timeout: config.video_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Liveness probe; `Ok(true)` when the service answers `{"ok": true}`
    pub async fn health(&self) -> Result<bool, AnalysisError> {
        #[derive(Deserialize)]
        struct Health {
            #[serde(default)]
            ok: bool,
        }

        let response = self.http.get(self.endpoint(HEALTH_PATH)).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }
        let health: Health = serde_json::from_slice(&body)
            .map_err(|e| AnalysisError::ServerPayload(format!("Malformed health response: {e}")))?;
        Ok(health.ok)
    }

    /// Exercise names the service accepts
    pub async fn supported_exercises(&self) -> Result<Vec<String>, AnalysisError> {
        #[derive(Deserialize)]
        struct Supported {
            supported: Vec<String>,
        }

        let response = self.http.get(self.endpoint(EXERCISES_PATH)).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }
        let supported: Supported = serde_json::from_slice(&body).map_err(|e| {
            AnalysisError::ServerPayload(format!("Malformed exercises response: {e}"))
        })?;
        Ok(supported.supported)
    }
}

#[async_trait]
impl VisionService for HttpAnalysisClient {
    #[instrument(skip(self, frame), fields(sequence = frame.sequence, bytes = frame.len()))]
    async fn analyze_frame(
        &self,
        frame: SampledFrame,
        exercise: Exercise,
    ) -> Result<FrameResult, AnalysisError> {
        let started = Instant::now();
        let file_name = frame.file_name();
        let SampledFrame {
            data, mime_type, ..
        } = frame;
        let len = data.len() as u64;
        let part = Part::stream_with_length(Body::from(data), len)
            .file_name(file_name)
            .mime_str(mime_type)?;
        let form = Form::new()
            .part("file", part)
            .text("exercise", exercise.as_str());

        let mut request = self
            .http
            .post(self.endpoint(STREAM_FRAME_PATH))
            .multipart(form);
        if let Some(timeout) = self.frame_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        metrics::histogram!("analysis_round_trip_ms").record(started.elapsed().as_millis() as f64);
        debug!(status, elapsed = ?started.elapsed(), "Frame analyzed");

        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }
        FrameResult::from_json(&body)
    }

    #[instrument(skip(self, upload), fields(file = %upload.file_name, bytes = upload.data.len()))]
    async fn analyze_video(
        &self,
        upload: VideoUpload,
        exercise: Exercise,
    ) -> Result<AnnotatedVideo, AnalysisError> {
        let VideoUpload {
            file_name,
            mime_type,
            data,
        } = upload;
        let len = data.len() as u64;
        let part = Part::stream_with_length(Body::from(data), len)
            .file_name(file_name)
            .mime_str(mime_type)?;
        let form = Form::new()
            .part("file", part)
            .text("exercise", exercise.as_str());

        let mut request = self.http.post(self.endpoint(ANALYZE_PATH)).multipart(form);
        if let Some(timeout) = self.video_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let (status, content_type) = response_head(&response);
        let body = response.bytes().await?;

        interpret_video_response(status, content_type.as_deref(), body)
    }
}

fn response_head(response: &Response) -> (u16, Option<String>) {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (response.status().as_u16(), content_type)
}

/// Classify a `/vision/analyze` response.
///
/// Order matters: status first, then a JSON body on success, then emptiness.
pub fn interpret_video_response(
    status: u16,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<AnnotatedVideo, AnalysisError> {
    if !(200..300).contains(&status) {
        let err = status_error(status, &body);
        warn!(status, "Video analysis failed: {}", err);
        return Err(err);
    }

    if content_type.is_some_and(is_json) {
        let message = json_error_field(&body, &["error"])
            .unwrap_or_else(|| "Unexpected JSON response from server".to_string());
        warn!("Video analysis returned JSON instead of media: {}", message);
        return Err(AnalysisError::ServerPayload(message));
    }

    if body.is_empty() {
        return Err(AnalysisError::Empty);
    }

    Ok(AnnotatedVideo {
        data: body,
        content_type: content_type.unwrap_or("video/mp4").to_string(),
    })
}

/// Build a status error: JSON `error`, then `detail`, then raw text, then
/// a synthesized message.
pub fn status_error(status: u16, body: &[u8]) -> AnalysisError {
    let message = json_error_field(body, &["error", "detail"])
        .or_else(|| {
            std::str::from_utf8(body)
                .ok()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("Request failed with status {status}"));
    AnalysisError::ServerStatus { status, message }
}

fn json_error_field(body: &[u8], fields: &[&str]) -> Option<String> {
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
        return None;
    };
    fields.iter().find_map(|field| match map.get(*field)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_prefers_error_field() {
        let err = status_error(400, br#"{"error":"bad exercise","detail":"ignored"}"#);
        assert!(matches!(
            err,
            AnalysisError::ServerStatus { status: 400, ref message } if message == "bad exercise"
        ));
    }

    #[test]
    fn test_status_error_falls_back_to_detail() {
        let err = status_error(422, br#"{"detail":[{"msg":"field required"}]}"#);
        assert_eq!(err.to_string(), r#"[{"msg":"field required"}]"#);

        let err = status_error(404, br#"{"detail":"Not Found"}"#);
        assert_eq!(err.to_string(), "Not Found");
    }

    #[test]
    fn test_status_error_text_then_synthesized() {
        assert_eq!(
            status_error(502, b"Bad Gateway\n").to_string(),
            "Bad Gateway"
        );
        assert_eq!(
            status_error(500, b"").to_string(),
            "Request failed with status 500"
        );
        // JSON without either field falls through to the raw text
        assert_eq!(status_error(500, br#"{"x":1}"#).to_string(), r#"{"x":1}"#);
    }

    #[test]
    fn test_json_success_is_payload_error() {
        let err = interpret_video_response(
            200,
            Some("application/json"),
            Bytes::from_static(br#"{"error":"pose model crashed"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::ServerPayload(ref m) if m == "pose model crashed"));

        let err = interpret_video_response(
            200,
            Some("application/json; charset=utf-8"),
            Bytes::from_static(b"{}"),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Unexpected JSON response from server");
    }

    #[test]
    fn test_empty_success_body() {
        let err = interpret_video_response(200, Some("video/mp4"), Bytes::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::Empty));
    }

    #[test]
    fn test_video_success() {
        let video = interpret_video_response(
            200,
            Some("video/mp4"),
            Bytes::from_static(b"\0\0\0\x18ftypmp42"),
        )
        .unwrap();
        assert_eq!(video.content_type, "video/mp4");
        assert_eq!(video.len(), 12);

        let video = interpret_video_response(200, None, Bytes::from_static(b"data")).unwrap();
        assert_eq!(video.content_type, "video/mp4");
    }

    #[test]
    fn test_status_checked_before_content_type() {
        let err = interpret_video_response(
            500,
            Some("application/json"),
            Bytes::from_static(br#"{"error":"disk full"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::ServerStatus { status: 500, .. }));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpAnalysisClient::new(&ServiceConfig {
            base_url: "http://localhost:9000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint(STREAM_FRAME_PATH),
            "http://localhost:9000/vision/stream-frame"
        );
    }
}
