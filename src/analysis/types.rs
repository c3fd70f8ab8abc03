use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AnalysisError;

/// Exercise selector understood by the vision service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exercise {
    #[default]
    Pushup,
    Squat,
    Plank,
}

impl Exercise {
    pub const ALL: [Exercise; 3] = [Exercise::Pushup, Exercise::Squat, Exercise::Plank];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exercise::Pushup => "pushup",
            Exercise::Squat => "squat",
            Exercise::Plank => "plank",
        }
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown exercise '{0}', expected one of pushup, squat, plank")]
pub struct UnknownExercise(String);

impl FromStr for Exercise {
    type Err = UnknownExercise;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exercise::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownExercise(s.to_string()))
    }
}

/// Normalized body keypoint, nominally in `[0, 1] x [0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Whether the point lies inside the frame
    pub fn is_in_frame(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }

    /// Pixel position on a surface of the given size
    pub fn to_pixel(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Per-frame analysis result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
    pub landmarks: Vec<Landmark>,
    pub feedback: Option<String>,
}

impl FrameResult {
    /// Feedback to show, ignoring blank strings
    pub fn feedback_text(&self) -> Option<&str> {
        self.feedback
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Deserialize)]
struct WireFrameResult {
    #[serde(default)]
    landmarks: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    feedback: Option<String>,
}

impl FrameResult {
    /// Parse the `/vision/stream-frame` response body.
    ///
    /// Points may carry extra components (z, visibility); only x and y are kept.
    /// Coordinates that overflow `f32` are rejected. Finite points outside the
    /// frame are kept and skipped when drawn.
    pub fn from_json(body: &[u8]) -> Result<Self, AnalysisError> {
        let wire: WireFrameResult = serde_json::from_slice(body)
            .map_err(|e| AnalysisError::ServerPayload(format!("Malformed frame result: {e}")))?;

        let landmarks = wire
            .landmarks
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, point)| match point.as_slice() {
                [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Landmark::new(*x, *y)),
                [x, y, ..] => Err(AnalysisError::ServerPayload(format!(
                    "Landmark {i} is not finite: ({x}, {y})"
                ))),
                _ => Err(AnalysisError::ServerPayload(format!(
                    "Landmark {i} has {} coordinates",
                    point.len()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FrameResult {
            landmarks,
            feedback: wire.feedback,
        })
    }
}

/// Processed video returned by batch analysis
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedVideo {
    pub data: Bytes,
    pub content_type: String,
}

impl AnnotatedVideo {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Video file selected for batch analysis
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub file_name: String,
    pub mime_type: &'static str,
    pub data: Bytes,
}

impl VideoUpload {
    pub fn new(file_name: impl Into<String>, data: Bytes) -> Result<Self, AnalysisError> {
        let file_name = file_name.into();
        let mime_type = video_mime_type(&file_name).ok_or_else(|| {
            AnalysisError::InvalidUpload(format!(
                "{file_name}: expected an .mp4, .webm or .mov video"
            ))
        })?;
        if data.is_empty() {
            return Err(AnalysisError::InvalidUpload(format!("{file_name} is empty")));
        }
        Ok(Self {
            file_name,
            mime_type,
            data,
        })
    }

    /// Read a video from disk, rejecting files larger than `max_bytes`
    pub async fn from_path(path: &Path, max_bytes: u64) -> Result<Self, AnalysisError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.mp4".to_string());
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| AnalysisError::InvalidUpload(format!("{}: {e}", path.display())))?;
        if meta.len() > max_bytes {
            return Err(AnalysisError::InvalidUpload(format!(
                "{file_name} is {} bytes, limit is {max_bytes}",
                meta.len()
            )));
        }
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AnalysisError::InvalidUpload(format!("{}: {e}", path.display())))?;
        Self::new(file_name, Bytes::from(data))
    }
}

fn video_mime_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" => Some("video/quicktime"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exercise_parse() {
        assert_eq!("squat".parse::<Exercise>().unwrap(), Exercise::Squat);
        assert_eq!(" Plank ".parse::<Exercise>().unwrap(), Exercise::Plank);
        assert!("lunge".parse::<Exercise>().is_err());
        assert_eq!(Exercise::default().to_string(), "pushup");
    }

    #[test]
    fn test_frame_result_parse() {
        let result =
            FrameResult::from_json(br#"{"landmarks":[[0.5,0.5],[0.1,0.2,0.3,0.9]],"feedback":"Go lower"}"#)
                .unwrap();
        assert_eq!(
            result.landmarks,
            vec![Landmark::new(0.5, 0.5), Landmark::new(0.1, 0.2)]
        );
        assert_eq!(result.feedback_text(), Some("Go lower"));
    }

    #[test]
    fn test_frame_result_without_subject() {
        let result = FrameResult::from_json(br#"{"landmarks":[]}"#).unwrap();
        assert!(result.landmarks.is_empty());
        assert_eq!(result.feedback_text(), None);

        let result = FrameResult::from_json(br#"{"feedback":"  "}"#).unwrap();
        assert!(result.landmarks.is_empty());
        assert_eq!(result.feedback_text(), None);
    }

    #[test]
    fn test_frame_result_rejects_bad_points() {
        let err = FrameResult::from_json(br#"{"landmarks":[[0.5]]}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::ServerPayload(_)));

        let err = FrameResult::from_json(b"<html>").unwrap_err();
        assert!(matches!(err, AnalysisError::ServerPayload(_)));
    }

    #[test]
    fn test_frame_result_rejects_overflowing_coordinates() {
        let mut points = vec!["[1e39,0.5]".to_string()];
        points.extend((1..33).map(|i| format!("[{},0.5]", i as f32 / 40.0)));
        let body = format!(r#"{{"landmarks":[{}]}}"#, points.join(","));

        let err = FrameResult::from_json(body.as_bytes()).unwrap_err();
        assert!(matches!(err, AnalysisError::ServerPayload(ref m) if m.starts_with("Landmark 0")));
    }

    #[test]
    fn test_landmark_in_frame() {
        assert!(Landmark::new(0.0, 1.0).is_in_frame());
        assert!(!Landmark::new(1.2, 0.5).is_in_frame());
        assert!(!Landmark::new(0.5, -0.01).is_in_frame());
        assert!(!Landmark::new(f32::NAN, 0.5).is_in_frame());
    }

    #[test]
    fn test_landmark_to_pixel() {
        assert_eq!(Landmark::new(0.5, 0.5).to_pixel(640, 480), (320.0, 240.0));
        assert_eq!(Landmark::new(1.0, 0.0).to_pixel(200, 100), (200.0, 0.0));
    }

    #[test]
    fn test_video_upload_validation() {
        let upload = VideoUpload::new("squat.MP4", Bytes::from_static(b"\0\0\0\x18ftyp")).unwrap();
        assert_eq!(upload.mime_type, "video/mp4");

        assert!(matches!(
            VideoUpload::new("notes.txt", Bytes::from_static(b"x")),
            Err(AnalysisError::InvalidUpload(_))
        ));
        assert!(matches!(
            VideoUpload::new("empty.webm", Bytes::new()),
            Err(AnalysisError::InvalidUpload(_))
        ));
    }
}
