//! Fakes shared by the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::Rgba;
use tokio::sync::Notify;

use posecoach::analysis::{AnnotatedVideo, Exercise, FrameResult, Landmark, VideoUpload, VisionService};
use posecoach::capture::{
    CameraConstraints, CameraSource, Frame, FrameDimensions, FrameMetadata, PixelFormat,
    SampledFrame,
};
use posecoach::display::DrawSurface;
use posecoach::error::{AnalysisError, CameraError};

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

pub fn rgb_frame(sequence: u64, width: u32, height: u32) -> Frame {
    Frame::new(
        Bytes::from(vec![128u8; (width * height * 3) as usize]),
        FrameMetadata {
            sequence,
            width,
            height,
            stride: width * 3,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        },
    )
}

pub fn result(points: &[(f32, f32)], feedback: Option<&str>) -> FrameResult {
    FrameResult {
        landmarks: points.iter().map(|&(x, y)| Landmark::new(x, y)).collect(),
        feedback: feedback.map(str::to_string),
    }
}

/// Poll `check` on the paused clock until it holds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Camera with a release counter and optional acquisition gate
#[derive(Default)]
pub struct FakeCamera {
    pub releases: AtomicUsize,
    pub reads: AtomicUsize,
    pub deny: Option<CameraError>,
    pub gate: Option<Arc<Notify>>,
    pub fail_reads: bool,
}

impl FakeCamera {
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn acquire(&self, _constraints: &CameraConstraints) -> Result<(), CameraError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.deny {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn read_frame(&self) -> Result<Frame, CameraError> {
        let sequence = self.reads.fetch_add(1, Ordering::SeqCst) as u64;
        if self.fail_reads {
            return Err(CameraError::Device("unplugged".into()));
        }
        Ok(rgb_frame(sequence, FRAME_WIDTH, FRAME_HEIGHT))
    }

    fn dimensions(&self) -> Option<FrameDimensions> {
        Some(FrameDimensions::new(FRAME_WIDTH, FRAME_HEIGHT))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

type FrameReply = Box<dyn Fn() -> Result<FrameResult, AnalysisError> + Send + Sync>;

/// Scripted vision service
pub struct FakeService {
    frame_script: Mutex<VecDeque<Result<FrameResult, AnalysisError>>>,
    frame_fallback: FrameReply,
    video_script: Mutex<VecDeque<Result<AnnotatedVideo, AnalysisError>>>,
    pub gate: Option<Arc<Notify>>,
    pub frame_calls: AtomicUsize,
    pub video_calls: AtomicUsize,
    pub frames: Mutex<Vec<(SampledFrame, Exercise)>>,
    pub uploads: Mutex<Vec<(String, Exercise)>>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            frame_script: Mutex::default(),
            frame_fallback: Box::new(|| Ok(FrameResult::default())),
            video_script: Mutex::default(),
            gate: None,
            frame_calls: AtomicUsize::new(0),
            video_calls: AtomicUsize::new(0),
            frames: Mutex::default(),
            uploads: Mutex::default(),
        }
    }
}

impl FakeService {
    pub fn replying(reply: impl Fn() -> Result<FrameResult, AnalysisError> + Send + Sync + 'static) -> Self {
        Self {
            frame_fallback: Box::new(reply),
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn push_frame(&self, reply: Result<FrameResult, AnalysisError>) {
        self.frame_script.lock().unwrap().push_back(reply);
    }

    pub fn push_video(&self, reply: Result<AnnotatedVideo, AnalysisError>) {
        self.video_script.lock().unwrap().push_back(reply);
    }

    pub fn frame_calls(&self) -> usize {
        self.frame_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionService for FakeService {
    async fn analyze_frame(
        &self,
        frame: SampledFrame,
        exercise: Exercise,
    ) -> Result<FrameResult, AnalysisError> {
        self.frame_calls.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().unwrap().push((frame, exercise));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = self.frame_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.frame_fallback)())
    }

    async fn analyze_video(
        &self,
        upload: VideoUpload,
        exercise: Exercise,
    ) -> Result<AnnotatedVideo, AnalysisError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .unwrap()
            .push((upload.file_name.clone(), exercise));
        self.video_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AnalysisError::Empty))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Resize(u32, u32),
    Clear,
    Circle(f32, f32),
    Line,
    Rect,
    Text(String),
    Present,
}

/// Surface that records draw calls for inspection
#[derive(Clone, Default)]
pub struct RecordingSurface {
    pub ops: Arc<Mutex<Vec<DrawOp>>>,
    size: (u32, u32),
}

impl RecordingSurface {
    pub fn ops(&self) -> Vec<DrawOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn presents(&self) -> usize {
        self.ops().iter().filter(|op| **op == DrawOp::Present).count()
    }

    fn push(&self, op: DrawOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl DrawSurface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.push(DrawOp::Resize(width, height));
    }

    fn clear(&mut self) {
        self.push(DrawOp::Clear);
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, _radius: f32, _color: Rgba<u8>) {
        self.push(DrawOp::Circle(cx, cy));
    }

    fn draw_line(&mut self, _from: (f32, f32), _to: (f32, f32), _color: Rgba<u8>) {
        self.push(DrawOp::Line);
    }

    fn fill_rect(&mut self, _x: f32, _y: f32, _width: f32, _height: f32, _color: Rgba<u8>) {
        self.push(DrawOp::Rect);
    }

    fn draw_text(&mut self, _x: f32, _y: f32, text: &str, _color: Rgba<u8>) {
        self.push(DrawOp::Text(text.to_string()));
    }

    fn text_width(&self, text: &str) -> f32 {
        text.chars().count() as f32
    }

    fn present(&mut self) {
        self.push(DrawOp::Present);
    }
}
