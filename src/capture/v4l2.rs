//! V4L2 camera source with memory-mapped streaming

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::camera::{CameraConstraints, CameraSource};
use crate::capture::frame::{Frame, FrameDimensions, FrameMetadata, PixelFormat};
use crate::error::CameraError;
use crate::utils;

const BUFFER_COUNT: u32 = 4;
/// Longest a dequeue may hold the device lock
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);
/// A camera that delivers nothing for this long has failed
const STALL_LIMIT: Duration = Duration::from_secs(5);

struct OpenDevice {
    _device: Device,
    stream: MmapStream<'static>,
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
}

#[derive(Default)]
struct Shared {
    open: Mutex<Option<OpenDevice>>,
    dimensions: Mutex<Option<FrameDimensions>>,
    released: AtomicBool,
    sequence: AtomicU64,
}

impl Shared {
    fn lock_open(&self) -> MutexGuard<'_, Option<OpenDevice>> {
        self.open.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn close(open: &mut Option<OpenDevice>) {
    if open.take().is_some() {
        info!("V4L2 device closed");
    }
}

/// Camera source backed by a `/dev/video*` node
#[derive(Default)]
pub struct V4l2Camera {
    shared: Arc<Shared>,
}

impl V4l2Camera {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_device(constraints: &CameraConstraints) -> Result<OpenDevice, CameraError> {
    let path = if constraints.device.is_empty() {
        utils::auto_detect_device()?.path
    } else {
        constraints.device.clone()
    };
    info!("Initializing V4L2 capture: {}", path);

    let device = Device::with_path(&path).map_err(|e| CameraError::from_open(&path, e))?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::Device(e.to_string()))?;
    info!("Device: {} ({})", caps.card, caps.driver);

    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(CameraError::Unsupported(format!(
            "{path} doesn't support video capture"
        )));
    }

    let mut fmt = device
        .format()
        .map_err(|e| CameraError::Device(e.to_string()))?;
    fmt.width = constraints.width;
    fmt.height = constraints.height;
    fmt.fourcc = FourCC::new(b"MJPG");
    let mut fmt = device
        .set_format(&fmt)
        .map_err(|e| CameraError::Device(e.to_string()))?;
    if fmt.fourcc != FourCC::new(b"MJPG") {
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt = device
            .set_format(&fmt)
            .map_err(|e| CameraError::Device(e.to_string()))?;
    }
    let format = match &fmt.fourcc.repr {
        b"MJPG" => PixelFormat::Mjpeg,
        b"YUYV" => PixelFormat::Yuyv4,
        b"RGB3" => PixelFormat::Rgb24,
        b"BGR3" => PixelFormat::Bgr24,
        other => {
            return Err(CameraError::Unsupported(format!(
                "pixel format {}",
                String::from_utf8_lossy(other)
            )))
        }
    };

    if constraints.fps > 0 {
        if let Err(e) = device.set_params(&Parameters::with_fps(constraints.fps)) {
            warn!("Could not set {} fps: {}", constraints.fps, e);
        }
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| CameraError::Device(e.to_string()))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    info!(
        "Capture stream started: {}x{} {:?} with {} buffers",
        fmt.width, fmt.height, format, BUFFER_COUNT
    );

    Ok(OpenDevice {
        _device: device,
        stream,
        format,
        width: fmt.width,
        height: fmt.height,
        stride: fmt.stride,
    })
}

#[async_trait]
impl CameraSource for V4l2Camera {
    async fn acquire(&self, constraints: &CameraConstraints) -> Result<(), CameraError> {
        let shared = self.shared.clone();
        let constraints = constraints.clone();
        tokio::task::spawn_blocking(move || {
            let device = open_device(&constraints)?;
            let mut open = shared.lock_open();
            // Released while the device was opening: close it here
            if shared.released.load(Ordering::Acquire) {
                drop(device);
                return Err(CameraError::Cancelled);
            }
            *shared.dimensions.lock().unwrap_or_else(|p| p.into_inner()) =
                Some(FrameDimensions::new(device.width, device.height));
            *open = Some(device);
            Ok(())
        })
        .await
        .map_err(|e| CameraError::Device(e.to_string()))?
    }

    /// Dequeue one frame.
    ///
    /// The device lock is held for at most one [`DEQUEUE_TIMEOUT`] at a time so
    /// `release` never waits on a stalled driver. Whichever side sees the
    /// release flag with the lock held closes the device.
    #[instrument(skip(self))]
    async fn read_frame(&self) -> Result<Frame, CameraError> {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            loop {
                let mut open = shared.lock_open();
                if shared.released.load(Ordering::Acquire) {
                    close(&mut open);
                    return Err(CameraError::Cancelled);
                }
                let device = open
                    .as_mut()
                    .ok_or(CameraError::InvalidState("not streaming"))?;

                let frame = match device.stream.next() {
                    Ok((buf, meta)) => {
                        let used = (meta.bytesused as usize).min(buf.len());
                        Frame {
                            data: Bytes::copy_from_slice(&buf[..used]),
                            meta: Arc::new(FrameMetadata {
                                sequence: shared.sequence.fetch_add(1, Ordering::Relaxed) + 1,
                                width: device.width,
                                height: device.height,
                                stride: device.stride,
                                format: device.format,
                                device_timestamp: Some(
                                    Duration::from_secs(meta.timestamp.sec as u64)
                                        + Duration::from_micros(meta.timestamp.usec as u64),
                                ),
                            }),
                            timestamp: Instant::now(),
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        if started.elapsed() >= STALL_LIMIT {
                            return Err(CameraError::Device(format!(
                                "no frame within {}s",
                                STALL_LIMIT.as_secs()
                            )));
                        }
                        debug!("Dequeue timed out, retrying");
                        continue;
                    }
                    Err(e) => return Err(CameraError::Device(e.to_string())),
                };

                if shared.released.load(Ordering::Acquire) {
                    close(&mut open);
                    return Err(CameraError::Cancelled);
                }
                return Ok(frame);
            }
        })
        .await
        .map_err(|e| CameraError::Device(e.to_string()))?
    }

    fn dimensions(&self) -> Option<FrameDimensions> {
        *self
            .shared
            .dimensions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    fn release(&self) {
        self.shared.released.store(true, Ordering::Release);
        match self.shared.open.try_lock() {
            Ok(mut open) => close(&mut open),
            Err(TryLockError::Poisoned(poisoned)) => close(&mut poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                debug!("Frame read in progress, reader closes the device")
            }
        }
    }
}
