use crate::capture::frame::PixelFormat;
use crate::error::CameraError;
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

/// Capture node picked by [`auto_detect_device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    pub path: String,
    pub card: String,
    pub format: PixelFormat,
}

fn native_format(device: &Device) -> Option<PixelFormat> {
    let formats = device.enum_formats().ok()?;
    let has = |code: &[u8; 4]| formats.iter().any(|f| f.fourcc == FourCC::new(code));
    if has(b"MJPG") {
        Some(PixelFormat::Mjpeg)
    } else if has(b"YUYV") {
        Some(PixelFormat::Yuyv4)
    } else {
        None
    }
}

/// Pick a capture node, preferring MJPEG over YUYV.
///
/// When nodes exist but none could be opened, the permission error is returned
/// so the user sees why the camera is unavailable.
pub fn auto_detect_device() -> Result<DetectedDevice, CameraError> {
    info!("Auto-detecting capture devices...");

    let mut denied = None;
    let mut fallback = None;

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().into_owned();
        let device = match Device::with_path(&path) {
            Ok(device) => device,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                denied.get_or_insert(CameraError::from_open(&path, e));
                continue;
            }
            Err(e) => {
                debug!("Skipping {}: {}", path, e);
                continue;
            }
        };

        let Ok(caps) = device.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let found = match native_format(&device) {
            Some(format) => DetectedDevice {
                path,
                card: caps.card,
                format,
            },
            None => continue,
        };
        if found.format == PixelFormat::Mjpeg {
            info!("Found MJPEG device: {} - {}", found.path, found.card);
            return Ok(found);
        }
        fallback.get_or_insert(found);
    }

    if let Some(found) = fallback {
        info!("Found YUYV device: {} - {}", found.path, found.card);
        return Ok(found);
    }
    Err(denied.unwrap_or_else(|| CameraError::NotFound("no suitable capture device".into())))
}
