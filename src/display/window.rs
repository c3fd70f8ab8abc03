//! SDL2 preview window
//! Shows the live camera feed with the latest overlay composited on top.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use image::{RgbImage, RgbaImage};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{decoder, Frame};
use crate::display::surface::ImageSurface;

/// SDL2 Window Display
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    overlay: Option<ImageSurface>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("posecoach", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            overlay: None,
        })
    }

    fn render_frame(&mut self, mut rgb: RgbImage) -> Result<()> {
        if let Some(overlay) = &self.overlay {
            overlay.composite_onto(&mut rgb);
        }
        let (width, height) = rgb.dimensions();

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, rgb.as_raw(), (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    /// Run until the window closes or `cancel` fires
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        frames: Receiver<Frame>,
        overlays: Receiver<RgbaImage>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                if let Event::Quit { .. } = event {
                    info!("Quit event received");
                    break 'running;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            if let Some(latest) = overlays.try_iter().last() {
                self.overlay = Some(ImageSurface::from_image(latest));
            }

            match frames.recv_timeout(Duration::from_millis(16)) {
                Ok(frame) => match decoder::decode_frame(&frame) {
                    Ok(rgb) => self.render_frame(rgb)?,
                    Err(e) => warn!("Preview decode failed: {}", e),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(())
    }
}
