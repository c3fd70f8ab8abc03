//! Landmark overlay rendering

use std::time::Instant;

use image::Rgba;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::surface::DrawSurface;
use crate::analysis::FrameResult;

/// Landmark count of a full-body pose
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Skeleton edges between pose landmark indices
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

const ELLIPSIS: char = '…';

/// Colors and geometry of the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub marker_radius: f32,
    pub marker_color: [u8; 4],
    pub connector_color: [u8; 4],
    pub banner_color: [u8; 4],
    pub text_color: [u8; 4],
    /// Top-left corner of the feedback banner
    pub banner_offset: (f32, f32),
    pub banner_max_width: f32,
    pub banner_height: f32,
    /// Horizontal padding between banner edge and text
    pub text_inset: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            marker_radius: 3.0,
            marker_color: [0x0f, 0x17, 0x2a, 0xff],
            connector_color: [0x22, 0xe3, 0xa7, 0xff],
            banner_color: [0, 0, 0, 0xff],
            text_color: [0x22, 0xe3, 0xa7, 0xff],
            banner_offset: (10.0, 10.0),
            banner_max_width: 360.0,
            banner_height: 36.0,
            text_inset: 10.0,
        }
    }
}

/// What a render pass put on the surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub markers: usize,
    pub connectors: usize,
    pub banner: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw one frame result on a surface sized to the live video
    #[instrument(skip_all, fields(landmarks = result.landmarks.len(), width = width, height = height))]
    pub fn render(
        &self,
        surface: &mut dyn DrawSurface,
        result: &FrameResult,
        width: u32,
        height: u32,
    ) -> RenderSummary {
        let started = Instant::now();
        let mut summary = RenderSummary::default();

        surface.resize(width, height);
        surface.clear();

        // Off-frame points keep their index so the skeleton stays aligned
        let points: Vec<Option<(f32, f32)>> = result
            .landmarks
            .iter()
            .map(|l| l.is_in_frame().then(|| l.to_pixel(width, height)))
            .collect();

        if points.len() == POSE_LANDMARK_COUNT {
            let color = Rgba(self.style.connector_color);
            for &(a, b) in POSE_CONNECTIONS.iter() {
                if let (Some(from), Some(to)) = (points[a], points[b]) {
                    surface.draw_line(from, to, color);
                    summary.connectors += 1;
                }
            }
        }

        let marker = Rgba(self.style.marker_color);
        for &(x, y) in points.iter().flatten() {
            surface.fill_circle(x, y, self.style.marker_radius, marker);
            summary.markers += 1;
        }

        if let Some(feedback) = result.feedback_text() {
            summary.banner = self.draw_banner(surface, feedback, width);
        }

        surface.present();
        metrics::histogram!("render_time_us").record(started.elapsed().as_micros() as f64);
        summary
    }

    fn draw_banner(&self, surface: &mut dyn DrawSurface, feedback: &str, width: u32) -> bool {
        let (x, y) = self.style.banner_offset;
        let banner_width = (width as f32 - 2.0 * x).min(self.style.banner_max_width);
        if banner_width <= 0.0 {
            return false;
        }
        surface.fill_rect(
            x,
            y,
            banner_width,
            self.style.banner_height,
            Rgba(self.style.banner_color),
        );

        let available = banner_width - 2.0 * self.style.text_inset;
        let text = fit_text(&*surface, feedback, available);
        if !text.is_empty() {
            surface.draw_text(
                x + self.style.text_inset,
                y + self.style.text_inset,
                &text,
                Rgba(self.style.text_color),
            );
        }
        true
    }
}

/// Longest prefix of `text` (ellipsized when cut) that fits in `available` px
pub fn fit_text(surface: &dyn DrawSurface, text: &str, available: f32) -> String {
    if surface.text_width(text) <= available {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    for keep in (0..chars.len()).rev() {
        let mut candidate: String = chars[..keep].iter().collect::<String>().trim_end().to_string();
        candidate.push(ELLIPSIS);
        if surface.text_width(&candidate) <= available {
            return candidate;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Landmark;
    use crate::display::surface::ImageSurface;

    fn result(points: &[(f32, f32)], feedback: Option<&str>) -> FrameResult {
        FrameResult {
            landmarks: points.iter().map(|&(x, y)| Landmark::new(x, y)).collect(),
            feedback: feedback.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_landmarks_draw_nothing() {
        let mut surface = ImageSurface::new(1, 1);
        let summary = OverlayRenderer::default().render(&mut surface, &result(&[], None), 64, 48);
        assert_eq!(summary, RenderSummary::default());
        assert_eq!(surface.size(), (64, 48));
        assert!(surface.image().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_marker_at_center() {
        let mut surface = ImageSurface::new(1, 1);
        let renderer = OverlayRenderer::default();
        let summary = renderer.render(&mut surface, &result(&[(0.5, 0.5)], None), 100, 80);
        assert_eq!(summary.markers, 1);
        assert_eq!(summary.connectors, 0);
        assert_eq!(
            surface.pixel(50, 40),
            Some(Rgba(renderer.style().marker_color))
        );
        assert_eq!(surface.pixel(60, 40).map(|p| p.0[3]), Some(0));
    }

    #[test]
    fn test_full_pose_draws_skeleton() {
        let points: Vec<(f32, f32)> = (0..POSE_LANDMARK_COUNT)
            .map(|i| (i as f32 / 40.0, 0.5))
            .collect();
        let mut surface = ImageSurface::new(1, 1);
        let summary =
            OverlayRenderer::default().render(&mut surface, &result(&points, None), 200, 200);
        assert_eq!(summary.markers, POSE_LANDMARK_COUNT);
        assert_eq!(summary.connectors, POSE_CONNECTIONS.len());
    }

    #[test]
    fn test_banner_drawn_for_feedback() {
        let mut surface = ImageSurface::new(1, 1);
        let renderer = OverlayRenderer::default();
        let summary = renderer.render(&mut surface, &result(&[], Some("Go lower")), 640, 480);
        assert!(summary.banner);
        // Corner of the banner, clear of the text
        assert_eq!(surface.pixel(11, 11), Some(Rgba(renderer.style().banner_color)));
        // Right edge is capped at 360px
        assert_eq!(surface.pixel(369, 11), Some(Rgba(renderer.style().banner_color)));
        assert_eq!(surface.pixel(371, 11).map(|p| p.0[3]), Some(0));
    }

    #[test]
    fn test_banner_skipped_when_surface_too_narrow() {
        let mut surface = ImageSurface::new(1, 1);
        let summary =
            OverlayRenderer::default().render(&mut surface, &result(&[], Some("Hi")), 20, 20);
        assert!(!summary.banner);
    }

    #[test]
    fn test_off_frame_points_are_skipped() {
        let mut points: Vec<(f32, f32)> = (0..POSE_LANDMARK_COUNT)
            .map(|i| (i as f32 / 40.0, 0.5))
            .collect();
        points[0] = (f32::INFINITY, 0.5);
        points[32] = (-0.2, 0.5);
        let mut surface = ImageSurface::new(1, 1);
        let summary =
            OverlayRenderer::default().render(&mut surface, &result(&points, None), 200, 200);
        assert_eq!(summary.markers, POSE_LANDMARK_COUNT - 2);
        // Edges touching landmark 0 or 32
        let dropped = POSE_CONNECTIONS
            .iter()
            .filter(|&&(a, b)| [a, b].iter().any(|i| *i == 0 || *i == 32))
            .count();
        assert_eq!(summary.connectors, POSE_CONNECTIONS.len() - dropped);
    }

    #[test]
    fn test_fit_text_truncates() {
        let surface = ImageSurface::new(1, 1);
        assert_eq!(fit_text(&surface, "GOOD", 100.0), "GOOD");

        let available = surface.text_width("KEEP…");
        let fitted = fit_text(&surface, "KEEP YOUR BACK STRAIGHT", available);
        assert_eq!(fitted, "KEEP…");
        assert!(surface.text_width(&fitted) <= available);

        assert_eq!(fit_text(&surface, "KEEP", 1.0), "");
    }
}
