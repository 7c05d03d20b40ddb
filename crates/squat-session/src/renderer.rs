//! Feedback overlay.
//!
//! Turns one frame's analysis into an ordered list of feedback strings and an
//! annotated copy of the frame: a translucent text panel, the analysed side's
//! skeleton coloured by movement phase, and a red border while the camera is
//! misaligned. The renderer only reads session state.

use image::{Rgb, RgbImage};

use squat_core::{BodyLandmark, Error, Pose, Result};
use squat_form::{FaultSet, FrameAnalysis, Observation, SessionState, SquatState};

use crate::font;

pub const NO_POSE_MESSAGE: &str = "NO POSE DETECTED";
pub const UNMEASURABLE_MESSAGE: &str = "LANDMARKS NOT VISIBLE";
pub const MISALIGNED_MESSAGE: &str = "CAMERA NOT ALIGNED PROPERLY";
pub const INACTIVE_MESSAGE: &str = "INACTIVE";

const PANEL: Rgb<u8> = Rgb([16, 16, 16]);
const TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const FAULT: Rgb<u8> = Rgb([230, 40, 40]);
const JOINT: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Append numeric angle readouts to the feedback
    pub show_angles: bool,
    /// Font pixel size; 0 picks one from the frame width
    pub scale: u32,
}

/// Everything the overlay is drawn from
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub state: &'a SessionState,
    pub analysis: &'a FrameAnalysis,
    pub pose: Option<&'a Pose>,
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: RgbImage,
    pub messages: Vec<String>,
}

/// Faults worth showing: only frames that were actually measured report them
pub fn displayed_faults(analysis: &FrameAnalysis) -> FaultSet {
    match analysis.observation {
        Observation::Measured(_) => analysis.active_faults,
        _ => FaultSet::empty(),
    }
}

/// Ordered feedback strings for one frame
pub fn feedback_lines(state: &SessionState, analysis: &FrameAnalysis, show_angles: bool) -> Vec<String> {
    let mut lines = vec![
        format!("REPS: {}", state.rep_count),
        format!("IMPROPER: {}", state.improper_rep_count),
        format!("STATE: {}", state.current_state.label()),
    ];

    match analysis.observation {
        Observation::NoPose => lines.push(NO_POSE_MESSAGE.to_string()),
        Observation::Unmeasurable => lines.push(UNMEASURABLE_MESSAGE.to_string()),
        Observation::Misaligned { .. } => lines.push(MISALIGNED_MESSAGE.to_string()),
        Observation::Measured(_) => {}
    }

    lines.extend(displayed_faults(analysis).iter().map(|f| f.message().to_string()));

    if analysis.inactive {
        lines.push(INACTIVE_MESSAGE.to_string());
    }

    if show_angles {
        match analysis.observation {
            Observation::Measured(angles) => {
                lines.push(format!("KNEE: {:.0}", angles.knee_vertical));
                lines.push(format!("TORSO: {:.0}", angles.torso_lean));
                lines.push(format!("SHIN: {:.0}", angles.shin_lean));
                lines.push(format!("OFFSET: {:.0}", angles.camera_offset));
            }
            Observation::Misaligned { offset_angle } => {
                lines.push(format!("OFFSET: {:.0}", offset_angle));
            }
            _ => {}
        }
    }

    lines
}

fn phase_color(state: SquatState) -> Rgb<u8> {
    match state {
        SquatState::Standing => Rgb([40, 200, 80]),
        SquatState::Transition => Rgb([250, 200, 30]),
        SquatState::Bottom => Rgb([30, 170, 250]),
    }
}

/// Draws feedback onto a copy of each frame
#[derive(Debug, Clone, Default)]
pub struct FeedbackRenderer {
    options: RenderOptions,
}

impl FeedbackRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn render(&self, frame: &RgbImage, view: &FrameView<'_>) -> Result<RenderedFrame> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::Render(format!("cannot annotate a {width}x{height} frame")));
        }

        let messages = feedback_lines(view.state, view.analysis, self.options.show_angles);
        let mut canvas = Canvas {
            image: frame.clone(),
        };
        let scale = match self.options.scale {
            0 => (width / 320).max(1),
            s => s,
        };

        if let (Some(pose), Some(angles)) = (view.pose, view.analysis.angles()) {
            let color = if displayed_faults(view.analysis).is_empty() {
                phase_color(view.state.current_state)
            } else {
                FAULT
            };
            let thickness = scale as f64;
            for (from, to) in BodyLandmark::side_chain(angles.side) {
                if let (Some(a), Some(b)) = (pose.get(from), pose.get(to)) {
                    canvas.line(
                        (a.position.x, a.position.y),
                        (b.position.x, b.position.y),
                        thickness,
                        color,
                    );
                }
            }
            for (from, _) in BodyLandmark::side_chain(angles.side) {
                if let Some(joint) = pose.get(from) {
                    canvas.disc(joint.position.x, joint.position.y, thickness * 2.5, JOINT, 1.0);
                }
            }
        }

        self.draw_panel(&mut canvas, &messages, scale);

        if view.analysis.camera_misaligned() {
            let border = (scale * 3).min(width / 2).min(height / 2);
            canvas.rect(0, 0, width, border, FAULT, 1.0);
            canvas.rect(0, height.saturating_sub(border), width, border, FAULT, 1.0);
            canvas.rect(0, 0, border, height, FAULT, 1.0);
            canvas.rect(width.saturating_sub(border), 0, border, height, FAULT, 1.0);
        }

        Ok(RenderedFrame {
            image: canvas.image,
            messages,
        })
    }

    fn draw_panel(&self, canvas: &mut Canvas, messages: &[String], scale: u32) {
        let pad = 3 * scale;
        let line_height = (font::GLYPH_HEIGHT + 3) * scale;
        let text_width = messages.iter().map(|m| font::text_width(m)).max().unwrap_or(0) * scale;

        canvas.rect(
            0,
            0,
            text_width + 2 * pad,
            messages.len() as u32 * line_height + 2 * pad,
            PANEL,
            0.6,
        );

        // Counters and state first, then warnings in red
        for (i, message) in messages.iter().enumerate() {
            let color = if i < 3 || message.contains(':') { TEXT } else { FAULT };
            canvas.text(message, pad, pad + i as u32 * line_height, scale, color);
        }
    }
}

struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn blend(&mut self, x: i64, y: i64, color: Rgb<u8>, alpha: f32) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        let pixel = self.image.get_pixel_mut(x as u32, y as u32);
        for (dst, src) in pixel.0.iter_mut().zip(color.0) {
            *dst = (*dst as f32 * (1.0 - alpha) + src as f32 * alpha).round() as u8;
        }
    }

    fn rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>, alpha: f32) {
        let x_end = x.saturating_add(w).min(self.image.width());
        let y_end = y.saturating_add(h).min(self.image.height());
        for py in y..y_end {
            for px in x..x_end {
                self.blend(px as i64, py as i64, color, alpha);
            }
        }
    }

    fn disc(&mut self, cx: f64, cy: f64, radius: f64, color: Rgb<u8>, alpha: f32) {
        let (width, height) = (self.image.width() as f64, self.image.height() as f64);
        if !(cx.is_finite() && cy.is_finite() && radius.is_finite()) {
            return;
        }
        if cx < -radius || cy < -radius || cx > width + radius || cy > height + radius {
            return;
        }

        // Centre is now within a radius of the frame, so the casts cannot wrap
        let (ix, iy) = (cx.round() as i64, cy.round() as i64);
        let r = radius.ceil() as i64;
        let (x_min, x_max) = ((-r).max(-ix), r.min(width as i64 - 1 - ix));
        let (y_min, y_max) = ((-r).max(-iy), r.min(height as i64 - 1 - iy));
        for dy in y_min..=y_max {
            for dx in x_min..=x_max {
                if ((dx * dx + dy * dy) as f64) <= radius * radius {
                    self.blend(ix + dx, iy + dy, color, alpha);
                }
            }
        }
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), thickness: f64, color: Rgb<u8>) {
        let (width, height) = (self.image.width() as f64, self.image.height() as f64);
        let Some((from, to)) = clip_segment(
            from,
            to,
            (-thickness, -thickness),
            (width + thickness, height + thickness),
        ) else {
            return;
        };

        let length = ((to.0 - from.0).powi(2) + (to.1 - from.1).powi(2)).sqrt();
        let max_steps = 2.0 * (width + height + 4.0 * thickness);
        let steps = (length * 2.0).ceil().clamp(1.0, max_steps) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = from.0 + (to.0 - from.0) * t;
            let y = from.1 + (to.1 - from.1) * t;
            self.disc(x, y, thickness, color, 1.0);
        }
    }

    fn text(&mut self, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
        for (col, row) in font::lit_pixels(text) {
            self.rect(x + col * scale, y + row * scale, scale, scale, color, 1.0);
        }
    }
}

/// Liang-Barsky clip of a segment to an axis-aligned box.
///
/// Returns `None` when the segment misses the box or has a non-finite end.
fn clip_segment(
    from: (f64, f64),
    to: (f64, f64),
    min: (f64, f64),
    max: (f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    if ![from.0, from.1, dx, dy].iter().all(|v| v.is_finite()) {
        return None;
    }

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let edges = [
        (-dx, from.0 - min.0),
        (dx, max.0 - from.0),
        (-dy, from.1 - min.1),
        (dy, max.1 - from.1),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }

    Some((
        (from.0 + t0 * dx, from.1 + t0 * dy),
        (from.0 + t1 * dx, from.1 + t1 * dy),
    ))
}
