//! Overlay drawing: boxes, `"<prefix> #<id>"` labels and the running total.

use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FrameError};
use crate::tracker::TrackedDetection;
use crate::video::Frame;

/// Label strip spans `y1 - 30 .. y1 - 10`.
const LABEL_OFFSET: i32 = 30;
const LABEL_HEIGHT: u32 = 20;
/// Average glyph advance relative to the pixel scale when no font is loaded.
const ESTIMATED_ADVANCE: f32 = 0.55;
/// DejaVu Sans Mono Bold, used unless `annotation.font_path` points elsewhere.
static BUILTIN_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono-Bold.ttf");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorStyle {
    pub label_prefix: String,
    pub total_label: String,
    pub box_thickness: u32,
    pub box_color: [u8; 3],
    pub label_background: [u8; 3],
    pub label_color: [u8; 3],
    pub label_scale: f32,
    pub total_color: [u8; 3],
    pub total_scale: f32,
    pub total_origin: (i32, i32),
}

impl Default for AnnotatorStyle {
    fn default() -> Self {
        Self {
            label_prefix: "Pig".to_string(),
            total_label: "Total Animals".to_string(),
            box_thickness: 4,
            box_color: [0, 255, 0],
            label_background: [0, 0, 0],
            label_color: [255, 255, 255],
            label_scale: 18.0,
            total_color: [0, 255, 0],
            total_scale: 32.0,
            total_origin: (30, 50),
        }
    }
}

/// Where one track's label goes.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPlacement {
    pub track_id: u64,
    pub text: String,
    /// Box in pixels: `(x, y, width, height)`
    pub bbox: (i32, i32, u32, u32),
    /// Background strip in pixels: `(x, y, width, height)`
    pub background: (i32, i32, u32, u32),
}

/// Everything drawn on one frame, labels in drawing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub total: usize,
    pub total_text: String,
    pub labels: Vec<LabelPlacement>,
}

pub struct Annotator {
    style: AnnotatorStyle,
    font: Option<FontArc>,
}

impl Annotator {
    /// `font` overrides the bundled font.
    pub fn new(style: AnnotatorStyle, font: Option<FontArc>) -> Self {
        let font = font.or_else(Self::builtin_font);
        if font.is_none() {
            warn!("no usable font, overlay text will not be rendered");
        }
        Self { style, font }
    }

    pub fn builtin_font() -> Option<FontArc> {
        match FontArc::try_from_slice(BUILTIN_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!(error = %e, "bundled font is unreadable");
                None
            }
        }
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn load_font(path: &Path) -> Result<FontArc, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        FontArc::try_from_vec(bytes).map_err(|e| {
            ConfigError::Invalid(format!("font {}: {e}", path.display()))
        })
    }

    pub fn style(&self) -> &AnnotatorStyle {
        &self.style
    }

    fn text_extent(&self, text: &str, scale: f32) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(scale), font, text),
            None => (
                (text.chars().count() as f32 * scale * ESTIMATED_ADVANCE).ceil() as u32,
                scale.ceil() as u32,
            ),
        }
    }

    /// Compute the overlay without touching any pixels. Labels are ordered by
    /// the left edge of their box.
    pub fn layout(&self, tracked: &[TrackedDetection]) -> Overlay {
        let mut ordered: Vec<&TrackedDetection> = tracked.iter().collect();
        ordered.sort_by(|a, b| {
            a.detection
                .bbox
                .x
                .partial_cmp(&b.detection.bbox.x)
                .unwrap_or(Ordering::Equal)
        });

        let labels = ordered
            .into_iter()
            .map(|t| {
                let bbox = t.detection.bbox;
                let x = bbox.x.round() as i32;
                let y = bbox.y.round() as i32;
                let text = format!("{} #{}", self.style.label_prefix, t.track_id);
                let (text_width, _) = self.text_extent(&text, self.style.label_scale);
                LabelPlacement {
                    track_id: t.track_id,
                    bbox: (
                        x,
                        y,
                        bbox.width.round().max(1.0) as u32,
                        bbox.height.round().max(1.0) as u32,
                    ),
                    background: (x, y - LABEL_OFFSET, text_width.max(1), LABEL_HEIGHT),
                    text,
                }
            })
            .collect();

        Overlay {
            total: tracked.len(),
            total_text: format!("{}: {}", self.style.total_label, tracked.len()),
            labels,
        }
    }

    fn draw(&self, image: &mut RgbImage, overlay: &Overlay) {
        let box_color = Rgb(self.style.box_color);
        for label in &overlay.labels {
            let (x, y, w, h) = label.bbox;
            for inset in 0..self.style.box_thickness {
                let shrink = 2 * inset;
                if shrink >= w || shrink >= h {
                    break;
                }
                let rect = PixelRect::at(x + inset as i32, y + inset as i32)
                    .of_size(w - shrink, h - shrink);
                draw_hollow_rect_mut(image, rect, box_color);
            }
        }

        for label in &overlay.labels {
            let (x, y, w, h) = label.background;
            draw_filled_rect_mut(
                image,
                PixelRect::at(x, y).of_size(w, h),
                Rgb(self.style.label_background),
            );
            if let Some(font) = &self.font {
                draw_text_mut(
                    image,
                    Rgb(self.style.label_color),
                    x,
                    y + 1,
                    PxScale::from(self.style.label_scale),
                    font,
                    &label.text,
                );
            }
        }

        if let Some(font) = &self.font {
            let (x, y) = self.style.total_origin;
            draw_text_mut(
                image,
                Rgb(self.style.total_color),
                x,
                y,
                PxScale::from(self.style.total_scale),
                font,
                &overlay.total_text,
            );
        }
    }

    /// Draw the overlay onto a copy of `frame`.
    pub fn try_annotate(
        &self,
        frame: &Frame,
        tracked: &[TrackedDetection],
    ) -> Result<Frame, FrameError> {
        if let Some(bad) = tracked.iter().find(|t| {
            let b = t.detection.bbox;
            !(b.x.is_finite() && b.y.is_finite() && b.width.is_finite() && b.height.is_finite())
        }) {
            return Err(FrameError::Annotation(format!(
                "non-finite box for track {}",
                bad.track_id
            )));
        }

        let overlay = self.layout(tracked);
        let mut image = frame.image.clone();
        panic::catch_unwind(AssertUnwindSafe(|| self.draw(&mut image, &overlay)))
            .map_err(|_| FrameError::Annotation("drawing panicked".to_string()))?;
        Ok(frame.with_image(image))
    }

    /// Like [`Annotator::try_annotate`], but a failure yields an unannotated copy.
    pub fn annotate(&self, frame: &Frame, tracked: &[TrackedDetection]) -> Frame {
        self.try_annotate(frame, tracked).unwrap_or_else(|e| {
            warn!(frame = frame.index, error = %e, "annotation failed, writing frame unannotated");
            frame.clone()
        })
    }
}
