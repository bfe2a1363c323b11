//! Burn inference backend for object detection.
//!
//! # Example
//!
//! ```ignore
//! use herdtrack::integration::{BurnDetector, BurnModel, RawDetection};
//! use burn::backend::NdArray;
//!
//! struct MyYoloModel { /* ... */ }
//!
//! impl BurnModel<NdArray> for MyYoloModel {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 4>) -> Vec<RawDetection> {
//!         // Run inference
//!     }
//! }
//!
//! let detector = BurnDetector::new(MyYoloModel::load("model.bin"), Default::default());
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use image::imageops::{self, FilterType};
use thiserror::Error;

use super::{DetectionBuilder, Detector};
use crate::tracker::Detection;
use crate::video::Frame;

#[derive(Error, Debug, Clone)]
pub enum BurnDetectorError {
    #[error("model expects {expected} input channels, frames have 3")]
    Channels { expected: u32 },

    #[error("model input size {width}x{height} is empty")]
    EmptyInput { width: u32, height: u32 },
}

/// Model output before confidence filtering, in model input coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` or `[cx, cy, w, h]` depending on the model
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: Option<usize>,
}

/// Implement this for a specific model architecture.
pub trait BurnModel<B: Backend>: Send + Sync {
    /// Forward pass on a `[batch, channels, height, width]` tensor.
    fn forward(&self, input: Tensor<B, 4>) -> Vec<RawDetection>;

    /// Expected input size `(channels, height, width)`.
    fn input_size(&self) -> (u32, u32, u32) {
        (3, 640, 640)
    }

    fn bbox_is_xywh(&self) -> bool {
        true
    }
}

pub struct BurnDetector<B: Backend, M: BurnModel<B>> {
    model: M,
    device: B::Device,
    conf_threshold: f32,
}

impl<B: Backend, M: BurnModel<B>> BurnDetector<B, M> {
    pub fn new(model: M, device: B::Device) -> Self {
        Self {
            model,
            device,
            conf_threshold: 0.25,
        }
    }

    pub fn with_conf_threshold(mut self, threshold: f32) -> Self {
        self.conf_threshold = threshold;
        self
    }

    /// Resize to the model input and lay pixels out as normalized CHW.
    pub fn preprocess(&self, frame: &Frame) -> Result<Tensor<B, 4>, BurnDetectorError> {
        let (channels, target_h, target_w) = self.model.input_size();
        if channels != 3 {
            return Err(BurnDetectorError::Channels { expected: channels });
        }
        if target_h == 0 || target_w == 0 {
            return Err(BurnDetectorError::EmptyInput {
                width: target_w,
                height: target_h,
            });
        }

        let resized = if frame.resolution() == (target_w, target_h) {
            frame.image.clone()
        } else {
            imageops::resize(&frame.image, target_w, target_h, FilterType::Triangle)
        };

        let plane = (target_w * target_h) as usize;
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = f32::from(pixel[c]) / 255.0;
            }
        }

        Ok(
            Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
                1,
                3,
                target_h as usize,
                target_w as usize,
            ]),
        )
    }

    /// Filter by confidence and map boxes back to frame coordinates.
    fn postprocess(&self, raw: Vec<RawDetection>, frame: &Frame) -> Vec<Detection> {
        let (_, target_h, target_w) = self.model.input_size();
        let (width, height) = frame.resolution();
        let sx = width as f32 / target_w as f32;
        let sy = height as f32 / target_h as f32;

        raw.into_iter()
            .filter(|d| d.score >= self.conf_threshold)
            .map(|d| {
                let builder = DetectionBuilder::new()
                    .score(d.score)
                    .class_id(d.class_id.unwrap_or(0) as u32);
                let [a, b, c, e] = d.bbox;
                let builder = if self.model.bbox_is_xywh() {
                    builder.xywh(a, b, c, e)
                } else {
                    builder.tlbr(a, b, c, e)
                };
                builder.scale(sx, sy).build()
            })
            .collect()
    }
}

impl<B: Backend, M: BurnModel<B>> Detector for BurnDetector<B, M> {
    type Error = BurnDetectorError;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        let tensor = self.preprocess(frame)?;
        let raw = self.model.forward(tensor);
        Ok(self.postprocess(raw, frame))
    }
}
