//! Trait for object detection inference backends.

use std::marker::PhantomData;

use crate::tracker::Detection;
use crate::video::Frame;

/// Object detector run on every frame.
///
/// One detector instance is loaded at startup and shared by every job, so
/// `detect` takes `&self`; backends that need mutable state guard it
/// themselves. From the pipeline's point of view a call is blocking.
///
/// # Example
///
/// ```ignore
/// use herdtrack::{Detection, Detector, Frame};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl Detector for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector: Send + Sync {
    /// Error for a failed inference call; the frame is then written unannotated.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Boxes with confidence and class id, in pixel coordinates of `frame`.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}

/// Detector backed by a closure.
pub struct FnDetector<F, E> {
    detect: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnDetector<F, E>
where
    F: Fn(&Frame) -> Result<Vec<Detection>, E> + Send + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(detect: F) -> Self {
        Self {
            detect,
            _error: PhantomData,
        }
    }
}

impl<F, E> Detector for FnDetector<F, E>
where
    F: Fn(&Frame) -> Result<Vec<Detection>, E> + Send + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        (self.detect)(frame)
    }
}
