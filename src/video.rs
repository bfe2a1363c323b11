//! Sequential frame sources and sinks.
//!
//! Container decoding and encoding sit behind [`VideoBackend`]; the pipeline
//! only ever reads frames in order and writes them back in the same order.

mod frame;
pub mod raw;

use std::path::Path;

pub use frame::{Frame, VideoMetadata};
pub use raw::RawVideoBackend;

use crate::error::VideoError;

/// Sequential reader over a finite video.
pub trait FrameSource: Send {
    /// Read once when the source is opened.
    fn metadata(&self) -> VideoMetadata;

    /// Next frame, or `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<Frame>, VideoError>;

    fn close(&mut self) -> Result<(), VideoError> {
        Ok(())
    }
}

/// Sequential writer producing an output video.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), VideoError>;

    /// Flush and finalize the container. Must be called before the output
    /// file is inspected.
    fn close(&mut self) -> Result<(), VideoError>;
}

/// Opens sources and sinks for one container format.
pub trait VideoBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError>;

    fn create_sink(
        &self,
        path: &Path,
        fps: f64,
        resolution: (u32, u32),
    ) -> Result<Box<dyn FrameSink>, VideoError>;
}
