//! Uncompressed RGB8 container.
//!
//! Layout, little-endian:
//!
//! ```text
//! 0..8    magic "HERDRAW1"
//! 8..12   width  (u32)
//! 12..16  height (u32)
//! 16..24  fps    (f64)
//! 24..32  frame count (u64)
//! 32..    frame_count * width * height * 3 bytes of packed RGB
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use image::RgbImage;

use crate::error::VideoError;
use crate::video::{Frame, FrameSink, FrameSource, VideoBackend, VideoMetadata};

pub const MAGIC: &[u8; 8] = b"HERDRAW1";
const HEADER_LEN: u64 = 32;
const FRAME_COUNT_OFFSET: u64 = 24;

/// [`VideoBackend`] for the raw container.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoBackend;

impl VideoBackend for RawVideoBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError> {
        Ok(Box::new(RawVideoReader::open(path)?))
    }

    fn create_sink(
        &self,
        path: &Path,
        fps: f64,
        resolution: (u32, u32),
    ) -> Result<Box<dyn FrameSink>, VideoError> {
        Ok(Box::new(RawVideoWriter::create(path, fps, resolution)?))
    }
}

fn field<const N: usize>(header: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&header[at..at + N]);
    out
}

fn frame_len(width: u32, height: u32) -> Option<u64> {
    u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(3)
}

pub struct RawVideoReader {
    reader: BufReader<File>,
    meta: VideoMetadata,
    frame_len: usize,
    next_index: u64,
}

impl RawVideoReader {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let file = File::open(path).map_err(|source| VideoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => VideoError::Corrupt("header truncated".to_string()),
            _ => VideoError::Io(e),
        })?;
        if &header[0..8] != MAGIC {
            return Err(VideoError::Corrupt("bad magic".to_string()));
        }

        let width = u32::from_le_bytes(field(&header, 8));
        let height = u32::from_le_bytes(field(&header, 12));
        let fps = f64::from_le_bytes(field(&header, 16));
        let frame_count = u64::from_le_bytes(field(&header, FRAME_COUNT_OFFSET as usize));

        if width == 0 || height == 0 {
            return Err(VideoError::Corrupt(format!(
                "invalid resolution {width}x{height}"
            )));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(VideoError::Corrupt(format!("invalid frame rate {fps}")));
        }
        let frame_len = frame_len(width, height)
            .ok_or_else(|| VideoError::Corrupt("frame size overflows".to_string()))?;
        let payload = frame_len
            .checked_mul(frame_count)
            .and_then(|p| p.checked_add(HEADER_LEN))
            .ok_or_else(|| VideoError::Corrupt("frame count overflows".to_string()))?;
        if file_len < payload {
            return Err(VideoError::Corrupt(format!(
                "expected {payload} bytes for {frame_count} frames, file has {file_len}"
            )));
        }

        Ok(Self {
            reader,
            meta: VideoMetadata {
                frame_count,
                fps,
                width,
                height,
            },
            frame_len: frame_len as usize,
            next_index: 0,
        })
    }
}

impl FrameSource for RawVideoReader {
    fn metadata(&self) -> VideoMetadata {
        self.meta
    }

    fn read_next(&mut self) -> Result<Option<Frame>, VideoError> {
        if self.next_index >= self.meta.frame_count {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        self.reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                VideoError::Corrupt(format!("frame {} truncated", self.next_index))
            }
            _ => VideoError::Io(e),
        })?;
        let image = RgbImage::from_raw(self.meta.width, self.meta.height, buf)
            .ok_or_else(|| VideoError::Corrupt("frame buffer size mismatch".to_string()))?;

        let frame = Frame::new(self.next_index, self.meta.fps, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

pub struct RawVideoWriter {
    writer: BufWriter<File>,
    resolution: (u32, u32),
    frames_written: u64,
    closed: bool,
}

impl RawVideoWriter {
    pub fn create(path: &Path, fps: f64, resolution: (u32, u32)) -> Result<Self, VideoError> {
        let file = File::create(path).map_err(|source| VideoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&resolution.0.to_le_bytes())?;
        writer.write_all(&resolution.1.to_le_bytes())?;
        writer.write_all(&fps.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            writer,
            resolution,
            frames_written: 0,
            closed: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for RawVideoWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), VideoError> {
        if frame.resolution() != self.resolution {
            return Err(VideoError::Resolution {
                index: frame.index,
                expected: self.resolution,
                got: frame.resolution(),
            });
        }
        self.writer.write_all(frame.image.as_raw())?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), VideoError> {
        if self.closed {
            return Ok(());
        }
        self.writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        self.writer.write_all(&self.frames_written.to_le_bytes())?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Write `images` as a complete raw video.
pub fn write_video(path: &Path, fps: f64, images: &[RgbImage]) -> Result<(), VideoError> {
    let resolution = images.first().map(RgbImage::dimensions).unwrap_or((1, 1));
    let mut writer = RawVideoWriter::create(path, fps, resolution)?;
    for (index, image) in images.iter().enumerate() {
        writer.write(&Frame::new(index as u64, fps, image.clone()))?;
    }
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(seed: u8) -> RgbImage {
        RgbImage::from_fn(8, 6, |x, y| Rgb([seed, x as u8, y as u8]))
    }

    #[test]
    fn test_frames_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.raw");
        let images: Vec<_> = (0..5).map(gradient).collect();
        write_video(&path, 25.0, &images).unwrap();

        let mut reader = RawVideoReader::open(&path).unwrap();
        let meta = reader.metadata();
        assert_eq!(meta.frame_count, 5);
        assert_eq!(meta.resolution(), (8, 6));
        assert_eq!(meta.fps, 25.0);

        for (expected_index, image) in images.iter().enumerate() {
            let frame = reader.read_next().unwrap().unwrap();
            assert_eq!(frame.index, expected_index as u64);
            assert_eq!(&frame.image, image);
        }
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"not a video at all, just text padding it out").unwrap();
        assert!(matches!(
            RawVideoReader::open(&path),
            Err(VideoError::Corrupt(_))
        ));

        std::fs::write(&path, b"HERD").unwrap();
        assert!(matches!(
            RawVideoReader::open(&path),
            Err(VideoError::Corrupt(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        write_video(&path, 30.0, &[gradient(1), gradient(2)]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        assert!(matches!(
            RawVideoReader::open(&path),
            Err(VideoError::Corrupt(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RawVideoReader::open(&dir.path().join("nope.raw")),
            Err(VideoError::Open { .. })
        ));
    }

    #[test]
    fn test_writer_rejects_resolution_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RawVideoWriter::create(&dir.path().join("out.raw"), 30.0, (8, 6)).unwrap();
        let frame = Frame::new(0, 30.0, RgbImage::new(4, 4));
        assert!(matches!(
            writer.write(&frame),
            Err(VideoError::Resolution { .. })
        ));
        assert_eq!(writer.frames_written(), 0);
    }
}
