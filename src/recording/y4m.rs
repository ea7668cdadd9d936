//! Uncompressed YUV4MPEG2 segment encoder.
//!
//! Gray frames are stored as `Cmono`; colour frames are converted to
//! full-range 4:4:4 YCbCr. The stream header is written with the first
//! frame, once the pixel format is known; a segment finalized without
//! frames gets a `Cmono` header so it is still a valid stream.

use super::encoder::{EncodeError, EncoderFactory, StreamSpec, VideoEncoder};
use crate::capture::{Frame, PixelFormat};
use crate::y4m::{Chroma, Y4mHeader, FRAME_MARKER};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Creates [`Y4mEncoder`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mEncoderFactory;

impl EncoderFactory for Y4mEncoderFactory {
    fn extension(&self) -> &str {
        "y4m"
    }

    fn create(&self, path: &Path, spec: &StreamSpec) -> Result<Box<dyn VideoEncoder>, EncodeError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => EncodeError::AlreadyExists(path.to_path_buf()),
                _ => EncodeError::Create {
                    path: path.to_path_buf(),
                    source,
                },
            })?;

        Ok(Box::new(Y4mEncoder {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            spec: *spec,
            format: None,
            bytes: 0,
        }))
    }
}

/// Writes frames to a `.y4m` file.
pub struct Y4mEncoder {
    path: PathBuf,
    out: BufWriter<File>,
    spec: StreamSpec,
    /// Pixel format fixed by the first frame.
    format: Option<PixelFormat>,
    bytes: u64,
}

impl Y4mEncoder {
    fn header_line(&self, format: PixelFormat) -> String {
        let chroma = match format {
            PixelFormat::Gray8 => Chroma::Mono,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Chroma::C444,
        };
        let header = Y4mHeader::new(self.spec.width, self.spec.height, self.spec.fps, chroma);
        format!("{header}\n")
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.out.write_all(data).map_err(|source| EncodeError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.bytes += data.len() as u64;
        Ok(())
    }

    fn check(&self, frame: &Frame) -> Result<(), EncodeError> {
        let dims_ok = frame.width() == self.spec.width && frame.height() == self.spec.height;
        let format_ok = self.format.map_or(true, |f| f == frame.format());

        if !dims_ok || !format_ok || !frame.is_valid() {
            return Err(EncodeError::FrameMismatch {
                sequence: frame.sequence(),
                expected: format!(
                    "{}x{} {:?}",
                    self.spec.width,
                    self.spec.height,
                    self.format.unwrap_or(frame.format())
                ),
                actual: format!(
                    "{}x{} {:?} ({} bytes)",
                    frame.width(),
                    frame.height(),
                    frame.format(),
                    frame.pixels().len()
                ),
            });
        }
        Ok(())
    }
}

impl VideoEncoder for Y4mEncoder {
    fn encode_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        self.check(frame)?;

        if self.format.is_none() {
            let header = self.header_line(frame.format());
            self.write_all(header.as_bytes())?;
            self.format = Some(frame.format());
        }

        self.write_all(FRAME_MARKER)?;
        match frame.format() {
            PixelFormat::Gray8 => self.write_all(frame.pixels()),
            PixelFormat::Rgb8 => self.write_all(&planar_ycbcr(frame.pixels(), [0, 1, 2])),
            PixelFormat::Bgr8 => self.write_all(&planar_ycbcr(frame.pixels(), [2, 1, 0])),
        }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn encoded_len(&self, frames: &[Frame]) -> u64 {
        // Every output format stores as many payload bytes as the packed input
        let payload: u64 = frames
            .iter()
            .map(|f| (FRAME_MARKER.len() + f.pixels().len()) as u64)
            .sum();
        let header = match (self.format, frames.first()) {
            (None, Some(first)) => self.header_line(first.format()).len() as u64,
            _ => 0,
        };
        header + payload
    }

    fn finalize(mut self: Box<Self>) -> Result<u64, EncodeError> {
        if self.format.is_none() {
            let header = self.header_line(PixelFormat::Gray8);
            self.write_all(header.as_bytes())?;
        }
        self.out.flush().map_err(|source| EncodeError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.bytes)
    }
}

/// Converts packed RGB (channel order given by `order`) into Y, Cb, Cr
/// planes using full-range BT.601.
fn planar_ycbcr(packed: &[u8], order: [usize; 3]) -> Vec<u8> {
    let count = packed.len() / 3;
    let mut planes = vec![0u8; count * 3];
    let (y_plane, rest) = planes.split_at_mut(count);
    let (cb_plane, cr_plane) = rest.split_at_mut(count);

    for (i, px) in packed.chunks_exact(3).enumerate() {
        let r = f32::from(px[order[0]]);
        let g = f32::from(px[order[1]]);
        let b = f32::from(px[order[2]]);
        y_plane[i] = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
        cb_plane[i] = (128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b)
            .round()
            .clamp(0.0, 255.0) as u8;
        cr_plane[i] = (128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b)
            .round()
            .clamp(0.0, 255.0) as u8;
    }

    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: u32, height: u32) -> StreamSpec {
        StreamSpec {
            width,
            height,
            fps: 10,
        }
    }

    #[test]
    fn test_gray_segment_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.y4m");

        let mut encoder = Y4mEncoderFactory.create(&path, &spec(4, 2)).unwrap();
        encoder.encode_frame(&Frame::gray(vec![9u8; 8], 4, 2, 0)).unwrap();
        encoder.encode_frame(&Frame::gray(vec![7u8; 8], 4, 2, 1)).unwrap();
        let bytes = encoder.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len() as u64, bytes);

        let header = "YUV4MPEG2 W4 H2 F10:1 Ip A1:1 Cmono\n";
        assert!(data.starts_with(header.as_bytes()));
        assert_eq!(data.len(), header.len() + 2 * (FRAME_MARKER.len() + 8));
    }

    #[test]
    fn test_colour_frames_become_444() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.y4m");

        let mut encoder = Y4mEncoderFactory.create(&path, &spec(1, 1)).unwrap();
        encoder
            .encode_frame(&Frame::new(vec![255, 255, 255], 1, 1, PixelFormat::Rgb8, 0))
            .unwrap();
        encoder.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&data);
        assert!(text.starts_with("YUV4MPEG2 W1 H1 F10:1 Ip A1:1 C444\n"));
        assert_eq!(&data[data.len() - 3..], &[255u8, 128, 128]);
    }

    #[test]
    fn test_encoded_len_matches_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("len.y4m");
        let frames: Vec<Frame> = (0..3).map(|n| Frame::gray(vec![1u8; 8], 4, 2, n)).collect();

        let mut encoder = Y4mEncoderFactory.create(&path, &spec(4, 2)).unwrap();
        let predicted = encoder.encoded_len(&frames);
        for frame in &frames {
            encoder.encode_frame(frame).unwrap();
        }
        assert_eq!(encoder.bytes_written(), predicted);
        assert_eq!(encoder.encoded_len(&frames[..1]), (FRAME_MARKER.len() + 8) as u64);
    }

    #[test]
    fn test_empty_segment_is_valid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.y4m");

        let encoder = Y4mEncoderFactory.create(&path, &spec(4, 2)).unwrap();
        let bytes = encoder.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len() as u64, bytes);
        let header = Y4mHeader::parse(String::from_utf8_lossy(&data).trim_end()).unwrap();
        assert_eq!((header.width, header.height), (4, 2));
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.y4m");
        std::fs::write(&path, b"keep").unwrap();

        let result = Y4mEncoderFactory.create(&path, &spec(2, 2));
        assert!(matches!(result, Err(EncodeError::AlreadyExists(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = Y4mEncoderFactory
            .create(&dir.path().join("m.y4m"), &spec(4, 4))
            .unwrap();

        let wrong = Frame::gray(vec![0u8; 4], 2, 2, 3);
        assert!(matches!(
            encoder.encode_frame(&wrong),
            Err(EncodeError::FrameMismatch { sequence: 3, .. })
        ));

        encoder.encode_frame(&Frame::gray(vec![0u8; 16], 4, 4, 4)).unwrap();
        let colour = Frame::new(vec![0u8; 48], 4, 4, PixelFormat::Rgb8, 5);
        assert!(encoder.encode_frame(&colour).is_err());
    }
}
