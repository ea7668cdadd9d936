//! YUV4MPEG2 file replay.
//!
//! Only the luma plane is kept: frames are delivered as `Gray8`, which is
//! all the detector needs and keeps the replayed archive compact.

use super::source::{effective_fps, FrameSource, SourceError};
use super::{Frame, PixelFormat};
use crate::y4m::{Y4mHeader, FRAME_MARKER};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};

/// Replays a `.y4m` file as a frame source.
pub struct Y4mSource {
    reader: Option<BufReader<File>>,
    header: Y4mHeader,
    fps: u32,
    pace: bool,
    origin: Instant,
    next_index: u64,
}

impl Y4mSource {
    /// Opens `path` and parses its stream header.
    ///
    /// `fallback_fps` is used when the header carries no frame rate.
    pub fn open(path: &Path, fallback_fps: u32) -> Result<Self, SourceError> {
        let open_failed = |reason: String| SourceError::OpenFailed {
            identifier: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_failed(e.to_string()))?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|e| open_failed(e.to_string()))?;
        let header = Y4mHeader::parse(line.trim_end()).map_err(open_failed)?;
        let fps = effective_fps(header.fps(), fallback_fps);

        tracing::info!(
            path = %path.display(),
            width = header.width,
            height = header.height,
            fps,
            chroma = ?header.chroma,
            "Opened Y4M source"
        );

        Ok(Self {
            reader: Some(reader),
            header,
            fps,
            pace: false,
            origin: Instant::now(),
            next_index: 0,
        })
    }

    /// Sleeps between frames so the file replays at its nominal rate.
    pub fn paced(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    fn read_marker(reader: &mut BufReader<File>) -> Result<bool, SourceError> {
        let mut line = Vec::with_capacity(FRAME_MARKER.len());
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(false);
        }
        // Frame headers may carry parameters after the marker keyword
        if !line.starts_with(&FRAME_MARKER[..5]) {
            return Err(SourceError::ReadFailed("missing FRAME marker".into()));
        }
        Ok(true)
    }
}

impl FrameSource for Y4mSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotOpen)?;

        if !Self::read_marker(reader)? {
            return Ok(None);
        }

        let mut payload = vec![0u8; self.header.frame_len()];
        reader.read_exact(&mut payload).map_err(|e| {
            SourceError::ReadFailed(format!("truncated frame {}: {e}", self.next_index))
        })?;
        payload.truncate(self.header.luma_len());

        let index = self.next_index;
        let timestamp =
            self.origin + Duration::from_nanos(index * 1_000_000_000 / u64::from(self.fps));
        if self.pace {
            let now = Instant::now();
            if timestamp > now {
                std::thread::sleep(timestamp - now);
            }
        }

        self.next_index += 1;
        Ok(Some(Frame::with_timestamp(
            payload,
            self.header.width,
            self.header.height,
            PixelFormat::Gray8,
            index,
            timestamp,
        )))
    }

    fn width(&self) -> u32 {
        self.header.width
    }

    fn height(&self) -> u32 {
        self.header.height
    }

    fn nominal_fps(&self) -> u32 {
        self.header.fps()
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::info!(frames = self.next_index, "Y4M source closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::y4m::Chroma;
    use std::io::Write;

    fn write_clip(path: &Path, header: &Y4mHeader, frames: &[u8]) {
        let mut file = File::create(path).unwrap();
        writeln!(file, "{header}").unwrap();
        for &value in frames {
            file.write_all(FRAME_MARKER).unwrap();
            file.write_all(&vec![value; header.frame_len()]).unwrap();
        }
    }

    #[test]
    fn test_replays_luma_plane() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.y4m");
        let header = Y4mHeader::new(4, 2, 5, Chroma::C420);
        write_clip(&path, &header, &[10, 20]);

        let mut source = Y4mSource::open(&path, 30).unwrap();
        assert_eq!(source.nominal_fps(), 5);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.pixels(), &[10u8; 8]);
        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.pixels(), &[20u8; 8]);
        assert_eq!(
            second.timestamp() - first.timestamp(),
            Duration::from_millis(200)
        );
        assert!(source.read_frame().unwrap().is_none());

        source.close();
        assert!(matches!(source.read_frame(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.y4m");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", Y4mHeader::new(4, 4, 10, Chroma::Mono)).unwrap();
        file.write_all(FRAME_MARKER).unwrap();
        file.write_all(&[0u8; 3]).unwrap();
        drop(file);

        let mut source = Y4mSource::open(&path, 30).unwrap();
        assert!(matches!(
            source.read_frame(),
            Err(SourceError::ReadFailed(_))
        ));
    }

    #[test]
    fn test_oversized_header_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.y4m");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "YUV4MPEG2 W99999999 H99999999 F25:1 C420jpeg").unwrap();
        file.write_all(FRAME_MARKER).unwrap();
        drop(file);

        let result = Y4mSource::open(&path, 30);
        assert!(matches!(result, Err(SourceError::OpenFailed { .. })));
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let result = Y4mSource::open(Path::new("/nonexistent/clip.y4m"), 30);
        assert!(matches!(result, Err(SourceError::OpenFailed { .. })));
    }
}
