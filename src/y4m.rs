//! YUV4MPEG2 stream header.
//!
//! Y4M is the uncompressed container used for replayed input and for the
//! shipped segment encoder. Only the fields this crate needs are modelled;
//! unknown header tags are ignored on parse.

use std::fmt;

/// Magic prefix of every Y4M stream.
pub const STREAM_MAGIC: &str = "YUV4MPEG2";

/// Largest width or height accepted from a stream header.
pub const MAX_DIMENSION: u32 = 8192;

/// Marker line preceding each frame payload.
pub const FRAME_MARKER: &[u8] = b"FRAME\n";

/// Chroma layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chroma {
    /// Luma plane only.
    Mono,
    /// 4:2:0 subsampled chroma (any siting variant).
    C420,
    /// 4:2:2 subsampled chroma.
    C422,
    /// Full resolution chroma.
    C444,
}

impl Chroma {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "mono" => Some(Chroma::Mono),
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Some(Chroma::C420),
            "422" => Some(Chroma::C422),
            "444" => Some(Chroma::C444),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Chroma::Mono => "mono",
            Chroma::C420 => "420jpeg",
            Chroma::C422 => "422",
            Chroma::C444 => "444",
        }
    }
}

/// Parsed stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Y4mHeader {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Frame-rate numerator.
    pub fps_num: u32,
    /// Frame-rate denominator.
    pub fps_den: u32,
    /// Chroma layout.
    pub chroma: Chroma,
}

impl Y4mHeader {
    /// Creates a header for an integer frame rate.
    pub fn new(width: u32, height: u32, fps: u32, chroma: Chroma) -> Self {
        Self {
            width,
            height,
            fps_num: fps.max(1),
            fps_den: 1,
            chroma,
        }
    }

    /// Parses a header line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(STREAM_MAGIC) {
            return Err("missing YUV4MPEG2 signature".into());
        }

        let mut width = None;
        let mut height = None;
        let mut fps = (0, 1);
        // Y4M default chroma is 4:2:0
        let mut chroma = Chroma::C420;

        for token in tokens {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = value.parse().ok(),
                Some('H') => height = value.parse().ok(),
                Some('F') => {
                    let (num, den) = value
                        .split_once(':')
                        .ok_or_else(|| format!("malformed frame rate {value:?}"))?;
                    fps = (
                        num.parse().map_err(|_| format!("malformed frame rate {value:?}"))?,
                        den.parse().map_err(|_| format!("malformed frame rate {value:?}"))?,
                    );
                }
                Some('C') => {
                    chroma = Chroma::parse(value)
                        .ok_or_else(|| format!("unsupported chroma {value:?}"))?;
                }
                _ => {}
            }
        }

        let width = width.filter(|w| *w > 0).ok_or("missing or zero width")?;
        let height = height.filter(|h| *h > 0).ok_or("missing or zero height")?;
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(format!(
                "frame size {width}x{height} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}"
            ));
        }

        Ok(Self {
            width,
            height,
            fps_num: fps.0,
            fps_den: fps.1,
            chroma,
        })
    }

    /// Integer frame rate, 0 when the header does not state one.
    pub fn fps(&self) -> u32 {
        if self.fps_den == 0 {
            0
        } else {
            (self.fps_num as f64 / self.fps_den as f64).round() as u32
        }
    }

    /// Number of luma bytes per frame.
    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Total payload bytes per frame (all planes).
    pub fn frame_len(&self) -> usize {
        let luma = self.luma_len();
        let (w, h) = (self.width as usize, self.height as usize);
        match self.chroma {
            Chroma::Mono => luma,
            Chroma::C420 => luma + 2 * w.div_ceil(2) * h.div_ceil(2),
            Chroma::C422 => luma + 2 * w.div_ceil(2) * h,
            Chroma::C444 => luma * 3,
        }
    }
}

impl fmt::Display for Y4mHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} W{} H{} F{}:{} Ip A1:1 C{}",
            STREAM_MAGIC,
            self.width,
            self.height,
            self.fps_num,
            self.fps_den,
            self.chroma.tag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typical_header() {
        let header = Y4mHeader::parse("YUV4MPEG2 W640 H480 F30000:1001 Ip A1:1 C420jpeg XYSCSS=420JPEG")
            .unwrap();
        assert_eq!(header.width, 640);
        assert_eq!(header.height, 480);
        assert_eq!(header.fps(), 30);
        assert_eq!(header.chroma, Chroma::C420);
        assert_eq!(header.frame_len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_display_parses_back() {
        let header = Y4mHeader::new(16, 8, 10, Chroma::Mono);
        let parsed = Y4mHeader::parse(&header.to_string()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.frame_len(), 128);
    }

    #[test]
    fn test_rejects_missing_signature() {
        assert!(Y4mHeader::parse("RIFF W10 H10").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 H10").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W10 H10 Cxyz").is_err());
    }

    #[test]
    fn test_rejects_oversized_frames() {
        assert!(Y4mHeader::parse("YUV4MPEG2 W99999999 H99999999 F25:1").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W8193 H2 F25:1").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W8192 H8192 F25:1 Cmono").is_ok());
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let header = Y4mHeader::new(5, 3, 25, Chroma::C420);
        assert_eq!(header.frame_len(), 15 + 2 * 3 * 2);
    }
}
