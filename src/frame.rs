use std::{
    fmt,
    io::{Read, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{NpkError, NpkResult, eof};

/// Format code reserved for link frames. It is not a pixel format.
pub const LINK_CODE: u32 = 17;
pub const COMPRESSED_FLAG: u32 = 6;
pub const UNCOMPRESSED_FLAG: u32 = 5;

pub const LINK_METADATA_LEN: u32 = 8;
pub const PIXELS_METADATA_LEN: u32 = 36;

/// On-disk pixel layouts. Values are stored little-endian, so ARGB1555 is
/// laid out as the byte pair `GB, AR` and 8888 as `B, G, R, A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    OneFiveFiveFive,
    FourFourFourFour,
    EightEightEightEight,
}

impl PixelFormat {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            14 => Some(PixelFormat::OneFiveFiveFive),
            15 => Some(PixelFormat::FourFourFourFour),
            16 => Some(PixelFormat::EightEightEightEight),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            PixelFormat::OneFiveFiveFive => 14,
            PixelFormat::FourFourFourFour => 15,
            PixelFormat::EightEightEightEight => 16,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::OneFiveFiveFive | PixelFormat::FourFourFourFour => 2,
            PixelFormat::EightEightEightEight => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelFormat::OneFiveFiveFive => "1555",
            PixelFormat::FourFourFourFour => "4444",
            PixelFormat::EightEightEightEight => "8888",
        })
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1555" => Ok(PixelFormat::OneFiveFiveFive),
            "4444" => Ok(PixelFormat::FourFourFourFour),
            "8888" => Ok(PixelFormat::EightEightEightEight),
            _ => Err(format!("unknown pixel format {s:?}, expected 1555, 4444 or 8888")),
        }
    }
}

/// Metadata of a frame that carries its own pixels.
///
/// `max_width`/`max_height` are carried through untouched; nobody knows what
/// the game uses them for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFrame {
    pub format: PixelFormat,
    pub compressed: bool,
    /// Stored payload length. For uncompressed frames the payload length is
    /// derived from the dimensions instead.
    pub compressed_length: u32,
    pub width: u32,
    pub height: u32,
    pub location_x: u32,
    pub location_y: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl PixelFrame {
    /// `width * height * bytes_per_pixel`, the size of the raw pixels once
    /// inflated. `None` when that does not fit the 32-bit lengths of the
    /// format.
    pub fn raw_len(&self) -> Option<u32> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.format.bytes_per_pixel())
    }

    /// Number of payload bytes this frame occupies in the img.
    pub fn payload_len(&self) -> Option<u32> {
        if self.compressed {
            Some(self.compressed_length)
        } else {
            self.raw_len()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDescriptor {
    /// No payload; shows the image of another frame in the same img.
    Link { target_index: u32 },
    Pixels(PixelFrame),
}

impl FrameDescriptor {
    pub fn is_link(&self) -> bool {
        matches!(self, FrameDescriptor::Link { .. })
    }

    pub fn metadata_len(&self) -> u32 {
        match self {
            FrameDescriptor::Link { .. } => LINK_METADATA_LEN,
            FrameDescriptor::Pixels(_) => PIXELS_METADATA_LEN,
        }
    }

    pub fn payload_len(&self) -> Option<u32> {
        match self {
            FrameDescriptor::Link { .. } => Some(0),
            FrameDescriptor::Pixels(p) => p.payload_len(),
        }
    }

    /// Writes the 8 or 36 byte metadata block. `payload_len` replaces the
    /// stored `compressed_length` of a pixel frame.
    pub fn write_to(&self, w: &mut impl Write, payload_len: u32) -> NpkResult<()> {
        match self {
            FrameDescriptor::Link { target_index } => {
                w.write_u32::<LittleEndian>(LINK_CODE)?;
                w.write_u32::<LittleEndian>(*target_index)?;
            }
            FrameDescriptor::Pixels(p) => {
                w.write_u32::<LittleEndian>(p.format.code())?;
                w.write_u32::<LittleEndian>(if p.compressed {
                    COMPRESSED_FLAG
                } else {
                    UNCOMPRESSED_FLAG
                })?;
                for v in [
                    p.width,
                    p.height,
                    payload_len,
                    p.location_x,
                    p.location_y,
                    p.max_width,
                    p.max_height,
                ] {
                    w.write_u32::<LittleEndian>(v)?;
                }
            }
        }
        Ok(())
    }
}

/// A decoded metadata block together with its raw compression flag, which
/// strict mode inspects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawDescriptor {
    pub descriptor: FrameDescriptor,
    /// `None` for link frames.
    pub compression_flag: Option<u32>,
}

/// Reads one metadata block at the current position.
pub(crate) fn read_descriptor(r: &mut impl Read) -> NpkResult<RawDescriptor> {
    const CONTEXT: &str = "frame metadata";
    let mode = r.read_u32::<LittleEndian>().map_err(eof(CONTEXT))?;
    if mode == LINK_CODE {
        let target_index = r.read_u32::<LittleEndian>().map_err(eof(CONTEXT))?;
        return Ok(RawDescriptor {
            descriptor: FrameDescriptor::Link { target_index },
            compression_flag: None,
        });
    }

    let format = PixelFormat::from_code(mode)
        .ok_or_else(|| NpkError::InvalidFormat(format!("unknown pixel format code {mode}")))?;
    let mut fields = [0u32; 8];
    for field in fields.iter_mut() {
        *field = r.read_u32::<LittleEndian>().map_err(eof(CONTEXT))?;
    }
    let [flag, width, height, compressed_length, location_x, location_y, max_width, max_height] =
        fields;

    let frame = PixelFrame {
        format,
        // anything but 5 is treated as compressed
        compressed: flag != UNCOMPRESSED_FLAG,
        compressed_length,
        width,
        height,
        location_x,
        location_y,
        max_width,
        max_height,
    };
    if frame.raw_len().is_none() {
        return Err(NpkError::InvalidFormat(format!(
            "a {width}x{height} {format} frame is larger than 4 GiB"
        )));
    }

    Ok(RawDescriptor {
        descriptor: FrameDescriptor::Pixels(frame),
        compression_flag: Some(flag),
    })
}
