use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};

use crate::{
    error::{NpkError, NpkResult},
    format::{
        ByteRange, IMG_MAGIC, NPK_HEADER_LEN, NPK_MAGIC, SOUND_PREFIX, SPRITE_PREFIX,
        TABLE_ENTRY_LEN,
    },
    frame::{FrameDescriptor, PixelFrame},
    img::img_field1,
    index::{FileTableEntry, name_block_for},
    path::NpkPath,
    pixels::{DeflateWrapper, deflate},
};

/// Second and third img header fields as the game's own tooling writes them.
const IMG_FIELD2: u32 = 0;
const IMG_FIELD3: u32 = 2;

/// One frame handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgFrame {
    pub descriptor: FrameDescriptor,
    /// Raw pixels in the frame's format, `width * height * bpp` bytes. Empty
    /// for links.
    pub pixels: Vec<u8>,
}

impl ImgFrame {
    pub fn link(target_index: u32) -> Self {
        Self {
            descriptor: FrameDescriptor::Link { target_index },
            pixels: Vec::new(),
        }
    }

    pub fn pixels(frame: PixelFrame, pixels: Vec<u8>) -> Self {
        Self {
            descriptor: FrameDescriptor::Pixels(frame),
            pixels,
        }
    }
}

/// The new content of one frame slot, ready to be written.
#[derive(Debug)]
pub(crate) struct RenderedFrame {
    pub descriptor: FrameDescriptor,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Reads the raw pixels of `descriptor` from `pixels`, compresses them when
/// asked to and encodes the metadata block with the real payload length.
/// Links do not read `pixels`.
pub(crate) fn render_frame(
    descriptor: &FrameDescriptor,
    pixels: impl Read,
    wrapper: DeflateWrapper,
) -> NpkResult<RenderedFrame> {
    let payload = match descriptor {
        FrameDescriptor::Link { .. } => Vec::new(),
        FrameDescriptor::Pixels(p) => {
            let raw_len = p.raw_len().ok_or_else(|| {
                NpkError::InvalidArgument(format!(
                    "a {}x{} {} frame does not fit in an img",
                    p.width, p.height, p.format
                ))
            })? as u64;
            let mut raw = Vec::new();
            pixels.take(raw_len + 1).read_to_end(&mut raw)?;
            if raw.len() as u64 != raw_len {
                let got = if raw.len() as u64 > raw_len {
                    format!("more than {raw_len}")
                } else {
                    raw.len().to_string()
                };
                return Err(NpkError::InvalidArgument(format!(
                    "a {}x{} {} frame needs {raw_len} bytes of pixels, got {got}",
                    p.width, p.height, p.format,
                )));
            }
            if p.compressed {
                deflate(&raw, wrapper)?
            } else {
                raw
            }
        }
    };
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| NpkError::InvalidArgument("frame payload exceeds 4 GiB".to_string()))?;

    let mut metadata = Vec::with_capacity(descriptor.metadata_len() as usize);
    descriptor.write_to(&mut metadata, payload_len)?;
    Ok(RenderedFrame {
        descriptor: *descriptor,
        metadata,
        payload,
    })
}

/// Encodes a complete img file. Links must point at a pixel frame of the
/// same img.
pub fn render_img(frames: &[ImgFrame], wrapper: DeflateWrapper) -> NpkResult<Vec<u8>> {
    for (i, frame) in frames.iter().enumerate() {
        if let FrameDescriptor::Link { target_index } = frame.descriptor {
            match frames.get(target_index as usize) {
                Some(target) if !target.descriptor.is_link() => {}
                Some(_) => {
                    return Err(NpkError::InvalidArgument(format!(
                        "frame {i} links to frame {target_index}, which is itself a link"
                    )));
                }
                None => {
                    return Err(NpkError::InvalidArgument(format!(
                        "frame {i} links to frame {target_index}, but there are only {} frames",
                        frames.len()
                    )));
                }
            }
        }
    }

    let rendered = frames
        .iter()
        .map(|f| render_frame(&f.descriptor, f.pixels.as_slice(), wrapper))
        .collect::<NpkResult<Vec<_>>>()?;
    let links = frames.iter().filter(|f| f.descriptor.is_link()).count();

    let mut out = IMG_MAGIC.to_vec();
    out.write_u32::<LittleEndian>(img_field1(frames.len() - links, links))?;
    out.write_u32::<LittleEndian>(IMG_FIELD2)?;
    out.write_u32::<LittleEndian>(IMG_FIELD3)?;
    out.write_u32::<LittleEndian>(frames.len() as u32)?;
    for frame in &rendered {
        out.write_all(&frame.metadata)?;
    }
    for frame in &rendered {
        out.write_all(&frame.payload)?;
    }
    Ok(out)
}

struct PendingEntry {
    name: String,
    data: Vec<u8>,
}

/// Writes a new NPK from in-memory files, in the order they were added.
///
/// ```no_run
/// # use npk_tool::{NpkBuilder, NpkPath};
/// let mut builder = NpkBuilder::new();
/// builder.add_sound(&NpkPath::new("hit.wav"), b"RIFF".to_vec())?;
/// builder.write_file("sounds_hit.npk")?;
/// # Ok::<(), npk_tool::NpkError>(())
/// ```
#[derive(Default)]
pub struct NpkBuilder {
    entries: Vec<PendingEntry>,
    deflate: DeflateWrapper,
}

impl NpkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrapper written around compressed frames of imgs added afterwards.
    pub fn with_deflate(mut self, wrapper: DeflateWrapper) -> Self {
        self.deflate = wrapper;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `sprite/<path>` built from `frames`.
    pub fn add_img(&mut self, path: &NpkPath, frames: &[ImgFrame]) -> NpkResult<&mut Self> {
        let data = render_img(frames, self.deflate)?;
        self.add_raw(&format!("{SPRITE_PREFIX}/{path}"), data)
    }

    /// Adds `sounds/<path>` with `data` stored as is.
    pub fn add_sound(&mut self, path: &NpkPath, data: Vec<u8>) -> NpkResult<&mut Self> {
        self.add_raw(&format!("{SOUND_PREFIX}/{path}"), data)
    }

    /// Adds an entry under its full in-archive name, which is written
    /// verbatim. Names outside `sprite/` and `sounds/` are kept in the table
    /// but readers skip them.
    pub fn add_raw(&mut self, full_name: &str, data: Vec<u8>) -> NpkResult<&mut Self> {
        name_block_for(full_name)?;
        debug!("Adding {full_name:?} ({} bytes)", data.len());
        self.entries.push(PendingEntry {
            name: full_name.to_string(),
            data,
        });
        Ok(self)
    }

    /// Writes the archive and returns its length.
    pub fn write_to(&self, w: &mut impl Write) -> NpkResult<u64> {
        let too_large =
            || NpkError::InvalidArgument("the archive would not fit in 4 GiB".to_string());

        let mut offset = NPK_HEADER_LEN + self.entries.len() as u64 * TABLE_ENTRY_LEN;
        let mut table = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let size = u32::try_from(entry.data.len()).map_err(|_| too_large())?;
            let location = ByteRange::new(offset, size);
            if location.end() > u32::MAX as u64 {
                return Err(too_large());
            }
            table.push(FileTableEntry {
                name_block: name_block_for(&entry.name)?,
                full_name: NpkPath::new(&entry.name),
                location,
            });
            offset = location.end();
        }

        w.write_all(&NPK_MAGIC)?;
        w.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in &table {
            entry.write_to(w, entry.location.offset as u32, entry.location.size)?;
        }
        for entry in &self.entries {
            w.write_all(&entry.data)?;
        }
        Ok(offset)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> NpkResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        let len = self.write_to(&mut writer)?;
        writer.flush()?;
        info!("Wrote {:?}: {} entries, {len} bytes", path, self.entries.len());
        Ok(())
    }
}
