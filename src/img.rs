use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use thiserror::Error;

use crate::{
    error::{NpkError, NpkResult, eof},
    format::{ByteRange, IMG_HEADER_LEN, IMG_MAGIC},
    frame::{
        COMPRESSED_FLAG, FrameDescriptor, LINK_METADATA_LEN, PIXELS_METADATA_LEN,
        UNCOMPRESSED_FLAG, read_descriptor,
    },
    path::NpkPath,
};

/// Advisory findings of strict mode. These never fail a read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("frame {frame} of {img} links to frame {target}, but the img only has {count} frames")]
    LinkOutOfRange {
        img: NpkPath,
        frame: usize,
        target: u32,
        count: usize,
    },
    #[error("frame {frame} of {img} links to frame {target}, which is itself a link")]
    LinkToLink {
        img: NpkPath,
        frame: usize,
        target: u32,
    },
    #[error("frame {frame} of {img} has compression flag {value}, expected 5 or 6")]
    UnknownCompressionFlag {
        img: NpkPath,
        frame: usize,
        value: u32,
    },
    #[error("{img}: data at offset {offset} after the last payload is neither end of file nor an img header")]
    TrailingData { img: NpkPath, offset: u64 },
    #[error("{img}: the file table gives {declared} bytes but the frames add up to {computed}")]
    SizeMismatch {
        img: NpkPath,
        declared: u64,
        computed: u64,
    },
}

/// Decoded metadata of one img file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgRecord {
    location: ByteRange,
    header_fields: [u32; 3],
    frames: Vec<FrameDescriptor>,
    frame_ranges: Vec<ByteRange>,
    metadata_ranges: Vec<ByteRange>,
}

impl ImgRecord {
    /// Where the whole img sits in the archive.
    pub fn location(&self) -> ByteRange {
        self.location
    }

    /// The three opaque u32s following the img magic.
    pub fn header_fields(&self) -> [u32; 3] {
        self.header_fields
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    /// Pixel payload of each frame; empty for link frames.
    pub fn frame_ranges(&self) -> &[ByteRange] {
        &self.frame_ranges
    }

    /// The 8 or 36 byte metadata block of each frame.
    pub(crate) fn metadata_ranges(&self) -> &[ByteRange] {
        &self.metadata_ranges
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn link_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_link()).count()
    }

    /// Header plus every metadata block plus every payload.
    pub fn byte_len(&self) -> u64 {
        IMG_HEADER_LEN
            + self
                .frames
                .iter()
                .zip(&self.frame_ranges)
                .map(|(f, r)| f.metadata_len() as u64 + r.size as u64)
                .sum::<u64>()
    }
}

/// `36 * pixel frames + 8 * link frames`, the first img header field.
pub fn img_field1(pixel_frames: usize, link_frames: usize) -> u32 {
    (PIXELS_METADATA_LEN as usize * pixel_frames + LINK_METADATA_LEN as usize * link_frames) as u32
}

/// Reads the header and frame list of the img at `location`, then lays out
/// the payloads sequentially after the metadata.
pub(crate) fn load_img<R: Read + Seek>(
    reader: &mut R,
    img: &NpkPath,
    location: ByteRange,
    strict: bool,
    report: &mut dyn FnMut(Diagnostic),
) -> NpkResult<ImgRecord> {
    debug!("Loading frame metadata of {img} at {}", location.offset);
    reader.seek(SeekFrom::Start(location.offset))?;

    let mut magic = [0u8; 16];
    reader
        .read_exact(&mut magic)
        .map_err(eof(format!("img header of {img}")))?;
    if magic != IMG_MAGIC {
        return Err(NpkError::InvalidFormat(format!(
            "Did not find expected image file header for {img}"
        )));
    }

    let mut header_fields = [0u32; 3];
    for field in header_fields.iter_mut() {
        *field = reader
            .read_u32::<LittleEndian>()
            .map_err(eof(format!("img header of {img}")))?;
    }
    let count = reader
        .read_u32::<LittleEndian>()
        .map_err(eof(format!("frame count of {img}")))? as usize;

    // a corrupt count must not reserve gigabytes
    let capacity = count.min(location.size as usize / LINK_METADATA_LEN as usize);
    let mut frames = Vec::with_capacity(capacity);
    let mut metadata_ranges = Vec::with_capacity(capacity);
    let mut cursor = location.offset + IMG_HEADER_LEN;
    for index in 0..count {
        let raw = read_descriptor(reader)?;
        match raw.compression_flag {
            Some(flag) if strict && flag != COMPRESSED_FLAG && flag != UNCOMPRESSED_FLAG => {
                report(Diagnostic::UnknownCompressionFlag {
                    img: img.clone(),
                    frame: index,
                    value: flag,
                });
            }
            _ => {}
        }
        let len = raw.descriptor.metadata_len();
        metadata_ranges.push(ByteRange::new(cursor, len));
        cursor += len as u64;
        frames.push(raw.descriptor);
    }

    let mut frame_ranges = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let len = frame.payload_len().ok_or_else(|| {
            NpkError::InvalidFormat(format!("frame {index} of {img} is larger than 4 GiB"))
        })?;
        frame_ranges.push(ByteRange::new(cursor, len));
        cursor += len as u64;
    }
    debug!("{img}: {} frames, payloads end at {cursor}", frames.len());

    let record = ImgRecord {
        location,
        header_fields,
        frames,
        frame_ranges,
        metadata_ranges,
    };

    if strict {
        check_links(img, &record, report);
        check_layout(reader, img, &record, cursor, report)?;
    }
    Ok(record)
}

fn check_links(img: &NpkPath, record: &ImgRecord, report: &mut dyn FnMut(Diagnostic)) {
    for (frame, descriptor) in record.frames.iter().enumerate() {
        let FrameDescriptor::Link { target_index } = *descriptor else {
            continue;
        };
        match record.frames.get(target_index as usize) {
            None => report(Diagnostic::LinkOutOfRange {
                img: img.clone(),
                frame,
                target: target_index,
                count: record.frames.len(),
            }),
            Some(target) if target.is_link() => report(Diagnostic::LinkToLink {
                img: img.clone(),
                frame,
                target: target_index,
            }),
            Some(_) => {}
        }
    }
}

fn check_layout<R: Read + Seek>(
    reader: &mut R,
    img: &NpkPath,
    record: &ImgRecord,
    end: u64,
    report: &mut dyn FnMut(Diagnostic),
) -> NpkResult<()> {
    let computed = end - record.location.offset;
    if computed != record.location.size as u64 {
        report(Diagnostic::SizeMismatch {
            img: img.clone(),
            declared: record.location.size as u64,
            computed,
        });
    }

    reader.seek(SeekFrom::Start(end))?;
    let mut next = Vec::with_capacity(IMG_MAGIC.len());
    reader
        .by_ref()
        .take(IMG_MAGIC.len() as u64)
        .read_to_end(&mut next)?;
    if !next.is_empty() && next != IMG_MAGIC {
        report(Diagnostic::TrailingData {
            img: img.clone(),
            offset: end,
        });
    }
    Ok(())
}
