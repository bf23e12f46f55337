use std::{
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::{
    builder::{RenderedFrame, render_frame},
    error::{NpkError, NpkResult},
    format::{IMG_MAGIC, NPK_MAGIC},
    frame::FrameDescriptor,
    img::{ImgRecord, img_field1},
    path::NpkPath,
    pixels::DeflateWrapper,
    reader::{DecodedImage, NpkReader, ReadOptions},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct EditOptions {
    /// Wrapper written around newly compressed frames.
    pub deflate: DeflateWrapper,
}

/// Edits an NPK in place by rewriting it into a temp file next to it and
/// swapping that file in.
///
/// Every edit rebuilds the reader, so metadata and byte ranges obtained
/// before an edit are stale afterwards.
#[derive(Default)]
pub struct NpkEditor {
    reader: Option<NpkReader>,
    read_options: ReadOptions,
    options: EditOptions,
}

impl NpkEditor {
    pub fn new(options: EditOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> NpkResult<()> {
        self.open_with(path, ReadOptions::default())
    }

    /// On failure the previously open archive, if any, stays open.
    pub fn open_with(&mut self, path: impl AsRef<Path>, read_options: ReadOptions) -> NpkResult<()> {
        let reader = NpkReader::open_with(path, read_options.clone())?;
        self.reader = Some(reader);
        self.read_options = read_options;
        Ok(())
    }

    pub fn close(&mut self) {
        self.reader = None;
    }

    pub fn reader(&mut self) -> NpkResult<&mut NpkReader> {
        self.reader.as_mut().ok_or(NpkError::NotOpen)
    }

    pub fn get_image(&mut self, path: &NpkPath, frame_index: usize) -> NpkResult<DecodedImage> {
        self.reader()?.get_image(path, frame_index)
    }

    /// Replaces frame `frame_index` of `img` with `descriptor`.
    ///
    /// For a pixel frame, `pixels` supplies exactly `width * height * bpp`
    /// bytes in the frame's format; they are compressed here when
    /// `descriptor` asks for it and its `compressed_length` is ignored. For a
    /// link frame `pixels` is not read.
    pub fn edit_frame(
        &mut self,
        img: &NpkPath,
        frame_index: usize,
        descriptor: FrameDescriptor,
        pixels: impl Read,
    ) -> NpkResult<()> {
        let options = self.options;
        let reader = self.reader.as_mut().ok_or(NpkError::NotOpen)?;
        let archive_path = reader.path().to_path_buf();
        info!("Editing frame {frame_index} of {img} in {:?}", archive_path);

        let record = reader.get_or_load(img)?.clone();
        let old = *record
            .frames()
            .get(frame_index)
            .ok_or_else(|| NpkError::FrameNotFound {
                img: img.clone(),
                index: frame_index,
                count: record.frame_count(),
            })?;
        check_replacement(&record, frame_index, &descriptor)?;

        let rendered = render_frame(&descriptor, pixels, options.deflate)?;
        let old_len = old.metadata_len() as i64 + record.frame_ranges()[frame_index].size as i64;
        let new_len = rendered.metadata.len() as i64 + rendered.payload.len() as i64;
        let delta = new_len - old_len;
        debug!("{img} changes by {delta} bytes");

        let dir = archive_dir(&archive_path);
        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            write_edited_archive(reader, &mut out, &record, frame_index, &rendered, delta)?;
            out.flush()?;
        }
        temp.as_file().sync_all()?;

        // release our handle before the swap
        self.reader = None;
        if let Err(e) = temp.persist(&archive_path) {
            warn!("Could not replace {:?}, keeping the original", archive_path);
            self.reader = match NpkReader::open_with(&archive_path, self.read_options.clone()) {
                Ok(reader) => Some(reader),
                Err(reopen) => {
                    warn!("Could not reopen {:?}: {reopen}", archive_path);
                    None
                }
            };
            return Err(NpkError::Persist {
                path: archive_path,
                source: e.error,
            });
        }

        self.reader = Some(NpkReader::open_with(
            &archive_path,
            self.read_options.clone(),
        )?);
        info!("Edited frame {frame_index} of {img}");
        Ok(())
    }
}

fn archive_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Rejects edits that would leave a link pointing at a link or nowhere.
fn check_replacement(
    record: &ImgRecord,
    frame_index: usize,
    descriptor: &FrameDescriptor,
) -> NpkResult<()> {
    let frames = record.frames();
    match *descriptor {
        FrameDescriptor::Link { target_index } => {
            let target = target_index as usize;
            if target == frame_index {
                return Err(NpkError::InvalidArgument(format!(
                    "frame {frame_index} cannot link to itself"
                )));
            }
            match frames.get(target) {
                None => {
                    return Err(NpkError::InvalidArgument(format!(
                        "link target {target} is out of range, the img has {} frames",
                        frames.len()
                    )));
                }
                Some(f) if f.is_link() => {
                    return Err(NpkError::InvalidArgument(format!(
                        "link target {target} is itself a link"
                    )));
                }
                Some(_) => {}
            }
            let linked_here = frames.iter().position(|f| {
                matches!(f, FrameDescriptor::Link { target_index } if *target_index as usize == frame_index)
            });
            if let Some(other) = linked_here {
                return Err(NpkError::InvalidArgument(format!(
                    "frame {other} links to frame {frame_index}, which cannot become a link"
                )));
            }
        }
        FrameDescriptor::Pixels(p) => {
            if p.raw_len().is_none() {
                return Err(NpkError::InvalidArgument(format!(
                    "a {}x{} frame does not fit in an img",
                    p.width, p.height
                )));
            }
        }
    }
    Ok(())
}

fn shifted(value: u64, delta: i64) -> NpkResult<u32> {
    u32::try_from(value as i64 + delta)
        .map_err(|_| NpkError::InvalidArgument("the edited archive would not fit in 4 GiB".to_string()))
}

/// Copies exactly `len` bytes from the current position of `src`.
fn copy_exact(src: &mut impl Read, dst: &mut impl Write, len: u64, what: &str) -> NpkResult<()> {
    let copied = io::copy(&mut src.by_ref().take(len), dst)?;
    if copied != len {
        return Err(NpkError::Truncated {
            context: what.to_string(),
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("copied {copied} of {len} bytes"),
            ),
        });
    }
    Ok(())
}

fn copy_range(
    src: &mut (impl Read + Seek),
    dst: &mut impl Write,
    offset: u64,
    len: u64,
    what: &str,
) -> NpkResult<()> {
    src.seek(SeekFrom::Start(offset))?;
    copy_exact(src, dst, len, what)
}

/// Writes the whole archive with frame `frame_index` of `record` replaced.
fn write_edited_archive(
    reader: &mut NpkReader,
    out: &mut impl Write,
    record: &ImgRecord,
    frame_index: usize,
    rendered: &RenderedFrame,
    delta: i64,
) -> NpkResult<()> {
    let img_location = record.location();
    let img_offset = img_location.offset;
    let data_start = reader.table().data_start();
    let file_len = reader.file_len();
    let parsed_end = img_offset + record.byte_len();
    if img_offset < data_start || parsed_end > img_location.end() || img_location.end() > file_len {
        return Err(NpkError::InvalidFormat(format!(
            "img at {img_offset} with {} bytes does not fit the archive layout",
            img_location.size
        )));
    }

    // file table
    out.write_all(&NPK_MAGIC)?;
    out.write_u32::<LittleEndian>(reader.table().len() as u32)?;
    for entry in &reader.table().entries {
        let location = entry.location;
        let offset = if location.offset <= img_offset {
            location.offset as u32
        } else {
            shifted(location.offset, delta)?
        };
        let size = if location.offset == img_offset {
            shifted(location.size as u64, delta)?
        } else {
            location.size
        };
        debug!(
            "{:?}: offset {} -> {offset}, size {} -> {size}",
            entry.full_name, location.offset, location.size
        );
        entry.write_to(out, offset, size)?;
    }

    let src = reader.file_mut();
    copy_range(src, out, data_start, img_offset - data_start, "files before the edited img")?;

    // the edited img
    let pixel_frames_after = record
        .frames()
        .iter()
        .enumerate()
        .filter(|&(i, f)| {
            if i == frame_index {
                !rendered.descriptor.is_link()
            } else {
                !f.is_link()
            }
        })
        .count();
    let link_frames_after = record.frame_count() - pixel_frames_after;
    let [_, field2, field3] = record.header_fields();
    out.write_all(&IMG_MAGIC)?;
    out.write_u32::<LittleEndian>(img_field1(pixel_frames_after, link_frames_after))?;
    out.write_u32::<LittleEndian>(field2)?;
    out.write_u32::<LittleEndian>(field3)?;
    out.write_u32::<LittleEndian>(record.frame_count() as u32)?;

    for (i, range) in record.metadata_ranges().iter().enumerate() {
        if i == frame_index {
            out.write_all(&rendered.metadata)?;
        } else {
            copy_range(src, out, range.offset, range.size as u64, "frame metadata")?;
        }
    }
    for (i, range) in record.frame_ranges().iter().enumerate() {
        if i == frame_index {
            out.write_all(&rendered.payload)?;
        } else if !range.is_empty() {
            copy_range(src, out, range.offset, range.size as u64, "frame pixel data")?;
        }
    }
    // bytes the table assigns to the img beyond its last payload
    copy_range(src, out, parsed_end, img_location.end() - parsed_end, "img padding")?;

    copy_range(
        src,
        out,
        img_location.end(),
        file_len - img_location.end(),
        "files after the edited img",
    )?;
    Ok(())
}
