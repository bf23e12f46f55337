use std::{
    collections::HashMap,
    fmt,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};

use crate::{
    error::{NpkError, NpkResult, eof},
    format::ByteRange,
    frame::{FrameDescriptor, PixelFrame},
    img::{Diagnostic, ImgRecord, load_img},
    index::{ArchiveEntry, FileTable},
    path::NpkPath,
    pixels::{expand_to_rgba, inflate},
};

pub type DiagnosticSink = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// How an archive is read.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Run the advisory frame-link and layout checks while loading img metadata.
    pub strict: bool,
    /// Receives strict-mode findings. They are logged either way.
    pub on_diagnostic: Option<DiagnosticSink>,
}

impl ReadOptions {
    pub fn strict(on_diagnostic: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        Self {
            strict: true,
            on_diagnostic: Some(Arc::new(on_diagnostic)),
        }
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("strict", &self.strict)
            .field("on_diagnostic", &self.on_diagnostic.is_some())
            .finish()
    }
}

/// A decoded frame: RGBA8, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    /// Metadata of the frame the pixels came from. For a link frame this is
    /// the target's, since links carry no metadata of their own.
    pub attributes: PixelFrame,
}

/// Opens the archive at `path` for reading, telling a missing file apart from
/// one we may not read.
pub(crate) fn open_archive_file(path: &Path) -> NpkResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => NpkError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => NpkError::AccessDenied(path.to_path_buf()),
        _ => NpkError::Io(e),
    })
}

/// Read access to one NPK file.
///
/// The file table is decoded on open; img metadata is decoded the first time
/// a path is asked for and cached until the reader is dropped. One owner at a
/// time: every call seeks the shared file handle.
#[derive(Debug)]
pub struct NpkReader {
    path: PathBuf,
    file: BufReader<File>,
    len: u64,
    table: FileTable,
    imgs: HashMap<NpkPath, ImgRecord>,
    options: ReadOptions,
}

impl NpkReader {
    pub fn open(path: impl AsRef<Path>) -> NpkResult<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReadOptions) -> NpkResult<Self> {
        let path = path.as_ref();
        info!("Opening NPK: {:?}", path);

        let file = open_archive_file(path)?;
        let len = file.metadata()?.len();
        let mut file = BufReader::new(file);
        let table = FileTable::read(&mut file)?;
        info!(
            "{:?}: {} entries, {} imgs",
            path,
            table.len(),
            table.images().count()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            table,
            imgs: HashMap::new(),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Length of the archive file when it was opened.
    pub fn file_len(&self) -> u64 {
        self.len
    }

    pub(crate) fn table(&self) -> &FileTable {
        &self.table
    }

    pub(crate) fn file_mut(&mut self) -> &mut BufReader<File> {
        &mut self.file
    }

    /// Sprite paths, without the `sprite/` prefix, in no particular order.
    pub fn sprite_paths(&self) -> impl Iterator<Item = &NpkPath> {
        self.table.images()
    }

    pub fn sound_paths(&self) -> impl Iterator<Item = &NpkPath> {
        self.table.sounds()
    }

    pub fn contains_img(&self, path: &NpkPath) -> bool {
        self.table.image_location(path).is_some()
    }

    /// Every sprite and sound entry in file table order.
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.table.archive_entries().collect()
    }

    /// Whether metadata for `path` has been decoded already.
    pub fn is_loaded(&self, path: &NpkPath) -> bool {
        self.imgs.contains_key(path)
    }

    /// Returns the metadata of an img, decoding it on first use.
    pub fn get_or_load(&mut self, path: &NpkPath) -> NpkResult<&ImgRecord> {
        if !self.imgs.contains_key(path) {
            let location = self
                .table
                .image_location(path)
                .ok_or_else(|| NpkError::ImgNotFound(path.clone()))?;

            let sink = self.options.on_diagnostic.clone();
            let mut report = |d: Diagnostic| {
                warn!("{d}");
                if let Some(sink) = &sink {
                    sink(&d);
                }
            };
            let record = load_img(
                &mut self.file,
                path,
                location,
                self.options.strict,
                &mut report,
            )?;
            self.imgs.insert(path.clone(), record);
        }
        self.imgs
            .get(path)
            .ok_or_else(|| NpkError::ImgNotFound(path.clone()))
    }

    pub fn preload_img(&mut self, path: &NpkPath) -> NpkResult<()> {
        self.get_or_load(path).map(|_| ())
    }

    pub fn preload_all(&mut self) -> NpkResult<()> {
        let paths: Vec<NpkPath> = self.table.images().cloned().collect();
        for path in &paths {
            self.get_or_load(path)?;
        }
        Ok(())
    }

    pub fn frames(&mut self, path: &NpkPath) -> NpkResult<&[FrameDescriptor]> {
        Ok(self.get_or_load(path)?.frames())
    }

    /// Decodes one frame to RGBA8, following a link frame to its target.
    pub fn get_image(&mut self, path: &NpkPath, frame_index: usize) -> NpkResult<DecodedImage> {
        let record = self.get_or_load(path)?;
        let (resolved, attributes) = resolve_frame(record, path, frame_index)?;
        let range = record.frame_ranges()[resolved];

        let stored = self.read_range(range, || {
            format!("pixel data of frame {resolved} of {path}")
        })?;

        let expected = attributes.raw_len().ok_or_else(|| {
            NpkError::InvalidFormat(format!("frame {resolved} of {path} is larger than 4 GiB"))
        })? as u64;
        let raw = if attributes.compressed {
            inflate(&stored, expected).map_err(|e| NpkError::Inflate {
                img: path.clone(),
                frame: resolved,
                message: e.to_string(),
            })?
        } else {
            stored
        };

        if raw.len() as u64 != expected {
            return Err(NpkError::PixelSize {
                img: path.clone(),
                frame: resolved,
                format: attributes.format,
                expected,
                actual: raw.len() as u64,
            });
        }

        Ok(DecodedImage {
            pixels: expand_to_rgba(&raw, attributes.format),
            attributes,
        })
    }

    /// Raw bytes of a sound entry.
    pub fn read_sound(&mut self, path: &NpkPath) -> NpkResult<Vec<u8>> {
        let range = self
            .table
            .sound_location(path)
            .ok_or_else(|| NpkError::SoundNotFound(path.clone()))?;
        self.read_range(range, || format!("sound {path}"))
    }

    fn read_range(&mut self, range: ByteRange, context: impl FnOnce() -> String) -> NpkResult<Vec<u8>> {
        if range.end() > self.len {
            return Err(NpkError::Truncated {
                context: context(),
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} bytes at offset {} run past the end of the {} byte file",
                        range.size, range.offset, self.len
                    ),
                ),
            });
        }
        self.file.seek(SeekFrom::Start(range.offset))?;
        let mut buf = vec![0u8; range.size as usize];
        if let Err(e) = self.file.read_exact(&mut buf) {
            return Err(eof(context())(e));
        }
        Ok(buf)
    }
}

/// Follows at most one link. Returns the index holding the pixels and their
/// metadata.
pub(crate) fn resolve_frame(
    record: &ImgRecord,
    path: &NpkPath,
    frame_index: usize,
) -> NpkResult<(usize, PixelFrame)> {
    let frames = record.frames();
    let frame = frames
        .get(frame_index)
        .ok_or_else(|| NpkError::FrameNotFound {
            img: path.clone(),
            index: frame_index,
            count: frames.len(),
        })?;

    match *frame {
        FrameDescriptor::Pixels(p) => Ok((frame_index, p)),
        FrameDescriptor::Link { target_index } => {
            let invalid = |reason| NpkError::InvalidLink {
                img: path.clone(),
                frame: frame_index,
                target: target_index,
                reason,
            };
            match frames.get(target_index as usize) {
                Some(FrameDescriptor::Pixels(p)) => Ok((target_index as usize, *p)),
                Some(FrameDescriptor::Link { .. }) => Err(invalid("the target is itself a link")),
                None => Err(invalid("the target is out of range")),
            }
        }
    }
}
