use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{frame::PixelFormat, path::NpkPath};

#[derive(Error, Debug)]
pub enum NpkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("NPK file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Access denied to NPK file: {0:?}")]
    AccessDenied(PathBuf),
    #[error("There is no img file with path {0} in this NPK")]
    ImgNotFound(NpkPath),
    #[error("There is no sound file with path {0} in this NPK")]
    SoundNotFound(NpkPath),
    #[error("Cannot get frame index {index} of {img}. It only has {count} frames")]
    FrameNotFound {
        img: NpkPath,
        index: usize,
        count: usize,
    },
    #[error("Unexpected end of file while reading {context}")]
    Truncated {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("Invalid .npk format: {0}")]
    InvalidFormat(String),
    #[error("Frame {frame} of {img} links to frame {target}: {reason}")]
    InvalidLink {
        img: NpkPath,
        frame: usize,
        target: u32,
        reason: &'static str,
    },
    #[error("Inflate error in frame {frame} of {img}: {message}")]
    Inflate {
        img: NpkPath,
        frame: usize,
        message: String,
    },
    #[error(
        "Raw pixel data of frame {frame} of {img} in {format} format is {actual} bytes. Expected it to be {expected} bytes"
    )]
    PixelSize {
        img: NpkPath,
        frame: usize,
        format: PixelFormat,
        expected: u64,
        actual: u64,
    },
    #[error("There is no NPK file open")]
    NotOpen,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to replace {path:?} with the rewritten archive: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),
}

pub type NpkResult<T> = Result<T, NpkError>;

impl NpkError {
    /// Missing archive, img path, sound path or frame index.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NpkError::NotFound(_)
                | NpkError::AccessDenied(_)
                | NpkError::ImgNotFound(_)
                | NpkError::SoundNotFound(_)
                | NpkError::FrameNotFound { .. }
        )
    }

    /// The archive contents are corrupt or in an unknown variant of the format.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            NpkError::Truncated { .. }
                | NpkError::InvalidFormat(_)
                | NpkError::InvalidLink { .. }
                | NpkError::Inflate { .. }
                | NpkError::PixelSize { .. }
        )
    }

    /// The caller passed something that can never succeed.
    pub fn is_usage(&self) -> bool {
        matches!(self, NpkError::NotOpen | NpkError::InvalidArgument(_))
    }
}

/// Maps a failed read into `Truncated` when the stream ran dry, keeping every
/// other I/O failure distinct from bad data.
pub(crate) fn eof(context: impl Into<String>) -> impl FnOnce(io::Error) -> NpkError {
    let context = context.into();
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            NpkError::Truncated { context, source: e }
        } else {
            NpkError::Io(e)
        }
    }
}
