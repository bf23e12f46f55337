//! Reading and in-place editing of NPK sprite archives.
//!
//! An NPK holds a table of obfuscated file names followed by the files
//! themselves: "img" sprite containers under `sprite/` and raw sounds under
//! `sounds/`. [`NpkReader`] decodes frames to RGBA8, [`NpkEditor`] replaces a
//! single frame and rewrites the archive around it, and [`NpkBuilder`]
//! authors new archives.

pub mod builder;
pub mod editor;
pub mod error;
pub mod format;
pub mod frame;
mod img;
mod index;
pub mod path;
pub mod pixels;
pub mod reader;

pub use builder::{ImgFrame, NpkBuilder};
pub use editor::{EditOptions, NpkEditor};
pub use error::{NpkError, NpkResult};
pub use format::ByteRange;
pub use frame::{FrameDescriptor, PixelFormat, PixelFrame};
pub use img::{Diagnostic, ImgRecord};
pub use index::{ArchiveEntry, EntryKind};
pub use path::NpkPath;
pub use pixels::DeflateWrapper;
pub use reader::{DecodedImage, NpkReader, ReadOptions};
