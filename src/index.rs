use std::{
    collections::HashMap,
    io::{Read, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use crate::{
    error::{NpkError, NpkResult, eof},
    format::{
        ByteRange, NAME_LEN, NPK_HEADER_LEN, NPK_MAGIC, SOUND_PREFIX, SPRITE_PREFIX,
        TABLE_ENTRY_LEN, xor_name,
    },
    path::NpkPath,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Sprite,
    Sound,
}

/// A classified inner file, with the `sprite/` or `sounds/` prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: NpkPath,
    pub location: ByteRange,
    pub kind: EntryKind,
}

/// One row of the file table exactly as stored, including rows that are
/// neither sprites nor sounds.
#[derive(Debug, Clone)]
pub(crate) struct FileTableEntry {
    /// De-obfuscated name block, kept whole so a rewrite reproduces it byte for byte.
    pub name_block: [u8; NAME_LEN],
    pub full_name: NpkPath,
    pub location: ByteRange,
}

impl FileTableEntry {
    fn classify(&self) -> Option<ArchiveEntry> {
        let kind = match self.full_name.first_component() {
            Some(c) if c.eq_ignore_ascii_case(SPRITE_PREFIX) => EntryKind::Sprite,
            Some(c) if c.eq_ignore_ascii_case(SOUND_PREFIX) => EntryKind::Sound,
            _ => return None,
        };
        Some(ArchiveEntry {
            name: self.full_name.strip_prefix(),
            location: self.location,
            kind,
        })
    }

    /// Writes offset, size and the re-obfuscated name block.
    pub fn write_to(&self, w: &mut impl Write, offset: u32, size: u32) -> NpkResult<()> {
        w.write_u32::<LittleEndian>(offset)?;
        w.write_u32::<LittleEndian>(size)?;
        let mut block = self.name_block;
        xor_name(&mut block);
        w.write_all(&block)?;
        Ok(())
    }
}

/// Encodes a path into a de-obfuscated, NUL-padded name block.
pub(crate) fn name_block_for(full_name: &str) -> NpkResult<[u8; NAME_LEN]> {
    let bytes = full_name.as_bytes();
    if bytes.len() >= NAME_LEN {
        return Err(NpkError::InvalidArgument(format!(
            "path {full_name} is longer than {} bytes",
            NAME_LEN - 1
        )));
    }
    let mut block = [0u8; NAME_LEN];
    block[..bytes.len()].copy_from_slice(bytes);
    Ok(block)
}

/// The decoded top-level directory listing of an NPK.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileTable {
    pub(crate) entries: Vec<FileTableEntry>,
    images: HashMap<NpkPath, ByteRange>,
    sounds: HashMap<NpkPath, ByteRange>,
}

impl FileTable {
    /// Reads the header and table from the start of `reader`, leaving it just
    /// past the table.
    pub fn read(reader: &mut impl Read) -> NpkResult<Self> {
        let mut magic = [0u8; 16];
        reader
            .read_exact(&mut magic)
            .map_err(eof("NPK header"))?;
        if magic != NPK_MAGIC {
            return Err(NpkError::InvalidFormat(
                "Did not find expected directory listing header".to_string(),
            ));
        }

        let count = reader
            .read_u32::<LittleEndian>()
            .map_err(eof("NPK entry count"))?;
        debug!("File table has {count} entries");

        let mut table = FileTable::default();
        for index in 0..count {
            let offset = reader
                .read_u32::<LittleEndian>()
                .map_err(eof(format!("offset of file table entry {index}")))?;
            let size = reader
                .read_u32::<LittleEndian>()
                .map_err(eof(format!("size of file table entry {index}")))?;
            let mut name_block = [0u8; NAME_LEN];
            reader
                .read_exact(&mut name_block)
                .map_err(eof(format!("name of file table entry {index}")))?;
            xor_name(&mut name_block);

            let len = name_block.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            let full_name = NpkPath::new(&String::from_utf8_lossy(&name_block[..len]));

            table.push(FileTableEntry {
                name_block,
                full_name,
                location: ByteRange::new(offset as u64, size),
            });
        }
        Ok(table)
    }

    pub(crate) fn push(&mut self, entry: FileTableEntry) {
        match entry.classify() {
            Some(ArchiveEntry {
                name,
                location,
                kind: EntryKind::Sprite,
            }) => {
                self.images.insert(name, location);
            }
            Some(ArchiveEntry {
                name,
                location,
                kind: EntryKind::Sound,
            }) => {
                self.sounds.insert(name, location);
            }
            None => warn!(
                "Ignoring file table entry {:?}: not a sprite or a sound",
                entry.full_name
            ),
        }
        self.entries.push(entry);
    }

    /// Offset of the first byte after the table.
    pub fn data_start(&self) -> u64 {
        NPK_HEADER_LEN + self.entries.len() as u64 * TABLE_ENTRY_LEN
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn image_location(&self, path: &NpkPath) -> Option<ByteRange> {
        self.images.get(path).copied()
    }

    pub fn sound_location(&self, path: &NpkPath) -> Option<ByteRange> {
        self.sounds.get(path).copied()
    }

    pub fn images(&self) -> impl Iterator<Item = &NpkPath> {
        self.images.keys()
    }

    pub fn sounds(&self) -> impl Iterator<Item = &NpkPath> {
        self.sounds.keys()
    }

    /// Classified entries in table order; unclassified rows are skipped.
    pub fn archive_entries(&self) -> impl Iterator<Item = ArchiveEntry> + '_ {
        self.entries.iter().filter_map(FileTableEntry::classify)
    }
}
