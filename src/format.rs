// --- .npk File Format ---
// All integers are little-endian u32.
//
// Archive header:
//   - magic "NeoplePack_Bill\0" (16 bytes)
//   - entry_count
//   - entry_count x { offset, size, name (256 bytes, XORed with NAME_KEY) }
//   The decoded name is a NUL-terminated ASCII path whose first component is
//   "sprite" or "sounds".
//
// Inner files, concatenated at the offsets given by the table. An img file is:
//   - magic "Neople Img File\0" (16 bytes)
//   - field1 = 36 * (pixel frames) + 8 * (link frames)
//   - field2, field3 (opaque)
//   - frame_count
//   - frame_count x frame metadata (8 bytes for a link, 36 for pixels)
//   - pixel payloads of the non-link frames, in frame order
// --- End of Format ---

pub const NPK_MAGIC: [u8; 16] = *b"NeoplePack_Bill\0";
pub const IMG_MAGIC: [u8; 16] = *b"Neople Img File\0";

pub const NAME_LEN: usize = 256;
/// offset + size + name
pub const TABLE_ENTRY_LEN: u64 = 4 + 4 + NAME_LEN as u64;
/// magic + entry_count
pub const NPK_HEADER_LEN: u64 = 16 + 4;
/// magic + three header fields + frame_count
pub const IMG_HEADER_LEN: u64 = 16 + 4 * 3 + 4;

pub const SPRITE_PREFIX: &str = "sprite";
pub const SOUND_PREFIX: &str = "sounds";

pub const NAME_KEY: [u8; NAME_LEN] = name_key();

const fn name_key() -> [u8; NAME_LEN] {
    let phrase = b"puchikon@neople dungeon and fighter ";
    let filler = b"DNF";
    let mut key = [0u8; NAME_LEN];
    let mut i = 0;
    // last byte stays NUL
    while i < NAME_LEN - 1 {
        key[i] = if i < phrase.len() {
            phrase[i]
        } else {
            filler[(i - phrase.len()) % filler.len()]
        };
        i += 1;
    }
    key
}

/// XORs a name block with [`NAME_KEY`]. Applying it twice is the identity.
pub fn xor_name(block: &mut [u8; NAME_LEN]) {
    for (b, k) in block.iter_mut().zip(NAME_KEY.iter()) {
        *b ^= k;
    }
}

/// A contiguous region of the archive file.
///
/// Only valid for the layout it was read from; an edit moves everything after
/// the edited img.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u32,
}

impl ByteRange {
    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
