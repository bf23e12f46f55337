use std::io::{self, Read, Write};

use flate2::{
    Compression,
    read::{DeflateDecoder, ZlibDecoder},
    write::{DeflateEncoder, ZlibEncoder},
};

use crate::frame::PixelFormat;

/// Container around DEFLATE data written for compressed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflateWrapper {
    /// Bare DEFLATE stream.
    #[default]
    Raw,
    /// DEFLATE with a two-byte zlib header and adler32 trailer.
    Zlib,
}

pub fn deflate(data: &[u8], wrapper: DeflateWrapper) -> io::Result<Vec<u8>> {
    match wrapper {
        DeflateWrapper::Raw => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        DeflateWrapper::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

fn looks_like_zlib(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            cmf & 0x0F == 8 && cmf >> 4 <= 7 && (((*cmf as u16) << 8) | *flg as u16) % 31 == 0
        }
        _ => false,
    }
}

/// Upper bound on what [`inflate`] reserves up front. Larger frames grow the
/// buffer as data actually arrives.
const INFLATE_PREALLOC_LIMIT: u64 = 16 << 20;

/// Inflates a frame payload. Both bare DEFLATE and zlib-wrapped streams are
/// accepted. Output is capped one byte past `expected_len` so a corrupt
/// stream cannot balloon; the caller compares the length.
pub fn inflate(data: &[u8], expected_len: u64) -> io::Result<Vec<u8>> {
    let limit = expected_len.saturating_add(1);
    let capacity = expected_len.min(INFLATE_PREALLOC_LIMIT) as usize;
    if looks_like_zlib(data) {
        let mut out = Vec::with_capacity(capacity);
        if ZlibDecoder::new(data)
            .take(limit)
            .read_to_end(&mut out)
            .is_ok()
        {
            return Ok(out);
        }
    }
    let mut out = Vec::with_capacity(capacity);
    DeflateDecoder::new(data).take(limit).read_to_end(&mut out)?;
    Ok(out)
}

/// Expands raw pixels into RGBA8. A trailing partial pixel is ignored; callers
/// check the length against the frame dimensions first.
pub fn expand_to_rgba(raw: &[u8], format: PixelFormat) -> Vec<u8> {
    let bpp = format.bytes_per_pixel() as usize;
    let mut out = Vec::with_capacity(raw.len() / bpp * 4);
    match format {
        PixelFormat::OneFiveFiveFive => {
            for px in raw.chunks_exact(2) {
                let (b0, b1) = (px[0], px[1]);
                let a = ((b1 >> 7) & 1) * 0xFF;
                let r = ((b1 & 0x7C) << 1) | ((b1 & 0x7C) >> 4);
                let mut g = ((b1 & 0x03) << 6) | ((b0 & 0xE0) >> 2);
                g |= g >> 5;
                let b = ((b0 & 0x1F) << 3) | ((b0 & 0x1F) >> 2);
                out.extend_from_slice(&[r, g, b, a]);
            }
        }
        PixelFormat::FourFourFourFour => {
            for px in raw.chunks_exact(2) {
                let (b0, b1) = (px[0], px[1]);
                let a = (b1 & 0xF0) | (b1 >> 4);
                let r = (b1 & 0x0F) | (b1 << 4);
                let g = (b0 & 0xF0) | (b0 >> 4);
                let b = (b0 & 0x0F) | (b0 << 4);
                out.extend_from_slice(&[r, g, b, a]);
            }
        }
        PixelFormat::EightEightEightEight => {
            for px in raw.chunks_exact(4) {
                out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }
    }
    out
}

/// Packs RGBA8 into the on-disk layout of `format`, dropping low bits for the
/// 16-bit formats. Alpha in 1555 is set when it is at least 128.
pub fn pack_rgba(rgba: &[u8], format: PixelFormat) -> Vec<u8> {
    let bpp = format.bytes_per_pixel() as usize;
    let mut out = Vec::with_capacity(rgba.len() / 4 * bpp);
    for px in rgba.chunks_exact(4) {
        let (r, g, b, a) = (px[0], px[1], px[2], px[3]);
        match format {
            PixelFormat::OneFiveFiveFive => {
                let value = (((a >= 0x80) as u16) << 15)
                    | ((r as u16 >> 3) << 10)
                    | ((g as u16 >> 3) << 5)
                    | (b as u16 >> 3);
                out.extend_from_slice(&value.to_le_bytes());
            }
            PixelFormat::FourFourFourFour => {
                out.push((g & 0xF0) | (b >> 4));
                out.push((a & 0xF0) | (r >> 4));
            }
            PixelFormat::EightEightEightEight => out.extend_from_slice(&[b, g, r, a]),
        }
    }
    out
}
