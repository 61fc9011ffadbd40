//! Stream filter pipeline: Flate (with predictors), ASCII85, ASCIIHex
//!
//! A filter is a byte-to-byte transform; a stream's chain is applied left
//! to right, the first filter decoding the raw payload. Filters outside
//! the supported set fail with `UnsupportedFeature`.

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;

use crate::error::{PdfError, PdfResult};
use crate::object::Dict;

/// A supported stream filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Ascii85,
    AsciiHex,
}

impl Filter {
    /// Resolve a filter name, accepting the ISO abbreviations
    pub fn from_name(name: &[u8]) -> PdfResult<Self> {
        match name {
            b"FlateDecode" | b"Fl" => Ok(Filter::Flate),
            b"ASCII85Decode" | b"A85" => Ok(Filter::Ascii85),
            b"ASCIIHexDecode" | b"AHx" => Ok(Filter::AsciiHex),
            other => Err(PdfError::UnsupportedFeature(format!(
                "filter {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Decode one stage, honoring the stage's decode parameters
    pub fn decode(&self, data: &[u8], parms: Option<&Dict>) -> PdfResult<Vec<u8>> {
        match self {
            Filter::Flate => decode_flate(data, parms),
            Filter::Ascii85 => decode_ascii85(data),
            Filter::AsciiHex => decode_ascii_hex(data),
        }
    }

    /// Encode one stage; the inverse of [`Filter::decode`] without
    /// predictor application
    pub fn encode(&self, data: &[u8]) -> PdfResult<Vec<u8>> {
        match self {
            Filter::Flate => encode_flate(data),
            Filter::Ascii85 => Ok(encode_ascii85(data)),
            Filter::AsciiHex => Ok(encode_ascii_hex(data)),
        }
    }
}

/// Apply a filter chain left to right. `parms` runs parallel to
/// `filters`; a missing or `None` element means no parameters.
pub fn decode_chain(
    filters: &[Filter],
    parms: &[Option<Dict>],
    data: Vec<u8>,
) -> PdfResult<Vec<u8>> {
    let mut data = data;
    for (i, filter) in filters.iter().enumerate() {
        trace!("applying filter {filter:?}");
        let stage_parms = parms.get(i).and_then(|p| p.as_ref());
        data = filter.decode(&data, stage_parms)?;
    }
    Ok(data)
}

fn decode_flate(data: &[u8], parms: Option<&Dict>) -> PdfResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PdfError::corrupted(format!("zlib inflate failed: {e}"), "decoding stream"))?;
    apply_predictor(out, parms)
}

fn encode_flate(data: &[u8]) -> PdfResult<Vec<u8>> {
    use std::io::Write;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Reverse the row predictor named by `Predictor` in the decode
/// parameters: 1 = none, 2 = TIFF horizontal differencing, 10..=15 = the
/// PNG family dispatched per row by the leading tag byte.
fn apply_predictor(data: Vec<u8>, parms: Option<&Dict>) -> PdfResult<Vec<u8>> {
    let parms = match parms {
        Some(p) => p,
        None => return Ok(data),
    };
    let predictor = match parms.get(b"Predictor") {
        Some(value) => value
            .as_integer()
            .map_err(|_| PdfError::corrupted("Predictor is not an integer", "decoding stream"))?,
        None => return Ok(data),
    };
    if predictor == 1 {
        return Ok(data);
    }

    let int_parm = |key: &[u8], default: i64| -> PdfResult<i64> {
        match parms.get(key) {
            Some(value) => value.as_integer().map_err(|_| {
                PdfError::corrupted(
                    format!("{} is not an integer", String::from_utf8_lossy(key)),
                    "decoding stream",
                )
            }),
            None => Ok(default),
        }
    };
    let columns = int_parm(b"Columns", 1)? as usize;
    let colors = int_parm(b"Colors", 1)? as usize;
    let bits = int_parm(b"BitsPerComponent", 8)? as usize;
    if bits != 8 {
        return Err(PdfError::UnsupportedFeature(format!(
            "predictor with {bits} bits per component"
        )));
    }
    let pixel_len = colors;
    let row_len = columns * colors;
    if row_len == 0 {
        return Err(PdfError::corrupted("predictor row width is zero", "decoding stream"));
    }

    match predictor {
        2 => Ok(undo_tiff_predictor(data, row_len, pixel_len)),
        10..=15 => undo_png_predictor(data, row_len, pixel_len),
        other => Err(PdfError::UnsupportedFeature(format!("predictor {other}"))),
    }
}

fn undo_tiff_predictor(mut data: Vec<u8>, row_len: usize, pixel_len: usize) -> Vec<u8> {
    for row_start in (0..data.len()).step_by(row_len) {
        let row_end = (row_start + row_len).min(data.len());
        for i in row_start + pixel_len..row_end {
            data[i] = data[i].wrapping_add(data[i - pixel_len]);
        }
    }
    data
}

fn undo_png_predictor(data: Vec<u8>, row_len: usize, pixel_len: usize) -> PdfResult<Vec<u8>> {
    // Each encoded row is one tag byte plus row_len data bytes.
    if data.len() % (row_len + 1) != 0 {
        return Err(PdfError::corrupted(
            "png-predicted data is not a whole number of rows",
            "decoding stream",
        ));
    }
    let rows = data.len() / (row_len + 1);
    let mut out = vec![0u8; rows * row_len];
    let mut prev_row = vec![0u8; row_len];

    for row in 0..rows {
        let tag = data[row * (row_len + 1)];
        let src = &data[row * (row_len + 1) + 1..(row + 1) * (row_len + 1)];
        let dst = &mut out[row * row_len..(row + 1) * row_len];

        match tag {
            0 => dst.copy_from_slice(src),
            1 => {
                // Sub
                for i in 0..row_len {
                    let left = if i >= pixel_len { dst[i - pixel_len] } else { 0 };
                    dst[i] = src[i].wrapping_add(left);
                }
            }
            2 => {
                // Up
                for i in 0..row_len {
                    dst[i] = src[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                // Average
                for i in 0..row_len {
                    let left = if i >= pixel_len { dst[i - pixel_len] } else { 0 };
                    let up = prev_row[i];
                    let avg = ((left as u16 + up as u16) / 2) as u8;
                    dst[i] = src[i].wrapping_add(avg);
                }
            }
            4 => {
                // Paeth
                for i in 0..row_len {
                    let left = if i >= pixel_len { dst[i - pixel_len] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= pixel_len { prev_row[i - pixel_len] } else { 0 };
                    dst[i] = src[i].wrapping_add(paeth(left, up, up_left));
                }
            }
            other => {
                return Err(PdfError::corrupted(
                    format!("unknown png row tag {other}"),
                    "decoding stream",
                ))
            }
        }
        prev_row.copy_from_slice(dst);
    }
    Ok(out)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = left as i16 + up as i16 - up_left as i16;
    let pa = (p - left as i16).abs();
    let pb = (p - up as i16).abs();
    let pc = (p - up_left as i16).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

fn decode_ascii85(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0usize;

    let mut bytes = data.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        match byte {
            b'~' => {
                if bytes.next() != Some(b'>') {
                    return Err(PdfError::corrupted("ascii85 terminator is ~>", "decoding stream"));
                }
                break;
            }
            b'z' if count == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[count] = byte - b'!';
                count += 1;
                if count == 5 {
                    let value = group.iter().fold(0u32, |acc, &d| acc * 85 + d as u32);
                    out.extend_from_slice(&value.to_be_bytes());
                    count = 0;
                }
            }
            byte if crate::parser::is_whitespace(byte) => {}
            other => {
                return Err(PdfError::corrupted(
                    format!("invalid ascii85 byte {other:#04x}"),
                    "decoding stream",
                ))
            }
        }
    }

    // A partial group of n digits carries n - 1 bytes; pad with the
    // maximum digit so truncation rounds the right way.
    if count == 1 {
        return Err(PdfError::corrupted("lone trailing ascii85 digit", "decoding stream"));
    }
    if count > 1 {
        for slot in group.iter_mut().skip(count) {
            *slot = 84;
        }
        let value = group.iter().fold(0u32, |acc, &d| acc * 85 + d as u32);
        out.extend_from_slice(&value.to_be_bytes()[..count - 1]);
    }
    Ok(out)
}

fn encode_ascii85(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 5 / 4 + 2);
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let value = u32::from_be_bytes(word);
        if value == 0 && chunk.len() == 4 {
            out.push(b'z');
            continue;
        }
        let mut digits = [0u8; 5];
        let mut rest = value;
        for digit in digits.iter_mut().rev() {
            *digit = (rest % 85) as u8 + b'!';
            rest /= 85;
        }
        out.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

fn decode_ascii_hex(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in data {
        match byte {
            b'>' => break,
            byte if crate::parser::is_whitespace(byte) => {}
            _ => {
                let nibble = match byte {
                    b'0'..=b'9' => byte - b'0',
                    b'a'..=b'f' => byte - b'a' + 10,
                    b'A'..=b'F' => byte - b'A' + 10,
                    _ => {
                        return Err(PdfError::corrupted(
                            format!("invalid hex byte {byte:#04x}"),
                            "decoding stream",
                        ))
                    }
                };
                match pending.take() {
                    Some(high) => out.push((high << 4) | nibble),
                    None => pending = Some(nibble),
                }
            }
        }
    }
    // Odd trailing nibble implies a zero low nibble.
    if let Some(high) = pending {
        out.push(high << 4);
    }
    Ok(out)
}

fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(data.len() * 2 + 1);
    for &byte in data {
        out.push(HEX[(byte >> 4) as usize]);
        out.push(HEX[(byte & 0x0F) as usize]);
    }
    out.push(b'>');
    out
}
