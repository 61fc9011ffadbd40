//! Textual parser for PDF objects, indirect objects and trailers
//!
//! Implements the object grammar of ISO 32000-1 §7.3 over a [`Buffer`].
//! Stream payloads are never consumed here; an indirect stream object is
//! returned with the payload offset only.

use std::io::{Read, Seek};

use log::trace;

use crate::buffer::Buffer;
use crate::error::{PdfError, PdfResult};
use crate::object::{Dict, IndirectObject, Name, Object, Ref, Stream};

pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

/// Skip whitespace and `%` comments. Comments run to the end of line and
/// count as whitespace everywhere outside strings and stream payloads.
pub(crate) fn skip_whitespace<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<()> {
    loop {
        match buf.peek_byte()? {
            Some(byte) if is_whitespace(byte) => {
                buf.read_byte()?;
            }
            Some(b'%') => {
                buf.read_line()?;
            }
            _ => return Ok(()),
        }
    }
}

/// Read a run of regular characters. Empty at a delimiter or end of input.
fn read_regular_token<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Vec<u8>> {
    let mut token = Vec::new();
    while let Some(byte) = buf.peek_byte()? {
        if !is_regular(byte) {
            break;
        }
        token.push(buf.read_byte()?);
    }
    Ok(token)
}

/// Consume the given keyword, which must be standalone (terminated by
/// whitespace, a delimiter or end of input)
pub(crate) fn expect_keyword<R: Read + Seek>(buf: &mut Buffer<R>, keyword: &str) -> PdfResult<()> {
    skip_whitespace(buf)?;
    let pos = buf.position();
    let token = read_regular_token(buf)?;
    if token != keyword.as_bytes() {
        return Err(PdfError::parse(pos, format!("keyword {keyword}")));
    }
    Ok(())
}

/// Read a standalone unsigned integer token
pub(crate) fn parse_unsigned<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<u64> {
    skip_whitespace(buf)?;
    let pos = buf.position();
    let token = read_regular_token(buf)?;
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Err(PdfError::parse(pos, "unsigned integer"));
    }
    std::str::from_utf8(&token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PdfError::parse(pos, "unsigned integer"))
}

/// Parse any object value. Indirect object headers are not accepted here;
/// `N G R` reference triples are.
pub fn parse_object<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Object> {
    skip_whitespace(buf)?;
    let pos = buf.position();
    match buf.peek_byte()?.ok_or(PdfError::UnexpectedEof)? {
        b'/' => Ok(Object::Name(parse_name(buf)?)),
        b'(' => Ok(Object::String(parse_literal_string(buf)?)),
        b'<' => {
            buf.read_byte()?;
            if buf.peek_byte()? == Some(b'<') {
                buf.read_byte()?;
                Ok(Object::Dict(parse_dict_body(buf)?))
            } else {
                Ok(Object::String(parse_hex_string(buf)?))
            }
        }
        b'[' => {
            buf.read_byte()?;
            let mut array = Vec::new();
            loop {
                skip_whitespace(buf)?;
                match buf.peek_byte()?.ok_or(PdfError::UnexpectedEof)? {
                    b']' => {
                        buf.read_byte()?;
                        return Ok(Object::Array(array));
                    }
                    _ => array.push(parse_object(buf)?),
                }
            }
        }
        byte if byte.is_ascii_digit() || matches!(byte, b'+' | b'-' | b'.') => {
            parse_numeric_or_reference(buf)
        }
        byte if is_regular(byte) => {
            let token = read_regular_token(buf)?;
            match token.as_slice() {
                b"true" => Ok(Object::Boolean(true)),
                b"false" => Ok(Object::Boolean(false)),
                b"null" => Ok(Object::Null),
                _ => Err(PdfError::parse(pos, "object")),
            }
        }
        _ => Err(PdfError::parse(pos, "object")),
    }
}

/// Parse `N G obj <value> endobj`. When the value is a dictionary
/// followed by the `stream` keyword, return a [`Stream`] whose offset is
/// the byte right after the keyword's end-of-line; the payload and the
/// closing `endstream`/`endobj` are not consumed.
pub fn parse_indirect_object<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<IndirectObject> {
    skip_whitespace(buf)?;
    let pos = buf.position();
    trace!("parsing indirect object at offset {pos}");

    let number = parse_unsigned(buf)? as u32;
    let generation = parse_unsigned(buf)? as u16;
    expect_keyword(buf, "obj")?;
    let reference = Ref::new(number, generation);

    let object = parse_object(buf)?;
    if let Object::Dict(dict) = object {
        let after_dict = buf.position();
        skip_whitespace(buf)?;
        let keyword_pos = buf.position();
        let token = read_regular_token(buf)?;
        if token == b"stream" {
            // The keyword must be followed by CRLF or LF, never lone CR.
            match buf.read_byte()? {
                b'\n' => {}
                b'\r' => {
                    if buf.read_byte()? != b'\n' {
                        return Err(PdfError::parse(keyword_pos, "line feed after stream keyword"));
                    }
                }
                _ => return Err(PdfError::parse(keyword_pos, "end of line after stream keyword")),
            }
            let stream = Stream::new(dict, buf.position());
            return Ok(IndirectObject {
                reference,
                object: Object::Stream(stream),
            });
        }
        buf.seek(after_dict)?;
        expect_keyword(buf, "endobj")?;
        return Ok(IndirectObject {
            reference,
            object: Object::Dict(dict),
        });
    }

    expect_keyword(buf, "endobj")?;
    Ok(IndirectObject { reference, object })
}

/// Parse the `trailer <<...>>` form
pub fn parse_trailer<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Dict> {
    expect_keyword(buf, "trailer")?;
    skip_whitespace(buf)?;
    let pos = buf.position();
    match parse_object(buf)? {
        Object::Dict(dict) => Ok(dict),
        _ => Err(PdfError::parse(pos, "trailer dictionary")),
    }
}

fn parse_numeric_or_reference<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Object> {
    let pos = buf.position();
    let token = read_regular_token(buf)?;
    let text = std::str::from_utf8(&token).map_err(|_| PdfError::parse(pos, "number"))?;

    // Any token with a point or exponent is a real.
    if token.iter().any(|b| matches!(b, b'.' | b'e' | b'E')) {
        return text
            .parse::<f64>()
            .map(Object::Real)
            .map_err(|_| PdfError::parse(pos, "number"));
    }

    let number = match text.parse::<i64>() {
        Ok(n) => n,
        // Out-of-range integers degrade to reals.
        Err(_) => {
            return text
                .parse::<f64>()
                .map(Object::Real)
                .map_err(|_| PdfError::parse(pos, "number"));
        }
    };

    // Lookahead for `G R` making this a reference.
    if number >= 0 && number <= u32::MAX as i64 {
        let rewind = buf.position();
        if let Some(generation) = try_reference_suffix(buf)? {
            return Ok(Object::Reference(Ref::new(number as u32, generation)));
        }
        buf.seek(rewind)?;
    }

    Ok(Object::Integer(number))
}

fn try_reference_suffix<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Option<u16>> {
    skip_whitespace(buf)?;
    let token = read_regular_token(buf)?;
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Ok(None);
    }
    let generation: u16 = match std::str::from_utf8(&token).ok().and_then(|s| s.parse().ok()) {
        Some(g) => g,
        None => return Ok(None),
    };
    skip_whitespace(buf)?;
    let keyword = read_regular_token(buf)?;
    if keyword == b"R" {
        Ok(Some(generation))
    } else {
        Ok(None)
    }
}

fn parse_name<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Name> {
    let pos = buf.position();
    buf.read_byte()?; // '/'
    let mut bytes = Vec::new();
    while let Some(byte) = buf.peek_byte()? {
        if !is_regular(byte) {
            break;
        }
        buf.read_byte()?;
        if byte == b'#' {
            let high = hex_value(buf.read_byte()?);
            let low = hex_value(buf.read_byte()?);
            match (high, low) {
                (Some(h), Some(l)) => bytes.push((h << 4) | l),
                _ => return Err(PdfError::parse(pos, "two hex digits after # in name")),
            }
        } else {
            bytes.push(byte);
        }
    }
    Ok(Name::new(bytes))
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn parse_literal_string<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Vec<u8>> {
    buf.read_byte()?; // '('
    let mut bytes = Vec::new();
    let mut depth = 1u32;
    loop {
        match buf.read_byte()? {
            b'(' => {
                depth += 1;
                bytes.push(b'(');
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(bytes);
                }
                bytes.push(b')');
            }
            b'\\' => parse_string_escape(buf, &mut bytes)?,
            // An unescaped end-of-line in a string reads as a single LF.
            b'\r' => {
                if buf.peek_byte()? == Some(b'\n') {
                    buf.read_byte()?;
                }
                bytes.push(b'\n');
            }
            byte => bytes.push(byte),
        }
    }
}

fn parse_string_escape<R: Read + Seek>(buf: &mut Buffer<R>, out: &mut Vec<u8>) -> PdfResult<()> {
    match buf.read_byte()? {
        b'n' => out.push(b'\n'),
        b'r' => out.push(b'\r'),
        b't' => out.push(b'\t'),
        b'b' => out.push(0x08),
        b'f' => out.push(0x0C),
        b'(' => out.push(b'('),
        b')' => out.push(b')'),
        b'\\' => out.push(b'\\'),
        // Backslash before an end-of-line continues the string.
        b'\r' => {
            if buf.peek_byte()? == Some(b'\n') {
                buf.read_byte()?;
            }
        }
        b'\n' => {}
        digit @ b'0'..=b'7' => {
            let mut value = (digit - b'0') as u32;
            for _ in 0..2 {
                match buf.peek_byte()? {
                    Some(next @ b'0'..=b'7') => {
                        buf.read_byte()?;
                        value = value * 8 + (next - b'0') as u32;
                    }
                    _ => break,
                }
            }
            out.push(value as u8);
        }
        // An unknown escape stands for the escaped byte itself.
        other => out.push(other),
    }
    Ok(())
}

fn parse_hex_string<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut pending: Option<u8> = None;
    loop {
        let pos = buf.position();
        let byte = buf.read_byte()?;
        if byte == b'>' {
            // Odd digit count implies a trailing zero nibble.
            if let Some(high) = pending {
                bytes.push(high << 4);
            }
            return Ok(bytes);
        }
        if is_whitespace(byte) {
            continue;
        }
        match hex_value(byte) {
            Some(nibble) => match pending.take() {
                Some(high) => bytes.push((high << 4) | nibble),
                None => pending = Some(nibble),
            },
            None => return Err(PdfError::parse(pos, "hex digit or >")),
        }
    }
}

fn parse_dict_body<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<Dict> {
    let mut dict = Dict::new();
    loop {
        skip_whitespace(buf)?;
        let pos = buf.position();
        match buf.peek_byte()?.ok_or(PdfError::UnexpectedEof)? {
            b'>' => {
                buf.read_byte()?;
                if buf.read_byte()? != b'>' {
                    return Err(PdfError::parse(pos, ">>"));
                }
                return Ok(dict);
            }
            b'/' => {
                let key = parse_name(buf)?;
                let value = parse_object(buf)?;
                dict.set(key, value);
            }
            _ => return Err(PdfError::parse(pos, "name key or >>")),
        }
    }
}
