//! Cross-reference parsing: classic tables and xref streams
//!
//! A table xref is parsed lazily: subsection headers are scanned once and
//! each 20-byte entry is addressed directly when an object is looked up.
//! A stream xref carries its packed entries in a (possibly filtered)
//! stream payload, which the document decodes before entry extraction.

use std::io::{Read, Seek};

use log::trace;

use crate::buffer::Buffer;
use crate::error::{PdfError, PdfResult};
use crate::object::{Dict, Object, Ref};
use crate::parser;

/// One entry of a cross-reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object is free; `next_free` is the number of the next free object
    Free { next_free: u32, generation: u16 },
    /// Object lives at `offset` in the file
    InUse { offset: u64, generation: u16 },
    /// Object is stored inside an object stream
    Compressed { container: u32, index: u32 },
}

/// A contiguous subsection of a table xref. Entries are not materialized;
/// `entries_offset` addresses the first 20-byte entry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefSection {
    pub start: u32,
    pub count: u32,
    pub entries_offset: u64,
}

impl XRefSection {
    pub fn contains(&self, number: u32) -> bool {
        number >= self.start && number - self.start < self.count
    }
}

/// One cross-reference of the chain, newest first
#[derive(Debug, Clone, PartialEq)]
pub enum XRef {
    /// Classic `xref` table followed by a `trailer` dictionary
    Table {
        offset: u64,
        trailer: Dict,
        sections: Vec<XRefSection>,
    },
    /// Cross-reference stream; the stream dictionary doubles as trailer
    Stream {
        reference: Ref,
        dict: Dict,
        payload: u64,
    },
}

impl XRef {
    /// The trailer dictionary of this xref
    pub fn trailer(&self) -> &Dict {
        match self {
            XRef::Table { trailer, .. } => trailer,
            XRef::Stream { dict, .. } => dict,
        }
    }

    /// Offset of the previous xref in the chain, from the `Prev` key
    pub fn prev_offset(&self) -> PdfResult<Option<u64>> {
        match self.trailer().get(b"Prev") {
            None => Ok(None),
            Some(value) => {
                let offset = value.as_integer().map_err(|_| {
                    PdfError::corrupted("Prev is not an integer", "walking the xref chain")
                })?;
                Ok(Some(offset as u64))
            }
        }
    }

    /// Offset of the hybrid-file stream xref named by `XRefStm`, which
    /// takes effect immediately after this table in the chain
    pub fn hybrid_stream_offset(&self) -> Option<u64> {
        match self {
            XRef::Table { trailer, .. } => trailer
                .get(b"XRefStm")
                .and_then(|value| value.as_integer().ok())
                .map(|offset| offset as u64),
            XRef::Stream { .. } => None,
        }
    }
}

/// Read the xref starting at `offset`, either form
pub fn read_xref_at<R: Read + Seek>(buf: &mut Buffer<R>, offset: u64) -> PdfResult<XRef> {
    trace!("reading xref at offset {offset}");
    buf.seek(offset)?;
    parser::skip_whitespace(buf)?;
    match buf.peek_byte()?.ok_or(PdfError::UnexpectedEof)? {
        b'x' => read_table(buf, offset),
        byte if byte.is_ascii_digit() => read_stream_form(buf),
        _ => Err(PdfError::corrupted(
            format!("neither xref table nor xref stream at offset {offset}"),
            "reading cross reference",
        )),
    }
}

fn read_table<R: Read + Seek>(buf: &mut Buffer<R>, offset: u64) -> PdfResult<XRef> {
    parser::expect_keyword(buf, "xref")?;
    let mut sections = Vec::new();
    loop {
        parser::skip_whitespace(buf)?;
        match buf.peek_byte()?.ok_or(PdfError::UnexpectedEof)? {
            b't' => break,
            byte if byte.is_ascii_digit() => {
                let start = parser::parse_unsigned(buf)? as u32;
                let count = parser::parse_unsigned(buf)? as u32;
                parser::skip_whitespace(buf)?;
                let entries_offset = buf.position();
                sections.push(XRefSection {
                    start,
                    count,
                    entries_offset,
                });
                buf.seek(entries_offset + ENTRY_LEN as u64 * count as u64)?;
            }
            _ => {
                return Err(PdfError::corrupted(
                    "expected subsection header or trailer",
                    format!("parsing xref table at offset {offset}"),
                ))
            }
        }
    }
    let trailer = parser::parse_trailer(buf)?;
    Ok(XRef::Table {
        offset,
        trailer,
        sections,
    })
}

fn read_stream_form<R: Read + Seek>(buf: &mut Buffer<R>) -> PdfResult<XRef> {
    let ind = parser::parse_indirect_object(buf)?;
    let stream = match ind.object {
        Object::Stream(s) => s,
        other => {
            return Err(PdfError::corrupted(
                format!("expected stream, found {}", other.type_name()),
                "reading cross-reference stream",
            ))
        }
    };
    match stream.dict.get(b"Type") {
        Some(Object::Name(name)) if name.as_bytes() == b"XRef" => {}
        _ => {
            return Err(PdfError::corrupted(
                "stream is not of Type XRef",
                "reading cross-reference stream",
            ))
        }
    }
    Ok(XRef::Stream {
        reference: ind.reference,
        dict: stream.dict,
        payload: stream.offset,
    })
}

pub(crate) const ENTRY_LEN: usize = 20;

/// Read one fixed-width table entry by direct addressing
pub fn read_table_entry<R: Read + Seek>(
    buf: &mut Buffer<R>,
    section: &XRefSection,
    number: u32,
) -> PdfResult<XRefEntry> {
    debug_assert!(section.contains(number));
    let index = (number - section.start) as u64;
    buf.seek(section.entries_offset + ENTRY_LEN as u64 * index)?;
    let raw = buf.read_exact_vec(ENTRY_LEN)?;

    let context = || format!("xref entry for object {number}");
    let field = |range: std::ops::Range<usize>| -> PdfResult<u64> {
        let bytes = &raw[range];
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(PdfError::corrupted("entry width mismatch", context()));
        }
        Ok(std::str::from_utf8(bytes)
            .expect("digits are ascii")
            .parse()
            .expect("ten digits fit in u64"))
    };

    if raw[10] != b' ' || raw[16] != b' ' {
        return Err(PdfError::corrupted("entry width mismatch", context()));
    }
    let offset = field(0..10)?;
    let generation = field(11..16)?;
    if generation > u16::MAX as u64 {
        return Err(PdfError::corrupted("generation out of range", context()));
    }
    let generation = generation as u16;
    match raw[17] {
        b'n' => Ok(XRefEntry::InUse { offset, generation }),
        b'f' => Ok(XRefEntry::Free {
            next_free: offset as u32,
            generation,
        }),
        _ => Err(PdfError::corrupted("entry type must be n or f", context())),
    }
}

/// Look up `number` in the decoded payload of a stream xref. Returns
/// `None` when no `Index` range covers the number.
pub fn lookup_stream_entry(dict: &Dict, data: &[u8], number: u32) -> PdfResult<Option<XRefEntry>> {
    let context = || format!("xref stream entry for object {number}");

    let widths = match dict.get(b"W") {
        Some(value) => {
            let array = value
                .as_array()
                .map_err(|_| PdfError::corrupted("W is not an array", context()))?;
            if array.len() != 3 {
                return Err(PdfError::corrupted("W must have three elements", context()));
            }
            let mut widths = [0usize; 3];
            for (slot, element) in widths.iter_mut().zip(array) {
                let w = element
                    .as_integer()
                    .map_err(|_| PdfError::corrupted("W element is not an integer", context()))?;
                if !(0..=8).contains(&w) {
                    return Err(PdfError::corrupted("W element out of range", context()));
                }
                *slot = w as usize;
            }
            widths
        }
        None => return Err(PdfError::corrupted("missing W", context())),
    };
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(PdfError::corrupted("all W widths are zero", context()));
    }

    let index = index_ranges(dict).map_err(|e| match e {
        PdfError::Corrupted { reason, .. } => PdfError::corrupted(reason, context()),
        other => other,
    })?;

    let mut row = 0usize;
    for (first, count) in index {
        if number >= first && number - first < count {
            row += (number - first) as usize;
            let record = data
                .get(row * row_len..(row + 1) * row_len)
                .ok_or_else(|| PdfError::corrupted("entry past end of stream data", context()))?;

            let mut fields = [0u64; 3];
            let mut cursor = 0usize;
            for (slot, width) in fields.iter_mut().zip(widths) {
                *slot = be_field(&record[cursor..cursor + width]);
                cursor += width;
            }
            // A zero-width type field defaults to 1; other fields to 0.
            let kind = if widths[0] == 0 { 1 } else { fields[0] };
            return match kind {
                0 => Ok(Some(XRefEntry::Free {
                    next_free: fields[1] as u32,
                    generation: fields[2] as u16,
                })),
                1 => Ok(Some(XRefEntry::InUse {
                    offset: fields[1],
                    generation: fields[2] as u16,
                })),
                2 => Ok(Some(XRefEntry::Compressed {
                    container: fields[1] as u32,
                    index: fields[2] as u32,
                })),
                other => Err(PdfError::corrupted(
                    format!("unknown entry type {other}"),
                    context(),
                )),
            };
        }
        row += count as usize;
    }
    Ok(None)
}

/// `Index` pairs of a stream xref, defaulting to `[0 Size]`
fn index_ranges(dict: &Dict) -> PdfResult<Vec<(u32, u32)>> {
    match dict.get(b"Index") {
        Some(value) => {
            let array = value
                .as_array()
                .map_err(|_| PdfError::corrupted("Index is not an array", ""))?;
            if array.len() % 2 != 0 {
                return Err(PdfError::corrupted("Index length is odd", ""));
            }
            array
                .chunks(2)
                .map(|pair| {
                    let first = pair[0]
                        .as_integer()
                        .map_err(|_| PdfError::corrupted("Index element is not an integer", ""))?;
                    let count = pair[1]
                        .as_integer()
                        .map_err(|_| PdfError::corrupted("Index element is not an integer", ""))?;
                    Ok((first as u32, count as u32))
                })
                .collect()
        }
        None => {
            let size = dict
                .get(b"Size")
                .ok_or_else(|| PdfError::corrupted("missing Size", ""))?
                .as_integer()
                .map_err(|_| PdfError::corrupted("Size is not an integer", ""))?;
            Ok(vec![(0, size as u32)])
        }
    }
}

fn be_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Name;
    use std::io::Cursor;
    use test_log::test;

    fn buffer(data: &[u8]) -> Buffer<Cursor<Vec<u8>>> {
        Buffer::new(Cursor::new(data.to_vec())).unwrap()
    }

    const TABLE: &[u8] = b"xref\n\
        0 3\n\
        0000000000 65535 f \n\
        0000000017 00000 n \n\
        0000000081 00007 n \n\
        10 1\n\
        0000000300 00000 n \n\
        trailer\n<< /Size 11 /Root 1 0 R >>\n";

    #[test]
    fn test_table_sections_and_entries() {
        let mut buf = buffer(TABLE);
        let xref = read_xref_at(&mut buf, 0).unwrap();
        let sections = match &xref {
            XRef::Table { sections, .. } => sections.clone(),
            _ => panic!("expected table"),
        };
        assert_eq!(sections.len(), 2);
        assert!(sections[0].contains(0));
        assert!(sections[0].contains(2));
        assert!(!sections[0].contains(3));
        assert!(sections[1].contains(10));

        assert_eq!(
            read_table_entry(&mut buf, &sections[0], 0).unwrap(),
            XRefEntry::Free {
                next_free: 0,
                generation: 65535
            }
        );
        assert_eq!(
            read_table_entry(&mut buf, &sections[0], 2).unwrap(),
            XRefEntry::InUse {
                offset: 81,
                generation: 7
            }
        );
        assert_eq!(
            read_table_entry(&mut buf, &sections[1], 10).unwrap(),
            XRefEntry::InUse {
                offset: 300,
                generation: 0
            }
        );

        assert_eq!(xref.trailer().get(b"Size").unwrap(), &Object::Integer(11));
        assert_eq!(xref.prev_offset().unwrap(), None);
    }

    #[test]
    fn test_empty_subsection_accepted() {
        let data = b"xref\n0 0\ntrailer\n<< /Size 0 >>\n";
        let mut buf = buffer(data);
        let xref = read_xref_at(&mut buf, 0).unwrap();
        match xref {
            XRef::Table { sections, .. } => {
                assert_eq!(sections.len(), 1);
                assert_eq!(sections[0].count, 0);
            }
            _ => panic!("expected table"),
        }
    }

    #[test]
    fn test_malformed_entry_rejected() {
        let data = b"xref\n0 1\n00000000AB 65535 f \ntrailer\n<< /Size 1 >>\n";
        let mut buf = buffer(data);
        let xref = read_xref_at(&mut buf, 0).unwrap();
        let sections = match &xref {
            XRef::Table { sections, .. } => sections.clone(),
            _ => panic!(),
        };
        assert!(matches!(
            read_table_entry(&mut buf, &sections[0], 0),
            Err(PdfError::Corrupted { .. })
        ));
    }

    fn stream_dict(w: [i64; 3], index: Option<Vec<i64>>, size: i64) -> Dict {
        let mut dict = Dict::new();
        dict.set("Type", Object::name("XRef"));
        dict.set("Size", size);
        dict.set(
            "W",
            Object::Array(w.iter().map(|&n| Object::Integer(n)).collect()),
        );
        if let Some(index) = index {
            dict.set(
                "Index",
                Object::Array(index.iter().map(|&n| Object::Integer(n)).collect()),
            );
        }
        dict
    }

    #[test]
    fn test_stream_entries() {
        // W = [1 2 1]: type, field2 as u16, field3 as u8.
        let dict = stream_dict([1, 2, 1], None, 3);
        let data: Vec<u8> = vec![
            0, 0, 0, 0, // 0: free, next 0 gen 0
            1, 0x02, 0x58, 0, // 1: in use at 600
            2, 0, 4, 1, // 2: in container 4 index 1
        ];
        assert_eq!(
            lookup_stream_entry(&dict, &data, 0).unwrap(),
            Some(XRefEntry::Free {
                next_free: 0,
                generation: 0
            })
        );
        assert_eq!(
            lookup_stream_entry(&dict, &data, 1).unwrap(),
            Some(XRefEntry::InUse {
                offset: 600,
                generation: 0
            })
        );
        assert_eq!(
            lookup_stream_entry(&dict, &data, 2).unwrap(),
            Some(XRefEntry::Compressed {
                container: 4,
                index: 1
            })
        );
        assert_eq!(lookup_stream_entry(&dict, &data, 3).unwrap(), None);
    }

    #[test]
    fn test_stream_zero_width_type_defaults_to_in_use() {
        // W = [0 2 1]: every entry is implicitly type 1.
        let dict = stream_dict([0, 2, 1], Some(vec![5, 2]), 7);
        let data: Vec<u8> = vec![0x00, 0x40, 3, 0x00, 0x80, 0];
        assert_eq!(
            lookup_stream_entry(&dict, &data, 5).unwrap(),
            Some(XRefEntry::InUse {
                offset: 0x40,
                generation: 3
            })
        );
        assert_eq!(
            lookup_stream_entry(&dict, &data, 6).unwrap(),
            Some(XRefEntry::InUse {
                offset: 0x80,
                generation: 0
            })
        );
        assert_eq!(lookup_stream_entry(&dict, &data, 4).unwrap(), None);
    }

    #[test]
    fn test_stream_entry_past_data_end() {
        let dict = stream_dict([1, 2, 1], None, 2);
        let data: Vec<u8> = vec![1, 0, 9, 0];
        assert!(matches!(
            lookup_stream_entry(&dict, &data, 1),
            Err(PdfError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_hybrid_offset_only_from_tables() {
        let mut trailer = Dict::new();
        trailer.set("XRefStm", 99i64);
        let table = XRef::Table {
            offset: 0,
            trailer: trailer.clone(),
            sections: vec![],
        };
        assert_eq!(table.hybrid_stream_offset(), Some(99));

        let mut dict = trailer;
        dict.set("Type", Object::Name(Name::from("XRef")));
        let stream = XRef::Stream {
            reference: Ref::new(1, 0),
            dict,
            payload: 0,
        };
        assert_eq!(stream.hybrid_stream_offset(), None);
    }
}
