//! Re-serializer for objects, indirect objects and xref tables
//!
//! Output is the canonical textual form: dictionary keys keep insertion
//! order, streams refresh their `Length`, and a cross-reference table
//! gets one subsection per contiguous run of object numbers.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::{PdfError, PdfResult};
use crate::object::{Dict, IndirectObject, Object, Ref};
use crate::xref::XRefEntry;

/// Serializer over any byte sink
pub struct Writer<W: Write> {
    out: W,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write the `%PDF-<major>.<minor>` header line
    pub fn write_header(&mut self, major: u32, minor: u32) -> PdfResult<()> {
        write!(self.out, "%PDF-{major}.{minor}\n")?;
        Ok(())
    }

    /// Serialize one object value. Stream objects carry no payload in
    /// the object model and go through [`Writer::write_stream_object`].
    pub fn write_object(&mut self, object: &Object) -> PdfResult<()> {
        match object {
            Object::Null => self.out.write_all(b"null")?,
            Object::Boolean(true) => self.out.write_all(b"true")?,
            Object::Boolean(false) => self.out.write_all(b"false")?,
            Object::Integer(n) => write!(self.out, "{n}")?,
            Object::Real(r) => self.write_real(*r)?,
            Object::String(s) => self.write_literal_string(s)?,
            Object::Name(n) => {
                self.out.write_all(b"/")?;
                self.out.write_all(&n.escaped())?;
            }
            Object::Array(items) => {
                self.out.write_all(b"[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.write_all(b" ")?;
                    }
                    self.write_object(item)?;
                }
                self.out.write_all(b"]")?;
            }
            Object::Dict(dict) => self.write_dict(dict)?,
            Object::Reference(r) => write!(self.out, "{} {} R", r.number, r.generation)?,
            Object::Stream(_) => {
                return Err(PdfError::corrupted(
                    "stream payloads are written with write_stream_object",
                    "writing object",
                ))
            }
        }
        Ok(())
    }

    /// Write `N G obj <value> endobj`
    pub fn write_indirect_object(&mut self, indirect: &IndirectObject) -> PdfResult<()> {
        write!(
            self.out,
            "{} {} obj\n",
            indirect.reference.number, indirect.reference.generation
        )?;
        self.write_object(&indirect.object)?;
        self.out.write_all(b"\nendobj\n")?;
        Ok(())
    }

    /// Write an indirect stream object. The dictionary is emitted with
    /// `Length` set to the payload size.
    pub fn write_stream_object(&mut self, reference: Ref, dict: &Dict, payload: &[u8]) -> PdfResult<()> {
        let mut dict = dict.clone();
        dict.set("Length", payload.len() as i64);
        write!(self.out, "{} {} obj\n", reference.number, reference.generation)?;
        self.write_dict(&dict)?;
        self.out.write_all(b"\nstream\n")?;
        self.out.write_all(payload)?;
        self.out.write_all(b"\nendstream\nendobj\n")?;
        Ok(())
    }

    /// Write a cross-reference table, one subsection per contiguous run.
    /// Compressed entries cannot appear in a table.
    pub fn write_xref_table(&mut self, entries: &BTreeMap<u32, XRefEntry>) -> PdfResult<()> {
        self.out.write_all(b"xref\n")?;
        let numbers: Vec<u32> = entries.keys().copied().collect();
        let mut start = 0usize;
        while start < numbers.len() {
            let mut end = start + 1;
            while end < numbers.len() && numbers[end] == numbers[end - 1] + 1 {
                end += 1;
            }
            write!(self.out, "{} {}\n", numbers[start], end - start)?;
            for number in &numbers[start..end] {
                match entries[number] {
                    XRefEntry::InUse { offset, generation } => {
                        write!(self.out, "{offset:010} {generation:05} n\r\n")?
                    }
                    XRefEntry::Free {
                        next_free,
                        generation,
                    } => write!(self.out, "{next_free:010} {generation:05} f\r\n")?,
                    XRefEntry::Compressed { .. } => {
                        return Err(PdfError::corrupted(
                            "compressed entries cannot appear in a table",
                            "writing xref table",
                        ))
                    }
                }
            }
            start = end;
        }
        Ok(())
    }

    /// Write the `trailer` dictionary and the `startxref` epilogue
    pub fn write_trailer(&mut self, trailer: &Dict, start_xref: u64) -> PdfResult<()> {
        self.out.write_all(b"trailer\n")?;
        self.write_dict(trailer)?;
        write!(self.out, "\nstartxref\n{start_xref}\n%%EOF\n")?;
        Ok(())
    }

    fn write_dict(&mut self, dict: &Dict) -> PdfResult<()> {
        self.out.write_all(b"<<")?;
        for (key, value) in dict.iter() {
            self.out.write_all(b" /")?;
            self.out.write_all(&key.escaped())?;
            self.out.write_all(b" ")?;
            self.write_object(value)?;
        }
        self.out.write_all(b" >>")?;
        Ok(())
    }

    fn write_real(&mut self, value: f64) -> PdfResult<()> {
        if !value.is_finite() {
            return Err(PdfError::corrupted("non-finite real", "writing object"));
        }
        let mut text = value.to_string();
        // Keep a decimal marker so the value reads back as a real.
        if !text.contains(['.', 'e', 'E']) {
            text.push_str(".0");
        }
        self.out.write_all(text.as_bytes())?;
        Ok(())
    }

    fn write_literal_string(&mut self, bytes: &[u8]) -> PdfResult<()> {
        self.out.write_all(b"(")?;
        for &byte in bytes {
            match byte {
                b'(' | b')' | b'\\' => {
                    self.out.write_all(&[b'\\', byte])?;
                }
                b'\n' => self.out.write_all(b"\\n")?,
                b'\r' => self.out.write_all(b"\\r")?,
                b'\t' => self.out.write_all(b"\\t")?,
                0x08 => self.out.write_all(b"\\b")?,
                0x0C => self.out.write_all(b"\\f")?,
                0x20..=0x7E => self.out.write_all(&[byte])?,
                other => write!(self.out, "\\{other:03o}")?,
            }
        }
        self.out.write_all(b")")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::object::Name;
    use crate::parser;
    use std::io::Cursor;

    fn written(object: &Object) -> Vec<u8> {
        let mut writer = Writer::new(Vec::new());
        writer.write_object(object).unwrap();
        writer.into_inner()
    }

    fn reparsed(bytes: &[u8]) -> Object {
        let mut buf = Buffer::new(Cursor::new(bytes.to_vec())).unwrap();
        parser::parse_object(&mut buf).unwrap()
    }

    #[test]
    fn test_scalar_forms() {
        assert_eq!(written(&Object::Null), b"null");
        assert_eq!(written(&Object::Boolean(true)), b"true");
        assert_eq!(written(&Object::Integer(-42)), b"-42");
        assert_eq!(written(&Object::Real(2.0)), b"2.0");
        assert_eq!(written(&Object::Real(0.5)), b"0.5");
        assert_eq!(written(&Object::reference(3, 1)), b"3 1 R");
        assert_eq!(written(&Object::name(Name::new(b"A B".to_vec()))), b"/A#20B");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(written(&Object::string("plain")), b"(plain)");
        assert_eq!(written(&Object::string("a(b)c")), b"(a\\(b\\)c)");
        assert_eq!(
            written(&Object::string(b"\x01\xFF".to_vec())),
            b"(\\001\\377)"
        );
    }

    #[test]
    fn test_round_trip_property() {
        let mut dict = Dict::new();
        dict.set("Type", Object::name("Catalog"));
        dict.set("Pages", Object::reference(2, 0));
        dict.set("Score", Object::Real(-3.25));
        let samples = vec![
            Object::Null,
            Object::Boolean(false),
            Object::Integer(i64::MIN),
            Object::Real(100.0),
            Object::string(b"\x00binary\xFF()\\".to_vec()),
            Object::name(Name::new(b"odd name#".to_vec())),
            Object::Array(vec![
                Object::Integer(1),
                Object::reference(5, 0),
                Object::string("nested"),
            ]),
            Object::Dict(dict),
        ];
        for object in samples {
            let bytes = written(&object);
            assert_eq!(reparsed(&bytes), object, "round trip of {}", String::from_utf8_lossy(&bytes));
        }
    }

    #[test]
    fn test_dict_key_order_preserved() {
        let mut dict = Dict::new();
        dict.set("Zed", 1i64);
        dict.set("Alpha", 2i64);
        let bytes = written(&Object::Dict(dict));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("/Zed").unwrap() < text.find("/Alpha").unwrap());
    }

    #[test]
    fn test_indirect_object_form() {
        let indirect = IndirectObject {
            reference: Ref::new(7, 0),
            object: Object::Integer(9),
        };
        let mut writer = Writer::new(Vec::new());
        writer.write_indirect_object(&indirect).unwrap();
        assert_eq!(writer.into_inner(), b"7 0 obj\n9\nendobj\n");
    }

    #[test]
    fn test_stream_object_sets_length() {
        let mut dict = Dict::new();
        dict.set("Length", 999i64);
        let mut writer = Writer::new(Vec::new());
        writer
            .write_stream_object(Ref::new(4, 0), &dict, b"abcde")
            .unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.contains("/Length 5"));
        assert!(text.contains("stream\nabcde\nendstream"));
    }

    #[test]
    fn test_xref_table_runs() {
        let mut entries = BTreeMap::new();
        entries.insert(
            0,
            XRefEntry::Free {
                next_free: 0,
                generation: 65535,
            },
        );
        entries.insert(
            1,
            XRefEntry::InUse {
                offset: 17,
                generation: 0,
            },
        );
        entries.insert(
            2,
            XRefEntry::InUse {
                offset: 80,
                generation: 0,
            },
        );
        entries.insert(
            7,
            XRefEntry::InUse {
                offset: 300,
                generation: 1,
            },
        );
        let mut writer = Writer::new(Vec::new());
        writer.write_xref_table(&entries).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "xref\n\
             0 3\n\
             0000000000 65535 f\r\n\
             0000000017 00000 n\r\n\
             0000000080 00000 n\r\n\
             7 1\n\
             0000000300 00001 n\r\n"
        );
    }

    #[test]
    fn test_compressed_entry_rejected_in_table() {
        let mut entries = BTreeMap::new();
        entries.insert(
            1,
            XRefEntry::Compressed {
                container: 4,
                index: 0,
            },
        );
        let mut writer = Writer::new(Vec::new());
        assert!(writer.write_xref_table(&entries).is_err());
    }

    #[test]
    fn test_bare_stream_object_rejected() {
        let stream = crate::object::Stream::new(Dict::new(), 0);
        let mut writer = Writer::new(Vec::new());
        assert!(writer.write_object(&Object::Stream(stream)).is_err());
    }
}
