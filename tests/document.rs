//! End-to-end fixture tests: documents are assembled with the writer and
//! read back through the document API.

use std::collections::BTreeMap;
use std::io::Cursor;

use pdfcore::filter::Filter;
use pdfcore::{Dict, Document, IndirectObject, Object, Ref, Writer, XRefEntry};

/// Assembles a single-revision file with a classic xref table
struct DocBuilder {
    writer: Writer<Vec<u8>>,
    entries: BTreeMap<u32, XRefEntry>,
}

impl DocBuilder {
    fn new() -> Self {
        let mut writer = Writer::new(Vec::new());
        writer.write_header(1, 4).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(
            0,
            XRefEntry::Free {
                next_free: 0,
                generation: 65535,
            },
        );
        Self { writer, entries }
    }

    fn offset(&self) -> u64 {
        self.writer.get_ref().len() as u64
    }

    fn add(&mut self, number: u32, object: Object) {
        let offset = self.offset();
        self.entries
            .insert(number, XRefEntry::InUse { offset, generation: 0 });
        self.writer
            .write_indirect_object(&IndirectObject {
                reference: Ref::new(number, 0),
                object,
            })
            .unwrap();
    }

    fn add_stream(&mut self, number: u32, dict: Dict, payload: &[u8]) {
        let offset = self.offset();
        self.entries
            .insert(number, XRefEntry::InUse { offset, generation: 0 });
        self.writer
            .write_stream_object(Ref::new(number, 0), &dict, payload)
            .unwrap();
    }

    fn finish(mut self, mut trailer: Dict) -> Vec<u8> {
        let start_xref = self.offset();
        let size = self.entries.keys().max().copied().unwrap_or(0) + 1;
        trailer.set("Size", size as i64);
        self.writer.write_xref_table(&self.entries).unwrap();
        self.writer.write_trailer(&trailer, start_xref).unwrap();
        self.writer.into_inner()
    }
}

fn open(bytes: Vec<u8>) -> Document<Cursor<Vec<u8>>> {
    Document::new(Cursor::new(bytes)).unwrap()
}

fn catalog() -> Object {
    let mut dict = Dict::new();
    dict.set("Type", Object::name("Catalog"));
    dict.set("Pages", Object::reference(2, 0));
    Object::Dict(dict)
}

#[test]
fn minimal_document_lookup_and_deref() {
    let mut builder = DocBuilder::new();
    builder.add(1, catalog());
    let mut pages = Dict::new();
    pages.set("Type", Object::name("Pages"));
    pages.set("Kids", Object::Array(vec![Object::reference(3, 0)]));
    pages.set("Count", 1i64);
    builder.add(2, Object::Dict(pages));
    let mut page = Dict::new();
    page.set("Type", Object::name("Page"));
    page.set("Parent", Object::reference(2, 0));
    page.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ]),
    );
    builder.add(3, Object::Dict(page));

    let mut trailer = Dict::new();
    trailer.set("Root", Object::reference(1, 0));
    let mut doc = open(builder.finish(trailer));

    assert_eq!(doc.trailer().get(b"Size").unwrap(), &Object::Integer(4));

    let page = doc.lookup_object(Ref::new(3, 0)).unwrap();
    let page = page.as_dict().unwrap();
    assert_eq!(page.get(b"Type").unwrap(), &Object::name("Page"));
    assert_eq!(
        page.get(b"MediaBox").unwrap().as_rectangle().unwrap(),
        [0.0, 0.0, 612.0, 792.0]
    );

    let pages = doc.deref(Object::reference(2, 0)).unwrap();
    let kids = pages.as_dict().unwrap().get(b"Kids").unwrap().as_array().unwrap();
    assert_eq!(kids, [Object::reference(3, 0)]);

    // deref passes non-references through unchanged.
    assert_eq!(doc.deref(Object::Integer(5)).unwrap(), Object::Integer(5));

    // Lookups are stable.
    assert_eq!(
        doc.lookup_object(Ref::new(3, 0)).unwrap(),
        doc.lookup_object(Ref::new(3, 0)).unwrap()
    );
}

#[test]
fn prev_chain_newer_entries_win() {
    // Revision 1: three objects behind a classic table.
    let mut writer = Writer::new(Vec::new());
    writer.write_header(1, 4).unwrap();
    let mut first_entries = BTreeMap::new();
    first_entries.insert(
        0,
        XRefEntry::Free {
            next_free: 0,
            generation: 65535,
        },
    );
    let mut versioned = Dict::new();
    versioned.set("Version", 1i64);
    for (number, object) in [
        (1u32, catalog()),
        (2, Object::Dict(versioned)),
        (3, Object::string("only in the old revision")),
    ] {
        first_entries.insert(
            number,
            XRefEntry::InUse {
                offset: writer.get_ref().len() as u64,
                generation: 0,
            },
        );
        writer
            .write_indirect_object(&IndirectObject {
                reference: Ref::new(number, 0),
                object,
            })
            .unwrap();
    }
    let first_xref = writer.get_ref().len() as u64;
    let mut first_trailer = Dict::new();
    first_trailer.set("Size", 4i64);
    first_trailer.set("Root", Object::reference(1, 0));
    writer.write_xref_table(&first_entries).unwrap();
    writer.write_trailer(&first_trailer, first_xref).unwrap();

    // Revision 2: object 2 updated, object 3 freed, Prev links back.
    let updated_offset = writer.get_ref().len() as u64;
    let mut updated = Dict::new();
    updated.set("Version", 2i64);
    writer
        .write_indirect_object(&IndirectObject {
            reference: Ref::new(2, 0),
            object: Object::Dict(updated),
        })
        .unwrap();
    let second_xref = writer.get_ref().len() as u64;
    let mut second_entries = BTreeMap::new();
    second_entries.insert(
        2,
        XRefEntry::InUse {
            offset: updated_offset,
            generation: 0,
        },
    );
    second_entries.insert(
        3,
        XRefEntry::Free {
            next_free: 0,
            generation: 1,
        },
    );
    let mut second_trailer = Dict::new();
    second_trailer.set("Size", 4i64);
    second_trailer.set("Root", Object::reference(1, 0));
    second_trailer.set("Prev", first_xref as i64);
    writer.write_xref_table(&second_entries).unwrap();
    writer.write_trailer(&second_trailer, second_xref).unwrap();

    let mut doc = open(writer.into_inner());

    // The overridden object resolves through the newer table.
    assert_eq!(
        doc.lookup_entry(2).unwrap(),
        Some(XRefEntry::InUse {
            offset: updated_offset,
            generation: 0
        })
    );
    let object = doc.lookup_object(Ref::new(2, 0)).unwrap();
    assert_eq!(
        object.as_dict().unwrap().get(b"Version").unwrap(),
        &Object::Integer(2)
    );

    // Freeing in the newer revision masks the older in-use entry.
    assert_eq!(doc.lookup_object(Ref::new(3, 0)).unwrap(), Object::Null);

    // Objects untouched by the update resolve through Prev.
    let object = doc.lookup_object(Ref::new(1, 0)).unwrap();
    assert_eq!(
        object.as_dict().unwrap().get(b"Type").unwrap(),
        &Object::name("Catalog")
    );
}

#[test]
fn xref_stream_with_object_stream() {
    let mut writer = Writer::new(Vec::new());
    writer.write_header(1, 5).unwrap();
    let mut offsets = [0u64; 6];

    offsets[1] = writer.get_ref().len() as u64;
    writer
        .write_indirect_object(&IndirectObject {
            reference: Ref::new(1, 0),
            object: catalog(),
        })
        .unwrap();

    offsets[2] = writer.get_ref().len() as u64;
    writer
        .write_indirect_object(&IndirectObject {
            reference: Ref::new(2, 0),
            object: Object::string("plain neighbour"),
        })
        .unwrap();

    // Object 3 lives at index 0 of the object stream in object 4.
    let body = b"<< /Kind /Embedded /Vals [1 2 3] >>";
    let prologue = b"3 0 ";
    let mut payload = prologue.to_vec();
    payload.extend_from_slice(body);
    let mut container = Dict::new();
    container.set("Type", Object::name("ObjStm"));
    container.set("N", 1i64);
    container.set("First", prologue.len() as i64);
    offsets[4] = writer.get_ref().len() as u64;
    writer
        .write_stream_object(Ref::new(4, 0), &container, &payload)
        .unwrap();

    // The xref stream itself, W = [1 2 1], Index = [0 6].
    offsets[5] = writer.get_ref().len() as u64;
    let mut rows = Vec::new();
    let mut push_row = |kind: u8, mid: u64, low: u8| {
        rows.push(kind);
        rows.extend_from_slice(&(mid as u16).to_be_bytes());
        rows.push(low);
    };
    push_row(0, 0, 0);
    push_row(1, offsets[1], 0);
    push_row(1, offsets[2], 0);
    push_row(2, 4, 0);
    push_row(1, offsets[4], 0);
    push_row(1, offsets[5], 0);

    let mut xref_dict = Dict::new();
    xref_dict.set("Type", Object::name("XRef"));
    xref_dict.set("Size", 6i64);
    xref_dict.set(
        "W",
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(2),
            Object::Integer(1),
        ]),
    );
    xref_dict.set(
        "Index",
        Object::Array(vec![Object::Integer(0), Object::Integer(6)]),
    );
    xref_dict.set("Root", Object::reference(1, 0));
    writer
        .write_stream_object(Ref::new(5, 0), &xref_dict, &rows)
        .unwrap();

    let mut bytes = writer.into_inner();
    bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", offsets[5]).as_bytes());

    let mut doc = open(bytes);
    assert_eq!(doc.trailer().get(b"Root").unwrap(), &Object::reference(1, 0));

    assert_eq!(
        doc.lookup_entry(3).unwrap(),
        Some(XRefEntry::Compressed {
            container: 4,
            index: 0
        })
    );
    let embedded = doc.lookup_object(Ref::new(3, 0)).unwrap();
    let embedded = embedded.as_dict().unwrap();
    assert_eq!(embedded.get(b"Kind").unwrap(), &Object::name("Embedded"));
    assert_eq!(
        embedded.get(b"Vals").unwrap(),
        &Object::Array(vec![
            Object::Integer(1),
            Object::Integer(2),
            Object::Integer(3)
        ])
    );

    assert_eq!(
        doc.lookup_object(Ref::new(2, 0)).unwrap(),
        Object::string("plain neighbour")
    );
}

#[test]
fn hybrid_table_consults_xref_stream_before_prev() {
    let mut writer = Writer::new(Vec::new());
    writer.write_header(1, 5).unwrap();

    let catalog_at = writer.get_ref().len() as u64;
    writer
        .write_indirect_object(&IndirectObject {
            reference: Ref::new(1, 0),
            object: catalog(),
        })
        .unwrap();

    // Object 3 is reachable only through the hybrid stream xref.
    let hidden_at = writer.get_ref().len() as u64;
    writer
        .write_indirect_object(&IndirectObject {
            reference: Ref::new(3, 0),
            object: Object::string("via XRefStm"),
        })
        .unwrap();

    let stream_xref_at = writer.get_ref().len() as u64;
    let mut rows = Vec::new();
    for offset in [hidden_at, stream_xref_at] {
        rows.push(1u8);
        rows.extend_from_slice(&(offset as u16).to_be_bytes());
        rows.push(0u8);
    }
    let mut stream_dict = Dict::new();
    stream_dict.set("Type", Object::name("XRef"));
    stream_dict.set("Size", 5i64);
    stream_dict.set(
        "W",
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(2),
            Object::Integer(1),
        ]),
    );
    stream_dict.set(
        "Index",
        Object::Array(vec![Object::Integer(3), Object::Integer(2)]),
    );
    writer
        .write_stream_object(Ref::new(4, 0), &stream_dict, &rows)
        .unwrap();

    // The classic table covers objects 0 and 1 and names the stream
    // xref through XRefStm.
    let table_at = writer.get_ref().len() as u64;
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
            offset: catalog_at,
            generation: 0,
        },
    );
    let mut trailer = Dict::new();
    trailer.set("Size", 5i64);
    trailer.set("Root", Object::reference(1, 0));
    trailer.set("XRefStm", stream_xref_at as i64);
    writer.write_xref_table(&entries).unwrap();
    writer.write_trailer(&trailer, table_at).unwrap();

    let mut doc = open(writer.into_inner());
    assert_eq!(
        doc.lookup_object(Ref::new(3, 0)).unwrap(),
        Object::string("via XRefStm")
    );
    assert_eq!(
        doc.lookup_object(Ref::new(1, 0)).unwrap(),
        catalog()
    );
}

#[test]
fn flate_stream_with_png_up_predictor() {
    let original: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

    // PNG Up rows over four columns: tag byte 2, then the row deltas.
    let mut predicted = Vec::new();
    let mut previous = [0u8; 4];
    for row in original.chunks(4) {
        predicted.push(2u8);
        for (i, &value) in row.iter().enumerate() {
            predicted.push(value.wrapping_sub(previous[i]));
        }
        previous.copy_from_slice(row);
    }
    let compressed = Filter::Flate.encode(&predicted).unwrap();

    let mut builder = DocBuilder::new();
    builder.add(1, catalog());
    let mut stream_dict = Dict::new();
    stream_dict.set("Filter", Object::name("FlateDecode"));
    let mut parms = Dict::new();
    parms.set("Predictor", 12i64);
    parms.set("Columns", 4i64);
    stream_dict.set("DecodeParms", Object::Dict(parms));
    builder.add_stream(2, stream_dict, &compressed);

    let mut trailer = Dict::new();
    trailer.set("Root", Object::reference(1, 0));
    let mut doc = open(builder.finish(trailer));

    let stream = doc.lookup_object(Ref::new(2, 0)).unwrap();
    let stream = stream.as_stream().unwrap().clone();
    assert_eq!(doc.stream_content(Ref::new(2, 0), &stream).unwrap(), original);
}

#[test]
fn zero_length_stream_readable() {
    let mut builder = DocBuilder::new();
    builder.add(1, catalog());
    builder.add_stream(2, Dict::new(), b"");
    let mut trailer = Dict::new();
    trailer.set("Root", Object::reference(1, 0));
    let mut doc = open(builder.finish(trailer));

    let stream = doc.lookup_object(Ref::new(2, 0)).unwrap();
    let stream = stream.as_stream().unwrap().clone();
    assert_eq!(doc.stream_content(Ref::new(2, 0), &stream).unwrap(), b"");
}

#[test]
fn indirect_length_resolved_before_reading() {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    let mut entries = BTreeMap::new();
    entries.insert(
        0,
        XRefEntry::Free {
            next_free: 0,
            generation: 65535,
        },
    );

    let mut record = |entries: &mut BTreeMap<u32, XRefEntry>, number: u32, at: usize| {
        entries.insert(
            number,
            XRefEntry::InUse {
                offset: at as u64,
                generation: 0,
            },
        );
    };

    record(&mut entries, 1, bytes.len());
    bytes.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
    record(&mut entries, 2, bytes.len());
    bytes.extend_from_slice(b"2 0 obj\n<< /Length 3 0 R >>\nstream\nhello\nendstream\nendobj\n");
    record(&mut entries, 3, bytes.len());
    bytes.extend_from_slice(b"3 0 obj\n5\nendobj\n");

    let start_xref = bytes.len() as u64;
    let mut trailer = Dict::new();
    trailer.set("Size", 4i64);
    trailer.set("Root", Object::reference(1, 0));
    {
        let mut writer = Writer::new(&mut bytes);
        writer.write_xref_table(&entries).unwrap();
        writer.write_trailer(&trailer, start_xref).unwrap();
    }

    let mut doc = open(bytes);
    let stream = doc.lookup_object(Ref::new(2, 0)).unwrap();
    let stream = stream.as_stream().unwrap().clone();
    assert_eq!(
        stream.dict.get(b"Length").unwrap(),
        &Object::reference(3, 0)
    );
    assert_eq!(doc.stream_content(Ref::new(2, 0), &stream).unwrap(), b"hello");
}

#[test]
fn written_file_reopens_identically() {
    // parse(write(...)) over a whole document: build, open, rewrite the
    // objects it contains, and check the object graph survives.
    let mut builder = DocBuilder::new();
    builder.add(1, catalog());
    let mut info = Dict::new();
    info.set("Title", Object::string("round trip"));
    info.set("Weights", Object::Array(vec![Object::Real(0.5), Object::Integer(2)]));
    builder.add(2, Object::Dict(info));
    let mut trailer = Dict::new();
    trailer.set("Root", Object::reference(1, 0));
    let mut doc = open(builder.finish(trailer));

    let original = doc.lookup_object(Ref::new(2, 0)).unwrap();

    let mut rewritten = DocBuilder::new();
    rewritten.add(1, catalog());
    rewritten.add(2, original.clone());
    let mut trailer = Dict::new();
    trailer.set("Root", Object::reference(1, 0));
    let mut reopened = open(rewritten.finish(trailer));

    assert_eq!(reopened.lookup_object(Ref::new(2, 0)).unwrap(), original);
}
