//! Document handle: xref chain traversal, object lookup, stream reading
//!
//! A `Document` owns the underlying byte source and the encryption state
//! fixed at open. It keeps no object or xref cache; every lookup walks
//! the chain newest to oldest, so higher layers decide what to cache.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use log::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::crypt::{authenticate, Decryptor};
use crate::error::{PdfError, PdfResult};
use crate::filter::{self, Filter};
use crate::object::{Dict, Object, Ref, Stream};
use crate::parser;
use crate::xref::{self, XRef, XRefEntry};

/// How far before end-of-file the `startxref` marker is searched for
const STARTXREF_SCAN: u64 = 1024;

/// A single-threaded handle to one PDF file
pub struct Document<R: Read + Seek> {
    buffer: Buffer<R>,
    version: (u32, u32),
    start_xref: u64,
    trailer: Dict,
    /// Resolved encryption dictionary and first file ID, kept so the
    /// password can be retried after open
    encrypt: Option<(Dict, Vec<u8>)>,
    decryptor: Option<Decryptor>,
}

impl<R: Read + Seek> Document<R> {
    /// Open a document: check the header, locate the newest xref and set
    /// up encryption. An encrypted document is opened with the empty
    /// user password; if that is rejected, the document still opens and
    /// [`Document::set_user_password`] authenticates later.
    pub fn new(source: R) -> PdfResult<Self> {
        let mut buffer = Buffer::new(source)?;
        let version = read_header(&mut buffer)?;
        let start_xref = find_start_xref(&mut buffer)?;
        debug!("document version {}.{}, xref at {start_xref}", version.0, version.1);

        let newest = xref::read_xref_at(&mut buffer, start_xref)?;
        let trailer = newest.trailer().clone();

        let mut document = Self {
            buffer,
            version,
            start_xref,
            trailer,
            encrypt: None,
            decryptor: None,
        };
        document.setup_encryption()?;
        Ok(document)
    }

    /// Header version as (major, minor)
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    /// The trailer of the newest xref
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt.is_some()
    }

    /// The active decryptor, once a password has verified
    pub fn decryptor(&self) -> Option<&Decryptor> {
        self.decryptor.as_ref()
    }

    /// Authenticate a user password. On failure the previously
    /// authenticated state, if any, is kept.
    pub fn set_user_password(&mut self, password: &[u8]) -> PdfResult<()> {
        match &self.encrypt {
            None => Ok(()),
            Some((encrypt, file_id)) => {
                let decryptor = authenticate(encrypt, file_id, password)?;
                self.decryptor = Some(decryptor);
                Ok(())
            }
        }
    }

    fn setup_encryption(&mut self) -> PdfResult<()> {
        let encrypt_value = match self.trailer.get(b"Encrypt") {
            Some(value) => value.clone(),
            None => return Ok(()),
        };
        // Resolved before any decryptor exists, so O and U stay raw.
        let encrypt = match self.deref(encrypt_value)? {
            Object::Dict(dict) => dict,
            other => {
                return Err(PdfError::corrupted(
                    format!("Encrypt is {}", other.type_name()),
                    "setting up encryption",
                ))
            }
        };
        let file_id = match self.trailer.get(b"ID") {
            Some(Object::Array(items)) if !items.is_empty() => {
                items[0].as_string().map(|s| s.to_vec()).unwrap_or_default()
            }
            _ => {
                warn!("encrypted document without a file ID");
                Vec::new()
            }
        };

        match authenticate(&encrypt, &file_id, b"") {
            Ok(decryptor) => {
                debug!("empty user password accepted");
                self.decryptor = Some(decryptor);
            }
            Err(PdfError::AuthenticationFailed) => {
                warn!("empty user password rejected, waiting for set_user_password");
            }
            Err(other) => return Err(other),
        }
        self.encrypt = Some((encrypt, file_id));
        Ok(())
    }

    /// Walk the xref chain newest to oldest and return the first entry
    /// covering `number`. `None` means no xref mentions the object.
    pub fn lookup_entry(&mut self, number: u32) -> PdfResult<Option<XRefEntry>> {
        let mut pending = vec![self.start_xref];
        let mut visited: HashSet<u64> = HashSet::new();

        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                return Err(PdfError::corrupted(
                    "xref chain loops",
                    format!("xref entry for object {number}"),
                ));
            }
            let current = xref::read_xref_at(&mut self.buffer, offset)?;
            trace!("xref at {offset} while resolving object {number}");
            // Stack order: the hybrid stream, when present, is consulted
            // right after its table and before Prev.
            if let Some(prev) = current.prev_offset()? {
                pending.push(prev);
            }
            if let Some(hybrid) = current.hybrid_stream_offset() {
                pending.push(hybrid);
            }
            if let Some(entry) = self.entry_in(&current, number)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn entry_in(&mut self, current: &XRef, number: u32) -> PdfResult<Option<XRefEntry>> {
        match current {
            XRef::Table { sections, .. } => {
                for section in sections {
                    if section.contains(number) {
                        return xref::read_table_entry(&mut self.buffer, section, number).map(Some);
                    }
                }
                Ok(None)
            }
            XRef::Stream { dict, payload, .. } => {
                let data = self.xref_stream_data(dict, *payload)?;
                xref::lookup_stream_entry(dict, &data, number)
            }
        }
    }

    /// Decode the payload of an xref stream. Such streams are never
    /// encrypted and their `Length` must be direct, since resolving an
    /// indirect value here would recurse into the lookup being served.
    fn xref_stream_data(&mut self, dict: &Dict, payload: u64) -> PdfResult<Vec<u8>> {
        let length = dict
            .get(b"Length")
            .ok_or_else(|| PdfError::corrupted("missing Length", "reading xref stream"))?
            .as_integer()
            .map_err(|_| {
                PdfError::corrupted("xref stream Length must be direct", "reading xref stream")
            })?;
        self.buffer.seek(payload)?;
        let raw = self.buffer.read_exact_vec(length as usize)?;

        let (names, parms) = resolve_filter_chain_direct(dict)?;
        let mut filters = Vec::with_capacity(names.len());
        for name in &names {
            filters.push(Filter::from_name(name)?);
        }
        filter::decode_chain(&filters, &parms, raw)
    }

    /// Fetch the object an entry points at. Free and absent entries
    /// yield `Null`.
    pub fn lookup_object(&mut self, reference: Ref) -> PdfResult<Object> {
        let context = || {
            format!(
                "object {} generation {}",
                reference.number, reference.generation
            )
        };
        match self.lookup_entry(reference.number)? {
            None | Some(XRefEntry::Free { .. }) => Ok(Object::Null),
            Some(XRefEntry::InUse { offset, generation }) => {
                if generation != reference.generation {
                    return Err(PdfError::corrupted(
                        format!("entry has generation {generation}"),
                        context(),
                    ));
                }
                self.buffer.seek(offset)?;
                let indirect = parser::parse_indirect_object(&mut self.buffer)?;
                if indirect.reference.number != reference.number {
                    return Err(PdfError::corrupted(
                        format!("found object {} instead", indirect.reference.number),
                        context(),
                    ));
                }
                let mut object = indirect.object;
                if let Some(decryptor) = &self.decryptor {
                    decryptor.decrypt_strings(&mut object, reference)?;
                }
                Ok(object)
            }
            Some(XRefEntry::Compressed { container, index }) => {
                if reference.generation != 0 {
                    return Err(PdfError::corrupted(
                        "compressed objects have generation 0",
                        context(),
                    ));
                }
                self.lookup_compressed(container, index, reference)
            }
        }
    }

    /// Resolve a top-level reference by one lookup; anything else passes
    /// through unchanged. Not recursive into compound values.
    pub fn deref(&mut self, object: Object) -> PdfResult<Object> {
        match object {
            Object::Reference(reference) => self.lookup_object(reference),
            other => Ok(other),
        }
    }

    fn lookup_compressed(&mut self, container: u32, index: u32, target: Ref) -> PdfResult<Object> {
        let context = || format!("object {} in object stream {container}", target.number);
        trace!("resolving object {} from object stream {container}", target.number);

        let offset = match self.lookup_entry(container)? {
            Some(XRefEntry::InUse {
                offset,
                generation: 0,
            }) => offset,
            _ => {
                return Err(PdfError::corrupted(
                    "container is not an in-use object",
                    context(),
                ))
            }
        };
        self.buffer.seek(offset)?;
        let indirect = parser::parse_indirect_object(&mut self.buffer)?;
        let stream = match indirect.object {
            Object::Stream(stream) => stream,
            other => {
                return Err(PdfError::corrupted(
                    format!("container is {}", other.type_name()),
                    context(),
                ))
            }
        };
        match stream.dict.get(b"Type") {
            Some(Object::Name(name)) if *name == "ObjStm" => {}
            _ => {
                return Err(PdfError::corrupted(
                    "container is not of Type ObjStm",
                    context(),
                ))
            }
        }

        let count = stream
            .dict
            .get(b"N")
            .and_then(|value| value.as_integer().ok())
            .ok_or_else(|| PdfError::corrupted("missing N", context()))?;
        let first = stream
            .dict
            .get(b"First")
            .and_then(|value| value.as_integer().ok())
            .ok_or_else(|| PdfError::corrupted("missing First", context()))?;

        // Container-level decryption only; the contained objects come
        // out of the decoded bytes as plaintext.
        let data = self.stream_content(Ref::new(container, 0), &stream)?;
        let mut decoded = Buffer::new(Cursor::new(data))?;

        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let number = parser::parse_unsigned(&mut decoded)? as u32;
            let relative = parser::parse_unsigned(&mut decoded)?;
            pairs.push((number, relative));
        }
        let &(number, relative) = pairs
            .get(index as usize)
            .ok_or_else(|| PdfError::corrupted(format!("index {index} beyond N={count}"), context()))?;
        if number != target.number {
            return Err(PdfError::corrupted(
                format!("prologue names object {number}"),
                context(),
            ));
        }
        decoded.seek(first as u64 + relative)?;
        parser::parse_object(&mut decoded)
    }

    /// The undecoded payload bytes of a stream, `Length` resolved first
    pub fn raw_stream_content(&mut self, stream: &Stream) -> PdfResult<Vec<u8>> {
        let length = self.stream_length(stream)?;
        self.buffer.seek(stream.offset)?;
        self.buffer.read_exact_vec(length as usize)
    }

    /// The decoded payload of a stream: exactly `Length` raw bytes,
    /// decrypted when encryption is active and the stream is not exempt,
    /// then run through the filter pipeline. Seeks on entry, so repeated
    /// and abandoned reads are safe.
    pub fn stream_content(&mut self, reference: Ref, stream: &Stream) -> PdfResult<Vec<u8>> {
        let raw = self.raw_stream_content(stream)?;
        let (names, parms) = self.resolve_filter_chain(&stream.dict)?;

        // An identity Crypt filter marks the stream exempt from document
        // decryption and disappears from the pipeline.
        let mut filters = Vec::new();
        let mut stage_parms = Vec::new();
        let mut crypt_exempt = false;
        for (i, name) in names.iter().enumerate() {
            let parm = parms.get(i).cloned().flatten();
            if name.as_slice() == b"Crypt" {
                let crypt_name = parm.as_ref().and_then(|p| p.get(b"Name").cloned());
                match crypt_name {
                    None => {}
                    Some(Object::Name(n)) if n == "Identity" => {}
                    Some(other) => {
                        return Err(PdfError::UnsupportedFeature(format!(
                            "crypt filter {other:?}"
                        )))
                    }
                }
                crypt_exempt = true;
                continue;
            }
            filters.push(Filter::from_name(name)?);
            stage_parms.push(parm);
        }

        let exempt = crypt_exempt || self.metadata_exempt(&stream.dict);
        let data = match (&self.decryptor, exempt) {
            (Some(decryptor), false) => decryptor.decrypt(reference, &raw)?,
            _ => raw,
        };
        filter::decode_chain(&filters, &stage_parms, data)
    }

    /// The metadata stream is exempt when `EncryptMetadata` is false
    fn metadata_exempt(&self, dict: &Dict) -> bool {
        match &self.decryptor {
            Some(decryptor) if !decryptor.encrypt_metadata() => matches!(
                dict.get(b"Type"),
                Some(Object::Name(name)) if *name == "Metadata"
            ),
            _ => false,
        }
    }

    fn stream_length(&mut self, stream: &Stream) -> PdfResult<u64> {
        let value = stream
            .dict
            .get(b"Length")
            .cloned()
            .ok_or_else(|| PdfError::corrupted("missing Length", "reading stream"))?;
        let length = self
            .deref(value)?
            .as_integer()
            .map_err(|_| PdfError::corrupted("Length is not an integer", "reading stream"))?;
        if length < 0 {
            return Err(PdfError::corrupted("negative Length", "reading stream"));
        }
        Ok(length as u64)
    }

    /// Resolve `Filter`/`DecodeParms`, following indirect references
    fn resolve_filter_chain(&mut self, dict: &Dict) -> PdfResult<(Vec<Vec<u8>>, Vec<Option<Dict>>)> {
        let names = match dict.get(b"Filter").cloned() {
            None => Vec::new(),
            Some(value) => match self.deref(value)? {
                Object::Null => Vec::new(),
                Object::Name(name) => vec![name.as_bytes().to_vec()],
                Object::Array(items) => {
                    let mut names = Vec::with_capacity(items.len());
                    for item in items {
                        let name = self.deref(item)?;
                        names.push(
                            name.as_name()
                                .map_err(|_| {
                                    PdfError::corrupted("Filter array holds a non-name", "reading stream")
                                })?
                                .as_bytes()
                                .to_vec(),
                        );
                    }
                    names
                }
                other => {
                    return Err(PdfError::corrupted(
                        format!("Filter is {}", other.type_name()),
                        "reading stream",
                    ))
                }
            },
        };
        let parms = match dict.get(b"DecodeParms").cloned() {
            None => Vec::new(),
            Some(value) => match self.deref(value)? {
                Object::Null => Vec::new(),
                Object::Dict(parm) => vec![Some(parm)],
                Object::Array(items) => {
                    let mut parms = Vec::with_capacity(items.len());
                    for item in items {
                        match self.deref(item)? {
                            Object::Dict(parm) => parms.push(Some(parm)),
                            Object::Null => parms.push(None),
                            other => {
                                return Err(PdfError::corrupted(
                                    format!("DecodeParms array holds {}", other.type_name()),
                                    "reading stream",
                                ))
                            }
                        }
                    }
                    parms
                }
                other => {
                    return Err(PdfError::corrupted(
                        format!("DecodeParms is {}", other.type_name()),
                        "reading stream",
                    ))
                }
            },
        };
        Ok((names, parms))
    }
}

/// Direct-only variant of the filter chain resolution, for xref streams
fn resolve_filter_chain_direct(dict: &Dict) -> PdfResult<(Vec<Vec<u8>>, Vec<Option<Dict>>)> {
    let names = match dict.get(b"Filter") {
        None => Vec::new(),
        Some(Object::Name(name)) => vec![name.as_bytes().to_vec()],
        Some(Object::Array(items)) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                names.push(
                    item.as_name()
                        .map_err(|_| {
                            PdfError::corrupted("Filter array holds a non-name", "reading xref stream")
                        })?
                        .as_bytes()
                        .to_vec(),
                );
            }
            names
        }
        Some(other) => {
            return Err(PdfError::corrupted(
                format!("Filter is {}", other.type_name()),
                "reading xref stream",
            ))
        }
    };
    let parms = match dict.get(b"DecodeParms") {
        None => Vec::new(),
        Some(Object::Dict(parm)) => vec![Some(parm.clone())],
        Some(Object::Array(items)) => {
            let mut parms = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Object::Dict(parm) => parms.push(Some(parm.clone())),
                    Object::Null => parms.push(None),
                    other => {
                        return Err(PdfError::corrupted(
                            format!("DecodeParms array holds {}", other.type_name()),
                            "reading xref stream",
                        ))
                    }
                }
            }
            parms
        }
        Some(other) => {
            return Err(PdfError::corrupted(
                format!("DecodeParms is {}", other.type_name()),
                "reading xref stream",
            ))
        }
    };
    Ok((names, parms))
}

/// Find `%PDF-<major>.<minor>` near the start of the file
fn read_header<R: Read + Seek>(buffer: &mut Buffer<R>) -> PdfResult<(u32, u32)> {
    buffer.seek(0)?;
    let window = buffer.read_exact_vec(buffer.len().min(1024) as usize)?;
    let at = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| PdfError::corrupted("missing %PDF header", "opening document"))?;
    if at != 0 {
        warn!("header found at offset {at}");
    }
    let digits = &window[at + 5..];
    let major_len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
    let major: u32 = std::str::from_utf8(&digits[..major_len])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PdfError::corrupted("malformed header version", "opening document"))?;
    if digits.get(major_len) != Some(&b'.') {
        return Err(PdfError::corrupted("malformed header version", "opening document"));
    }
    let rest = &digits[major_len + 1..];
    let minor_len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    let minor: u32 = std::str::from_utf8(&rest[..minor_len])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PdfError::corrupted("malformed header version", "opening document"))?;
    Ok((major, minor))
}

/// Locate `startxref <offset>` followed by `%%EOF` in the file tail,
/// tolerating trailing whitespace and comments
fn find_start_xref<R: Read + Seek>(buffer: &mut Buffer<R>) -> PdfResult<u64> {
    let (_, tail) = buffer.read_tail(STARTXREF_SCAN)?;
    let keyword = b"startxref";
    let at = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| PdfError::corrupted("missing startxref", "opening document"))?;

    let mut rest = &tail[at + keyword.len()..];
    while let Some((&byte, remainder)) = rest.split_first() {
        if parser::is_whitespace(byte) {
            rest = remainder;
        } else {
            break;
        }
    }
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(PdfError::corrupted("startxref offset missing", "opening document"));
    }
    let offset: u64 = std::str::from_utf8(&rest[..digits])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PdfError::corrupted("startxref offset malformed", "opening document"))?;

    if !rest[digits..].windows(5).any(|w| w == b"%%EOF") {
        return Err(PdfError::corrupted("missing %%EOF", "opening document"));
    }
    Ok(offset)
}
