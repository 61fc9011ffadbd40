//! Low-level random-access library for the structural layer of PDF files
//!
//! The crate exposes the object-graph plumbing of PDF without any
//! document-level interpretation: the cross-reference chain, the trailer,
//! indirect objects, stream filter decoding and the Standard Security
//! Handler. Pages, fonts and content-stream operators are left to higher
//! layers, which build on [`Document::lookup_object`] and
//! [`Document::stream_content`].
//!
//! Objects are retrieved lazily; nothing caches and the whole file is
//! never loaded. A [`Document`] owns its byte source and is
//! single-threaded; wrap it externally if shared access is needed.
//!
//! ```no_run
//! use std::fs::File;
//! use pdfcore::{Document, Object};
//!
//! # fn main() -> pdfcore::PdfResult<()> {
//! let mut doc = Document::new(File::open("input.pdf")?)?;
//! let root = doc.trailer().get(b"Root").cloned().unwrap_or(Object::Null);
//! let catalog = doc.deref(root)?;
//! println!("catalog: {catalog:?}");
//! # Ok(())
//! # }
//! ```

mod buffer;
mod document;
mod error;
mod object;

pub mod crypt;
pub mod filter;
pub mod parser;
pub mod writer;
pub mod xref;

pub use buffer::Buffer;
pub use crypt::{CryptMethod, Decryptor};
pub use document::Document;
pub use error::{PdfError, PdfResult};
pub use object::{Dict, IndirectObject, Name, Object, Ref, Stream};
pub use writer::Writer;
pub use xref::{XRef, XRefEntry, XRefSection};
