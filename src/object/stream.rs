//! PDF stream object: a dictionary plus a payload locator

use super::Dict;

/// A stream object. The payload is never stored here; `offset` is the
/// absolute position of the first payload byte, immediately after the
/// end-of-line that terminates the `stream` keyword. The payload extent
/// is given by the dictionary's `Length` entry, which may be indirect
/// and is resolved by the document before any payload read.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub dict: Dict,
    pub offset: u64,
}

impl Stream {
    pub fn new(dict: Dict, offset: u64) -> Self {
        Self { dict, offset }
    }
}
