//! Standard Security Handler: key setup and per-object crypt
//!
//! Encryption applies to string and stream payloads only, never to
//! names, numbers or dictionary keys. The file key is fixed at document
//! open; every operation derives a per-object key from it.

mod aes;
mod rc4;
pub(crate) mod standard;

pub use standard::authenticate;

use md5::{Digest, Md5};
use rand::{thread_rng, RngCore};
use zeroize::Zeroizing;

use crate::error::PdfResult;
use crate::object::{Object, Ref};

/// Crypt method selected by the encryption dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// Pass-through, from an `Identity` crypt filter
    Identity,
    /// RC4 with the per-object key (V1/V2)
    Rc4,
    /// AES-128-CBC with an IV prefix and PKCS#7 padding (AESV2)
    Aes,
}

/// Per-document crypt state, immutable after authentication
pub struct Decryptor {
    method: CryptMethod,
    file_key: Zeroizing<Vec<u8>>,
    encrypt_metadata: bool,
}

impl Decryptor {
    pub(crate) fn new(method: CryptMethod, file_key: Zeroizing<Vec<u8>>, encrypt_metadata: bool) -> Self {
        Self {
            method,
            file_key,
            encrypt_metadata,
        }
    }

    pub fn method(&self) -> CryptMethod {
        self.method
    }

    /// Whether the document's metadata stream is encrypted too
    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// Derive the key for one indirect object: MD5 of the file key, the
    /// low three bytes of the object number, the low two bytes of the
    /// generation, and the AES salt when applicable; truncated to
    /// min(n/8 + 5, 16) bytes.
    fn object_key(&self, reference: Ref) -> Zeroizing<Vec<u8>> {
        let mut hasher = Md5::new();
        hasher.update(&self.file_key[..]);
        hasher.update(&reference.number.to_le_bytes()[..3]);
        hasher.update(&reference.generation.to_le_bytes()[..2]);
        if self.method == CryptMethod::Aes {
            hasher.update(b"sAlT");
        }
        let digest = hasher.finalize();
        let len = (self.file_key.len() + 5).min(16);
        Zeroizing::new(digest[..len].to_vec())
    }

    /// Decrypt a string or stream payload read from the file
    pub fn decrypt(&self, reference: Ref, data: &[u8]) -> PdfResult<Vec<u8>> {
        match self.method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4::apply(&self.object_key(reference), data)),
            CryptMethod::Aes => aes::cbc_decrypt(&self.object_key(reference), data),
        }
    }

    /// Re-encrypt a string or stream payload for writing. AES payloads
    /// get a fresh random IV.
    pub fn encrypt(&self, reference: Ref, data: &[u8]) -> PdfResult<Vec<u8>> {
        match self.method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4::apply(&self.object_key(reference), data)),
            CryptMethod::Aes => {
                let mut iv = [0u8; 16];
                thread_rng().fill_bytes(&mut iv);
                aes::cbc_encrypt(&self.object_key(reference), iv, data)
            }
        }
    }

    /// Decrypt every string reachable inside `object` with the key of
    /// its containing indirect object. Stream payloads are handled by
    /// the stream reader, not here; names, numbers and keys are never
    /// touched.
    pub(crate) fn decrypt_strings(&self, object: &mut Object, reference: Ref) -> PdfResult<()> {
        match object {
            Object::String(bytes) => {
                *bytes = self.decrypt(reference, bytes)?;
            }
            Object::Array(items) => {
                for item in items {
                    self.decrypt_strings(item, reference)?;
                }
            }
            Object::Dict(dict) => {
                for (_, value) in dict.iter_mut() {
                    self.decrypt_strings(value, reference)?;
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    self.decrypt_strings(value, reference)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
