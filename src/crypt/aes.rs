//! AES-128-CBC with PKCS#7 padding, as used by the AESV2 crypt filter
//!
//! The ciphertext layout is the PDF one: a 16-byte IV prefix followed by
//! whole blocks. CBC chaining is done here over the block cipher.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{PdfError, PdfResult};

const BLOCK: usize = 16;

/// Decrypt an IV-prefixed, PKCS#7-padded buffer
pub(crate) fn cbc_decrypt(key: &[u8], data: &[u8]) -> PdfResult<Vec<u8>> {
    if key.len() != BLOCK {
        return Err(PdfError::corrupted(
            format!("aes key length {}", key.len()),
            "decrypting data",
        ));
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < 2 * BLOCK || (data.len() - BLOCK) % BLOCK != 0 {
        return Err(PdfError::corrupted(
            "aes payload is not an IV plus whole blocks",
            "decrypting data",
        ));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let (iv, ciphertext) = data.split_at(BLOCK);
    let mut out = ciphertext.to_vec();
    let mut prev = [0u8; BLOCK];
    prev.copy_from_slice(iv);

    for chunk in out.chunks_mut(BLOCK) {
        let mut saved = [0u8; BLOCK];
        saved.copy_from_slice(chunk);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        for (byte, prev_byte) in chunk.iter_mut().zip(prev.iter()) {
            *byte ^= prev_byte;
        }
        prev = saved;
    }

    let pad = *out.last().expect("at least one block") as usize;
    if pad == 0 || pad > BLOCK || pad > out.len() {
        return Err(PdfError::corrupted("bad pkcs7 padding", "decrypting data"));
    }
    out.truncate(out.len() - pad);
    Ok(out)
}

/// Encrypt with PKCS#7 padding, prepending the given IV
pub(crate) fn cbc_encrypt(key: &[u8], iv: [u8; BLOCK], data: &[u8]) -> PdfResult<Vec<u8>> {
    if key.len() != BLOCK {
        return Err(PdfError::corrupted(
            format!("aes key length {}", key.len()),
            "encrypting data",
        ));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let pad = BLOCK - data.len() % BLOCK;
    let mut out = Vec::with_capacity(BLOCK + data.len() + pad);
    out.extend_from_slice(&iv);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad as u8).take(pad));

    let mut prev = iv;
    for chunk in out[BLOCK..].chunks_mut(BLOCK) {
        for (byte, prev_byte) in chunk.iter_mut().zip(prev.iter()) {
            *byte ^= prev_byte;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        prev.copy_from_slice(chunk);
    }
    Ok(out)
}
