//! Standard Security Handler key setup and password verification
//!
//! Supports V=1 R=2 (40-bit RC4), V=2 R=3 (RC4 with the declared key
//! length) and V=4 R=4 (crypt filters selecting RC4 or AES-128).

use log::{debug, warn};
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use super::{rc4, CryptMethod, Decryptor};
use crate::error::{PdfError, PdfResult};
use crate::object::{Dict, Object};

/// Standard padding string from the PDF specification
pub(crate) const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

const CONTEXT: &str = "setting up encryption";

/// Authenticate a user password against the encryption dictionary and
/// build the document decryptor. `file_id` is the first element of the
/// trailer's `ID` array.
pub fn authenticate(encrypt: &Dict, file_id: &[u8], password: &[u8]) -> PdfResult<Decryptor> {
    match encrypt.get(b"Filter") {
        Some(Object::Name(name)) if *name == "Standard" => {}
        Some(Object::Name(name)) => {
            return Err(PdfError::UnsupportedFeature(format!(
                "security handler {}",
                String::from_utf8_lossy(name.as_bytes())
            )))
        }
        _ => return Err(PdfError::corrupted("missing security handler Filter", CONTEXT)),
    }

    let version = required_integer(encrypt, b"V")?;
    let revision = required_integer(encrypt, b"R")?;
    let owner_entry = required_string(encrypt, b"O")?;
    let user_entry = required_string(encrypt, b"U")?;
    let permissions = required_integer(encrypt, b"P")? as i32 as u32;
    let length_bits = optional_integer(encrypt, b"Length")?.unwrap_or(40);
    let encrypt_metadata = match encrypt.get(b"EncryptMetadata") {
        Some(value) => value
            .as_bool()
            .map_err(|_| PdfError::corrupted("EncryptMetadata is not a boolean", CONTEXT))?,
        None => true,
    };

    if length_bits % 8 != 0 || !(40..=128).contains(&length_bits) {
        return Err(PdfError::corrupted(
            format!("key length {length_bits} bits"),
            CONTEXT,
        ));
    }

    let (method, key_len) = match (version, revision) {
        (1, 2) => (CryptMethod::Rc4, 5),
        (2, 3) => (CryptMethod::Rc4, length_bits as usize / 8),
        (4, 4) => crypt_filter_method(encrypt, length_bits as usize / 8)?,
        (v, r) => {
            return Err(PdfError::UnsupportedFeature(format!(
                "encryption V={v} R={r}"
            )))
        }
    };
    debug!("standard security handler: R={revision}, method {method:?}, {key_len}-byte key");

    let file_key = derive_file_key(
        password,
        &owner_entry,
        permissions,
        file_id,
        revision as u8,
        key_len,
        encrypt_metadata,
    );
    let expected = user_password_check(&file_key, file_id, revision as u8);
    let verified = if revision == 2 {
        expected[..] == user_entry[..32]
    } else {
        expected[..16] == user_entry[..16]
    };
    if !verified {
        return Err(PdfError::AuthenticationFailed);
    }
    Ok(Decryptor::new(method, file_key, encrypt_metadata))
}

/// Resolve StmF/StrF through the CF dictionary for V=4
fn crypt_filter_method(encrypt: &Dict, default_key_len: usize) -> PdfResult<(CryptMethod, usize)> {
    let filter_name = |key: &[u8]| -> PdfResult<Vec<u8>> {
        match encrypt.get(key) {
            None => Ok(b"Identity".to_vec()),
            Some(value) => Ok(value
                .as_name()
                .map_err(|_| PdfError::corrupted("crypt filter name expected", CONTEXT))?
                .as_bytes()
                .to_vec()),
        }
    };
    let stream_filter = filter_name(b"StmF")?;
    let string_filter = filter_name(b"StrF")?;
    if stream_filter != string_filter {
        return Err(PdfError::UnsupportedFeature(
            "distinct StmF and StrF crypt filters".into(),
        ));
    }
    if stream_filter == b"Identity" {
        return Ok((CryptMethod::Identity, default_key_len));
    }

    let cf = encrypt
        .get(b"CF")
        .ok_or_else(|| PdfError::corrupted("missing CF dictionary", CONTEXT))?
        .as_dict()
        .map_err(|_| PdfError::corrupted("CF is not a dictionary", CONTEXT))?;
    let filter_dict = cf
        .get(&stream_filter)
        .ok_or_else(|| {
            PdfError::corrupted(
                format!(
                    "crypt filter {} not in CF",
                    String::from_utf8_lossy(&stream_filter)
                ),
                CONTEXT,
            )
        })?
        .as_dict()
        .map_err(|_| PdfError::corrupted("crypt filter is not a dictionary", CONTEXT))?;

    // Some producers write the CF Length in bytes, others in bits.
    let key_len = match optional_integer(filter_dict, b"Length")? {
        Some(len) if len >= 40 => len as usize / 8,
        Some(len) => len as usize,
        None => default_key_len,
    };

    match filter_dict.get(b"CFM") {
        Some(Object::Name(name)) if *name == "V2" => Ok((CryptMethod::Rc4, key_len)),
        Some(Object::Name(name)) if *name == "AESV2" => {
            if key_len != 16 {
                warn!("AESV2 with {key_len}-byte key, forcing 16");
            }
            Ok((CryptMethod::Aes, 16))
        }
        Some(Object::Name(name)) => Err(PdfError::UnsupportedFeature(format!(
            "crypt filter method {}",
            String::from_utf8_lossy(name.as_bytes())
        ))),
        _ => Err(PdfError::corrupted("missing CFM", CONTEXT)),
    }
}

/// Algorithm 2: derive the file encryption key
pub(crate) fn derive_file_key(
    password: &[u8],
    owner_entry: &[u8],
    permissions: u32,
    file_id: &[u8],
    revision: u8,
    key_len: usize,
    encrypt_metadata: bool,
) -> Zeroizing<Vec<u8>> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(&owner_entry[..32]);
    hasher.update(permissions.to_le_bytes());
    hasher.update(file_id);
    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut digest = Zeroizing::new(hasher.finalize().to_vec());

    if revision >= 3 {
        for _ in 0..50 {
            let mut hasher = Md5::new();
            hasher.update(&digest[..key_len]);
            digest = Zeroizing::new(hasher.finalize().to_vec());
        }
    }
    Zeroizing::new(digest[..key_len].to_vec())
}

/// Algorithms 4/5: the value the `U` entry must carry for this key.
/// 32 bytes for R=2; for R>=3 the significant first 16 bytes.
pub(crate) fn user_password_check(file_key: &[u8], file_id: &[u8], revision: u8) -> Vec<u8> {
    if revision == 2 {
        return rc4::apply(file_key, &PASSWORD_PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PASSWORD_PADDING);
    hasher.update(file_id);
    let mut check = rc4::apply(file_key, &hasher.finalize());
    for round in 1..=19u8 {
        let round_key: Vec<u8> = file_key.iter().map(|byte| byte ^ round).collect();
        check = rc4::apply(&round_key, &check);
    }
    check
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

fn required_integer(dict: &Dict, key: &[u8]) -> PdfResult<i64> {
    dict.get(key)
        .ok_or_else(|| {
            PdfError::corrupted(
                format!("missing {}", String::from_utf8_lossy(key)),
                CONTEXT,
            )
        })?
        .as_integer()
        .map_err(|_| {
            PdfError::corrupted(
                format!("{} is not an integer", String::from_utf8_lossy(key)),
                CONTEXT,
            )
        })
}

fn optional_integer(dict: &Dict, key: &[u8]) -> PdfResult<Option<i64>> {
    match dict.get(key) {
        None => Ok(None),
        Some(value) => value.as_integer().map(Some).map_err(|_| {
            PdfError::corrupted(
                format!("{} is not an integer", String::from_utf8_lossy(key)),
                CONTEXT,
            )
        }),
    }
}

/// The `O`/`U` entries: 32 bytes required, longer tolerated
fn required_string(dict: &Dict, key: &[u8]) -> PdfResult<Vec<u8>> {
    let bytes = dict
        .get(key)
        .ok_or_else(|| {
            PdfError::corrupted(
                format!("missing {}", String::from_utf8_lossy(key)),
                CONTEXT,
            )
        })?
        .as_string()
        .map_err(|_| {
            PdfError::corrupted(
                format!("{} is not a string", String::from_utf8_lossy(key)),
                CONTEXT,
            )
        })?;
    if bytes.len() < 32 {
        return Err(PdfError::corrupted(
            format!("{} shorter than 32 bytes", String::from_utf8_lossy(key)),
            CONTEXT,
        ));
    }
    Ok(bytes[..32].to_vec())
}
