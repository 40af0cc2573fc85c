//! Password-protected office document decryption.
//!
//! Encrypted OOXML documents are stored as a compound file holding an
//! `EncryptionInfo` stream (key material) and an `EncryptedPackage` stream
//! (the AES-encrypted ZIP). [`CfbOfficeDecryptor`] handles the Agile (4.4)
//! and Standard (x.2, AES) schemes. RC4 and extensible encryption are
//! reported as unsupported.

use crate::error::{Result, TriageError};
use crate::magic::Classifier;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use base64::Engine;
use sha2::Digest;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Password Excel uses for "read-only recommended" workbooks.
pub const DEFAULT_OFFICE_PASSWORD: &str = "VelvetSweatshop";

const SEGMENT_LENGTH: usize = 4096;
const STANDARD_SPIN_COUNT: u32 = 50_000;

const BLOCK_KEY_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_KEY_VERIFIER_HASH: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_SECRET: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];

#[derive(Debug, Error)]
pub enum OfficeError {
    #[error("document is not encrypted")]
    NotEncrypted,

    #[error("invalid password")]
    InvalidPassword,

    #[error("unsupported encryption: {message}")]
    Unsupported { message: String },

    #[error("malformed encryption data: {message}")]
    Malformed { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OfficeError {
    fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Structural decoder for encrypted office containers.
pub trait OfficeDecryptor: Send + Sync {
    fn decrypt(&self, data: &[u8], password: &str) -> std::result::Result<Vec<u8>, OfficeError>;
}

/// Decoder backed by the `cfb` reader and RustCrypto AES.
#[derive(Debug, Default, Clone, Copy)]
pub struct CfbOfficeDecryptor;

impl OfficeDecryptor for CfbOfficeDecryptor {
    fn decrypt(&self, data: &[u8], password: &str) -> std::result::Result<Vec<u8>, OfficeError> {
        let mut comp = cfb::CompoundFile::open(Cursor::new(data))
            .map_err(|e| OfficeError::malformed(format!("not a compound file: {e}")))?;
        if !comp.is_stream("/EncryptionInfo") || !comp.is_stream("/EncryptedPackage") {
            return Err(OfficeError::NotEncrypted);
        }

        let mut info = Vec::new();
        comp.open_stream("/EncryptionInfo")?.read_to_end(&mut info)?;
        let mut package = Vec::new();
        comp.open_stream("/EncryptedPackage")?.read_to_end(&mut package)?;

        let major = u16_at(&info, 0)?;
        let minor = u16_at(&info, 2)?;
        match (major, minor) {
            (4, 4) => decrypt_agile(&info, &package, password),
            (2..=4, 2) => decrypt_standard(&info, &package, password),
            (3 | 4, 3) => Err(OfficeError::unsupported("extensible encryption")),
            (1, 1) | (2..=4, 1) => Err(OfficeError::unsupported("RC4 encryption")),
            _ => Err(OfficeError::unsupported(format!(
                "EncryptionInfo version {major}.{minor}"
            ))),
        }
    }
}

/// Decrypt an office document into the staging directory.
///
/// Falls back to the original path whenever decryption fails or the output
/// still looks encrypted. Only an absent decoder is an error.
pub fn decrypt_office(
    path: &Path,
    password: Option<&str>,
    decryptor: Option<&dyn OfficeDecryptor>,
    classifier: &dyn Classifier,
    staging_dir: &Path,
) -> Result<PathBuf> {
    let Some(decryptor) = decryptor else {
        return Err(TriageError::DecoderUnavailable);
    };

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Cannot read office document {}: {}", path.display(), e);
            return Ok(path.to_path_buf());
        }
    };

    let password = password.unwrap_or(DEFAULT_OFFICE_PASSWORD);
    let plain = match decryptor.decrypt(&data, password) {
        Ok(plain) => plain,
        Err(e) => {
            info!("Office decryption of {} failed: {}", path.display(), e);
            return Ok(path.to_path_buf());
        }
    };

    if classifier.classify_bytes(&plain).contains("Encrypted") {
        debug!("Decrypted output of {} is still encrypted", path.display());
        return Ok(path.to_path_buf());
    }

    let Some(basename) = path.file_name() else {
        return Ok(path.to_path_buf());
    };
    let target = staging_dir.join(basename);
    let written = std::fs::create_dir_all(staging_dir).and_then(|()| std::fs::write(&target, &plain));
    match written {
        Ok(()) => {
            info!("Decrypted {} to {}", path.display(), target.display());
            Ok(target)
        }
        Err(e) => {
            warn!("Cannot stage decrypted document {}: {}", target.display(), e);
            Ok(path.to_path_buf())
        }
    }
}

fn u16_at(data: &[u8], offset: usize) -> std::result::Result<u16, OfficeError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| OfficeError::malformed("truncated EncryptionInfo"))
}

fn u32_at(data: &[u8], offset: usize) -> std::result::Result<u32, OfficeError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| OfficeError::malformed("truncated EncryptionInfo"))
}

/// Declared plaintext size of an `EncryptedPackage` stream.
///
/// The ciphertext is never shorter than the plaintext, so a larger claim
/// is rejected before anything is allocated from it.
fn package_size(package: &[u8]) -> std::result::Result<usize, OfficeError> {
    let bytes = package
        .get(..8)
        .ok_or_else(|| OfficeError::malformed("truncated EncryptedPackage"))?;
    let mut size = [0u8; 8];
    size.copy_from_slice(bytes);
    let declared = u64::from_le_bytes(size);
    let available = package.len() - 8;
    match usize::try_from(declared) {
        Ok(size) if size <= available => Ok(size),
        _ => Err(OfficeError::malformed(format!(
            "EncryptedPackage declares {declared} bytes but holds {available}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn parse(name: &str) -> std::result::Result<Self, OfficeError> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            other => Err(OfficeError::unsupported(format!("hash algorithm {other}"))),
        }
    }

    fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            Self::Sha1 => run::<sha1::Sha1>(parts),
            Self::Sha256 => run::<sha2::Sha256>(parts),
            Self::Sha384 => run::<sha2::Sha384>(parts),
            Self::Sha512 => run::<sha2::Sha512>(parts),
        }
    }
}

fn resized(mut bytes: Vec<u8>, len: usize, pad: u8) -> Vec<u8> {
    bytes.resize(len, pad);
    bytes
}

fn utf16le(password: &str) -> Vec<u8> {
    password.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Iterated password hash shared by both schemes.
fn spin_hash(hash: HashAlgorithm, salt: &[u8], password: &str, spin_count: u32) -> Vec<u8> {
    let mut h = hash.digest(&[salt, &utf16le(password)]);
    for i in 0..spin_count {
        h = hash.digest(&[&i.to_le_bytes(), &h]);
    }
    h
}

fn cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, OfficeError> {
    use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

    let usable = data.len() - data.len() % 16;
    let mut buf = data[..usable].to_vec();
    let bad_key = |_| OfficeError::malformed("bad AES key or IV length");
    let bad_data = |_| OfficeError::malformed("ciphertext is not block aligned");
    let len = match key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(bad_data)?
            .len(),
        24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(bad_data)?
            .len(),
        32 => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(bad_data)?
            .len(),
        n => return Err(OfficeError::unsupported(format!("AES key length {n}"))),
    };
    buf.truncate(len);
    Ok(buf)
}

fn ecb_decrypt(key: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, OfficeError> {
    fn run<C: BlockDecrypt + KeyInit>(
        key: &[u8],
        buf: &mut [u8],
    ) -> std::result::Result<(), OfficeError> {
        let cipher =
            C::new_from_slice(key).map_err(|_| OfficeError::malformed("bad AES key length"))?;
        for block in buf.chunks_exact_mut(16) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    let usable = data.len() - data.len() % 16;
    let mut buf = data[..usable].to_vec();
    match key.len() {
        16 => run::<aes::Aes128>(key, &mut buf)?,
        24 => run::<aes::Aes192>(key, &mut buf)?,
        32 => run::<aes::Aes256>(key, &mut buf)?,
        n => return Err(OfficeError::unsupported(format!("AES key length {n}"))),
    }
    Ok(buf)
}

#[derive(Debug)]
struct AgileParams {
    hash: HashAlgorithm,
    salt: Vec<u8>,
    key_bytes: usize,
    block_size: usize,
}

impl AgileParams {
    fn from_node(node: roxmltree::Node<'_, '_>) -> std::result::Result<Self, OfficeError> {
        let attr = |name: &str| {
            node.attribute(name)
                .ok_or_else(|| OfficeError::malformed(format!("missing attribute {name}")))
        };
        let number = |name: &str| -> std::result::Result<usize, OfficeError> {
            attr(name)?
                .parse()
                .map_err(|_| OfficeError::malformed(format!("bad attribute {name}")))
        };

        let cipher = attr("cipherAlgorithm")?;
        if cipher != "AES" {
            return Err(OfficeError::unsupported(format!("cipher {cipher}")));
        }
        let chaining = attr("cipherChaining")?;
        if chaining != "ChainingModeCBC" {
            return Err(OfficeError::unsupported(format!("chaining {chaining}")));
        }

        Ok(Self {
            hash: HashAlgorithm::parse(attr("hashAlgorithm")?)?,
            salt: b64(attr("saltValue")?)?,
            key_bytes: number("keyBits")? / 8,
            block_size: number("blockSize")?,
        })
    }
}

fn b64(value: &str) -> std::result::Result<Vec<u8>, OfficeError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| OfficeError::malformed(format!("bad base64: {e}")))
}

fn decrypt_agile(
    info: &[u8],
    package: &[u8],
    password: &str,
) -> std::result::Result<Vec<u8>, OfficeError> {
    let xml_bytes = info
        .get(8..)
        .ok_or_else(|| OfficeError::malformed("truncated EncryptionInfo"))?;
    let xml = std::str::from_utf8(xml_bytes)
        .map_err(|_| OfficeError::malformed("EncryptionInfo XML is not UTF-8"))?
        .trim_start_matches('\u{feff}')
        .trim_end_matches('\0');
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| OfficeError::malformed(format!("EncryptionInfo XML: {e}")))?;

    let find = |name: &str| {
        doc.descendants()
            .find(|n| n.is_element() && n.tag_name().name() == name)
            .ok_or_else(|| OfficeError::malformed(format!("missing <{name}>")))
    };
    let key_data_node = find("keyData")?;
    let key_data = AgileParams::from_node(key_data_node)?;
    let encrypted_key = find("encryptedKey")?;
    let encryptor = AgileParams::from_node(encrypted_key)?;

    let attr = |name: &str| {
        encrypted_key
            .attribute(name)
            .ok_or_else(|| OfficeError::malformed(format!("missing attribute {name}")))
    };
    let spin_count: u32 = attr("spinCount")?
        .parse()
        .map_err(|_| OfficeError::malformed("bad spinCount"))?;
    let verifier_input_enc = b64(attr("encryptedVerifierHashInput")?)?;
    let verifier_hash_enc = b64(attr("encryptedVerifierHashValue")?)?;
    let key_value_enc = b64(attr("encryptedKeyValue")?)?;

    let h = spin_hash(encryptor.hash, &encryptor.salt, password, spin_count);
    let derive = |block_key: &[u8]| {
        resized(
            encryptor.hash.digest(&[&h, block_key]),
            encryptor.key_bytes,
            0x36,
        )
    };
    let iv = resized(encryptor.salt.clone(), encryptor.block_size, 0x36);

    let verifier_input = cbc_decrypt(&derive(&BLOCK_KEY_VERIFIER_INPUT), &iv, &verifier_input_enc)?;
    let verifier_hash = cbc_decrypt(&derive(&BLOCK_KEY_VERIFIER_HASH), &iv, &verifier_hash_enc)?;
    let salt_len = encryptor.salt.len().min(verifier_input.len());
    let expected = encryptor.hash.digest(&[&verifier_input[..salt_len]]);
    if verifier_hash.get(..expected.len()) != Some(expected.as_slice()) {
        return Err(OfficeError::InvalidPassword);
    }

    let mut secret_key = cbc_decrypt(&derive(&BLOCK_KEY_SECRET), &iv, &key_value_enc)?;
    secret_key.truncate(key_data.key_bytes);

    let size = package_size(package)?;
    let mut plain = Vec::with_capacity(size);
    for (index, segment) in package[8..].chunks(SEGMENT_LENGTH).enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| OfficeError::malformed("EncryptedPackage too large"))?;
        let segment_iv = resized(
            key_data.hash.digest(&[&key_data.salt, &index.to_le_bytes()]),
            key_data.block_size,
            0x36,
        );
        plain.extend(cbc_decrypt(&secret_key, &segment_iv, segment)?);
    }
    if plain.len() < size {
        return Err(OfficeError::malformed("EncryptedPackage shorter than declared"));
    }
    plain.truncate(size);
    Ok(plain)
}

/// Key derivation for Standard encryption (CryptoAPI, SHA-1).
fn standard_key(salt: &[u8], password: &str, key_bytes: usize) -> Vec<u8> {
    let h = spin_hash(HashAlgorithm::Sha1, salt, password, STANDARD_SPIN_COUNT);
    let h_final = HashAlgorithm::Sha1.digest(&[&h, &0u32.to_le_bytes()]);

    let mut buf1 = [0x36u8; 64];
    let mut buf2 = [0x5cu8; 64];
    for (i, b) in h_final.iter().enumerate() {
        buf1[i] ^= b;
        buf2[i] ^= b;
    }
    let mut x3 = HashAlgorithm::Sha1.digest(&[&buf1]);
    x3.extend(HashAlgorithm::Sha1.digest(&[&buf2]));
    x3.truncate(key_bytes);
    x3
}

fn decrypt_standard(
    info: &[u8],
    package: &[u8],
    password: &str,
) -> std::result::Result<Vec<u8>, OfficeError> {
    let header_size = u32_at(info, 8)? as usize;
    let header = info
        .get(12..12 + header_size)
        .ok_or_else(|| OfficeError::malformed("truncated EncryptionHeader"))?;
    let alg_id = u32_at(header, 8)?;
    if !matches!(alg_id, 0x660e..=0x6610) {
        return Err(OfficeError::unsupported(format!("algorithm id {alg_id:#x}")));
    }
    let key_bytes = u32_at(header, 16)? as usize / 8;

    let verifier = &info[12 + header_size..];
    let salt_size = u32_at(verifier, 0)? as usize;
    let field = |offset: usize, len: usize| {
        verifier
            .get(offset..offset + len)
            .ok_or_else(|| OfficeError::malformed("truncated EncryptionVerifier"))
    };
    let salt = field(4, salt_size)?;
    let encrypted_verifier = field(4 + salt_size, 16)?;
    let hash_size = u32_at(verifier, 20 + salt_size)? as usize;
    let encrypted_verifier_hash = field(24 + salt_size, 32)?;

    let key = standard_key(salt, password, key_bytes);
    let verifier_plain = ecb_decrypt(&key, encrypted_verifier)?;
    let verifier_hash = ecb_decrypt(&key, encrypted_verifier_hash)?;
    let expected = HashAlgorithm::Sha1.digest(&[&verifier_plain]);
    if verifier_hash.get(..hash_size.min(expected.len())) != expected.get(..hash_size) {
        return Err(OfficeError::InvalidPassword);
    }

    let size = package_size(package)?;
    let mut plain = ecb_decrypt(&key, &package[8..])?;
    if plain.len() < size {
        return Err(OfficeError::malformed("EncryptedPackage shorter than declared"));
    }
    plain.truncate(size);
    Ok(plain)
}
