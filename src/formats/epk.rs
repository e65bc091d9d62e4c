use std::fs;
use std::path::{Path, PathBuf};

use rsa::RsaPublicKey;
use tracing::{info, warn};

use crate::ProgramContext;
use crate::error::EpkError;
use crate::keys::{self, AES_KEY_FILE};
use crate::utils::aes::{AesKey, decrypt_block_stream};
use crate::utils::common;
use crate::utils::mapped::span;
use crate::utils::signature::{self, SIGNATURE_SIZE};

pub const EPK2_MAGIC: &[u8; 4] = b"EPK2";
pub const EPK3_MAGIC: &[u8; 4] = b"EPK3";

pub const EPK2_PROBE_SIZE: usize = 0x650 + SIGNATURE_SIZE;
pub const EPK3_PROBE_SIZE: usize = 0x6BD;
pub const PROBE_SIZE: usize = if EPK2_PROBE_SIZE > EPK3_PROBE_SIZE { EPK2_PROBE_SIZE } else { EPK3_PROBE_SIZE };

/// Legacy layout carries a plaintext "EPK2" tag, the encrypted one is recognised
/// by the platform version string that follows the header.
pub fn is_epk2(probe: &[u8]) -> bool {
    if probe.len() < EPK2_PROBE_SIZE {
        return false;
    }
    if &probe[0x8C..0x90] == EPK2_MAGIC {
        return true;
    }
    probe[0x630 + SIGNATURE_SIZE] == 0 && probe[0x638 + SIGNATURE_SIZE] == b'.' && probe[0x63D + SIGNATURE_SIZE] == b'.'
}

pub fn is_epk3(probe: &[u8]) -> bool {
    if probe.len() < EPK3_PROBE_SIZE {
        return false;
    }
    probe[0x6B0] == 0 && probe[0x6B5] == b'.' && probe[0x6B7] == b'.'
}

/// Key material for one extraction run.
#[derive(Default)]
pub struct ExtractionContext {
    pub public_key: Option<RsaPublicKey>,
    pub aes_key: Option<AesKey>,
}

impl ExtractionContext {
    pub fn verify(&self, span: &[u8]) -> bool {
        match &self.public_key {
            Some(key) => signature::verify(key, span),
            None => false,
        }
    }

    pub fn decrypt(&self, data: &[u8], what: &str) -> Result<Vec<u8>, EpkError> {
        let key = self.aes_key.as_ref().ok_or_else(|| EpkError::DecryptionKeyUnknown(what.to_string()))?;
        Ok(decrypt_block_stream(data, key))
    }
}

/// Tries `initial`, then every shorter length down to `floor`, and returns the
/// first length `accept` takes. Never tries a length above `initial`.
pub fn fallback_search(initial: usize, floor: usize, mut accept: impl FnMut(usize) -> bool) -> Option<usize> {
    (floor..=initial).rev().find(|&len| accept(len))
}

/// Finds a public key in the config dir that verifies the header signature,
/// trying signed lengths from `max_signed` down. Returns the signed span length.
pub fn verify_header(image: &[u8], ctx: &mut ExtractionContext, app_ctx: &ProgramContext, max_signed: usize, label: &str) -> Result<usize, EpkError> {
    info!("Verifying digital signature of {} firmware header...", label);
    let initial = max_signed.min(image.len());

    let found = keys::find_rsa_key(&app_ctx.config_dir, |key| {
        fallback_search(initial, SIGNATURE_SIZE + 1, |len| signature::verify(key, &image[..len]))
    })?;

    match found {
        Some((key, signed_len)) => {
            info!("Digital signature of the firmware is OK. Signed bytes: {}", signed_len - SIGNATURE_SIZE);
            ctx.public_key = Some(key);
            Ok(signed_len)
        }
        None => {
            warn!("Cannot verify firmware's digital signature (maybe you don't have proper PEM file)");
            Err(EpkError::SignatureInvalid { what: format!("{} header", label), offset: 0 })
        }
    }
}

pub fn has_magic(data: &[u8], offset: usize, magic: &[u8; 4]) -> bool {
    data.get(offset..offset + magic.len()) == Some(&magic[..])
}

/// Returns the header bytes following the signature, decrypted if needed.
/// A header whose magic is already readable skips AES key discovery.
pub fn decrypt_header(
    image: &[u8],
    ctx: &mut ExtractionContext,
    app_ctx: &ProgramContext,
    header_size: usize,
    magic_offset: usize,
    magic: &[u8; 4],
    label: &str,
) -> Result<Vec<u8>, EpkError> {
    let stored = span(image, SIGNATURE_SIZE, header_size - SIGNATURE_SIZE)?;
    if has_magic(stored, magic_offset, magic) {
        info!("{} header is not encrypted.", label);
        return Ok(stored.to_vec());
    }

    info!("{} header is encrypted. Trying to decrypt...", label);
    let key_file = app_ctx.config_dir.join(AES_KEY_FILE);
    let key = keys::find_aes_key(&key_file, |key| has_magic(&decrypt_block_stream(stored, key), magic_offset, magic))?
        .ok_or_else(|| EpkError::DecryptionKeyUnknown(format!("{} header", label)))?;

    let header = decrypt_block_stream(stored, &key);
    ctx.aes_key = Some(key);
    Ok(header)
}

/// `<output_dir>/<version>-<otaID>`, created if missing.
pub fn firmware_dir(output_dir: &Path, version: &[u8; 4], ota_id: &str) -> Result<PathBuf, EpkError> {
    let dir = output_dir.join(format!("{}-{}", common::version_string(version), common::safe_file_name(ota_id)));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
