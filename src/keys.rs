use std::fs;
use std::path::{Path, PathBuf};

use rsa::RsaPublicKey;
use tracing::{debug, info, warn};

use crate::error::EpkError;
use crate::utils::aes::AesKey;
use crate::utils::signature::load_public_key;

pub const AES_KEY_FILE: &str = "AES.key";

/// Regular, non-hidden files in `dir` ending in `.pem` (any case), sorted by name.
pub fn pem_candidates(dir: &Path) -> Result<Vec<PathBuf>, EpkError> {
    let mut candidates = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.to_ascii_lowercase().ends_with(".pem") {
            continue;
        }
        if entry.file_type()?.is_file() {
            candidates.push(entry.path());
        }
    }

    candidates.sort();
    Ok(candidates)
}

/// Tries every public key in `dir` until `validate` accepts one.
/// Unreadable keys are skipped; `None` means no key validated.
pub fn find_rsa_key<T>(
    dir: &Path,
    mut validate: impl FnMut(&RsaPublicKey) -> Option<T>,
) -> Result<Option<(RsaPublicKey, T)>, EpkError> {
    for path in pem_candidates(dir)? {
        let key_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let key = match fs::read(&path) {
            Ok(pem) => load_public_key(&pem),
            Err(err) => Err(err.to_string()),
        };
        let key = match key {
            Ok(key) => key,
            Err(reason) => {
                warn!("{}", EpkError::KeyUnreadable { path, reason });
                continue;
            }
        };

        info!("Trying RSA key: {}...", key_name);
        if let Some(result) = validate(&key) {
            return Ok(Some((key, result)));
        }
        info!("RSA key {} failed", key_name);
    }

    Ok(None)
}

/// Parses one line of a key file: 32 hex characters, anything after them ignored.
pub fn parse_key_line(line: &str) -> Result<Option<[u8; 16]>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let hex_part = line.get(..32).ok_or_else(|| format!("key too short: {}", line))?;
    let bytes = hex::decode(hex_part).map_err(|e| format!("{}: {}", e, line))?;
    let key: [u8; 16] = bytes.as_slice().try_into().map_err(|_| format!("bad key length: {}", line))?;
    Ok(Some(key))
}

/// Tries the keys in `key_file` in order and returns the first one `validate` accepts.
/// A missing key file is an error; `None` means no key in it matched.
pub fn find_aes_key(key_file: &Path, mut validate: impl FnMut(&AesKey) -> bool) -> Result<Option<AesKey>, EpkError> {
    let contents = fs::read_to_string(key_file)
        .map_err(|e| EpkError::KeyUnreadable { path: key_file.to_path_buf(), reason: e.to_string() })?;

    for (line_n, line) in contents.lines().enumerate() {
        let key = match parse_key_line(line) {
            Ok(Some(bytes)) => AesKey::new(bytes),
            Ok(None) => continue,
            Err(reason) => {
                warn!("Skipping {} line {}: {}", AES_KEY_FILE, line_n + 1, reason);
                continue;
            }
        };

        if validate(&key) {
            info!("Trying AES key ({})... Success!", key.hex());
            return Ok(Some(key));
        }
        debug!("Trying AES key ({})... Failed", key.hex());
    }

    Ok(None)
}
