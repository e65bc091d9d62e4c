//! Keys, contexts and synthetic firmware images shared by the unit tests.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};

use crate::ProgramContext;
use crate::error::EpkError;
use crate::formats::FileHandler;
use crate::keys::AES_KEY_FILE;
use crate::utils::aes::{AesKey, encrypt_block_stream};
use crate::utils::signature::{self, SIGNATURE_SIZE};

pub const TEST_OTA_ID: &str = "HE_DTV_W16P_AFADATAA";
pub const TEST_VERSION: [u8; 4] = [0x00, 0x12, 0x04, 0x03];
pub const TEST_FIRMWARE_DIR: &str = "03.04.12.00-HE_DTV_W16P_AFADATAA";

/// First byte after the header signature, header payload and platform versions.
pub const EPK2_PAK_AREA: usize = SIGNATURE_SIZE + 0x630 + 36;

pub fn private_key(index: usize) -> &'static RsaPrivateKey {
    static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        (0..2).map(|_| RsaPrivateKey::new(&mut rng, 1024).unwrap()).collect()
    });
    &keys[index]
}

pub fn public_key_pem(index: usize) -> String {
    private_key(index).to_public_key().to_public_key_pem(LineEnding::LF).unwrap()
}

pub fn write_pem(dir: &Path, name: &str, index: usize) {
    fs::write(dir.join(name), public_key_pem(index)).unwrap();
}

/// Writes the given public keys in trial order, plus `AES.key` when lines are given.
pub fn write_key_dir(dir: &Path, pem_keys: &[usize], aes_lines: &[&str]) {
    for (n, index) in pem_keys.iter().enumerate() {
        write_pem(dir, &format!("{:02}_key{}.pem", n, index), *index);
    }
    if !aes_lines.is_empty() {
        fs::write(dir.join(AES_KEY_FILE), aes_lines.join("\n") + "\n").unwrap();
    }
}

pub fn aes_key() -> AesKey {
    AesKey::new(*b"epk-test-aes-key")
}

/// `signature || payload`, signed with `key`.
pub fn sign_span(key: &RsaPrivateKey, payload: &[u8]) -> Vec<u8> {
    let mut span = signature::sign(key, payload);
    span.extend_from_slice(payload);
    span
}

pub fn program_context(config_dir: &Path, output_dir: &Path) -> ProgramContext {
    ProgramContext {
        config_dir: config_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        options: Vec::new(),
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub files: RefCell<Vec<PathBuf>>,
}

impl FileHandler for RecordingHandler {
    fn handle_file(&self, path: &Path, _app_ctx: &ProgramContext) -> Result<(), EpkError> {
        self.files.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

/// Deterministic filler that differs per seed.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn put_u32(buf: &mut [u8], offset: usize, value: usize) {
    buf[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes());
}

fn put_bytes(buf: &mut [u8], offset: usize, value: &[u8]) {
    buf[offset..offset + value.len()].copy_from_slice(value);
}

fn platform_versions(version: &[u8]) -> Vec<u8> {
    let mut versions = vec![0u8; 36];
    put_bytes(&mut versions, 4, version);
    versions
}

pub struct TestPak {
    pub name: &'static str,
    pub data: Vec<u8>,
    pub max_segment_size: usize,
    /// Unsigned bytes after the PAK's last segment.
    pub padding: usize,
}

/// Builds a signed EPK2 image. Segment contents and headers are always
/// encrypted with [`aes_key`]; the top header only when `encrypt_header` is set.
pub fn build_epk2(paks: &[TestPak], encrypt_header: bool) -> Vec<u8> {
    let key = aes_key();
    let signer = private_key(0);

    let mut body = Vec::new();
    let mut locations = Vec::new();
    let mut signatures = 1;

    for pak in paks {
        let file_offset = EPK2_PAK_AREA + body.len();
        let virtual_offset = file_offset - signatures * SIGNATURE_SIZE;
        let segments: Vec<&[u8]> = pak.data.chunks(pak.max_segment_size).collect();

        let mut size = 0;
        for (index, segment) in segments.iter().enumerate() {
            let mut seg_header = vec![0u8; 0x80];
            put_bytes(&mut seg_header, 0, pak.name.as_bytes());
            put_u32(&mut seg_header, 4, pak.data.len());
            put_bytes(&mut seg_header, 8, b"mtk5369-emmc");
            put_bytes(&mut seg_header, 72, &[0x00, 0x01, 0x02, 0x03]);
            put_u32(&mut seg_header, 80, 0);
            put_u32(&mut seg_header, 84, segments.len());
            put_u32(&mut seg_header, 88, pak.max_segment_size);
            put_u32(&mut seg_header, 92, index);
            put_bytes(&mut seg_header, 96, b"MPAK");

            let mut payload = encrypt_block_stream(&seg_header, &key);
            payload.extend(encrypt_block_stream(segment, &key));
            body.extend(sign_span(signer, &payload));

            size += 0x80 + segment.len();
            signatures += 1;
        }
        body.extend(vec![0xEE; pak.padding]);
        locations.push((virtual_offset, size, pak.padding));
    }

    let mut plain = vec![0u8; 0x630];
    put_bytes(&mut plain, 0, b"epak");
    put_u32(&mut plain, 4, locations.iter().map(|(_, size, padding)| size + padding).sum());
    put_u32(&mut plain, 8, paks.len());
    put_bytes(&mut plain, 12, b"EPK2");
    put_bytes(&mut plain, 16, &TEST_VERSION);
    put_bytes(&mut plain, 20, TEST_OTA_ID.as_bytes());
    put_u32(&mut plain, 52, locations[0].0);
    put_u32(&mut plain, 56, locations[0].1);

    for (i, pak) in paks.iter().enumerate() {
        let entry = 60 + 20 * i;
        let (next_offset, next_size, _) = locations.get(i + 1).copied().unwrap_or((0, 0, 0));
        put_bytes(&mut plain, entry, pak.name.as_bytes());
        put_bytes(&mut plain, entry + 4, &[0x00, 0x01, 0x02, 0x03]);
        put_u32(&mut plain, entry + 8, pak.max_segment_size);
        put_u32(&mut plain, entry + 12, next_offset);
        put_u32(&mut plain, entry + 16, next_size);
    }

    let payload = if encrypt_header { encrypt_block_stream(&plain, &key) } else { plain };
    let mut image = sign_span(signer, &payload);
    image.extend(platform_versions(b"0004.0012.0000"));
    assert_eq!(image.len(), EPK2_PAK_AREA);

    image.extend(body);
    image
}

pub struct TestPackage {
    pub name: &'static str,
    pub data: Vec<u8>,
    pub segment_size: usize,
}

const PKG_INFO_ENTRY_SIZE: usize = 324;

/// Builds a signed EPK3 image. The package table and chunks are always
/// encrypted with [`aes_key`]; the header only when `encrypt_header` is set.
pub fn build_epk3(packages: &[TestPackage], encrypt_header: bool) -> Vec<u8> {
    let key = aes_key();
    let signer = private_key(0);

    let chunked: Vec<Vec<&[u8]>> = packages.iter().map(|p| p.data.chunks(p.segment_size).collect()).collect();
    let entry_count: usize = chunked.iter().map(Vec::len).sum();

    let mut pkg_info = vec![0u8; 8 + PKG_INFO_ENTRY_SIZE * entry_count];
    put_u32(&mut pkg_info, 0, PKG_INFO_ENTRY_SIZE * entry_count);
    put_u32(&mut pkg_info, 4, entry_count);

    let mut entry = 8;
    for (package, chunks) in packages.iter().zip(&chunked) {
        for index in 0..chunks.len() {
            put_u32(&mut pkg_info, entry, 3);
            put_u32(&mut pkg_info, entry + 4, PKG_INFO_ENTRY_SIZE);
            put_bytes(&mut pkg_info, entry + 8, package.name.as_bytes());
            put_bytes(&mut pkg_info, entry + 136, b"5.30.15");
            put_bytes(&mut pkg_info, entry + 232, b"arm");
            put_u32(&mut pkg_info, entry + 296, package.data.len());
            put_u32(&mut pkg_info, entry + 304, 1);
            put_u32(&mut pkg_info, entry + 308, index);
            put_u32(&mut pkg_info, entry + 312, chunks.len());
            put_u32(&mut pkg_info, entry + 316, package.segment_size);
            entry += PKG_INFO_ENTRY_SIZE;
        }
    }

    let mut plain = vec![0u8; 0x630];
    put_bytes(&mut plain, 0, b"EPK3");
    put_bytes(&mut plain, 4, &TEST_VERSION);
    put_bytes(&mut plain, 8, TEST_OTA_ID.as_bytes());
    put_u32(&mut plain, 40, pkg_info.len());
    put_u32(&mut plain, 44, 1);

    let payload = if encrypt_header { encrypt_block_stream(&plain, &key) } else { plain };
    let mut image = sign_span(signer, &payload);
    image.extend(platform_versions(b"1.2.3"));
    image.extend(sign_span(signer, &encrypt_block_stream(&pkg_info, &key)));
    assert_eq!(image.len(), 0x754 + pkg_info.len());

    for chunk in chunked.iter().flatten() {
        image.extend(sign_span(signer, &encrypt_block_stream(chunk, &key)));
    }
    image
}
