mod include;

use std::fs::OpenOptions;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use binrw::BinReaderExt;
use tracing::{info, warn};

use crate::ProgramContext;
use crate::error::EpkError;
use crate::formats::epk::{self, ExtractionContext, EPK3_MAGIC, decrypt_header, firmware_dir, verify_header};
use crate::formats::{FileHandler, Format};
use crate::keys::{self, AES_KEY_FILE};
use crate::utils::aes::decrypt_block_stream;
use crate::utils::common;
use crate::utils::global::opt_dump_dec_hdr;
use crate::utils::mapped::{MappedImage, span};
use crate::utils::signature::SIGNATURE_SIZE;
use include::*;

pub fn format() -> Format {
    Format { name: "epk3", detect_func: epk::is_epk3, run_func: extract_epk3_file }
}

pub fn extract_epk3_file(path: &Path, app_ctx: &ProgramContext, handler: &dyn FileHandler) -> Result<PathBuf, EpkError> {
    let image = MappedImage::open(path)?;
    info!("File size: {} bytes", image.as_slice().len());
    extract_epk3(image.as_slice(), app_ctx, handler)
}

pub fn extract_epk3(image: &[u8], app_ctx: &ProgramContext, handler: &dyn FileHandler) -> Result<PathBuf, EpkError> {
    let mut ctx = ExtractionContext::default();

    verify_header(image, &mut ctx, app_ctx, HEADER_SIZE, "EPK3")?;
    let header = decrypt_header(image, &mut ctx, app_ctx, HEADER_SIZE, 0, EPK3_MAGIC, "EPK3")?;
    let hdr: Header = Cursor::new(&header).read_le()?;

    info!("Firmware info -");
    info!("Firmware magic: {}", String::from_utf8_lossy(&hdr.epk3_magic));
    info!("Firmware otaID: {}", hdr.ota_id());
    info!("Firmware version: {}", common::version_string(&hdr.version));
    info!("packageInfoSize: {}", hdr.package_info_size);
    info!("bChunked: {}", hdr.bchunked);

    let output_dir = firmware_dir(&app_ctx.output_dir, &hdr.version, &hdr.ota_id())?;
    opt_dump_dec_hdr(app_ctx, &output_dir, &header, "header")?;

    //PKG INFO
    let stored_pkg_info = span(image, PACKAGE_INFO_OFFSET, hdr.package_info_size as usize)?;
    let pkg_info = decrypt_package_info(stored_pkg_info, &mut ctx, app_ctx)?;
    opt_dump_dec_hdr(app_ctx, &output_dir, &pkg_info, "pkg_info")?;
    let entries = parse_package_info(&pkg_info)?;

    let mut offset = PACKAGE_INFO_OFFSET + stored_pkg_info.len();
    let mut entry_n = 0;
    while entry_n < entries.len() {
        let entry = &entries[entry_n];
        // the first entry of a package describes all of its segments
        entry_n += (entry.segment_count as usize).max(1);

        info!("PAK '{}' contains {} segment(s), size {} bytes:", entry.package_name(), entry.segment_count, entry.package_size);

        let (chunks, next_offset) = match plan_chunks(entry, offset, image.len()) {
            Ok(plan) => plan,
            Err(err) => {
                warn!("PAK '{}' is incomplete, stopping here: {}", entry.package_name(), err);
                break;
            }
        };

        for (i, chunk) in chunks.iter().enumerate() {
            info!("  segment #{} (name='{}', version='{}', offset='0x{:x}', size='{} bytes')",
                    i + 1, entry.package_name(), entry.package_version(), chunk.offset, chunk.size);
        }

        let output_path = write_package(image, &ctx, &entry.package_name(), &chunks, &output_dir)?;
        handler.handle_file(&output_path, app_ctx)?;
        offset = next_offset;
    }

    info!("Extraction finished!");
    Ok(output_dir)
}

/// Decrypts the package table. A plaintext header leaves no key to reuse, so
/// the key is picked by whether it yields a sane table.
fn decrypt_package_info(stored: &[u8], ctx: &mut ExtractionContext, app_ctx: &ProgramContext) -> Result<Vec<u8>, EpkError> {
    if ctx.aes_key.is_none() {
        info!("Finding key for package info...");
        let key = keys::find_aes_key(&app_ctx.config_dir.join(AES_KEY_FILE), |key| {
            is_plausible_package_info(&decrypt_block_stream(stored, key))
        })?
        .ok_or_else(|| EpkError::DecryptionKeyUnknown("EPK3 package info".to_string()))?;
        ctx.aes_key = Some(key);
    }

    ctx.decrypt(stored, "EPK3 package info")
}

fn is_plausible_package_info(data: &[u8]) -> bool {
    let mut reader = Cursor::new(data);
    let Ok(info_hdr) = reader.read_le::<PkgInfoHeader>() else { return false };
    if info_hdr.package_info_count == 0 {
        return false;
    }
    let Ok(entry) = reader.read_le::<PkgInfoEntry>() else { return false };

    let name = entry.package_name();
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic())
}

fn parse_package_info(pkg_info: &[u8]) -> Result<Vec<PkgInfoEntry>, EpkError> {
    let mut reader = Cursor::new(pkg_info);
    let info_hdr: PkgInfoHeader = reader.read_le()?;

    info!("Package info list size: {}", info_hdr.package_info_list_size);
    info!("Package info count: {}", info_hdr.package_info_count);

    let mut entries = Vec::new();
    for _ in 0..info_hdr.package_info_count {
        entries.push(reader.read_le()?);
    }
    Ok(entries)
}

/// Lays out a package's chunks from `offset` on, capping each so the package
/// never exceeds its declared size. Fails if any chunk lies past the image end.
fn plan_chunks(entry: &PkgInfoEntry, offset: usize, image_len: usize) -> Result<(Vec<Chunk>, usize), EpkError> {
    let package_size = entry.package_size as usize;
    let mut chunks = Vec::new();
    let mut written = 0;
    let mut chunk_offset = offset;

    for _ in 0..entry.segment_count {
        let size = (entry.segment_size as usize).min(package_size - written);
        let data_offset = chunk_offset + SIGNATURE_SIZE;
        if data_offset + size > image_len {
            return Err(EpkError::TruncatedImage { offset: data_offset, needed: size, available: image_len.saturating_sub(data_offset) });
        }

        chunks.push(Chunk { offset: data_offset, size });
        written += size;
        chunk_offset = data_offset + size;
    }

    Ok((chunks, chunk_offset))
}

fn write_package(image: &[u8], ctx: &ExtractionContext, name: &str, chunks: &[Chunk], output_dir: &Path) -> Result<PathBuf, EpkError> {
    let output_path = output_dir.join(format!("{}.pak", common::safe_file_name(name)));
    info!("Saving partition ({}) to file {}", name, output_path.display());

    let mut out_file = OpenOptions::new().write(true).create(true).truncate(true).open(&output_path)?;
    for chunk in chunks {
        let data = span(image, chunk.offset, chunk.size)?;
        out_file.write_all(&ctx.decrypt(data, "EPK3 package")?)?;
    }

    Ok(output_path)
}
