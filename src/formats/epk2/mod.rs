mod include;

use std::fs::OpenOptions;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use binrw::BinReaderExt;
use tracing::{info, warn};

use crate::ProgramContext;
use crate::error::EpkError;
use crate::formats::epk::{self, ExtractionContext, EPK2_MAGIC, decrypt_header, fallback_search, firmware_dir, has_magic, verify_header};
use crate::formats::{FileHandler, Format};
use crate::keys::{self, AES_KEY_FILE};
use crate::utils::aes::{AesKey, decrypt_block_stream};
use crate::utils::common;
use crate::utils::global::opt_dump_dec_hdr;
use crate::utils::mapped::{MappedImage, span};
use crate::utils::signature::SIGNATURE_SIZE;
use include::*;

pub fn format() -> Format {
    Format { name: "epk2", detect_func: epk::is_epk2, run_func: extract_epk2_file }
}

pub fn extract_epk2_file(path: &Path, app_ctx: &ProgramContext, handler: &dyn FileHandler) -> Result<PathBuf, EpkError> {
    let image = MappedImage::open(path)?;
    info!("File size: {} bytes", image.as_slice().len());
    extract_epk2(image.as_slice(), app_ctx, handler)
}

pub fn extract_epk2(image: &[u8], app_ctx: &ProgramContext, handler: &dyn FileHandler) -> Result<PathBuf, EpkError> {
    let mut ctx = ExtractionContext::default();

    verify_header(image, &mut ctx, app_ctx, MAX_SIGNED_HEADER, "EPK2")?;
    let header = decrypt_header(image, &mut ctx, app_ctx, HEADER_SIZE, EPK2_MAGIC_OFFSET, EPK2_MAGIC, "EPK2")?;

    let mut hdr_reader = Cursor::new(&header);
    let hdr: Header = hdr_reader.read_le()?;

    info!("Firmware info -");
    info!("Firmware magic: {}", String::from_utf8_lossy(&hdr.epk2_magic));
    info!("Firmware otaID: {}", hdr.ota_id());
    info!("Firmware version: {}", common::version_string(&hdr.version));
    info!("PAK count: {}", hdr.pak_count);
    info!("PAKs total size: {}", hdr.file_size);
    info!("Header length: {}", hdr.header_length);

    if image.len() < hdr.file_size as usize {
        warn!("Real file size is shorter than file size listed in the header. Number of extracted PAKs will be lowered to filesize...");
    }

    let mut pak_headers: Vec<PakHeader> = Vec::new();
    for _ in 0..hdr.pak_count {
        pak_headers.push(hdr_reader.read_le()?);
    }

    let output_dir = firmware_dir(&app_ctx.output_dir, &hdr.version, &hdr.ota_id())?;
    opt_dump_dec_hdr(app_ctx, &output_dir, &header, "header")?;

    info!("Scanning EPK2 firmware...");
    let paks = scan_paks(image, &ctx, &hdr, &pak_headers)?;

    let first_segment = paks.first().and_then(|pak| pak.segments.first())
        .ok_or_else(|| EpkError::FormatUnrecognized("EPK2 image holds no PAK segment".to_string()))?;
    select_segment_key(image, &mut ctx, app_ctx, first_segment)?;

    for pak in &paks {
        print_pak_info(image, &ctx, pak)?;
    }

    for pak in &paks {
        let output_path = write_pak(image, &ctx, pak, &output_dir)?;
        handler.handle_file(&output_path, app_ctx)?;
    }

    info!("Extraction finished!");
    Ok(output_dir)
}

/// Recovers the segment layout of every PAK.
///
/// The header only gives the offset of each following PAK in "virtual" terms
/// (signatures excluded), an upper bound for segment sizes and the declared
/// length of the next PAK. Each segment's real extent is the longest span
/// whose signature verifies, searched downward from the expected length.
/// A PAK that runs past the end of the image ends the scan with a warning.
fn scan_paks(image: &[u8], ctx: &ExtractionContext, hdr: &Header, pak_headers: &[PakHeader]) -> Result<Vec<Pak>, EpkError> {
    let last_index = pak_headers.len().checked_sub(1)
        .ok_or_else(|| EpkError::FormatUnrecognized("EPK2 header lists no PAKs".to_string()))?;

    let mut segment_offset = SIGNATURE_SIZE + hdr.header_length as usize;
    // header signature plus the signature of the segment being located
    let mut signature_sum = 2 * SIGNATURE_SIZE;
    let mut next_pak_length = hdr.file_size as usize;
    let mut truncation: Option<EpkError> = None;
    let mut paks: Vec<Pak> = Vec::new();

    'paks: for (pak_n, pak_header) in pak_headers.iter().enumerate() {
        let name = pak_header.name();

        let mut distance = if pak_n < last_index {
            (pak_header.next_pak_offset as usize + signature_sum).checked_sub(segment_offset)
                .ok_or_else(|| EpkError::FormatUnrecognized(format!("PAK '{}' is followed by a PAK that starts before it", name)))?
        } else if pak_n == 0 {
            // a lone PAK, only the declared total size is known
            next_pak_length + SIGNATURE_SIZE
        } else {
            next_pak_length
        };
        let max_distance = pak_header.max_segment_size as usize + SEGMENT_PREFIX_SIZE;

        let mut pak = Pak { name, segments: Vec::new() };

        loop {
            let segment_len = distance.min(max_distance);
            let next_segment_needed = distance > max_distance;

            let expected = if pak_n == 0 { segment_len } else { next_pak_length.min(max_distance) };
            let available = image.len().saturating_sub(segment_offset);
            if segment_offset >= image.len() || expected > available {
                warn!("PAK '{}' segment #{} runs past the end of the file, it and all following PAKs are skipped", pak.name, pak.segments.len() + 1);
                truncation = Some(EpkError::TruncatedImage { offset: segment_offset, needed: expected, available });
                break 'paks;
            }

            let verify_at = |len: usize| span(image, segment_offset, len).is_ok_and(|signed| ctx.verify(signed));
            let signed_len = if verify_at(expected) {
                expected
            } else {
                info!("Verification of the PAK segment #{} failed (size=0x{:X}). Trying to fallback...", pak.segments.len() + 1, expected);
                let found = expected.checked_sub(1).and_then(|initial| fallback_search(initial, 0, verify_at))
                    .ok_or_else(|| EpkError::SignatureInvalid {
                        what: format!("PAK '{}' segment #{}", pak.name, pak.segments.len() + 1),
                        offset: segment_offset,
                    })?;
                info!("Successfully verified with size: 0x{:X}", found);
                found
            };

            signature_sum += SIGNATURE_SIZE;
            let consumed = segment_len.checked_sub(SIGNATURE_SIZE)
                .ok_or_else(|| EpkError::FormatUnrecognized(format!("PAK '{}' segment is shorter than its signature", pak.name)))?;

            if next_segment_needed {
                distance -= consumed;
                next_pak_length = next_pak_length.saturating_sub(consumed);
            } else {
                next_pak_length = pak_header.next_pak_length as usize + SIGNATURE_SIZE;
            }

            let content_len = signed_len.checked_sub(SEGMENT_PREFIX_SIZE)
                .ok_or_else(|| EpkError::FormatUnrecognized(format!("PAK '{}' segment signs less than its own header", pak.name)))?;
            pak.segments.push(Segment {
                header_offset: segment_offset,
                content_offset: segment_offset + SEGMENT_PREFIX_SIZE,
                content_len,
            });

            segment_offset += segment_len;
            if !next_segment_needed {
                break;
            }
        }

        paks.push(pak);

        if pak_n < last_index && pak_header.next_pak_offset as usize + next_pak_length > image.len() {
            warn!("File is truncated after PAK '{}', {} of {} PAKs are extracted", paks[paks.len() - 1].name, paks.len(), pak_headers.len());
            break;
        }
    }

    if paks.is_empty() {
        return Err(truncation.unwrap_or_else(|| EpkError::FormatUnrecognized("no PAK found in EPK2 image".to_string())));
    }

    if let Some(segment) = paks.last().and_then(|pak| pak.segments.last()) {
        info!("Last extracted file offset: 0x{:x}", segment.content_offset + segment.content_len);
    }

    Ok(paks)
}

/// Segment headers are encrypted on their own; the key is the one that
/// turns the first segment header into an "MPAK" record.
fn select_segment_key(image: &[u8], ctx: &mut ExtractionContext, app_ctx: &ProgramContext, first_segment: &Segment) -> Result<(), EpkError> {
    let stored = span(image, first_segment.header_offset + SIGNATURE_SIZE, SEGMENT_HEADER_SIZE)?;
    let is_mpak = |key: &AesKey| has_magic(&decrypt_block_stream(stored, key), MPAK_MAGIC_OFFSET, MPAK_MAGIC);

    if ctx.aes_key.as_ref().is_some_and(is_mpak) {
        return Ok(());
    }

    let key = keys::find_aes_key(&app_ctx.config_dir.join(AES_KEY_FILE), is_mpak)?
        .ok_or_else(|| EpkError::DecryptionKeyUnknown("PAK segments".to_string()))?;
    ctx.aes_key = Some(key);
    Ok(())
}

fn print_pak_info(image: &[u8], ctx: &ExtractionContext, pak: &Pak) -> Result<(), EpkError> {
    info!("PAK '{}' contains {} segment(s):", pak.name, pak.segments.len());

    for (i, segment) in pak.segments.iter().enumerate() {
        let stored = span(image, segment.header_offset + SIGNATURE_SIZE, SEGMENT_HEADER_SIZE)?;
        let decrypted = ctx.decrypt(stored, "PAK segment header")?;
        let seg_header: SegmentHeader = Cursor::new(decrypted).read_le()?;

        info!("  segment #{} (name='{}', version='{}', platform='{}', offset='0x{:x}', size='{} bytes', build={})",
                i + 1, pak.name, common::version_string(&seg_header.sw_version), seg_header.platform_id(),
                segment.content_offset, segment.content_len, seg_header.build_type());
    }

    Ok(())
}

fn write_pak(image: &[u8], ctx: &ExtractionContext, pak: &Pak, output_dir: &Path) -> Result<PathBuf, EpkError> {
    let output_path = output_dir.join(format!("{}.pak", common::safe_file_name(&pak.name)));
    info!("Saving partition ({}) to file {}", pak.name, output_path.display());

    let mut out_file = OpenOptions::new().write(true).create(true).truncate(true).open(&output_path)?;
    for segment in &pak.segments {
        let content = span(image, segment.content_offset, segment.content_len)?;
        out_file.write_all(&ctx.decrypt(content, "PAK segment")?)?;
    }

    Ok(output_path)
}
