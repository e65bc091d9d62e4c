use crate::utils::common;
use crate::utils::signature::SIGNATURE_SIZE;
use binrw::BinRead;

/// Stored header span decrypted after the leading signature.
pub const HEADER_SIZE: usize = 0x5B4 + SIGNATURE_SIZE;
/// Longest header span the signature may cover.
pub const MAX_SIGNED_HEADER: usize = SIGNATURE_SIZE + 0x634;
pub const EPK2_MAGIC_OFFSET: usize = 0x0C;

pub const SEGMENT_HEADER_SIZE: usize = 0x80;
/// Signature plus encrypted segment header in front of every segment's content.
pub const SEGMENT_PREFIX_SIZE: usize = SIGNATURE_SIZE + SEGMENT_HEADER_SIZE;
pub const MPAK_MAGIC: &[u8; 4] = b"MPAK";
pub const MPAK_MAGIC_OFFSET: usize = 96;

#[derive(BinRead)]
pub struct Header {
    _epak_magic: [u8; 4], //epak
    pub file_size: u32,
    pub pak_count: u32,
    pub epk2_magic: [u8; 4], //EPK2
    pub version: [u8; 4],
    ota_id_bytes: [u8; 32],
    pub header_length: u32,
    _first_pak_length: u32,
}
impl Header {
    pub fn ota_id(&self) -> String {
        common::string_from_bytes(&self.ota_id_bytes)
    }
}

// the location fields describe the following PAK, not this one
#[derive(BinRead)]
pub struct PakHeader {
    name_bytes: [u8; 4],
    _version: [u8; 4],
    pub max_segment_size: u32,
    pub next_pak_offset: u32,
    pub next_pak_length: u32,
}
impl PakHeader {
    pub fn name(&self) -> String {
        common::string_from_bytes(&self.name_bytes)
    }
}

#[derive(BinRead)]
pub struct SegmentHeader {
    _pak_name_bytes: [u8; 4],
    _image_size: u32,
    platform_id_bytes: [u8; 64],
    pub sw_version: [u8; 4],
    _sw_date: u32,
    devmode: u32,
    _segment_count: u32,
    _segment_size: u32,
    _segment_index: u32,
    _pak_magic_bytes: [u8; 4], //MPAK
    _reserved: [u8; 24],
    _segment_crc32: u32,
}
impl SegmentHeader {
    pub fn platform_id(&self) -> String {
        common::string_from_bytes(&self.platform_id_bytes)
    }

    pub fn build_type(&self) -> String {
        match self.devmode {
            0 => "RELEASE".to_string(),
            1 => "DEBUG".to_string(),
            2 => "TEST".to_string(),
            other => format!("UNKNOWN 0x{:x}", other),
        }
    }
}

/// A signed segment found by the scan; offsets are absolute in the image.
pub struct Segment {
    pub header_offset: usize,
    pub content_offset: usize,
    pub content_len: usize,
}

pub struct Pak {
    pub name: String,
    pub segments: Vec<Segment>,
}
