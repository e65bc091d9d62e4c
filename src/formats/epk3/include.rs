use crate::utils::common;
use crate::utils::signature::SIGNATURE_SIZE;
use binrw::BinRead;

/// Signed header span, signature included.
pub const HEADER_SIZE: usize = 0x6B4;
pub const PACKAGE_INFO_OFFSET: usize = SIGNATURE_SIZE + 0x654 + SIGNATURE_SIZE;

#[derive(BinRead)]
pub struct Header {
    pub epk3_magic: [u8; 4], //EPK3
    pub version: [u8; 4],
    ota_id_bytes: [u8; 32],
    pub package_info_size: u32,
    pub bchunked: u32,
}
impl Header {
    pub fn ota_id(&self) -> String {
        common::string_from_bytes(&self.ota_id_bytes)
    }
}

#[derive(BinRead)]
pub struct PkgInfoHeader {
    pub package_info_list_size: u32,
    pub package_info_count: u32,
}

#[derive(BinRead)]
pub struct PkgInfoEntry {
    _package_type: u32,
    _package_info_size: u32,
    package_name_bytes: [u8; 128],
    package_version_bytes: [u8; 96],
    _package_architecture_bytes: [u8; 32],
    _checksum: [u8; 32],
    pub package_size: u32,
    _dipk: u32,
    //segment info
    _is_segmented: u32,
    _segment_index: u32,
    pub segment_count: u32,
    pub segment_size: u32,
    //
    _unk: u32,
}
impl PkgInfoEntry {
    pub fn package_name(&self) -> String {
        common::string_from_bytes(&self.package_name_bytes)
    }

    pub fn package_version(&self) -> String {
        common::string_from_bytes(&self.package_version_bytes)
    }
}

/// One signed chunk of a package; `offset` points past the chunk's signature.
pub struct Chunk {
    pub offset: usize,
    pub size: usize,
}
