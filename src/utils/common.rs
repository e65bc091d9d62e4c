use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Reads up to `size` bytes at `offset`. A short file yields a short buffer.
pub fn read_file(mut file: &File, offset: u64, size: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::with_capacity(size);
    file.take(size as u64).read_to_end(&mut buffer)?;

    // reset seek (!
    file.seek(SeekFrom::Start(offset))?;
    Ok(buffer)
}

pub fn string_from_bytes(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// Replaces path separators so a name read from an image stays inside its directory.
pub fn safe_file_name(name: &str) -> String {
    name.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect()
}

/// Versions are stored with the most significant component last.
pub fn version_string(version: &[u8; 4]) -> String {
    format!("{:02x}.{:02x}.{:02x}.{:02x}", version[3], version[2], version[1], version[0])
}
