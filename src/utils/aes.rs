use aes::Aes128;
use aes::cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray};

pub const AES_BLOCK_SIZE: usize = 16;

/// A raw 128-bit key with its expanded round keys for both directions.
#[derive(Clone)]
pub struct AesKey {
    bytes: [u8; 16],
    cipher: Aes128,
}

impl AesKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        let cipher = Aes128::new(&bytes.into());
        Self { bytes, cipher }
    }

    pub fn hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AesKey").field(&self.hex()).finish()
    }
}

/// Decrypts every whole block on its own (no chaining, no IV).
/// A trailing partial block is copied through unchanged.
pub fn decrypt_block_stream(src: &[u8], key: &AesKey) -> Vec<u8> {
    let mut buffer = src.to_vec();
    for chunk in buffer.chunks_exact_mut(AES_BLOCK_SIZE) {
        key.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    buffer
}

/// Inverse of [`decrypt_block_stream`], with the same tail passthrough.
#[cfg(test)]
pub fn encrypt_block_stream(src: &[u8], key: &AesKey) -> Vec<u8> {
    use aes::cipher::BlockEncrypt;

    let mut buffer = src.to_vec();
    for chunk in buffer.chunks_exact_mut(AES_BLOCK_SIZE) {
        key.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    buffer
}
