use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};

/// Size of the RSA-1024 signature that precedes every signed span.
pub const SIGNATURE_SIZE: usize = 0x80;

/// Parses a PEM public key, either SubjectPublicKeyInfo or PKCS#1.
pub fn load_public_key(pem: &[u8]) -> Result<RsaPublicKey, String> {
    let pem = std::str::from_utf8(pem).map_err(|e| format!("not a PEM file: {}", e))?;

    match RsaPublicKey::from_public_key_pem(pem) {
        Ok(key) => Ok(key),
        Err(spki_err) => RsaPublicKey::from_pkcs1_pem(pem)
            .map_err(|pkcs1_err| format!("{} / {}", spki_err, pkcs1_err)),
    }
}

/// The signature covers SHA1(SHA1(payload)), not the payload digest itself.
fn signed_digest(payload: &[u8]) -> [u8; 20] {
    let first = Sha1::digest(payload);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&Sha1::digest(first));
    digest
}

/// Checks a span laid out as `signature || payload`.
pub fn verify(key: &RsaPublicKey, span: &[u8]) -> bool {
    if span.len() < SIGNATURE_SIZE {
        return false;
    }
    let (signature, payload) = span.split_at(SIGNATURE_SIZE);
    key.verify(Pkcs1v15Sign::new::<Sha1>(), &signed_digest(payload), signature).is_ok()
}

#[cfg(test)]
pub fn sign(key: &rsa::RsaPrivateKey, payload: &[u8]) -> Vec<u8> {
    key.sign(Pkcs1v15Sign::new::<Sha1>(), &signed_digest(payload)).unwrap()
}
