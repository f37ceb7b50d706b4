use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Fingerprint of a wire-format public key: sha256(wire_bytes).
pub fn fingerprint(wire_public_key: &[u8]) -> [u8; 32] {
    sha256(wire_public_key)
}

/// Hex digest used by the signature log for signed payloads.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
