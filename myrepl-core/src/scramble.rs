//! password scramble algorithms of the supported auth plugins
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// mysql_native_password response
///
/// the 20-byte token is SHA1(password) XOR SHA1(seed || SHA1(SHA1(password)))
pub fn scramble_native(seed: &[u8], password: &[u8]) -> Option<[u8; 20]> {
    if password.is_empty() {
        return None;
    }
    let stage1: [u8; 20] = Sha1::digest(password).into();
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let mut token: [u8; 20] = hasher.finalize().into();
    for (t, s) in token.iter_mut().zip(stage1.iter()) {
        *t ^= s;
    }
    Some(token)
}

/// caching_sha2_password fast path response, also the first round of
/// sha256_password
///
/// the 32-byte token is SHA256(password) XOR SHA256(SHA256(SHA256(password)) || seed)
pub fn scramble_sha256(seed: &[u8], password: &[u8]) -> Option<[u8; 32]> {
    if password.is_empty() {
        return None;
    }
    let digest1: [u8; 32] = Sha256::digest(password).into();
    let digest2 = Sha256::digest(digest1);
    let mut hasher = Sha256::new();
    hasher.update(digest2);
    hasher.update(seed);
    let mut token: [u8; 32] = hasher.finalize().into();
    for (t, d) in token.iter_mut().zip(digest1.iter()) {
        *t ^= d;
    }
    Some(token)
}

/// the plaintext sent on the RSA full-auth path: password plus a
/// terminating NUL, XORed with the seed repeated as needed
pub fn xor_rotating(password: &[u8], seed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password);
    out.push(0);
    for (i, b) in out.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // reference vectors computed against a MySQL 5.7/8.0 server
    #[test]
    fn test_scramble_vectors() {
        let seed = [
            0x4e, 0x52, 0x33, 0x48, 0x50, 0x3a, 0x71, 0x49, 0x59, 0x61, 0x5f, 0x39, 0x3d, 0x64,
            0x62, 0x3f, 0x53, 0x64, 0x7b, 0x60,
        ];
        let password = [0x47, 0x21, 0x69, 0x64, 0x65, 0x72, 0x32, 0x37];
        assert_eq!(
            scramble_native(&seed, &password).unwrap(),
            [
                0x09, 0xcf, 0xf8, 0x85, 0x5e, 0x9e, 0x70, 0x53, 0x40, 0xff, 0x22, 0x70, 0xd8,
                0xfb, 0x9f, 0xad, 0xba, 0x90, 0x6b, 0x70,
            ]
        );
        assert_eq!(
            scramble_sha256(&seed, &password).unwrap(),
            [
                0x4f, 0x97, 0xbb, 0xfd, 0x20, 0x24, 0x01, 0xc4, 0x2a, 0x69, 0xde, 0xaa, 0xe5,
                0x3b, 0xda, 0x07, 0x7e, 0xd7, 0x57, 0x85, 0x63, 0xc1, 0xa8, 0x0e, 0xb8, 0x16,
                0xc8, 0x21, 0x19, 0xb6, 0x8d, 0x2e,
            ]
        );
    }

    #[test]
    fn test_empty_password() {
        assert!(scramble_native(b"12345678901234567890", b"").is_none());
        assert!(scramble_sha256(b"12345678901234567890", b"").is_none());
    }

    #[test]
    fn test_seed_and_password_both_matter() {
        let seed = b"01234567890123456789";
        let a = scramble_native(seed, b"secret").unwrap();
        assert_ne!(a, scramble_native(seed, b"other").unwrap());
        assert_ne!(a, scramble_native(b"98765432109876543210", b"secret").unwrap());
    }

    #[test]
    fn test_xor_rotating() {
        let out = xor_rotating(b"secret", b"ab");
        assert_eq!(7, out.len());
        // undo the xor to get password plus NUL back
        let undone: Vec<u8> = out
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ b"ab"[i % 2])
            .collect();
        assert_eq!(b"secret\0".to_vec(), undone);
    }
}
