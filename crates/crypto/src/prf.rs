//! Keyed pseudo-random function (HMAC-SHA256).

use crate::{CryptoError, Result};
use hmac::digest::generic_array::GenericArray;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 block size; HMAC zero-pads shorter keys to this length.
const BLOCK_SIZE: usize = 64;

/// Compute `HMAC-SHA256(key, parts[0] ‖ parts[1] ‖ …)`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
        expected: 64,
        actual: key.len(),
    })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Keyed PRF over a 16-byte key: `HMAC-SHA256(key, parts[0] ‖ parts[1] ‖ …)`.
///
/// Same output as [`hmac_sha256`], but infallible since the key always fits
/// in one block.
pub fn prf(key: &[u8; 16], parts: &[&[u8]]) -> [u8; 32] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..key.len()].copy_from_slice(key);
    let mut mac = <HmacSha256 as Mac>::new(GenericArray::from_slice(&block));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2() {
        let out = hmac_sha256(b"Jefe", &[b"what do ya want for nothing?"]).unwrap();
        assert_eq!(
            hex::encode(out),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_prf_matches_hmac() {
        let key = [7u8; 16];
        let parts: &[&[u8]] = &[b"epoch", &5u64.to_be_bytes()];
        assert_eq!(prf(&key, parts), hmac_sha256(&key, parts).unwrap());
    }

    #[test]
    fn test_parts_are_concatenated() {
        let key = [1u8; 16];
        assert_eq!(
            hmac_sha256(&key, &[b"ab", b"cd"]).unwrap(),
            hmac_sha256(&key, &[b"abcd"]).unwrap()
        );
    }
}
