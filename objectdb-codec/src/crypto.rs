//! Per-field AES-256-GCM encryption for `secret`-marked schema fields.
//!
//! Key derivation: `BLAKE3::derive_key(context = "objectdb-secret-field-v1:<field>",
//! key_material = db.encryptionKey)`, giving each field its own key from a
//! single database-level secret so that recovering one field's plaintext
//! never helps recover another's. The `"v1:"` output prefix keeps a future
//! algorithm change backward-decodable for records already on disk.

use crate::CodecError;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

const VERSION_TAG: &str = "v1:";

fn derive_key(encryption_key: &[u8], field_name: &str) -> [u8; 32] {
    let context = format!("objectdb-secret-field-v1:{field_name}");
    blake3::derive_key(&context, encryption_key)
}

fn sealing_key(encryption_key: &[u8], field_name: &str) -> LessSafeKey {
    let raw = derive_key(encryption_key, field_name);
    let unbound = UnboundKey::new(&AES_256_GCM, &raw).expect("32-byte key matches AES_256_GCM");
    LessSafeKey::new(unbound)
}

/// Encrypts `plaintext`, returning `"v1:" + base64(nonce || ciphertext || tag)`.
pub fn encrypt_field(encryption_key: &[u8], field_name: &str, plaintext: &str) -> String {
    let key = sealing_key(encryption_key, field_name);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .expect("sealing with a fresh nonce cannot fail");

    let mut framed = Vec::with_capacity(NONCE_LEN + in_out.len());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&in_out);
    format!("{VERSION_TAG}{}", B64.encode(framed))
}

/// Reverses [`encrypt_field`]. Any failure — bad tag, truncated frame, wrong
/// key — surfaces as `CodecError::DecryptionFailed`, never silently.
pub fn decrypt_field(encryption_key: &[u8], field_name: &str, encoded: &str) -> Result<String, CodecError> {
    let body = encoded.strip_prefix(VERSION_TAG).ok_or(CodecError::DecryptionFailed)?;
    let framed = B64.decode(body).map_err(|_| CodecError::DecryptionFailed)?;
    if framed.len() < NONCE_LEN {
        return Err(CodecError::DecryptionFailed);
    }
    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CodecError::DecryptionFailed)?;

    let key = sealing_key(encryption_key, field_name);
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CodecError::DecryptionFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CodecError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_the_correct_key() {
        let key = b"twelve-byte-secret-material-not-truly-random";
        let encoded = encrypt_field(key, "token", "abc");
        assert_ne!(encoded, "abc");
        assert_eq!(decrypt_field(key, "token", &encoded).unwrap(), "abc");
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let key = b"correct-key-material-of-reasonable-length";
        let other = b"a-completely-different-key-material-value";
        let encoded = encrypt_field(key, "token", "abc");
        assert!(decrypt_field(other, "token", &encoded).is_err());
    }

    #[test]
    fn different_fields_get_different_ciphertext_for_same_plaintext() {
        let key = b"shared-database-encryption-key-material-x";
        let a = encrypt_field(key, "token_a", "same-value");
        let b = encrypt_field(key, "token_b", "same-value");
        assert_ne!(a, b);
    }
}
