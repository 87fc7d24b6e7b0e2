//! AES-128-CBC segment decryption.

use aes::Aes128;
use async_trait::async_trait;
use cbc::{
    Decryptor,
    cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding, block_padding::Pkcs7},
};
use tracing::trace;

use crate::{DrmError, LicenseKey};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Decryption collaborator consumed by the HLS tree.
///
/// Segments arrive in chunks; the caller owns IV chaining (it seeds the IV
/// from the playlist or the media sequence and carries the last ciphertext
/// block of each chunk forward as the next IV).
#[async_trait]
pub trait SegmentDecrypter: Send + Sync {
    /// The license-key descriptor used for key fetches.
    fn license_key(&self) -> &LicenseKey;

    /// Decrypt one chunk of an AES-128-CBC segment, appending plaintext to
    /// `dst`. The final chunk (`is_last_chunk`) removes PKCS7 padding;
    /// intermediate chunks decrypt block-by-block without unpadding.
    fn decrypt_chunk(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        src: &[u8],
        dst: &mut Vec<u8>,
        is_last_chunk: bool,
    ) -> Result<(), DrmError>;

    /// Attempt a license renewal with the descriptor's token. Returns true
    /// when the renewal succeeded and a key fetch may be retried once.
    async fn renew_license(&self, token: &str) -> bool {
        let _ = token;
        false
    }
}

/// Stock AES-128-CBC decrypter for `METHOD=AES-128` playlists.
pub struct Aes128Decrypter {
    license: LicenseKey,
}

impl Aes128Decrypter {
    pub fn new(license: LicenseKey) -> Self {
        Self { license }
    }
}

#[async_trait]
impl SegmentDecrypter for Aes128Decrypter {
    fn license_key(&self) -> &LicenseKey {
        &self.license
    }

    fn decrypt_chunk(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        src: &[u8],
        dst: &mut Vec<u8>,
        is_last_chunk: bool,
    ) -> Result<(), DrmError> {
        if src.is_empty() {
            return Ok(());
        }

        let key: &[u8; AES_BLOCK_SIZE] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKey(format!("AES-128 key must be 16 bytes, got {}", key.len())))?;

        // CBC requires ciphertext aligned to the block size
        if !src.len().is_multiple_of(AES_BLOCK_SIZE) {
            return Err(DrmError::Cipher(format!(
                "ciphertext length {} is not aligned to AES block size {}",
                src.len(),
                AES_BLOCK_SIZE
            )));
        }

        let start = dst.len();
        dst.extend_from_slice(src);

        let decryptor = Decryptor::<Aes128>::new(key.into(), iv.into());
        let written = if is_last_chunk {
            let plaintext = decryptor
                .decrypt_padded_mut::<Pkcs7>(&mut dst[start..])
                .map_err(|e| DrmError::Cipher(format!("PKCS7 unpad failed: {e}")))?;
            plaintext.len()
        } else {
            let plaintext = decryptor
                .decrypt_padded_mut::<NoPadding>(&mut dst[start..])
                .map_err(|e| DrmError::Cipher(format!("CBC decrypt failed: {e}")))?;
            plaintext.len()
        };

        dst.truncate(start + written);
        trace!(
            encrypted = src.len(),
            decrypted = written,
            is_last_chunk,
            "aes128_cbc: chunk decrypted"
        );
        Ok(())
    }
}

/// Build the RFC 8216 default IV for a media sequence number: a 128-bit
/// big-endian integer holding the sequence in its low 64 bits.
pub fn iv_from_sequence(sequence: u64) -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

/// Parse an `IV=0x...` attribute value into raw bytes.
///
/// Returns `None` for empty or non-hex input; longer values are truncated to
/// the AES block size.
pub fn iv_from_hex(value: &str) -> Option<Vec<u8>> {
    let hexstr = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if hexstr.is_empty() {
        return None;
    }
    let mut bytes = hex::decode(hexstr).ok()?;
    bytes.truncate(AES_BLOCK_SIZE);
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use aes::Aes128;
    use cbc::{
        Encryptor,
        cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
    };
    use rstest::rstest;

    use super::*;

    fn encrypt_aes128_cbc(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let encryptor = Encryptor::<Aes128>::new(key.into(), iv.into());
        let padded_len = plaintext.len() + (AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct = encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .expect("encrypt_padded_mut failed");
        ct.to_vec()
    }

    #[test]
    fn single_chunk_roundtrip() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        let plaintext = b"Two segments and a key rotation walk into a playlist.";

        let ciphertext = encrypt_aes128_cbc(plaintext, &key, &iv);
        let decrypter = Aes128Decrypter::new(LicenseKey::default());

        let mut dst = Vec::new();
        decrypter
            .decrypt_chunk(&key, &iv, &ciphertext, &mut dst, true)
            .unwrap();
        assert_eq!(dst, plaintext);
    }

    #[test]
    fn chunked_decrypt_with_iv_chaining() {
        let key = [0xA5u8; 16];
        let iv = [0x01u8; 16];
        let plaintext: Vec<u8> = (0..96).map(|i| i as u8).collect();

        let ciphertext = encrypt_aes128_cbc(&plaintext, &key, &iv);
        let decrypter = Aes128Decrypter::new(LicenseKey::default());

        // Feed the ciphertext in two chunks, chaining the IV the way the
        // tree does: next IV = last ciphertext block of the previous chunk.
        let (first, last) = ciphertext.split_at(48);
        let mut dst = Vec::new();
        decrypter
            .decrypt_chunk(&key, &iv, first, &mut dst, false)
            .unwrap();

        let mut chained_iv = [0u8; 16];
        chained_iv.copy_from_slice(&first[first.len() - 16..]);
        decrypter
            .decrypt_chunk(&key, &chained_iv, last, &mut dst, true)
            .unwrap();

        assert_eq!(dst, plaintext);
    }

    #[test]
    fn unaligned_chunk_fails() {
        let decrypter = Aes128Decrypter::new(LicenseKey::default());
        let mut dst = Vec::new();
        let result = decrypter.decrypt_chunk(&[0u8; 16], &[0u8; 16], &[0u8; 15], &mut dst, false);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_key_length_fails() {
        let decrypter = Aes128Decrypter::new(LicenseKey::default());
        let mut dst = Vec::new();
        let result = decrypter.decrypt_chunk(&[0u8; 20], &[0u8; 16], &[0u8; 16], &mut dst, false);
        assert!(matches!(result, Err(DrmError::InvalidKey(_))));
    }

    #[test]
    fn iv_from_sequence_layout() {
        let iv = iv_from_sequence(0x0102_0304_0506_0708);
        assert_eq!(&iv[..8], &[0u8; 8]);
        assert_eq!(&iv[8..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[rstest]
    #[case("0x00000000000000000000000000000001", Some(16))]
    #[case("ffff", Some(2))]
    #[case("", None)]
    #[case("0x", None)]
    #[case("not-hex", None)]
    fn iv_hex_parsing(#[case] input: &str, #[case] expected_len: Option<usize>) {
        assert_eq!(iv_from_hex(input).map(|b| b.len()), expected_len);
    }
}
