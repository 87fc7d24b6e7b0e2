#![forbid(unsafe_code)]

//! Segment decryption support for the arbor HLS tree.
//!
//! The tree consumes decryption exclusively through the [`SegmentDecrypter`]
//! trait; [`Aes128Decrypter`] is the stock AES-128-CBC implementation used
//! for `METHOD=AES-128` playlists. Sample-based DRM (Widevine) is resolved
//! by the host and never passes through this crate.

mod decrypt;
mod error;
mod license;

pub use decrypt::{AES_BLOCK_SIZE, Aes128Decrypter, SegmentDecrypter, iv_from_hex, iv_from_sequence};
pub use error::DrmError;
pub use license::LicenseKey;
