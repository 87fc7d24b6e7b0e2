use std::collections::HashMap;

use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::model::CryptoMode;
use crate::urls;

const WIDEVINE_KEYFORMAT: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";
const FAIRPLAY_KEYFORMAT: &str = "com.apple.streamingkeydelivery";

/// Length of the `data:text/plain;base64,` prefix on Widevine key URIs.
const DATA_URI_PREFIX_LEN: usize = 23;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionType {
    NotSupported,
    Clear,
    Aes128,
    Widevine,
    Unknown,
}

/// Rolling key state accumulated while parsing one playlist.
///
/// `#EXT-X-KEY` tags mutate this context; segments and representations
/// snapshot it into the owning period's key catalog when they intern.
#[derive(Clone, Debug, Default)]
pub struct EncryptionContext {
    /// AES-128: the key URL. Widevine: the base64 pssh payload.
    pub pssh: Bytes,
    pub default_kid: Bytes,
    pub iv: Bytes,
    pub crypto_mode: CryptoMode,
}

impl EncryptionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Classify an `#EXT-X-KEY`/`#EXT-X-SESSION-KEY` attribute list and update
/// the rolling key context.
pub fn process_encryption(
    ctx: &mut EncryptionContext,
    base_url: Option<&Url>,
    attribs: &HashMap<String, String>,
) -> EncryptionType {
    let method = attribs.get("METHOD").map(String::as_str).unwrap_or("");
    let uri = attribs.get("URI").map(String::as_str).unwrap_or("");
    let keyformat = attribs.get("KEYFORMAT").map(String::as_str).unwrap_or("");

    if method == "NONE" {
        ctx.pssh = Bytes::new();
        return EncryptionType::Clear;
    }

    if method == "AES-128" && !uri.is_empty() {
        let key_url = match urls::resolve(base_url, uri) {
            Ok(url) => url,
            Err(_) => return EncryptionType::Unknown,
        };
        ctx.pssh = Bytes::from(key_url.to_string());
        ctx.iv = attribs
            .get("IV")
            .and_then(|iv| arbor_drm::iv_from_hex(iv))
            .map(Bytes::from)
            .unwrap_or_default();
        return EncryptionType::Aes128;
    }

    if keyformat.eq_ignore_ascii_case(WIDEVINE_KEYFORMAT) && !uri.is_empty() {
        if let Some(keyid) = attribs.get("KEYID") {
            // Hex KID after the "0x" prefix
            if let Ok(kid) = hex_decode_kid(keyid.get(2..).unwrap_or("")) {
                ctx.default_kid = kid;
            }
        }

        ctx.pssh = Bytes::from(uri.get(DATA_URI_PREFIX_LEN..).unwrap_or("").to_string());

        // No KID in the playlist: try the pssh box itself. A version-0 box
        // with one KID is exactly 50 bytes (len + 'pssh' + version + system
        // id + kid count + kid), so the KID sits at bytes [34..50).
        if ctx.default_kid.is_empty() && ctx.pssh.len() == 68 {
            if let Ok(decoded) = BASE64_STANDARD.decode(ctx.pssh.as_ref()) {
                if decoded.len() == 50 {
                    ctx.default_kid = Bytes::copy_from_slice(&decoded[34..50]);
                }
            }
        }

        if method == "SAMPLE-AES-CTR" {
            ctx.crypto_mode = CryptoMode::AesCtr;
        } else if method == "SAMPLE-AES" {
            ctx.crypto_mode = CryptoMode::AesCbc;
        }

        return EncryptionType::Widevine;
    }

    if keyformat.eq_ignore_ascii_case(FAIRPLAY_KEYFORMAT) {
        debug!(keyformat, "arbor-hls: keyformat not supported");
        return EncryptionType::NotSupported;
    }

    EncryptionType::Unknown
}

fn hex_decode_kid(hexstr: &str) -> Result<Bytes, ()> {
    let bytes = hex::decode(hexstr).map_err(|_| ())?;
    if bytes.len() != 16 {
        return Err(());
    }
    Ok(Bytes::from(bytes))
}
