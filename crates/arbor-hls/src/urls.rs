use url::Url;

use crate::error::{HlsError, HlsResult};

/// Resolve a manifest reference against a base URL.
///
/// Absolute references are used as-is; relative ones join against `base`
/// (which carries RFC 3986 semantics: the last path segment of the base is
/// replaced unless the base ends with `/`).
pub(crate) fn resolve(base: Option<&Url>, reference: &str) -> HlsResult<Url> {
    match Url::parse(reference) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .ok_or_else(|| HlsError::InvalidUrl(format!("no base URL for '{reference}'")))?
            .join(reference)
            .map_err(|e| HlsError::InvalidUrl(format!("'{reference}': {e}"))),
        Err(e) => Err(HlsError::InvalidUrl(format!("'{reference}': {e}"))),
    }
}

/// The parameter-stripped form of an effective URL, used as a base for
/// relative resolution in child playlists.
pub(crate) fn strip_params(url: &Url) -> Url {
    let mut stripped = url.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    stripped
}
