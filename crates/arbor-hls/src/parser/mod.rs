//! The two M3U8 state machines: master playlists build the presentation
//! structure, media playlists populate and refresh segment timelines.

mod encryption;
mod master;
mod media;

pub use encryption::{EncryptionContext, EncryptionType, process_encryption};
pub use master::parse_master_playlist;
pub use media::parse_media_playlist;
pub(crate) use media::apply_update_remap;

use tracing::warn;

use crate::model::{ContainerType, Representation, StreamType};

/// Outcome of preparing a representation's timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareStatus {
    /// Timeline populated, no DRM change.
    Ok,
    /// A new key slot was interned; the host should re-initialize its
    /// decryption session.
    DrmChanged,
    /// The Widevine key matches the existing slot.
    DrmUnchanged,
}

/// Best-effort audio codec from a `CODECS` attribute value.
///
/// The search order matters: multi-channel formats are announced alongside
/// their stereo fallbacks, and `ec-3` must win over `ac-3`.
pub(crate) fn infer_audio_codec(codecs: &str) -> &'static str {
    if codecs.contains("ec-3") {
        "ec-3"
    } else if codecs.contains("ac-3") {
        "ac-3"
    } else {
        "aac"
    }
}

/// Same inference over an existing representation's codec set.
pub(crate) fn audio_codec_from_representation(rep: &Representation) -> &'static str {
    if rep.contains_codec("ec-3") {
        "ec-3"
    } else if rep.contains_codec("ac-3") {
        "ac-3"
    } else {
        "aac"
    }
}

fn detect_container_from_ext(extension: &str) -> ContainerType {
    if extension.eq_ignore_ascii_case("ts") {
        ContainerType::Ts
    } else if extension.eq_ignore_ascii_case("aac") {
        ContainerType::Adts
    } else if extension.eq_ignore_ascii_case("mp4") {
        ContainerType::Mp4
    } else if extension.eq_ignore_ascii_case("vtt") || extension.eq_ignore_ascii_case("webvtt") {
        ContainerType::Text
    } else {
        ContainerType::Invalid
    }
}

/// Container type for a segment URI, falling back by stream type when the
/// extension is missing or unknown (media URLs are sometimes encoded as
/// parameters of a beacon URL and carry no usable extension).
pub(crate) fn container_for_uri(uri: &str, stream_type: StreamType) -> ContainerType {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let container = match path.rsplit_once('.') {
        Some((_, ext)) => detect_container_from_ext(ext),
        None => ContainerType::Invalid,
    };
    if container != ContainerType::Invalid {
        return container;
    }

    match stream_type {
        StreamType::Video => {
            warn!("Cannot detect container type from media url, fallback to TS");
            ContainerType::Ts
        }
        StreamType::Audio => {
            warn!("Cannot detect container type from media url, fallback to ADTS");
            ContainerType::Adts
        }
        StreamType::Subtitle => {
            warn!("Cannot detect container type from media url, fallback to TEXT");
            ContainerType::Text
        }
        StreamType::NoType => ContainerType::Invalid,
    }
}

/// Parse a `WIDTHxHEIGHT` resolution value.
pub(crate) fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once(['x', 'X'])?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

/// Parse a `LENGTH[@OFFSET]` byte-range value.
pub(crate) fn parse_byte_range(value: &str) -> Option<(u64, Option<u64>)> {
    match value.split_once('@') {
        Some((length, offset)) => Some((
            length.trim().parse().ok()?,
            Some(offset.trim().parse().ok()?),
        )),
        None => Some((value.trim().parse().ok()?, None)),
    }
}
