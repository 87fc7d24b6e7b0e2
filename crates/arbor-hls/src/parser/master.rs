//! Master-playlist state machine.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::error::{HlsError, HlsResult};
use crate::lexer::{Line, TagLexer, parse_attributes};
use crate::model::{
    AdaptationSet, ContainerType, DEFAULT_TIMESCALE, Period, Presentation, Representation,
    StreamType,
};
use crate::parser::encryption::{EncryptionContext, EncryptionType, process_encryption};
use crate::parser::{audio_codec_from_representation, infer_audio_codec, parse_resolution};

/// Alternate renditions declared under one `GROUP-ID`.
#[derive(Default)]
struct ExtGroup {
    codecs: String,
    adaptation_sets: Vec<AdaptationSet>,
}

impl ExtGroup {
    /// Record the group's audio codec and propagate it into every
    /// representation already collected under this group.
    fn set_codecs(&mut self, codec: &str) {
        self.codecs = codec.to_string();
        for adp_set in &mut self.adaptation_sets {
            for rep in &mut adp_set.representations {
                rep.add_codecs(codec);
            }
        }
    }
}

/// Parse a master playlist into the presentation.
///
/// On success the presentation holds one period with the variant tree and
/// defaults to live; child playlists are loaded separately. The manifest and
/// base URLs must be set before calling.
pub fn parse_master_playlist(model: &mut Presentation, data: &str) -> HlsResult<()> {
    let mut is_ext_m3u = false;
    let mut create_dummy_audio = false;

    let mut period = Period::new(DEFAULT_TIMESCALE);
    let mut groups: BTreeMap<String, ExtGroup> = BTreeMap::new();

    let mut lexer = TagLexer::new(data);
    while let Some(line) = lexer.next_line() {
        // Nothing counts until the extended-M3U marker has been seen
        if !is_ext_m3u {
            if matches!(line, Line::Tag { name: "EXTM3U", .. }) {
                is_ext_m3u = true;
            }
            continue;
        }

        let Line::Tag { name, value } = line else {
            continue;
        };

        match name {
            "EXT-X-MEDIA" => {
                let attribs = parse_attributes(value);

                let stream_type = match attribs.get("TYPE").map(String::as_str) {
                    Some("AUDIO") => StreamType::Audio,
                    Some("SUBTITLES") => StreamType::Subtitle,
                    _ => continue,
                };

                let group = groups
                    .entry(attribs.get("GROUP-ID").cloned().unwrap_or_default())
                    .or_default();

                let mut adp_set = AdaptationSet::new(stream_type);
                if let Some(language) = attribs.get("LANGUAGE").filter(|l| !l.is_empty()) {
                    adp_set.language = language.clone();
                }
                adp_set.name = attribs.get("NAME").cloned().unwrap_or_default();
                adp_set.is_default = attribs.get("DEFAULT").map(String::as_str) == Some("YES");
                adp_set.is_forced = attribs.get("FORCED").map(String::as_str) == Some("YES");

                let mut rep = Representation::new();
                rep.add_codecs(&group.codecs);
                rep.timescale = DEFAULT_TIMESCALE;

                match attribs.get("URI") {
                    Some(uri) => {
                        rep.source_url = Some(model.build_download_url(uri)?);
                        if stream_type == StreamType::Subtitle && rep.codecs().is_empty() {
                            // Subtitle renditions rarely announce a codec
                            rep.add_codecs("wvtt");
                        }
                    }
                    None => {
                        rep.is_included_stream = true;
                        period.mark_included_stream(stream_type);
                    }
                }

                if stream_type == StreamType::Audio {
                    rep.audio_channels = attribs
                        .get("CHANNELS")
                        .and_then(|c| c.parse().ok())
                        .unwrap_or(2);
                }

                rep.assured_buffer_duration_secs = model.settings.assured_duration_secs;
                rep.max_buffer_duration_secs = model.settings.max_duration_secs;

                adp_set.representations.push(rep);
                group.adaptation_sets.push(adp_set);
            }
            "EXT-X-STREAM-INF" => {
                let attribs = parse_attributes(value);

                let Some(bandwidth) = attribs.get("BANDWIDTH").and_then(|b| b.parse().ok()) else {
                    error!(
                        attributes = value,
                        "Skipped EXT-X-STREAM-INF due to missing bandwidth attribute"
                    );
                    continue;
                };

                // The video adaptation set is lazily created at index 0
                if period.adaptation_sets.is_empty() {
                    period
                        .adaptation_sets
                        .push(AdaptationSet::new(StreamType::Video));
                }

                let mut rep = Representation::new();
                rep.timescale = DEFAULT_TIMESCALE;
                rep.bandwidth = bandwidth;

                let codecs = attribs.get("CODECS").map(String::as_str).unwrap_or("");
                if codecs.is_empty() {
                    debug!("Missing CODECS attribute, fallback to h264");
                    rep.add_codecs("h264");
                } else {
                    rep.add_codecs(codecs);
                }

                if let Some((width, height)) =
                    attribs.get("RESOLUTION").and_then(|r| parse_resolution(r))
                {
                    rep.width = width;
                    rep.height = height;
                }

                match attribs.get("AUDIO") {
                    Some(audio_group) => {
                        // The variant names its audio group; infer the group's
                        // codec from this variant's CODECS list
                        groups
                            .entry(audio_group.clone())
                            .or_default()
                            .set_codecs(infer_audio_codec(codecs));
                    }
                    None => {
                        period.mark_included_stream(StreamType::Audio);
                        create_dummy_audio = true;
                    }
                }

                if let Some(rate_attr) = attribs.get("FRAME-RATE") {
                    let mut frame_rate: f64 = rate_attr.parse().unwrap_or(0.0);
                    if frame_rate == 0.0 {
                        warn!("Wrong FRAME-RATE attribute, fallback to 60 fps");
                        frame_rate = 60.0;
                    }
                    rep.frame_rate = (frame_rate * 1000.0) as u32;
                    rep.frame_rate_scale = 1000;
                }

                rep.assured_buffer_duration_secs = model.settings.assured_duration_secs;
                rep.max_buffer_duration_secs = model.settings.max_duration_secs;

                // The line after the tag carries the variant URI
                match lexer.next_line() {
                    Some(Line::Uri(uri)) => {
                        let source_url = model.build_download_url(uri)?;
                        let adp_set = &mut period.adaptation_sets[0];
                        let duplicate = adp_set
                            .representations
                            .iter()
                            .any(|r| r.source_url.as_ref() == Some(&source_url));
                        if !duplicate {
                            rep.source_url = Some(source_url);
                            adp_set.representations.push(rep);
                        }
                    }
                    Some(tag @ Line::Tag { .. }) => lexer.rewind(tag),
                    None => {}
                }
            }
            "EXTINF" => {
                // A media playlist without a master: one variant whose source
                // is the manifest itself
                let mut adp_set = AdaptationSet::new(StreamType::Video);
                let mut rep = Representation::new();
                rep.timescale = DEFAULT_TIMESCALE;
                rep.source_url = model.manifest_url.clone();
                rep.assured_buffer_duration_secs = model.settings.assured_duration_secs;
                rep.max_buffer_duration_secs = model.settings.max_duration_secs;
                adp_set.representations.push(rep);
                period.adaptation_sets.push(adp_set);

                period.mark_included_stream(StreamType::Audio);
                create_dummy_audio = true;
                break;
            }
            "EXT-X-SESSION-KEY" => {
                let attribs = parse_attributes(value);
                let mut ctx = EncryptionContext::new();
                match process_encryption(&mut ctx, model.base_url.as_ref(), &attribs) {
                    EncryptionType::NotSupported => {
                        return Err(HlsError::UnsupportedEncryption(
                            attribs.get("KEYFORMAT").cloned().unwrap_or_default(),
                        ));
                    }
                    EncryptionType::Unknown => warn!("Unknown encryption type"),
                    // Session keys only pre-announce DRM; with serial
                    // child-playlist loading there is nothing to do yet
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if !is_ext_m3u {
        error!("Non-compliant HLS manifest, #EXTM3U tag not found");
        return Err(HlsError::Parse("#EXTM3U tag not found".to_string()));
    }

    if create_dummy_audio {
        // Audio is muxed into the video stream; represent it explicitly
        let mut adp_set = AdaptationSet::new(StreamType::Audio);
        adp_set.container_type = ContainerType::Mp4;
        adp_set.language = "unk".to_string();

        let mut rep = Representation::new();
        rep.timescale = DEFAULT_TIMESCALE;
        let codec = period
            .adaptation_sets
            .first()
            .and_then(|a| a.representations.first())
            .map(audio_codec_from_representation)
            .unwrap_or("aac");
        rep.add_codecs(codec);
        rep.audio_channels = 2;
        rep.is_included_stream = true;
        rep.assured_buffer_duration_secs = model.settings.assured_duration_secs;
        rep.max_buffer_duration_secs = model.settings.max_duration_secs;

        adp_set.representations.push(rep);
        period.adaptation_sets.push(adp_set);
    }

    for (_, group) in groups {
        for adp_set in group.adaptation_sets {
            period.adaptation_sets.push(adp_set);
        }
    }

    // HLS presentations are live until a playlist says otherwise
    model.is_live = true;

    model.add_period(period);
    Ok(())
}
