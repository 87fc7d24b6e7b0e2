//! Media-playlist state machine.
//!
//! `parse_media_playlist` populates one representation's timeline from a
//! child playlist, splitting the presentation into periods at
//! discontinuities and interning encryption keys into each period's catalog.
//! The same entry point serves live refreshes (`update = true`), which
//! additionally re-aim the playback cursor onto the new segment window.

use std::time::Duration;

use tracing::{debug, error, warn};
use url::Url;

use crate::error::{HlsError, HlsResult};
use crate::lexer::{Line, TagLexer, parse_attributes};
use crate::model::{
    ContainerType, EncryptionState, NO_PTS, NO_RANGE, PSSH_SET_CLEAR, Period, Presentation,
    PsshSetData, RepAddress, Representation, Segment, StreamType,
};
use crate::parser::encryption::{EncryptionContext, EncryptionType, process_encryption};
use crate::parser::{PrepareStatus, container_for_uri, parse_byte_range};
use crate::urls;

fn rep_mut(
    model: &mut Presentation,
    period: usize,
    adp: usize,
    rep: usize,
) -> &mut Representation {
    &mut model.periods[period].adaptation_sets[adp].representations[rep]
}

fn pssh_data_from_ctx(ctx: &EncryptionContext, stream_type: StreamType) -> PsshSetData {
    PsshSetData {
        pssh: ctx.pssh.clone(),
        default_kid: ctx.default_kid.clone(),
        iv: ctx.iv.clone(),
        crypto_mode: ctx.crypto_mode,
        stream_type,
    }
}

/// Parse one child playlist into the representation at `addr`.
///
/// `base_url` is the parameter-stripped effective URL of the playlist
/// download and anchors relative segment/key URLs. With `update` set, the
/// playback cursor is remapped onto the refreshed window afterwards.
///
/// A fatal condition (missing `#EXTM3U`, unsupported encryption, an empty
/// timeline) fails the parse before the timeline swap, leaving the
/// representation untouched.
pub fn parse_media_playlist(
    model: &mut Presentation,
    addr: RepAddress,
    data: &str,
    base_url: &Url,
    update: bool,
) -> HlsResult<PrepareStatus> {
    let (prev_segment_number, entry_period_id) = {
        let rep = model
            .representation(addr)
            .ok_or(HlsError::InvalidAddress(addr))?;
        (rep.current_segment_number(), model.periods[addr.period].id)
    };
    let current_period_id = model.periods.get(model.current_period).map(|p| p.id);

    let adp_pos = addr.adaptation;
    let rep_pos = addr.representation;
    let mut cur_period = addr.period;

    let mut is_ext_m3u = false;
    let mut prepare_status = PrepareStatus::Ok;

    let mut enc_ctx = EncryptionContext::new();
    let mut current_encryption = EncryptionType::Clear;

    let mut current_seg_start_pts: u64 = 0;
    let mut new_start_number: u64 = 0;
    let mut new_segments: Vec<Segment> = Vec::new();
    let mut new_segment: Option<Segment> = None;
    let mut segment_has_byte_range = false;
    // Pssh slot shared by segments between key rotations
    let mut pssh_set_pos: u16 = PSSH_SET_CLEAR;

    // EXT-X-MAP template; persists across discontinuities until overridden
    let mut seg_init: Option<Segment> = None;

    let mut discont_count: u32 = 0;
    let mut period_lost: Option<Period> = None;

    let mut lexer = TagLexer::new(data);
    while let Some(line) = lexer.next_line() {
        if !is_ext_m3u {
            if matches!(line, Line::Tag { name: "EXTM3U", .. }) {
                is_ext_m3u = true;
            }
            continue;
        }

        match line {
            Line::Tag {
                name: "EXT-X-KEY",
                value,
            } => {
                let attribs = parse_attributes(value);
                match process_encryption(&mut enc_ctx, model.base_url.as_ref(), &attribs) {
                    EncryptionType::NotSupported => {
                        model.periods[cur_period].encryption_state = EncryptionState::Encrypted;
                        return Err(HlsError::UnsupportedEncryption(
                            attribs.get("KEYFORMAT").cloned().unwrap_or_default(),
                        ));
                    }
                    EncryptionType::Aes128 => {
                        current_encryption = EncryptionType::Aes128;
                        // The next segment interns the key
                        pssh_set_pos = PSSH_SET_CLEAR;
                    }
                    EncryptionType::Widevine => {
                        current_encryption = EncryptionType::Widevine;
                        let period = &mut model.periods[cur_period];
                        period.encryption_state = EncryptionState::EncryptedSupported;
                        let stream_type = period.adaptation_sets[adp_pos].stream_type;
                        let idx =
                            period.insert_pssh_set(Some(&pssh_data_from_ctx(&enc_ctx, stream_type)));
                        period.adaptation_sets[adp_pos].representations[rep_pos].pssh_set = idx;

                        let brand_new = period.pssh_sets()[idx as usize].usage_count == 1;
                        prepare_status = if brand_new || prepare_status == PrepareStatus::DrmChanged
                        {
                            PrepareStatus::DrmChanged
                        } else {
                            PrepareStatus::DrmUnchanged
                        };
                    }
                    EncryptionType::Clear => {
                        current_encryption = EncryptionType::Clear;
                        pssh_set_pos = PSSH_SET_CLEAR;
                    }
                    EncryptionType::Unknown => warn!("Unknown encryption type"),
                }
            }
            Line::Tag {
                name: "EXT-X-MAP",
                value,
            } => {
                let attribs = parse_attributes(value);
                if let Some(uri) = attribs.get("URI").filter(|u| !u.is_empty()) {
                    let mut init = Segment::new(NO_PTS, 0, PSSH_SET_CLEAR);
                    init.url = Some(urls::resolve(Some(base_url), uri)?);
                    if let Some((length, offset)) =
                        attribs.get("BYTERANGE").and_then(|r| parse_byte_range(r))
                    {
                        let begin = offset.unwrap_or(0);
                        init.range_begin = begin;
                        init.range_end = begin + length.saturating_sub(1);
                    }
                    seg_init = Some(init);

                    let rep = rep_mut(model, cur_period, adp_pos, rep_pos);
                    rep.has_initialization = true;
                    rep.container_type = ContainerType::Mp4;
                }
            }
            Line::Tag {
                name: "EXT-X-MEDIA-SEQUENCE",
                value,
            } => {
                new_start_number = value.trim().parse().unwrap_or(0);
            }
            Line::Tag {
                name: "EXT-X-PLAYLIST-TYPE",
                value,
            } => {
                if value.trim().eq_ignore_ascii_case("VOD") {
                    model.refresh_playlist = false;
                    model.is_live = false;
                }
            }
            Line::Tag {
                name: "EXT-X-TARGETDURATION",
                value,
            } => {
                // Live update cadence: 1.5x the target duration
                let target_secs: u64 = value.trim().parse().unwrap_or(0);
                let interval = Duration::from_millis(target_secs * 1500);
                if interval < model.update_interval {
                    model.update_interval = interval;
                }
            }
            Line::Tag {
                name: "EXTINF",
                value,
            } => {
                let duration_secs: f64 = value
                    .split(',')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .parse()
                    .unwrap_or(0.0);
                let timescale = rep_mut(model, cur_period, adp_pos, rep_pos).timescale;
                let duration = (duration_secs * timescale as f64) as u64;

                new_segment = Some(Segment::new(current_seg_start_pts, duration, pssh_set_pos));

                current_seg_start_pts += duration;
            }
            Line::Tag {
                name: "EXT-X-BYTERANGE",
                value,
            } => {
                if let Some(segment) = new_segment.as_mut() {
                    if let Some((length, offset)) = parse_byte_range(value) {
                        // A missing offset continues where the previous
                        // segment ended
                        let begin = match offset {
                            Some(offset) => offset,
                            None => new_segments
                                .last()
                                .filter(|p| p.range_end != NO_RANGE)
                                .map(|p| p.range_end + 1)
                                .unwrap_or(0),
                        };
                        segment.range_begin = begin;
                        segment.range_end = begin + length.saturating_sub(1);
                        segment_has_byte_range = true;
                    }
                }
            }
            Line::Uri(uri) => {
                let Some(mut segment) = new_segment.take() else {
                    continue;
                };

                // Late container detection from the first media URI
                {
                    let stream_type = model.periods[cur_period].adaptation_sets[adp_pos].stream_type;
                    let rep = rep_mut(model, cur_period, adp_pos, rep_pos);
                    match rep.container_type {
                        ContainerType::NoType => {
                            let container = container_for_uri(uri, stream_type);
                            rep.container_type = container;
                            if container == ContainerType::Invalid {
                                continue;
                            }
                        }
                        ContainerType::Invalid => continue,
                        _ => {}
                    }
                }

                if !segment_has_byte_range {
                    segment.url = Some(urls::resolve(Some(base_url), uri)?);
                } else if rep_mut(model, cur_period, adp_pos, rep_pos).url.is_none() {
                    // Byte-range playlists carry one media URL on the
                    // representation
                    let url = urls::resolve(Some(base_url), uri)?;
                    rep_mut(model, cur_period, adp_pos, rep_pos).url = Some(url);
                }

                let period = &mut model.periods[cur_period];
                if current_encryption == EncryptionType::Aes128 {
                    if pssh_set_pos == PSSH_SET_CLEAR {
                        pssh_set_pos = period
                            .insert_pssh_set(Some(&pssh_data_from_ctx(&enc_ctx, StreamType::NoType)));
                        segment.pssh_set = pssh_set_pos;
                    } else {
                        period.retain_pssh_set(segment.pssh_set);
                    }
                } else {
                    period.retain_pssh_set(segment.pssh_set);
                }

                new_segments.push(segment);
            }
            Line::Tag {
                name: "EXT-X-DISCONTINUITY-SEQUENCE",
                value,
            } => {
                model.discont_seq = value.trim().parse().unwrap_or(0);
                if model.initial_sequence.is_none() {
                    model.initial_sequence = Some(model.discont_seq);
                }
                model.has_discont_seq = true;

                // Make sure the first period carries a sequence on the
                // initial prepare
                if !update
                    && model.discont_seq > 0
                    && model.periods.last().is_some_and(|p| p.sequence == 0)
                {
                    model.periods[0].sequence = model.discont_seq;
                }

                // Evict periods older than the advertised sequence. The
                // currently playing period survives in a detached holder and
                // is re-prepended after the parse.
                let mut i = 0;
                while i < model.periods.len() {
                    if model.periods[i].sequence < model.discont_seq {
                        let removed = model.periods.remove(i);
                        if Some(removed.id) == current_period_id {
                            period_lost = Some(removed);
                        }
                    } else {
                        i += 1;
                    }
                }
                if model.periods.is_empty() {
                    if let Some(lost) = period_lost.take() {
                        model.periods.push(lost);
                    }
                }

                // Re-resolve handles at the same positions in period 0
                cur_period = 0;
            }
            Line::Tag {
                name: "EXT-X-DISCONTINUITY",
                ..
            } => {
                if new_segments.is_empty() {
                    error!("Segment at position 0 not found");
                    continue;
                }

                let sequence = model.discont_seq + discont_count as u64;
                {
                    let period = &mut model.periods[cur_period];
                    period.sequence = sequence;

                    let stream_type = period.adaptation_sets[adp_pos].stream_type;
                    let duration = current_seg_start_pts - new_segments[0].start_pts;
                    let rep_timescale;
                    {
                        let rep = &mut period.adaptation_sets[adp_pos].representations[rep_pos];
                        if !segment_has_byte_range {
                            rep.has_segments_url = true;
                        }
                        rep.duration = duration;
                        rep_timescale = rep.timescale;
                    }
                    if stream_type != StreamType::Subtitle {
                        period.duration = duration * period.timescale / rep_timescale;
                    }

                    period.install_timeline(adp_pos, rep_pos, &mut new_segments, new_start_number);
                    if let Some(init) = &seg_init {
                        period.set_initialization(adp_pos, rep_pos, init.clone());
                    }
                    new_start_number += period.adaptation_sets[adp_pos].representations[rep_pos]
                        .timeline
                        .len() as u64;
                }

                discont_count += 1;
                if model.periods.len() == discont_count as usize {
                    // Split: clone the playing period's structure
                    let template = match (&period_lost, current_period_id) {
                        (Some(lost), Some(id)) if lost.id == id => lost.copy_for_discontinuity(),
                        _ => {
                            let idx = current_period_id
                                .and_then(|id| model.period_index_by_id(id))
                                .unwrap_or(cur_period);
                            model.periods[idx].copy_for_discontinuity()
                        }
                    };
                    cur_period = model.add_period(template);
                } else {
                    cur_period = discont_count as usize;
                }

                current_seg_start_pts = 0;

                match current_encryption {
                    EncryptionType::Widevine => {
                        let period = &mut model.periods[cur_period];
                        period.encryption_state = EncryptionState::EncryptedSupported;
                        let stream_type = period.adaptation_sets[adp_pos].stream_type;
                        let idx = period
                            .insert_pssh_set(Some(&pssh_data_from_ctx(&enc_ctx, stream_type)));
                        period.adaptation_sets[adp_pos].representations[rep_pos].pssh_set = idx;
                    }
                    EncryptionType::Aes128 => {
                        // The active key re-interns into the new period's
                        // catalog on the next segment
                        pssh_set_pos = PSSH_SET_CLEAR;
                    }
                    _ => {}
                }

                if seg_init.is_some() {
                    let rep = rep_mut(model, cur_period, adp_pos, rep_pos);
                    rep.has_initialization = true;
                    rep.container_type = ContainerType::Mp4;
                }
            }
            Line::Tag {
                name: "EXT-X-ENDLIST",
                ..
            } => {
                model.refresh_playlist = false;
                model.is_live = false;
            }
            Line::Tag { .. } => {}
        }
    }

    if !is_ext_m3u {
        error!("Non-compliant HLS manifest, #EXTM3U tag not found");
        return Err(HlsError::Parse("#EXTM3U tag not found".to_string()));
    }

    if new_segments.is_empty() {
        error!("No segments parsed");
        return Err(HlsError::NoSegments);
    }

    // Finalize the last (or only) period's timeline
    let sequence = model.discont_seq + discont_count as u64;
    let stream_type;
    let rep_duration = current_seg_start_pts - new_segments[0].start_pts;
    {
        let period = &mut model.periods[cur_period];
        stream_type = period.adaptation_sets[adp_pos].stream_type;
        {
            let rep = &mut period.adaptation_sets[adp_pos].representations[rep_pos];
            if !segment_has_byte_range {
                rep.has_segments_url = true;
            }
        }
        period.install_timeline(adp_pos, rep_pos, &mut new_segments, new_start_number);
        if let Some(init) = &seg_init {
            period.set_initialization(adp_pos, rep_pos, init.clone());
        }
        period.adaptation_sets[adp_pos].representations[rep_pos].duration = rep_duration;
        period.sequence = sequence;
    }

    let vod_complete = !model.is_live && !model.refresh_playlist;
    let mut total_time_secs: u64 = 0;
    if discont_count > 0 || model.has_discont_seq {
        if stream_type != StreamType::Subtitle {
            let period = &mut model.periods[cur_period];
            let rep_timescale = period.adaptation_sets[adp_pos].representations[rep_pos].timescale;
            period.duration = rep_duration * period.timescale / rep_timescale;
        }
        for period in &mut model.periods {
            total_time_secs += period.duration / period.timescale;
            if vod_complete {
                if let Some(rep) = period
                    .adaptation_sets
                    .get_mut(adp_pos)
                    .and_then(|a| a.representations.get_mut(rep_pos))
                {
                    rep.is_downloaded = true;
                }
            }
        }
    } else {
        let rep = rep_mut(model, cur_period, adp_pos, rep_pos);
        total_time_secs = rep.duration / rep.timescale;
        if vod_complete {
            rep.is_downloaded = true;
        }
    }
    if stream_type != StreamType::Subtitle {
        model.total_duration_secs = total_time_secs;
    }

    if update {
        remap_entry_representation(
            model,
            period_lost.as_mut(),
            entry_period_id,
            adp_pos,
            rep_pos,
            prev_segment_number,
            current_period_id,
        );
    }

    // Re-prepend the detached playing period
    if let Some(lost) = period_lost.take() {
        debug!(period_id = lost.id, "arbor-hls: reattaching stale playing period");
        model.periods.insert(0, lost);
    }
    if let Some(id) = current_period_id {
        if let Some(idx) = model.period_index_by_id(id) {
            model.current_period = idx;
        }
    }

    Ok(prepare_status)
}

/// Cursor remap plus wait-flag clearing for the representation the caller
/// addressed, which may meanwhile live in the detached period holder.
fn remap_entry_representation(
    model: &mut Presentation,
    limbo: Option<&mut Period>,
    entry_period_id: u32,
    adp_pos: usize,
    rep_pos: usize,
    prev_segment_number: Option<u64>,
    current_period_id: Option<u32>,
) {
    let last_period_id = model.periods.last().map(|p| p.id);
    let another_period_exists = current_period_id != last_period_id;

    let rep = match model.period_index_by_id(entry_period_id) {
        Some(idx) => model.periods[idx]
            .adaptation_sets
            .get_mut(adp_pos)
            .and_then(|a| a.representations.get_mut(rep_pos)),
        None => limbo.filter(|p| p.id == entry_period_id).and_then(|p| {
            p.adaptation_sets
                .get_mut(adp_pos)
                .and_then(|a| a.representations.get_mut(rep_pos))
        }),
    };
    let Some(rep) = rep else {
        return;
    };

    rep.remap_current_segment(prev_segment_number);
    if rep.is_waiting_for_segment && (rep.has_next_segment() || another_period_exists) {
        rep.is_waiting_for_segment = false;
    }
}

/// Update-mode bookkeeping for an already-downloaded representation: the
/// timeline is unchanged but the cursor clamp and wait flag still apply.
pub(crate) fn apply_update_remap(model: &mut Presentation, addr: RepAddress) {
    let Some(rep) = model.representation(addr) else {
        return;
    };
    let prev_segment_number = rep.current_segment_number();
    let entry_period_id = model.periods[addr.period].id;
    let current_period_id = model.periods.get(model.current_period).map(|p| p.id);
    remap_entry_representation(
        model,
        None,
        entry_period_id,
        addr.adaptation,
        addr.representation,
        prev_segment_number,
        current_period_id,
    );
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::model::BufferSettings;
    use crate::parser::parse_master_playlist;

    fn test_model() -> Presentation {
        let mut model = Presentation::new(BufferSettings {
            assured_duration_secs: 60,
            max_duration_secs: 120,
        });
        let master_url = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        model.manifest_url = Some(master_url.clone());
        model.base_url = Some(master_url);
        parse_master_playlist(
            &mut model,
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000,CODECS=\"avc1.4d400d\"\nvideo.m3u8\n",
        )
        .unwrap();
        model
    }

    #[fixture]
    fn model() -> Presentation {
        test_model()
    }

    #[fixture]
    fn addr() -> RepAddress {
        RepAddress::new(0, 0, 0)
    }

    #[fixture]
    fn child_url() -> Url {
        Url::parse("https://cdn.example.com/video.m3u8").unwrap()
    }

    const SIMPLE_VOD: &str = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:6\n\
        #EXTINF:6.0,\n\
        seg0.ts\n\
        #EXTINF:6.0,\n\
        seg1.ts\n\
        #EXT-X-ENDLIST\n";

    #[rstest]
    fn simple_vod_builds_one_timeline(mut model: Presentation, addr: RepAddress, child_url: Url) {
        let status = parse_media_playlist(&mut model, addr, SIMPLE_VOD, &child_url, false).unwrap();
        assert_eq!(status, PrepareStatus::Ok);

        assert!(!model.is_live);
        assert!(!model.refresh_playlist);
        assert_eq!(model.total_duration_secs, 12);
        assert_eq!(model.periods.len(), 1);

        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.timeline.len(), 2);
        assert!(rep.is_downloaded);
        assert!(rep.has_segments_url);
        assert_eq!(rep.container_type, ContainerType::Ts);
        assert_eq!(
            rep.timeline[0].url.as_ref().unwrap().as_str(),
            "https://cdn.example.com/seg0.ts"
        );
        assert_eq!(rep.timeline[0].start_pts, 0);
        assert_eq!(rep.timeline[1].start_pts, 6_000_000);
        assert_eq!(rep.timeline[1].duration, 6_000_000);
        assert!(rep.timeline[1].start_pts >= rep.timeline[0].start_pts);

        // Both clear segments are counted on the reserved slot
        assert_eq!(model.periods[0].pssh_sets()[0].usage_count, 2);
    }

    #[rstest]
    fn update_interval_tracks_target_duration(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        parse_media_playlist(&mut model, addr, SIMPLE_VOD, &child_url, false).unwrap();
        assert_eq!(model.update_interval, Duration::from_millis(9000));
    }

    #[rstest]
    fn media_sequence_sets_start_number(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-MEDIA-SEQUENCE:42\n\
            #EXTINF:6.0,\n\
            seg42.ts\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();
        assert_eq!(model.representation(addr).unwrap().start_number, 42);
    }

    #[rstest]
    fn missing_extm3u_fails_without_touching_the_timeline(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let result = parse_media_playlist(
            &mut model,
            addr,
            "#EXTINF:6.0,\nseg0.ts\n#EXT-X-ENDLIST\n",
            &child_url,
            false,
        );
        assert!(matches!(result, Err(HlsError::Parse(_))));
        assert!(model.representation(addr).unwrap().timeline.is_empty());
    }

    #[rstest]
    fn playlist_without_segments_fails(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let result = parse_media_playlist(
            &mut model,
            addr,
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-ENDLIST\n",
            &child_url,
            false,
        );
        assert!(matches!(result, Err(HlsError::NoSegments)));
    }

    #[rstest]
    fn failed_refresh_keeps_the_previous_timeline(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        parse_media_playlist(&mut model, addr, SIMPLE_VOD, &child_url, false).unwrap();
        let before = model.representation(addr).unwrap().timeline.clone();

        let result = parse_media_playlist(
            &mut model,
            addr,
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n",
            &child_url,
            true,
        );
        assert!(result.is_err());
        assert_eq!(model.representation(addr).unwrap().timeline, before);
    }

    #[rstest]
    fn reparse_with_update_is_idempotent(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        parse_media_playlist(&mut model, addr, SIMPLE_VOD, &child_url, false).unwrap();
        let first = model.representation(addr).unwrap().timeline.clone();
        let first_start = model.representation(addr).unwrap().start_number;

        parse_media_playlist(&mut model, addr, SIMPLE_VOD, &child_url, true).unwrap();
        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.timeline, first);
        assert_eq!(rep.start_number, first_start);
        assert_eq!(model.periods[0].pssh_sets()[0].usage_count, 2);
    }

    #[rstest]
    fn discontinuity_splits_into_periods(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXTINF:6.0,\n\
            a.ts\n\
            #EXT-X-DISCONTINUITY\n\
            #EXTINF:6.0,\n\
            b.ts\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        assert_eq!(model.periods.len(), 2);
        assert_eq!(model.periods[0].sequence, 0);
        assert_eq!(model.periods[1].sequence, 1);

        let first = &model.periods[0].adaptation_sets[0].representations[0];
        let second = &model.periods[1].adaptation_sets[0].representations[0];
        assert_eq!(first.timeline.len(), 1);
        assert_eq!(second.timeline.len(), 1);
        // PTS restarts at zero in the new period
        assert_eq!(second.timeline[0].start_pts, 0);
        // Sequence numbering continues across the split
        assert_eq!(first.start_number + first.timeline.len() as u64, second.start_number);
        // The split period copies the structural layout
        assert_eq!(
            model.periods[1].adaptation_sets.len(),
            model.periods[0].adaptation_sets.len()
        );
        assert_eq!(model.total_duration_secs, 12);
    }

    #[rstest]
    fn aes_key_rotation_interns_two_slots(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key1.bin\",IV=0x00000000000000000000000000000001\n\
            #EXTINF:6.0,\n\
            seg0.ts\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key2.bin\"\n\
            #EXTINF:6.0,\n\
            seg1.ts\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        let period = &model.periods[0];
        assert_eq!(period.pssh_sets().len(), 3);
        assert_eq!(period.pssh_sets()[1].usage_count, 1);
        assert_eq!(period.pssh_sets()[2].usage_count, 1);
        assert_eq!(
            period.pssh_sets()[1].pssh.as_ref(),
            b"https://cdn.example.com/key1.bin"
        );
        assert_eq!(period.pssh_sets()[1].iv.len(), 16);
        assert!(period.pssh_sets()[2].iv.is_empty());

        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.timeline[0].pssh_set, 1);
        assert_eq!(rep.timeline[1].pssh_set, 2);
    }

    #[rstest]
    fn aes_segments_share_one_slot(mut model: Presentation, addr: RepAddress, child_url: Url) {
        let data = "#EXTM3U\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key1.bin\"\n\
            #EXTINF:6.0,\n\
            seg0.ts\n\
            #EXTINF:6.0,\n\
            seg1.ts\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        let period = &model.periods[0];
        assert_eq!(period.pssh_sets().len(), 2);
        assert_eq!(period.pssh_sets()[1].usage_count, 2);

        // Usage stays balanced across a refresh of the same playlist
        let mut live = data.replace("#EXT-X-ENDLIST\n", "");
        live.push_str("#EXTINF:6.0,\nseg2.ts\n#EXT-X-ENDLIST\n");
        parse_media_playlist(&mut model, addr, &live, &child_url, true).unwrap();
        assert_eq!(model.periods[0].pssh_sets()[1].usage_count, 3);
    }

    fn widevine_playlist(kid_hex: &str) -> String {
        format!(
            "#EXTM3U\n\
             #EXT-X-TARGETDURATION:6\n\
             #EXT-X-KEY:METHOD=SAMPLE-AES-CTR,\
             URI=\"data:text/plain;base64,d2lkZXZpbmUtcHNzaA==\",\
             KEYID=0x{kid_hex},\
             KEYFORMAT=\"urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed\"\n\
             #EXTINF:6.0,\n\
             seg0.mp4\n\
             #EXT-X-ENDLIST\n"
        )
    }

    #[rstest]
    fn widevine_change_detection(mut model: Presentation, addr: RepAddress, child_url: Url) {
        let k1 = widevine_playlist("000102030405060708090a0b0c0d0e0f");
        let status = parse_media_playlist(&mut model, addr, &k1, &child_url, false).unwrap();
        assert_eq!(status, PrepareStatus::DrmChanged);
        assert_eq!(
            model.periods[0].encryption_state,
            EncryptionState::EncryptedSupported
        );
        assert_eq!(model.representation(addr).unwrap().pssh_set, 1);

        // Same key on refresh: nothing changed
        let status = parse_media_playlist(&mut model, addr, &k1, &child_url, true).unwrap();
        assert_eq!(status, PrepareStatus::DrmUnchanged);

        // Rotated key: a fresh slot is interned
        let k2 = widevine_playlist("f0e0d0c0b0a090807060504030201000");
        let status = parse_media_playlist(&mut model, addr, &k2, &child_url, true).unwrap();
        assert_eq!(status, PrepareStatus::DrmChanged);
        assert_eq!(model.representation(addr).unwrap().pssh_set, 2);
    }

    #[rstest]
    fn live_refresh_preserves_the_cursor(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        fn window(start: u64) -> String {
            let mut data = format!("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:{start}\n");
            for i in 0..5 {
                data.push_str(&format!("#EXTINF:6.0,\nseg{}.ts\n", start + i));
            }
            data
        }

        parse_media_playlist(&mut model, addr, &window(10), &child_url, false).unwrap();
        assert!(model.is_live);
        {
            let rep = model.representation_mut(addr).unwrap();
            rep.current_segment = Some(2); // segment number 12
            assert_eq!(rep.current_segment_number(), Some(12));
        }

        parse_media_playlist(&mut model, addr, &window(12), &child_url, true).unwrap();
        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.start_number, 12);
        assert_eq!(rep.current_segment, Some(0));
        assert_eq!(rep.current_segment_number(), Some(12));

        // The window slid past the cursor's segment entirely
        {
            let rep = model.representation_mut(addr).unwrap();
            rep.current_segment = Some(0);
        }
        parse_media_playlist(&mut model, addr, &window(20), &child_url, true).unwrap();
        let rep = model.representation(addr).unwrap();
        assert_eq!(rep.current_segment, None, "cursor before the window clears");

        // Waiting flag clears once a next segment exists again
        {
            let rep = model.representation_mut(addr).unwrap();
            rep.is_waiting_for_segment = true;
        }
        parse_media_playlist(&mut model, addr, &window(21), &child_url, true).unwrap();
        assert!(!model.representation(addr).unwrap().is_waiting_for_segment);
    }

    #[rstest]
    fn byte_ranges_continue_without_offset(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXTINF:6.0,\n\
            #EXT-X-BYTERANGE:1000@0\n\
            media.mp4\n\
            #EXTINF:6.0,\n\
            #EXT-X-BYTERANGE:500\n\
            media.mp4\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        let rep = model.representation(addr).unwrap();
        assert!(!rep.has_segments_url);
        assert_eq!(
            rep.url.as_ref().unwrap().as_str(),
            "https://cdn.example.com/media.mp4"
        );
        assert_eq!(rep.container_type, ContainerType::Mp4);

        let first = &rep.timeline[0];
        assert!(first.url.is_none());
        assert_eq!((first.range_begin, first.range_end), (0, 999));
        let second = &rep.timeline[1];
        assert_eq!((second.range_begin, second.range_end), (1000, 1499));
    }

    #[rstest]
    fn map_tag_installs_an_initialization_segment(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-MAP:URI=\"init.mp4\",BYTERANGE=\"720@0\"\n\
            #EXTINF:6.0,\n\
            seg0.m4s\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        let rep = model.representation(addr).unwrap();
        assert!(rep.has_initialization);
        assert_eq!(rep.container_type, ContainerType::Mp4);
        let init = rep.initialization.as_ref().unwrap();
        assert_eq!(
            init.url.as_ref().unwrap().as_str(),
            "https://cdn.example.com/init.mp4"
        );
        assert_eq!((init.range_begin, init.range_end), (0, 719));
        assert_eq!(init.start_pts, NO_PTS);

        // Clear-slot usage counts the media segment plus the init segment
        assert_eq!(model.periods[0].pssh_sets()[0].usage_count, 2);
    }

    #[rstest]
    fn map_persists_across_discontinuities(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-MAP:URI=\"init.mp4\"\n\
            #EXTINF:6.0,\n\
            a.m4s\n\
            #EXT-X-DISCONTINUITY\n\
            #EXTINF:6.0,\n\
            b.m4s\n\
            #EXT-X-ENDLIST\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();

        for period in &model.periods {
            let rep = &period.adaptation_sets[0].representations[0];
            assert!(rep.has_initialization);
            assert_eq!(rep.container_type, ContainerType::Mp4);
            assert_eq!(
                rep.initialization.as_ref().unwrap().url.as_ref().unwrap().as_str(),
                "https://cdn.example.com/init.mp4"
            );
        }
    }

    #[rstest]
    fn discontinuity_sequence_evicts_older_periods(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        // Initial parse: two periods with sequences 0 and 1
        let initial = "#EXTM3U\n\
            #EXTINF:6.0,\n\
            a.ts\n\
            #EXT-X-DISCONTINUITY\n\
            #EXTINF:6.0,\n\
            b.ts\n";
        parse_media_playlist(&mut model, addr, initial, &child_url, false).unwrap();
        assert_eq!(model.periods.len(), 2);
        let playing_id = model.periods[0].id;

        // The live edge moved on: sequence 1 is now the oldest window. The
        // playing period is stale but must survive, reattached at the front.
        let refreshed = "#EXTM3U\n\
            #EXT-X-DISCONTINUITY-SEQUENCE:1\n\
            #EXT-X-MEDIA-SEQUENCE:1\n\
            #EXTINF:6.0,\n\
            b.ts\n\
            #EXTINF:6.0,\n\
            c.ts\n";
        parse_media_playlist(&mut model, addr, refreshed, &child_url, true).unwrap();

        assert_eq!(model.periods.len(), 2);
        assert_eq!(model.periods[0].id, playing_id, "stale playing period leads");
        assert_eq!(model.periods[1].sequence, 1);
        assert_eq!(model.current_period, 0);
        assert_eq!(
            model.periods[1].adaptation_sets[0].representations[0]
                .timeline
                .len(),
            2
        );
        assert_eq!(model.initial_sequence, Some(1));
    }

    #[rstest]
    fn initial_discontinuity_sequence_stamps_the_first_period(
        mut model: Presentation,
        addr: RepAddress,
        child_url: Url,
    ) {
        let data = "#EXTM3U\n\
            #EXT-X-DISCONTINUITY-SEQUENCE:5\n\
            #EXTINF:6.0,\n\
            a.ts\n";
        parse_media_playlist(&mut model, addr, data, &child_url, false).unwrap();
        assert_eq!(model.periods.len(), 1);
        assert_eq!(model.periods[0].sequence, 5);
        assert_eq!(model.discont_seq, 5);
        assert_eq!(model.initial_sequence, Some(5));
    }
}
