//! The HLS tree facade.
//!
//! [`HlsTree`] ties the collaborators together: it downloads manifests
//! through [`Net`], parses them into the shared [`Presentation`] under the
//! tree-update mutex, runs the refresh driver for live streams, and resolves
//! AES-128 keys lazily when segment data arrives.

use std::sync::Arc;
use std::time::Instant;

use arbor_drm::{SegmentDecrypter, iv_from_sequence};
use arbor_net::{Headers, Net};
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use url::Url;

use crate::driver::RefreshDriver;
use crate::error::{HlsError, HlsResult};
use crate::model::{
    EncryptionState, KeyResolution, PSSH_SET_CLEAR, Presentation, RepAddress,
};
use crate::options::HlsOptions;
use crate::parser::{self, PrepareStatus, parse_master_playlist, parse_media_playlist};
use crate::urls;

/// A stateful HLS presentation.
#[derive(Clone)]
pub struct HlsTree {
    inner: Arc<TreeInner>,
}

impl HlsTree {
    pub fn new(
        net: Arc<dyn Net>,
        decrypter: Arc<dyn SegmentDecrypter>,
        options: HlsOptions,
    ) -> Self {
        let settings = (&options).into();
        Self {
            inner: Arc::new(TreeInner {
                net,
                decrypter,
                options,
                model: Mutex::new(Presentation::new(settings)),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Download and parse the master playlist.
    pub async fn open(&self, url: Url) -> HlsResult<()> {
        self.open_with_headers(url, None).await
    }

    /// Download and parse the master playlist with extra request headers.
    pub async fn open_with_headers(
        &self,
        url: Url,
        extra_headers: Option<Headers>,
    ) -> HlsResult<()> {
        // A re-open starts over: stop any driver from a previous presentation
        *self.inner.driver.lock().await = None;

        let headers = merge_headers(self.inner.options.manifest_headers.clone(), extra_headers);
        let resp = self.inner.net.download(url.clone(), headers).await?;
        let data = std::str::from_utf8(&resp.body)
            .map_err(|e| HlsError::Parse(format!("manifest is not UTF-8: {e}")))?;

        let mut model = self.inner.model.lock().await;
        *model = Presentation::new((&self.inner.options).into());
        model.manifest_url = Some(url);
        model.base_url = Some(urls::strip_params(&resp.effective_url));

        parse_master_playlist(&mut model, data)?;

        if model.periods.is_empty() {
            warn!("No periods in the manifest");
            return Err(HlsError::Parse("no periods in the manifest".to_string()));
        }
        model.current_period = 0;
        debug!(
            periods = model.periods.len(),
            adaptation_sets = model.periods[0].adaptation_sets.len(),
            "arbor-hls: master playlist parsed"
        );
        Ok(())
    }

    /// Load (or refresh, with `update`) one representation's timeline from
    /// its child playlist.
    pub async fn prepare_representation(
        &self,
        addr: RepAddress,
        update: bool,
    ) -> HlsResult<PrepareStatus> {
        self.inner.prepare_representation(addr, update).await
    }

    /// Tight refresh just before a segment boundary; resets the periodic
    /// driver's clock.
    pub async fn refresh_segments(&self, addr: RepAddress) -> HlsResult<()> {
        let should_refresh = {
            let model = self.inner.model.lock().await;
            model.refresh_playlist
                && model
                    .representation(addr)
                    .is_some_and(|rep| !rep.is_included_stream)
        };
        if !should_refresh {
            return Ok(());
        }

        if let Some(driver) = self.inner.driver.lock().await.as_ref() {
            driver.reset_start_time();
        }
        self.inner.prepare_representation(addr, true).await?;
        Ok(())
    }

    /// Refresh every enabled representation of the current period.
    pub async fn refresh_live_segments(&self) -> HlsResult<()> {
        self.inner.refresh_live_segments().await
    }

    /// Feed one chunk of segment data through decryption into `dst`.
    ///
    /// Clear segments (and periods whose DRM the host drives) pass through
    /// untouched. AES-128 keys resolve lazily here, which may block on a key
    /// fetch; an unavailable key zero-fills the output instead of failing
    /// playback. The caller owns the IV buffer across chunks of one segment.
    pub async fn on_data_arrived(
        &self,
        segment_number: u64,
        pssh_set: u16,
        iv: &mut [u8; 16],
        src: &[u8],
        dst: &mut Vec<u8>,
        is_last_chunk: bool,
    ) -> HlsResult<()> {
        self.inner
            .on_data_arrived(segment_number, pssh_set, iv, src, dst, is_last_chunk)
            .await
    }

    /// Run a closure over the presentation under the tree-update lock.
    pub async fn with_presentation<R>(&self, f: impl FnOnce(&Presentation) -> R) -> R {
        let model = self.inner.model.lock().await;
        f(&model)
    }

    /// Mutable variant of [`with_presentation`], for consumer-side state
    /// such as advancing the segment cursor.
    ///
    /// [`with_presentation`]: HlsTree::with_presentation
    pub async fn with_presentation_mut<R>(&self, f: impl FnOnce(&mut Presentation) -> R) -> R {
        let mut model = self.inner.model.lock().await;
        f(&mut model)
    }

    /// Stop the refresh driver.
    pub async fn close(&self) {
        *self.inner.driver.lock().await = None;
    }
}

pub(crate) struct TreeInner {
    net: Arc<dyn Net>,
    decrypter: Arc<dyn SegmentDecrypter>,
    options: HlsOptions,
    model: Mutex<Presentation>,
    driver: Mutex<Option<RefreshDriver>>,
}

impl TreeInner {
    pub(crate) fn model(&self) -> &Mutex<Presentation> {
        &self.model
    }

    pub(crate) async fn prepare_representation(
        self: &Arc<Self>,
        addr: RepAddress,
        update: bool,
    ) -> HlsResult<PrepareStatus> {
        let (source_url, is_downloaded) = {
            let model = self.model.lock().await;
            let rep = model
                .representation(addr)
                .ok_or(HlsError::InvalidAddress(addr))?;
            (rep.source_url.clone(), rep.is_downloaded)
        };
        let Some(source_url) = source_url else {
            return Err(HlsError::MissingSourceUrl);
        };

        let status = if is_downloaded {
            // The timeline is complete; only the cursor bookkeeping applies
            if update {
                let mut model = self.model.lock().await;
                parser::apply_update_remap(&mut model, addr);
            }
            PrepareStatus::Ok
        } else {
            let resp = self.net.download(source_url, None).await?;
            let data = std::str::from_utf8(&resp.body)
                .map_err(|e| HlsError::Parse(format!("playlist is not UTF-8: {e}")))?;
            let base_url = urls::strip_params(&resp.effective_url);

            let mut model = self.model.lock().await;
            parse_media_playlist(&mut model, addr, data, &base_url, update)?
        };

        if !update {
            self.start_driver().await;
        }
        Ok(status)
    }

    pub(crate) async fn refresh_live_segments(self: &Arc<Self>) -> HlsResult<()> {
        let refresh_list = {
            let mut model = self.model.lock().await;
            model.last_updated = Some(Instant::now());
            if !model.refresh_playlist {
                return Ok(());
            }
            let cur = model.current_period;
            let Some(period) = model.periods.get(cur) else {
                return Ok(());
            };

            let mut list = Vec::new();
            for (adp_pos, adp_set) in period.adaptation_sets.iter().enumerate() {
                for (rep_pos, rep) in adp_set.representations.iter().enumerate() {
                    if rep.is_enabled && !rep.is_included_stream {
                        list.push(RepAddress::new(cur, adp_pos, rep_pos));
                    }
                }
            }
            list
        };

        for addr in refresh_list {
            // A failing representation must not poison the others
            if let Err(e) = self.prepare_representation(addr, true).await {
                warn!(error = %e, ?addr, "arbor-hls: representation refresh failed");
            }
        }
        Ok(())
    }

    async fn start_driver(self: &Arc<Self>) {
        let refresh = self.model.lock().await.refresh_playlist;
        let mut driver = self.driver.lock().await;
        if refresh && driver.is_none() {
            *driver = Some(RefreshDriver::spawn(self));
        }
    }

    async fn on_data_arrived(
        &self,
        segment_number: u64,
        pssh_set: u16,
        iv: &mut [u8; 16],
        src: &[u8],
        dst: &mut Vec<u8>,
        is_last_chunk: bool,
    ) -> HlsResult<()> {
        if pssh_set == PSSH_SET_CLEAR {
            dst.extend_from_slice(src);
            return Ok(());
        }

        let key = {
            let mut model = self.model.lock().await;
            let cur = model.current_period;

            let (is_pending, slot_pssh) = {
                let Some(period) = model.periods.get(cur) else {
                    dst.extend_from_slice(src);
                    return Ok(());
                };
                if period.encryption_state == EncryptionState::EncryptedSupported {
                    // Sample-based DRM is the host's business
                    dst.extend_from_slice(src);
                    return Ok(());
                }
                let Some(slot) = period.pssh_set(pssh_set) else {
                    error!(pssh_set, "Cannot get PSSHSet at position");
                    return Ok(());
                };
                (slot.key == KeyResolution::Pending, slot.pssh.clone())
            };

            if is_pending {
                // Another slot may already have resolved the same key URL
                let duplicate = model.periods[cur]
                    .pssh_sets()
                    .iter()
                    .filter(|other| !other.pssh.is_empty() && other.pssh == slot_pssh)
                    .find_map(|other| match &other.key {
                        KeyResolution::Resolved(key) => Some(key.clone()),
                        _ => None,
                    });
                let resolution = match duplicate {
                    Some(key) => KeyResolution::Resolved(key),
                    None => self.fetch_key(&slot_pssh).await,
                };
                if let Some(slot) = model
                    .periods
                    .get_mut(cur)
                    .and_then(|p| p.pssh_set_mut(pssh_set))
                {
                    slot.key = resolution;
                }
            }

            let Some(slot) = model.periods[cur].pssh_set(pssh_set) else {
                return Ok(());
            };
            match &slot.key {
                KeyResolution::Unavailable | KeyResolution::Pending => {
                    // Give up on this key: emit zeros instead of stalling
                    dst.resize(dst.len() + src.len(), 0);
                    return Ok(());
                }
                KeyResolution::Resolved(key) => {
                    // Seed the IV on the segment's first chunk
                    if dst.is_empty() {
                        if slot.iv.is_empty() {
                            *iv = iv_from_sequence(segment_number);
                        } else {
                            iv.fill(0);
                            let n = slot.iv.len().min(iv.len());
                            iv[..n].copy_from_slice(&slot.iv[..n]);
                        }
                    }
                    key.clone()
                }
            }
        };

        // Decryption itself runs outside the tree-update lock
        self.decrypter
            .decrypt_chunk(&key, iv, src, dst, is_last_chunk)?;
        if src.len() >= 16 {
            iv.copy_from_slice(&src[src.len() - 16..]);
        }
        Ok(())
    }

    /// Fetch an AES key, with at most one license renewal and retry.
    async fn fetch_key(&self, key_url: &Bytes) -> KeyResolution {
        let license = self.decrypter.license_key();

        let Ok(url_str) = std::str::from_utf8(key_url) else {
            return KeyResolution::Unavailable;
        };
        let mut url = match Url::parse(url_str) {
            Ok(url) => url,
            Err(e) => {
                error!(url = url_str, error = %e, "arbor-hls: invalid key URL");
                return KeyResolution::Unavailable;
            }
        };
        if let Some(params) = license.url_params() {
            let query = match url.query() {
                Some(existing) => format!("{existing}&{params}"),
                None => params.to_string(),
            };
            url.set_query(Some(&query));
        }
        let headers = {
            let pairs = license.headers();
            if pairs.is_empty() {
                None
            } else {
                let mut headers = Headers::new();
                for (name, value) in pairs {
                    headers.insert(name, value);
                }
                Some(headers)
            }
        };

        match self.net.download(url.clone(), headers.clone()).await {
            Ok(resp) => KeyResolution::Resolved(resp.body),
            Err(e) => {
                warn!(url = %url, error = %e, "arbor-hls: key fetch failed");
                if let Some(token) = license.renew_token() {
                    if self.decrypter.renew_license(token).await {
                        if let Ok(resp) = self.net.download(url, headers).await {
                            return KeyResolution::Resolved(resp.body);
                        }
                    }
                }
                KeyResolution::Unavailable
            }
        }
    }
}

fn merge_headers(base: Option<Headers>, extra: Option<Headers>) -> Option<Headers> {
    match (base, extra) {
        (None, None) => None,
        (Some(headers), None) | (None, Some(headers)) => Some(headers),
        (Some(mut base), Some(extra)) => {
            for (name, value) in extra.iter() {
                base.insert(name, value);
            }
            Some(base)
        }
    }
}
