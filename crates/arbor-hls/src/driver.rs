//! Live refresh agent.
//!
//! Started on the first successful non-update prepare, the driver re-runs
//! the media-playlist parser for every enabled representation of the current
//! period at the tree's update cadence. A tight pre-boundary refresh resets
//! the cadence clock so the periodic pass does not double up with it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tree::TreeInner;

/// Upper bound on one driver tick; keeps shutdown responsive when a playlist
/// never announced a target duration.
const MAX_TICK: Duration = Duration::from_secs(600);

pub(crate) struct RefreshDriver {
    cancel: CancellationToken,
    reset: Arc<Notify>,
}

impl RefreshDriver {
    pub(crate) fn spawn(inner: &Arc<TreeInner>) -> Self {
        let cancel = CancellationToken::new();
        let reset = Arc::new(Notify::new());
        tokio::spawn(run(
            Arc::downgrade(inner),
            cancel.clone(),
            Arc::clone(&reset),
        ));
        debug!("arbor-hls: refresh driver started");
        Self { cancel, reset }
    }

    /// Restart the current tick, e.g. after a tight segment-boundary refresh.
    pub(crate) fn reset_start_time(&self) {
        self.reset.notify_one();
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(tree: Weak<TreeInner>, cancel: CancellationToken, reset: Arc<Notify>) {
    loop {
        let interval = {
            let Some(inner) = tree.upgrade() else {
                break;
            };
            let model = inner.model().lock().await;
            if !model.refresh_playlist {
                break;
            }
            model.update_interval.min(MAX_TICK)
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reset.notified() => continue,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = tree.upgrade() else {
            break;
        };
        if let Err(e) = inner.refresh_live_segments().await {
            warn!(error = %e, "arbor-hls: live refresh failed");
        }
    }
    debug!("arbor-hls: refresh driver stopped");
}
