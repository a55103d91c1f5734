//! Coalescing of outbound OGMs into bounded-size, bounded-delay bundles.

use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::Metrics;
use crate::ogm::{Ogm, MAX_BUNDLE_OGMS};

/// How long an incomplete bundle waits for more OGMs before it is flushed.
pub const MAX_BUNDLE_DELAY: Duration = Duration::from_millis(200);

/// Collect OGMs from `ogms` into bundles and emit them on `bundles`.
///
/// A bundle is flushed as soon as it holds [`MAX_BUNDLE_OGMS`], or
/// [`MAX_BUNDLE_DELAY`] after its first OGM arrived, whichever comes first.
/// The task is the sole owner of the delay timer: it is armed when the first
/// OGM enters an empty bundle and disarmed on every flush, so a flush can
/// never race a stale expiry.
pub(crate) async fn run_bundler<M>(
    mut ogms: mpsc::Receiver<Ogm>,
    bundles: mpsc::Sender<Vec<Ogm>>,
    cancel: CancellationToken,
    metrics: M,
) where
    M: Metrics,
{
    let mut bundle: Vec<Ogm> = Vec::with_capacity(MAX_BUNDLE_OGMS);
    let delay = sleep(MAX_BUNDLE_DELAY);
    tokio::pin!(delay);
    let mut timer_armed = false;

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!(pending = bundle.len(), "Bundler shutting down");
                return;
            }
            () = delay.as_mut(), if timer_armed => {
                timer_armed = false;
                if !bundle.is_empty() {
                    trace!(ogms = bundle.len(), "Flushing bundle on delay expiry");
                    metrics.bundler_bundle_flushed(bundle.len());
                    let out = std::mem::replace(&mut bundle, Vec::with_capacity(MAX_BUNDLE_OGMS));
                    if bundles.send(out).await.is_err() {
                        return;
                    }
                }
            }
            ogm = ogms.recv() => {
                let Some(ogm) = ogm else {
                    debug!(pending = bundle.len(), "Outbound OGM channel closed, stopping bundler");
                    return;
                };
                bundle.push(ogm);
                if bundle.len() >= MAX_BUNDLE_OGMS {
                    timer_armed = false;
                    trace!(ogms = bundle.len(), "Flushing full bundle");
                    metrics.bundler_bundle_flushed(bundle.len());
                    let out = std::mem::replace(&mut bundle, Vec::with_capacity(MAX_BUNDLE_OGMS));
                    if bundles.send(out).await.is_err() {
                        return;
                    }
                } else if !timer_armed {
                    timer_armed = true;
                    delay.as_mut().reset(Instant::now() + MAX_BUNDLE_DELAY);
                }
            }
        }
    }
}

/// Replicate each bundle from `bundles` to every interface's transmit
/// channel. Returns when the bundler side closes, closing the transmit
/// channels in turn.
pub(crate) async fn run_fanout(
    mut bundles: mpsc::Receiver<Vec<Ogm>>,
    sinks: Vec<mpsc::Sender<Vec<Ogm>>>,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!("Fanout shutting down");
                return;
            }
            bundle = bundles.recv() => {
                let Some(bundle) = bundle else {
                    debug!("Bundle channel closed, stopping fanout");
                    return;
                };
                for sink in &sinks {
                    if sink.send(bundle.clone()).await.is_err() {
                        trace!("Dropping bundle for a stopped transmitter");
                    }
                }
            }
        }
    }
}
