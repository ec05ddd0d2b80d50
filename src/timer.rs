use std::time::Duration;
use tokio::{sync::mpsc, time};

/// Deliver `msg` to the mailbox behind `tx` after `delay`.
///
/// Delays are measured against the runtime's monotonic clock, never
/// wall-clock time. A scheduled delivery is never dropped while the
/// receiver is alive; if the receiving actor has already stopped, the
/// message is discarded. There is no cancellation: receivers reconcile
/// stale deliveries against their own state.
pub(crate) fn post_after<M: Send + 'static>(tx: mpsc::Sender<M>, delay: Duration, msg: M) {
    tokio::spawn(async move {
        time::sleep(delay).await;
        let _ = tx.send(msg).await;
    });
}
