//! Per-actor idle accounting.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::actor::ActorShared;

/// Tick period of the idle tracker.
pub(crate) const IDLE_TICK: Duration = Duration::from_secs(10);

/// Periodically accounts idle time for one actor.
///
/// Each tick adds the full tick period to the counter, so readers observe a
/// value at most one tick below the true elapsed time. A successful send
/// zeroes the counter and nudges `idle_reset`, restarting the tick boundary
/// at now + tick. Exits when the actor's token fires.
pub(crate) async fn run<M: Send + 'static>(shared: Arc<ActorShared<M>>, tick: Duration) {
    let tick_nanos = tick.as_nanos() as u64;

    loop {
        tokio::select! {
            _ = shared.token.cancelled() => return,
            _ = shared.idle_reset.notified() => {}
            _ = tokio::time::sleep(tick) => {
                let idle = shared.idle.fetch_add(tick_nanos, Ordering::Relaxed) + tick_nanos;
                debug!(
                    service = crate::SERVICE,
                    actor = %shared.name,
                    uuid = %shared.uuid,
                    seconds = Duration::from_nanos(idle).as_secs_f64(),
                    "actor idle seconds"
                );
            }
        }
    }
}
