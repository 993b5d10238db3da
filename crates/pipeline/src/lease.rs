//! Keeping a lease alive while long work runs.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest renewal period, so a tiny lease never spins.
const MIN_RENEWAL: Duration = Duration::from_millis(10);

/// How often to renew a lease of length `lease`: three times per lease.
pub fn renewal_interval(lease: Duration) -> Duration {
    (lease / 3).max(MIN_RENEWAL)
}

/// Drive `work` to completion, calling `renew` every `every` until it
/// finishes. Renewal stops with `work` on every exit path.
pub async fn renewing<W, R, Fut>(work: W, every: Duration, mut renew: R) -> W::Output
where
    W: Future,
    R: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::pin!(work);
    let every = every.max(MIN_RENEWAL);
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            output = &mut work => return output,
            _ = ticker.tick() => renew().await,
        }
    }
}
