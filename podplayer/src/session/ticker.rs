//! Recurring position tick of a playing session.
//!
//! The tick task only holds a weak reference to the session and is bound to
//! one session generation: cancelling its token, replacing the episode or
//! dropping the session all stop it before it can touch newer state.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{PlaybackSession, SessionInner};

pub(super) fn spawn_ticker(
    runtime: &Handle,
    session: Weak<SessionInner>,
    generation: u64,
    period: Duration,
    token: CancellationToken,
) {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let Some(inner) = session.upgrade() else { break };
                    let live = PlaybackSession { inner };
                    if !live.on_tick(generation, &token) {
                        break;
                    }
                }
            }
        }
        trace!(generation, "Position ticker stopped");
    });
}
