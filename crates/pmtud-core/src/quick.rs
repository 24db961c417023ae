//! The quick-probe burst run when a path comes up.
//!
//! Every size of the jump sequence is sent without waiting for intermediate
//! acknowledgments. A single timer per path bounds the burst. It is first
//! armed for the full path RTO, as no round trip has been sampled yet, and
//! after every acknowledgment re-armed for the RTO divided by the number of
//! members still unacknowledged, so the wait shrinks as members confirm
//! delivery. The last size of the sequence
//! is a floor deliverable on virtually any network, which ensures the loss
//! of only the larger probes is never mistaken for an unreachable path.
use crate::association::Context;
use crate::congestion::CongestionAdapter;
use crate::error::Result;
use crate::path::{Burst, Path, PathPhase};
use crate::probe::{Probe, ProbeKind, ProbeTransport};
use crate::search;
use crate::timer::TimerKind;
use crate::types::{JumpIndex, PacketSize, PathFlags};
use crate::Notification;
use std::time::Instant;
use tracing::instrument;

/// Whether a burst still waits for members.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BurstStatus {
    Running,
    Complete,
}

/// Send a burst of quick probes on `path`.
///
/// Jump sizes at or above the path ceiling are skipped. A member the
/// transport fails to send is never waited for, and a burst with no members
/// sent is complete at once.
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn start<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    now: Instant,
) -> Result<BurstStatus>
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    path.phase = PathPhase::QuickProbe;
    path.quick_probe_counter = 0;
    path.completion_order = None;
    path.flags.remove(PathFlags::CONGESTED_DURING_FAST_PROBE);
    let mut burst = Burst::default();
    let config = ctx.config;
    for (index, size) in config.jump_probe_sizes.iter() {
        if size >= path.search_high {
            tracing::debug!(%size, ceiling = %path.search_high, "skipping jump probe size");
            continue;
        }
        if ctx.send(path.addr, size, ProbeKind::Quick(index), now)?.is_some() {
            burst.pending += 1;
        }
    }
    path.burst = Some(burst);
    if burst.pending == 0 {
        return Ok(BurstStatus::Complete);
    }
    arm_timer(ctx, path, 1, now);
    Ok(BurstStatus::Running)
}

/// A burst member was acknowledged.
///
/// Any confirmation above the floor lifts `eff_pmtu` to the largest size
/// confirmed in the burst. The first such confirmation also moves
/// `search_low`, which may lower it below its initial value.
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn on_ack<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    probe: &Probe,
    index: JumpIndex,
    confirmed_size: PacketSize,
    received: Instant,
    now: Instant,
) -> BurstStatus
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    if confirmed_size > probe.size {
        tracing::debug!(handle = %probe.handle, %confirmed_size, size = %probe.size, "malformed acknowledgment");
        return on_lost(path);
    }
    let Some(mut burst) = path.burst else {
        return BurstStatus::Complete;
    };
    path.rtt.update(received.saturating_duration_since(probe.sent));
    path.quick_probe_counter += 1;
    burst.pending = burst.pending.saturating_sub(1);
    if !ctx.config.jump_probe_sizes.is_floor(index) {
        let confirmed = if confirmed_size.0 == 0 {
            probe.size
        } else {
            confirmed_size
        };
        let largest = burst.confirmed.map_or(confirmed, |c| c.max(confirmed));
        if burst.confirmed.is_none() {
            path.search_low = largest;
        } else {
            path.raise_search_low(largest);
        }
        burst.confirmed = Some(largest);
        path.flags.remove(PathFlags::CONGESTED_DURING_FAST_PROBE);
        ctx.set_eff_pmtu(path, largest);
    }
    path.burst = Some(burst);
    if burst.pending == 0 {
        BurstStatus::Complete
    } else {
        arm_timer(ctx, path, burst.pending, now);
        BurstStatus::Running
    }
}

/// A burst member was reported lost, or acknowledged with an unusable size.
pub(crate) fn on_lost(path: &mut Path) -> BurstStatus {
    match path.burst.as_mut() {
        Some(burst) => {
            burst.pending = burst.pending.saturating_sub(1);
            if burst.pending == 0 {
                BurstStatus::Complete
            } else {
                BurstStatus::Running
            }
        }
        None => BurstStatus::Complete,
    }
}

/// End the burst of `path` and hand it over to the bounded search.
///
/// Members still in flight are discarded. Without any confirmation above the
/// floor the path falls back to the floor size and is flagged as congested.
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn complete<T, C, F>(ctx: &mut Context<'_, T, C, F>, path: &mut Path, now: Instant)
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    let addr = path.addr;
    ctx.timers.cancel(addr, TimerKind::QuickProbe);
    ctx.inflight
        .retain(|_, probe| !(probe.addr == addr && probe.is_quick()));
    let burst = path.burst.take().unwrap_or_default();
    if burst.confirmed.is_none() {
        path.flags.insert(PathFlags::CONGESTED_DURING_FAST_PROBE);
        if let Some(floor) = ctx.config.jump_probe_sizes.floor() {
            path.search_low = floor;
            ctx.set_eff_pmtu(path, floor);
        }
    }
    path.phase = PathPhase::Search;
    tracing::debug!(
        %addr,
        acked = path.quick_probe_counter,
        eff_pmtu = %path.eff_pmtu,
        congested = path.congested_during_fast_probe(),
        "quick probe burst complete"
    );
    search::check_convergence(ctx, path, now);
}

fn arm_timer<T, C, F>(ctx: &mut Context<'_, T, C, F>, path: &Path, pending: usize, now: Instant) {
    let timeout = path.rtt.rto() / pending.max(1) as u32;
    ctx.timers
        .arm(path.addr, TimerKind::QuickProbe, now + timeout);
}
