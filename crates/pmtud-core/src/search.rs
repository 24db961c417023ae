//! Steady-state bounded search and the convergence timer.
use crate::association::Context;
use crate::congestion::CongestionAdapter;
use crate::constants::SEARCH_PROBE_TIMEOUT_RTOS;
use crate::error::Result;
use crate::path::{OutstandingProbe, Path, PathPhase};
use crate::probe::{LossAttribution, ProbeKind, ProbeTransport};
use crate::timer::TimerKind;
use crate::types::PacketSize;
use crate::Notification;
use std::time::{Duration, Instant};
use tracing::instrument;

/// The resolution of a search probe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SearchResult {
    /// The probe was delivered with `size` bytes confirmed.
    Acked { size: PacketSize, rtt: Duration },
    /// The probe was lost.
    Lost(LossAttribution),
    /// Nothing was learned.
    Inconclusive,
}

/// The next size to probe, if the search has not converged.
#[must_use]
pub fn candidate(path: &Path, min_search_step: u16) -> Option<PacketSize> {
    (path.search_gap() >= min_search_step).then(|| path.search_low.midpoint(path.search_high))
}

/// Send a search probe on `path` if one is allowed now.
///
/// A probe is sent only when all the following are true:
///
/// 1 - the path is searching and has no outstanding probe
/// 2 - no retry backoff is pending from a previous failed or inconclusive probe
/// 3 - the transport has the send window and data to carry a probe of the size
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn maybe_send_probe<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    now: Instant,
) -> Result<bool>
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    let addr = path.addr;
    if path.phase != PathPhase::Search
        || path.outstanding_probe.is_some()
        || ctx.timers.is_armed(addr, TimerKind::RetryBackoff)
    {
        return Ok(false);
    }
    let Some(size) = candidate(path, ctx.config.min_search_step) else {
        return Ok(false);
    };
    if !ctx.transport.has_capacity(addr, size) {
        tracing::trace!(%addr, %size, "no capacity for probe");
        return Ok(false);
    }
    match ctx.send(addr, size, ProbeKind::Search, now)? {
        Some(handle) => {
            path.outstanding_probe = Some(OutstandingProbe {
                handle,
                size,
                sent: now,
            });
            let guard = path.rtt.rto().saturating_mul(SEARCH_PROBE_TIMEOUT_RTOS);
            ctx.timers.arm(addr, TimerKind::ProbeTimeout, now + guard);
            Ok(true)
        }
        None => {
            on_probe_result(ctx, path, size, SearchResult::Inconclusive, now);
            Ok(false)
        }
    }
}

/// Apply the resolution of the search probe of `size` bytes.
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn on_probe_result<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    size: PacketSize,
    result: SearchResult,
    now: Instant,
) where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    let addr = path.addr;
    path.outstanding_probe = None;
    ctx.timers.cancel(addr, TimerKind::ProbeTimeout);
    match result {
        SearchResult::Acked { size, rtt } => {
            path.rtt.update(rtt);
            path.retry_backoff = ctx.config.retry_backoff;
            ctx.timers.cancel(addr, TimerKind::RetryBackoff);
            if size > path.search_low {
                path.raise_search_low(size);
                let search_low = path.search_low;
                ctx.set_eff_pmtu(path, search_low);
            }
        }
        SearchResult::Lost(LossAttribution::Attributable) => {
            if size > path.search_low {
                path.search_high = path.search_high.min(size);
            } else {
                tracing::debug!(%addr, %size, "loss at or below search_low ignored");
            }
            path.retry_backoff = ctx.config.retry_backoff;
            ctx.timers
                .arm(addr, TimerKind::RetryBackoff, now + ctx.config.retry_backoff);
        }
        SearchResult::Lost(LossAttribution::Ambiguous) | SearchResult::Inconclusive => {
            ctx.timers
                .arm(addr, TimerKind::RetryBackoff, now + path.retry_backoff);
            path.retry_backoff = path
                .retry_backoff
                .saturating_mul(2)
                .min(ctx.config.max_retry_backoff);
        }
    }
    tracing::debug!(
        %addr,
        %size,
        ?result,
        search_low = %path.search_low,
        search_high = %path.search_high,
        eff_pmtu = %path.eff_pmtu,
        "search probe resolved"
    );
    check_convergence(ctx, path, now);
}

/// Stop searching and arm the convergence timer once the bounds are closer
/// than the minimum step.
pub(crate) fn check_convergence<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    now: Instant,
) -> bool
where
    F: FnMut(&Notification),
{
    if path.phase != PathPhase::Search || path.search_gap() >= ctx.config.min_search_step {
        return false;
    }
    let addr = path.addr;
    let deadline = now + ctx.config.convergence_timer;
    path.phase = PathPhase::Converged;
    path.convergence_timer_deadline = Some(deadline);
    ctx.timers.cancel(addr, TimerKind::RetryBackoff);
    ctx.timers.arm(addr, TimerKind::Convergence, deadline);
    tracing::info!(%addr, pmtu = %path.eff_pmtu, "path mtu converged");
    if let Some(cache) = ctx.cache {
        cache.store(addr.ip(), path.eff_pmtu, now);
    }
    (ctx.publish)(&Notification::PathConverged {
        addr,
        pmtu: path.eff_pmtu,
    });
    true
}

/// Reopen the search range of a converged path.
///
/// Only `search_high` moves, back to the configured ceiling.
#[instrument(skip(ctx, path), fields(addr = %path.addr), level = "trace")]
pub(crate) fn on_convergence_timer_fired<T, C, F>(
    ctx: &mut Context<'_, T, C, F>,
    path: &mut Path,
    now: Instant,
) where
    F: FnMut(&Notification),
{
    path.phase = PathPhase::Search;
    path.convergence_timer_deadline = None;
    path.search_high = ctx.config.search_ceiling();
    path.retry_backoff = ctx.config.retry_backoff;
    tracing::debug!(addr = %path.addr, search_high = %path.search_high, "search range reopened");
    check_convergence(ctx, path, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::tests::{addr, Harness};
    use crate::config::ProbeConfig;
    use crate::constants::MIN_CONVERGENCE_TIMER;
    use crate::types::ProbeHandle;
    use test_case::test_case;

    fn searching(harness: &Harness, low: u16, high: u16) -> Path {
        let mut path = harness.path(addr(1));
        path.phase = PathPhase::Search;
        path.search_low = PacketSize(low);
        path.eff_pmtu = PacketSize(low);
        path.search_high = PacketSize(high);
        path.quick_probe_counter = 1;
        path
    }

    #[test_case(1400, 2600, 32, Some(2000); "midpoint")]
    #[test_case(1400, 9000, 32, Some(5200); "wide range")]
    #[test_case(1400, 1432, 32, Some(1416); "exactly one step")]
    #[test_case(1400, 1431, 32, None; "converged")]
    fn test_candidate(low: u16, high: u16, step: u16, expected: Option<u16>) {
        let harness = Harness::new(ProbeConfig::default());
        let path = searching(&harness, low, high);
        assert_eq!(candidate(&path, step), expected.map(PacketSize));
    }

    #[test]
    fn test_probe_acked_raises_search_low() {
        let mut harness = Harness::new(ProbeConfig::default());
        let now = Instant::now();
        let mut path = searching(&harness, 1400, 2600);
        assert!(maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
        assert_eq!(harness.sent_sizes(), vec![PacketSize(2000)]);
        assert_eq!(path.outstanding_probe().map(|p| p.size), Some(PacketSize(2000)));
        assert!(harness.timers.is_armed(addr(1), TimerKind::ProbeTimeout));
        let result = SearchResult::Acked {
            size: PacketSize(2000),
            rtt: Duration::from_millis(50),
        };
        on_probe_result(&mut harness.ctx(), &mut path, PacketSize(2000), result, now);
        assert_eq!(path.search_low(), PacketSize(2000));
        assert_eq!(path.eff_pmtu(), PacketSize(2000));
        assert_eq!(path.search_high(), PacketSize(2600));
        assert!(path.outstanding_probe().is_none());
        assert!(!harness.timers.is_armed(addr(1), TimerKind::ProbeTimeout));
        assert_eq!(harness.rescales(), vec![(PacketSize(1400), PacketSize(2000))]);
    }

    #[test]
    fn test_attributable_loss_lowers_search_high() {
        let mut harness = Harness::new(ProbeConfig::default());
        let now = Instant::now();
        let mut path = searching(&harness, 1400, 2600);
        maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap();
        let result = SearchResult::Lost(LossAttribution::Attributable);
        on_probe_result(&mut harness.ctx(), &mut path, PacketSize(2000), result, now);
        assert_eq!(path.search_high(), PacketSize(2000));
        assert_eq!(path.search_low(), PacketSize(1400));
        assert_eq!(path.eff_pmtu(), PacketSize(1400));
        assert!(harness.rescales().is_empty());
        assert_eq!(
            harness.timers.deadline(addr(1), TimerKind::RetryBackoff),
            Some(now + Duration::from_secs(1))
        );
    }

    #[test]
    fn test_ambiguous_loss_backs_off_exponentially() {
        let mut harness = Harness::new(ProbeConfig::default());
        let mut now = Instant::now();
        let mut path = searching(&harness, 1400, 2600);
        let mut waits = vec![];
        for _ in 0..8 {
            assert!(maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
            // no second probe while one is outstanding
            assert!(!maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
            let result = SearchResult::Lost(LossAttribution::Ambiguous);
            on_probe_result(&mut harness.ctx(), &mut path, PacketSize(2000), result, now);
            assert_eq!(path.search_low(), PacketSize(1400));
            assert_eq!(path.search_high(), PacketSize(2600));
            let deadline = harness
                .timers
                .deadline(addr(1), TimerKind::RetryBackoff)
                .unwrap();
            assert!(!maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
            waits.push((deadline - now).as_secs());
            now = deadline;
            harness.timers.pop_expired(now);
        }
        assert_eq!(waits, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_no_probe_without_capacity() {
        let mut harness = Harness::new(ProbeConfig::default());
        harness.transport.capacity = false;
        let mut path = searching(&harness, 1400, 2600);
        assert!(!maybe_send_probe(&mut harness.ctx(), &mut path, Instant::now()).unwrap());
        assert!(harness.sent_sizes().is_empty());
    }

    #[test]
    fn test_failed_send_is_inconclusive() {
        let mut harness = Harness::new(ProbeConfig::default());
        harness.transport.fail = true;
        let now = Instant::now();
        let mut path = searching(&harness, 1400, 2600);
        assert!(!maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
        assert!(path.outstanding_probe().is_none());
        assert!(harness.inflight.is_empty());
        assert!(harness.timers.is_armed(addr(1), TimerKind::RetryBackoff));
    }

    #[test]
    fn test_convergence_arms_timer() {
        let mut harness = Harness::new(ProbeConfig::default());
        let now = Instant::now();
        let mut path = searching(&harness, 1400, 1440);
        maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap();
        assert_eq!(harness.sent_sizes(), vec![PacketSize(1420)]);
        let result = SearchResult::Lost(LossAttribution::Attributable);
        on_probe_result(&mut harness.ctx(), &mut path, PacketSize(1420), result, now);
        assert_eq!(path.phase(), PathPhase::Converged);
        let deadline = path.convergence_timer_deadline().unwrap();
        assert!(deadline - now >= MIN_CONVERGENCE_TIMER);
        assert_eq!(deadline - now, Duration::from_secs(600));
        assert_eq!(
            harness.timers.deadline(addr(1), TimerKind::Convergence),
            Some(deadline)
        );
        assert!(!harness.timers.is_armed(addr(1), TimerKind::RetryBackoff));
        assert_eq!(
            harness.notifications(),
            vec![Notification::PathConverged {
                addr: addr(1),
                pmtu: PacketSize(1400)
            }]
        );
        // converged paths are not probed
        assert!(!maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
    }

    #[test]
    fn test_convergence_timer_reopens_search() {
        let mut harness = Harness::new(ProbeConfig::default());
        let now = Instant::now();
        let mut path = searching(&harness, 1500, 1510);
        assert!(check_convergence(&mut harness.ctx(), &mut path, now));
        on_convergence_timer_fired(&mut harness.ctx(), &mut path, now);
        assert_eq!(path.phase(), PathPhase::Search);
        assert_eq!(path.search_high(), PacketSize(65535));
        assert_eq!(path.search_low(), PacketSize(1500));
        assert_eq!(path.eff_pmtu(), PacketSize(1500));
        assert!(path.convergence_timer_deadline().is_none());
        assert!(maybe_send_probe(&mut harness.ctx(), &mut path, now).unwrap());
        assert_eq!(harness.inflight[&ProbeHandle(1)].size, PacketSize(33517));
    }

    #[test]
    fn test_convergence_timer_at_ceiling_reconverges() {
        let mut harness = Harness::new(ProbeConfig {
            interface_mtu: Some(PacketSize(1500)),
            ..Default::default()
        });
        let now = Instant::now();
        let mut path = searching(&harness, 1500, 1501);
        path.phase = PathPhase::Converged;
        on_convergence_timer_fired(&mut harness.ctx(), &mut path, now);
        assert_eq!(path.phase(), PathPhase::Converged);
        assert!(harness.timers.is_armed(addr(1), TimerKind::Convergence));
    }
}
