use crate::config::ProbeConfig;
use crate::rtt::RttEstimator;
use crate::types::{PacketSize, PathFlags, ProbeHandle};
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// The probing phase of a path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PathPhase {
    /// Waiting for the association to come up.
    Pending,
    /// A quick-probe burst is in progress.
    QuickProbe,
    /// Bounded search is running.
    Search,
    /// Search has converged and waits for the convergence timer.
    Converged,
    /// A local peer using the configured local PMTU, never probed.
    Local,
}

impl Display for PathPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::QuickProbe => write!(f, "quick-probe"),
            Self::Search => write!(f, "search"),
            Self::Converged => write!(f, "converged"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// The steady-state probe currently in flight for a path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OutstandingProbe {
    pub handle: ProbeHandle,
    pub size: PacketSize,
    pub sent: Instant,
}

/// Bookkeeping for a quick-probe burst.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Burst {
    /// Members sent and not yet acknowledged or reported lost.
    pub pending: usize,
    /// The largest non-floor size confirmed so far.
    pub confirmed: Option<PacketSize>,
}

/// Path MTU state for one destination address of an association.
#[derive(Debug, Clone)]
pub struct Path {
    pub(crate) addr: SocketAddr,
    pub(crate) search_low: PacketSize,
    pub(crate) search_high: PacketSize,
    pub(crate) eff_pmtu: PacketSize,
    pub(crate) rtt: RttEstimator,
    pub(crate) phase: PathPhase,
    pub(crate) flags: PathFlags,
    pub(crate) outstanding_probe: Option<OutstandingProbe>,
    pub(crate) burst: Option<Burst>,
    pub(crate) quick_probe_counter: usize,
    pub(crate) convergence_timer_deadline: Option<Instant>,
    /// The wait applied after the next inconclusive probe.
    pub(crate) retry_backoff: Duration,
    /// Position in which this path completed its quick-probe burst.
    pub(crate) completion_order: Option<u64>,
}

impl Path {
    /// Create a path from the resolved configuration.
    ///
    /// A cached PMTU, if any, seeds `eff_pmtu` and is kept within the initial
    /// search range.
    #[must_use]
    pub(crate) fn new(addr: SocketAddr, config: &ProbeConfig, cached: Option<PacketSize>) -> Self {
        let search_low = config.initial_search_low;
        let search_high = config.search_ceiling();
        let initial = cached.unwrap_or(config.initial_eff_pmtu);
        let eff_pmtu = initial.clamp(search_low, search_high - PacketSize(1));
        Self {
            addr,
            search_low,
            search_high,
            eff_pmtu,
            rtt: RttEstimator::new(config.rto),
            phase: PathPhase::Pending,
            flags: PathFlags::empty(),
            outstanding_probe: None,
            burst: None,
            quick_probe_counter: 0,
            convergence_timer_deadline: None,
            retry_backoff: config.retry_backoff,
            completion_order: None,
        }
    }

    /// Create a path for a local peer which is never probed.
    #[must_use]
    pub(crate) fn new_local(addr: SocketAddr, config: &ProbeConfig) -> Self {
        let search_high = config.search_ceiling();
        let local_pmtu = config.local_pmtu.min(search_high - PacketSize(1));
        Self {
            search_low: local_pmtu,
            search_high,
            eff_pmtu: local_pmtu,
            phase: PathPhase::Local,
            flags: PathFlags::LOCAL,
            ..Self::new(addr, config, None)
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn search_low(&self) -> PacketSize {
        self.search_low
    }

    #[must_use]
    pub fn search_high(&self) -> PacketSize {
        self.search_high
    }

    /// The size used for ordinary traffic.
    #[must_use]
    pub fn eff_pmtu(&self) -> PacketSize {
        self.eff_pmtu
    }

    #[must_use]
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    #[must_use]
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.rtt.smoothed_rtt()
    }

    #[must_use]
    pub fn phase(&self) -> PathPhase {
        self.phase
    }

    #[must_use]
    pub fn flags(&self) -> PathFlags {
        self.flags
    }

    #[must_use]
    pub fn congested_during_fast_probe(&self) -> bool {
        self.flags.contains(PathFlags::CONGESTED_DURING_FAST_PROBE)
    }

    #[must_use]
    pub fn outstanding_probe(&self) -> Option<OutstandingProbe> {
        self.outstanding_probe
    }

    #[must_use]
    pub fn quick_probe_counter(&self) -> usize {
        self.quick_probe_counter
    }

    #[must_use]
    pub fn convergence_timer_deadline(&self) -> Option<Instant> {
        self.convergence_timer_deadline
    }

    /// Has this path finished its quick-probe burst (or skipped it)?
    #[must_use]
    pub fn is_burst_complete(&self) -> bool {
        self.completion_order.is_some()
    }

    /// Has this path confirmed a deliverable size?
    ///
    /// Local paths are confirmed by assumption.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.quick_probe_counter > 0 || self.flags.contains(PathFlags::LOCAL)
    }

    /// Raise `search_low` to a delivered size.
    ///
    /// `search_high` is pushed above `size` if a delivery contradicts it.
    pub(crate) fn raise_search_low(&mut self, size: PacketSize) {
        self.search_low = self.search_low.max(size);
        if self.search_high <= self.search_low {
            self.search_high = PacketSize(self.search_low.0.saturating_add(1));
        }
    }

    /// The gap between the search bounds.
    #[must_use]
    pub(crate) fn search_gap(&self) -> u16 {
        self.search_high.gap(self.search_low)
    }

    /// Does `search_low <= eff_pmtu < search_high` hold?
    #[must_use]
    pub fn bounds_hold(&self) -> bool {
        self.search_low <= self.eff_pmtu && self.eff_pmtu < self.search_high
    }
}
