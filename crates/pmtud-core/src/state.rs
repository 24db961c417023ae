use crate::path::{Path, PathPhase};
use crate::timer::{TimerKind, Timers};
use crate::types::{AssociationId, PacketSize, PathFlags};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// An owned view of the probing state of an association.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Snapshot {
    id: AssociationId,
    is_quick_probe: bool,
    is_up: bool,
    primary: Option<SocketAddr>,
    paths: Vec<PathState>,
}

impl Snapshot {
    pub(crate) fn new<'a>(
        id: AssociationId,
        is_quick_probe: bool,
        is_up: bool,
        primary: Option<SocketAddr>,
        paths: impl Iterator<Item = &'a Path>,
        timers: &Timers,
    ) -> Self {
        Self {
            id,
            is_quick_probe,
            is_up,
            primary,
            paths: paths.map(|path| PathState::new(path, timers)).collect(),
        }
    }

    #[must_use]
    pub fn id(&self) -> AssociationId {
        self.id
    }

    #[must_use]
    pub fn is_quick_probe(&self) -> bool {
        self.is_quick_probe
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        self.is_up
    }

    #[must_use]
    pub fn primary(&self) -> Option<SocketAddr> {
        self.primary
    }

    /// The state of every path, in the order they were added.
    #[must_use]
    pub fn paths(&self) -> &[PathState] {
        &self.paths
    }

    #[must_use]
    pub fn path(&self, addr: SocketAddr) -> Option<&PathState> {
        self.paths.iter().find(|path| path.addr == addr)
    }

    /// The state of the primary path.
    #[must_use]
    pub fn primary_path(&self) -> Option<&PathState> {
        self.primary.and_then(|addr| self.path(addr))
    }
}

/// The state of a single path at the time of a [`Snapshot`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PathState {
    pub addr: SocketAddr,
    pub phase: PathPhase,
    pub search_low: PacketSize,
    pub search_high: PacketSize,
    pub eff_pmtu: PacketSize,
    pub rto: Duration,
    pub smoothed_rtt: Option<Duration>,
    pub flags: PathFlags,
    pub quick_probe_counter: usize,
    /// The size of the outstanding search probe.
    pub outstanding_probe: Option<PacketSize>,
    pub convergence_timer_deadline: Option<Instant>,
    /// When the next search probe may be sent after a failure.
    pub retry_deadline: Option<Instant>,
}

impl PathState {
    fn new(path: &Path, timers: &Timers) -> Self {
        Self {
            addr: path.addr(),
            phase: path.phase(),
            search_low: path.search_low(),
            search_high: path.search_high(),
            eff_pmtu: path.eff_pmtu(),
            rto: path.rto(),
            smoothed_rtt: path.smoothed_rtt(),
            flags: path.flags(),
            quick_probe_counter: path.quick_probe_counter(),
            outstanding_probe: path.outstanding_probe().map(|probe| probe.size),
            convergence_timer_deadline: path.convergence_timer_deadline(),
            retry_deadline: timers.deadline(path.addr(), TimerKind::RetryBackoff),
        }
    }

    #[must_use]
    pub fn congested_during_fast_probe(&self) -> bool {
        self.flags.contains(PathFlags::CONGESTED_DURING_FAST_PROBE)
    }
}
