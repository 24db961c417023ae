use indexmap::IndexMap;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Instant;

/// The purpose of a path timer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TimerKind {
    /// The shared timeout of a quick-probe burst.
    QuickProbe,
    /// Guards a steady-state probe that is never resolved.
    ProbeTimeout,
    /// Delays the next steady-state probe after a failure.
    RetryBackoff,
    /// Reopens the search range after convergence.
    Convergence,
}

impl Display for TimerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuickProbe => write!(f, "quick-probe"),
            Self::ProbeTimeout => write!(f, "probe-timeout"),
            Self::RetryBackoff => write!(f, "retry-backoff"),
            Self::Convergence => write!(f, "convergence"),
        }
    }
}

/// Per-path, per-purpose timers.
///
/// Arming a timer that is already armed moves its deadline. Canceling a timer
/// that is not armed, or has already fired, does nothing.
#[derive(Debug, Clone, Default)]
pub struct Timers {
    deadlines: IndexMap<(SocketAddr, TimerKind), Instant>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, addr: SocketAddr, kind: TimerKind, deadline: Instant) {
        self.deadlines.insert((addr, kind), deadline);
    }

    pub fn cancel(&mut self, addr: SocketAddr, kind: TimerKind) {
        self.deadlines.shift_remove(&(addr, kind));
    }

    /// Cancel every timer of a path.
    pub fn cancel_all(&mut self, addr: SocketAddr) {
        self.deadlines.retain(|(a, _), _| *a != addr);
    }

    #[must_use]
    pub fn is_armed(&self, addr: SocketAddr, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&(addr, kind))
    }

    #[must_use]
    pub fn deadline(&self, addr: SocketAddr, kind: TimerKind) -> Option<Instant> {
        self.deadlines.get(&(addr, kind)).copied()
    }

    /// The earliest deadline of any armed timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(SocketAddr, TimerKind)> {
        let mut expired = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&key, &deadline)| (deadline, key))
            .collect::<Vec<_>>();
        expired.sort_by_key(|(deadline, _)| *deadline);
        for (_, key) in &expired {
            self.deadlines.shift_remove(key);
        }
        expired.into_iter().map(|(_, key)| key).collect()
    }
}
