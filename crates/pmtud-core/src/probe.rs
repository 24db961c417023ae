use crate::error::Result;
use crate::types::{JumpIndex, PacketSize, ProbeHandle};
use indexmap::IndexMap;
use std::net::SocketAddr;
use std::time::Instant;

/// A probe sent on a path and not yet resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Probe {
    /// The correlation handle issued by the transport.
    pub handle: ProbeHandle,
    /// The destination address of the path.
    pub addr: SocketAddr,
    /// The size of the probe packet.
    pub size: PacketSize,
    /// Whether the probe belongs to a burst or to the bounded search.
    pub kind: ProbeKind,
    /// The time the probe was sent.
    pub sent: Instant,
    /// Set once the acknowledgment layer reports the probe as not delivered.
    pub lost: bool,
    /// The loss attribution, if reported.
    pub attribution: Option<LossAttribution>,
}

impl Probe {
    #[must_use]
    pub const fn new(
        handle: ProbeHandle,
        addr: SocketAddr,
        size: PacketSize,
        kind: ProbeKind,
        sent: Instant,
    ) -> Self {
        Self {
            handle,
            addr,
            size,
            kind,
            sent,
            lost: false,
            attribution: None,
        }
    }

    #[must_use]
    pub const fn is_quick(&self) -> bool {
        matches!(self.kind, ProbeKind::Quick(_))
    }
}

/// The purpose of a probe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeKind {
    /// A member of a quick-probe burst at the given position of the jump sequence.
    Quick(JumpIndex),
    /// A steady-state search probe.
    Search,
}

/// The delivery outcome of a probe, as reported by the acknowledgment layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeOutcome {
    /// The probe was acknowledged.
    ///
    /// A `confirmed_size` of zero confirms delivery without reporting a size.
    Acked {
        confirmed_size: PacketSize,
        received: Instant,
    },
    /// The probe was not acknowledged in time.
    Timeout,
}

/// Whether a probe loss can be isolated to the probe.
///
/// A loss is `Attributable` only when all data sent before the probe was
/// delivered and no other loss was reported in the data sent after it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LossAttribution {
    Attributable,
    Ambiguous,
}

/// Probes in flight, keyed by handle, across every path of an association.
pub type InFlight = IndexMap<ProbeHandle, Probe>;

/// Sends probe packets on behalf of an association.
///
/// Delivery and loss are reported back through
/// [`crate::Association::post`].
#[cfg_attr(test, mockall::automock)]
pub trait ProbeTransport {
    /// Send a probe packet of `size` bytes to `addr`.
    ///
    /// Returning [`crate::Error::ProbeFailed`] marks the probe as lost without
    /// failing the association.
    fn send_probe(&mut self, addr: SocketAddr, size: PacketSize) -> Result<ProbeHandle>;

    /// Is there enough send window and data to carry a probe of `size` bytes?
    fn has_capacity(&self, addr: SocketAddr, size: PacketSize) -> bool;
}
