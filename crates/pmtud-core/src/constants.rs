use crate::PacketSize;
use std::time::Duration;

/// The smallest packet size every IPv4 path must deliver.
///
/// A jump sequence must end with a size no smaller than this so that the
/// final probe of a burst is deliverable on virtually any network.
pub const MIN_PMTU: PacketSize = PacketSize(68);

/// The largest packet size that can be expressed.
pub const MAX_PMTU: PacketSize = PacketSize(u16::MAX);

/// The convergence timer may not be shorter than this (RFC 1981).
pub const MIN_CONVERGENCE_TIMER: Duration = Duration::from_secs(5 * 60);

/// The maximum number of entries in a jump sequence.
pub const MAX_JUMP_PROBE_SIZES: usize = 16;

/// A steady-state probe that has seen neither an acknowledgment nor a loss
/// report after this many RTOs is discarded as inconclusive.
pub const SEARCH_PROBE_TIMEOUT_RTOS: u32 = 3;
