use crate::types::PacketSize;
use indexmap::IndexMap;
use std::net::SocketAddr;

/// The congestion control hooks driven by path MTU discovery.
#[cfg_attr(test, mockall::automock)]
pub trait CongestionAdapter {
    /// The effective PMTU of a path changed from `old` to `new`.
    ///
    /// Implementations must rescale the window or pacing rate of the path so
    /// that the permitted rate in bytes is unchanged.
    fn rescale(&mut self, addr: SocketAddr, old: PacketSize, new: PacketSize);

    /// A quick-probe burst confirmed no size above the floor, treat as loss.
    fn backoff(&mut self, addr: SocketAddr);

    /// A path was added with the given effective PMTU.
    fn path_added(&mut self, addr: SocketAddr, eff_pmtu: PacketSize);

    /// A path was removed, its state can be released.
    fn path_removed(&mut self, addr: SocketAddr);
}

/// Fixed point scale of a window measured in packets.
const SCALE: u64 = 1000;

/// The smallest window after a backoff, in packets.
const MIN_WINDOW_PACKETS: u64 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Window {
    /// Window in thousandths of a packet.
    packets: u64,
    mtu: PacketSize,
}

impl Window {
    fn bytes(&self) -> u64 {
        self.packets * u64::from(self.mtu) / SCALE
    }
}

/// A per-path window measured in packets of the current effective PMTU.
///
/// A PMTU change keeps the window in bytes and so changes the number of
/// packets it holds.
#[derive(Debug, Clone)]
pub struct CongestionWindows {
    initial_packets: u64,
    windows: IndexMap<SocketAddr, Window>,
}

impl CongestionWindows {
    #[must_use]
    pub fn new(initial_packets: u64) -> Self {
        Self {
            initial_packets,
            windows: IndexMap::new(),
        }
    }

    /// Start tracking a path with the initial window.
    pub fn insert(&mut self, addr: SocketAddr, mtu: PacketSize) {
        self.windows.insert(
            addr,
            Window {
                packets: self.initial_packets * SCALE,
                mtu,
            },
        );
    }

    pub fn remove(&mut self, addr: SocketAddr) {
        self.windows.shift_remove(&addr);
    }

    /// The window of a path in bytes.
    #[must_use]
    pub fn window_bytes(&self, addr: SocketAddr) -> Option<u64> {
        self.windows.get(&addr).map(Window::bytes)
    }

    /// The window of a path in whole packets.
    #[must_use]
    pub fn window_packets(&self, addr: SocketAddr) -> Option<u64> {
        self.windows.get(&addr).map(|w| w.packets / SCALE)
    }
}

impl CongestionAdapter for CongestionWindows {
    fn rescale(&mut self, addr: SocketAddr, old: PacketSize, new: PacketSize) {
        if new.0 == 0 {
            return;
        }
        let initial = self.initial_packets * SCALE;
        let window = self.windows.entry(addr).or_insert(Window {
            packets: initial,
            mtu: old,
        });
        let bytes = window.packets * u64::from(window.mtu);
        window.packets = bytes / u64::from(new);
        window.mtu = new;
        tracing::trace!(%addr, %old, %new, packets = window.packets, "rescaled window");
    }

    fn backoff(&mut self, addr: SocketAddr) {
        if let Some(window) = self.windows.get_mut(&addr) {
            window.packets = (window.packets / 2).max(MIN_WINDOW_PACKETS * SCALE);
            tracing::trace!(%addr, packets = window.packets, "window backed off");
        }
    }

    fn path_added(&mut self, addr: SocketAddr, eff_pmtu: PacketSize) {
        self.insert(addr, eff_pmtu);
    }

    fn path_removed(&mut self, addr: SocketAddr) {
        self.remove(addr);
    }
}
