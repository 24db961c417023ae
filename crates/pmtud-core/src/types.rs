use bitflags::bitflags;
use derive_more::{Add, AddAssign, Display, Sub};

/// `PacketSize` newtype, in bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Add, Sub, Display,
)]
pub struct PacketSize(pub u16);

impl PacketSize {
    /// The number of bytes between `self` and a smaller `other`, or zero.
    #[must_use]
    pub const fn gap(self, other: Self) -> u16 {
        self.0.saturating_sub(other.0)
    }

    /// The size halfway between `self` and `other`, rounded down.
    #[must_use]
    pub const fn midpoint(self, other: Self) -> Self {
        Self(((self.0 as u32 + other.0 as u32) / 2) as u16)
    }
}

impl From<PacketSize> for u64 {
    fn from(size: PacketSize) -> Self {
        Self::from(size.0)
    }
}

/// Correlation handle for a probe, issued by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash, AddAssign, Display)]
pub struct ProbeHandle(pub u64);

/// Position of a probe within the quick-probe jump sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Display)]
pub struct JumpIndex(pub usize);

/// `AssociationId` newtype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Display)]
pub struct AssociationId(pub u32);

bitflags! {
    /// Path flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PathFlags: u8 {
        /// The last quick-probe burst confirmed no size above the floor.
        const CONGESTED_DURING_FAST_PROBE = 1;
        /// The peer is on a local network and is never probed.
        const LOCAL = 2;
    }
}
