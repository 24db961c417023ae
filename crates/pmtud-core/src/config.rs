use crate::constants::{MAX_JUMP_PROBE_SIZES, MIN_CONVERGENCE_TIMER, MIN_PMTU};
use crate::error::{Error, Result};
use crate::types::{JumpIndex, PacketSize};
use arrayvec::ArrayVec;
use ipnetwork::IpNetwork;
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default values for configuration.
pub mod defaults {
    use crate::config::LocalNetworkShortcut;
    use std::time::Duration;

    /// The default value for `initial-search-low`.
    ///
    /// RFC 4821 suggests 1024 bytes as universally safe, but 1400 bytes holds
    /// for nearly every tunnel in use today and avoids a slow start.
    pub const DEFAULT_INITIAL_SEARCH_LOW: u16 = 1400;

    /// The default value for `initial-search-high`.
    pub const DEFAULT_INITIAL_SEARCH_HIGH: u16 = 65535;

    /// The default value for `initial-eff-pmtu`.
    pub const DEFAULT_INITIAL_EFF_PMTU: u16 = 1400;

    /// The default value for `min-search-step`.
    pub const DEFAULT_MIN_SEARCH_STEP: u16 = 32;

    /// The default value for `convergence-timer`.
    pub const DEFAULT_CONVERGENCE_TIMER: Duration = Duration::from_secs(10 * 60);

    /// The default value for `jump-probe-sizes`.
    ///
    /// Jumbo, FDDI, Ethernet, tunnelled Ethernet, the IPv6 minimum and finally
    /// the IPv4 minimum as the floor.
    pub const DEFAULT_JUMP_PROBE_SIZES: [u16; 6] = [9000, 4352, 1500, 1400, 1280, 68];

    /// The default value for `local-network-shortcut`.
    pub const DEFAULT_LOCAL_NETWORK_SHORTCUT: LocalNetworkShortcut = LocalNetworkShortcut::Disabled;

    /// The effective PMTU assumed for local peers when the shortcut is enabled.
    pub const DEFAULT_LOCAL_PMTU: u16 = 1500;

    /// The default value for `rto-initial`.
    pub const DEFAULT_RTO_INITIAL: Duration = Duration::from_millis(3000);

    /// The default value for `rto-min`.
    pub const DEFAULT_RTO_MIN: Duration = Duration::from_millis(1000);

    /// The default value for `rto-max`.
    pub const DEFAULT_RTO_MAX: Duration = Duration::from_millis(60000);

    /// The default value for `retry-backoff`.
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

    /// The default value for `max-retry-backoff`.
    pub const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

    /// The default value for `cache-ttl`.
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
}

/// Whether peers on a local network skip probing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LocalNetworkShortcut {
    /// Probe every peer.
    Disabled,
    /// Use the local PMTU for loopback, link-local and private peers.
    Enabled,
}

impl LocalNetworkShortcut {
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        match self {
            Self::Disabled => false,
            Self::Enabled => true,
        }
    }
}

impl Display for LocalNetworkShortcut {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Enabled => write!(f, "enabled"),
        }
    }
}

/// The ordered sizes probed by a quick-probe burst.
///
/// Sizes are strictly descending and the last entry is the floor, a size
/// deliverable on virtually any network.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JumpProbeSizes(ArrayVec<PacketSize, MAX_JUMP_PROBE_SIZES>);

impl JumpProbeSizes {
    /// Create a jump sequence from raw sizes.
    ///
    /// Ordering is checked by [`ProbeConfig::validate`].
    pub fn new(sizes: &[u16]) -> Result<Self> {
        if sizes.len() > MAX_JUMP_PROBE_SIZES {
            return Err(Error::BadConfig(format!(
                "at most {MAX_JUMP_PROBE_SIZES} jump probe sizes are allowed (got {})",
                sizes.len()
            )));
        }
        Ok(Self(sizes.iter().map(|&size| PacketSize(size)).collect()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: JumpIndex) -> Option<PacketSize> {
        self.0.get(index.0).copied()
    }

    /// The guaranteed-deliverable floor size.
    #[must_use]
    pub fn floor(&self) -> Option<PacketSize> {
        self.0.last().copied()
    }

    /// Is `index` the position of the floor probe?
    #[must_use]
    pub fn is_floor(&self, index: JumpIndex) -> bool {
        !self.0.is_empty() && index.0 == self.0.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (JumpIndex, PacketSize)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &size)| (JumpIndex(i), size))
    }
}

impl Default for JumpProbeSizes {
    fn default() -> Self {
        Self(
            defaults::DEFAULT_JUMP_PROBE_SIZES
                .iter()
                .map(|&size| PacketSize(size))
                .collect(),
        )
    }
}

/// Retransmission timeout configuration for probe timers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RtoConfig {
    pub initial: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for RtoConfig {
    fn default() -> Self {
        Self {
            initial: defaults::DEFAULT_RTO_INITIAL,
            min: defaults::DEFAULT_RTO_MIN,
            max: defaults::DEFAULT_RTO_MAX,
        }
    }
}

/// Path MTU discovery configuration.
///
/// Resolved once by the [`crate::Builder`] and shared by every path of an
/// association.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProbeConfig {
    pub initial_search_low: PacketSize,
    pub initial_search_high: PacketSize,
    pub initial_eff_pmtu: PacketSize,
    /// Probing for a path has converged once `search_high - search_low` is
    /// below this many bytes.
    pub min_search_step: u16,
    pub convergence_timer: Duration,
    pub jump_probe_sizes: JumpProbeSizes,
    pub local_network_shortcut: LocalNetworkShortcut,
    pub local_pmtu: PacketSize,
    /// Additional networks treated as local by the shortcut.
    pub local_networks: Vec<IpNetwork>,
    /// The MTU of the outgoing interface, if known.
    pub interface_mtu: Option<PacketSize>,
    pub rto: RtoConfig,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_search_low: PacketSize(defaults::DEFAULT_INITIAL_SEARCH_LOW),
            initial_search_high: PacketSize(defaults::DEFAULT_INITIAL_SEARCH_HIGH),
            initial_eff_pmtu: PacketSize(defaults::DEFAULT_INITIAL_EFF_PMTU),
            min_search_step: defaults::DEFAULT_MIN_SEARCH_STEP,
            convergence_timer: defaults::DEFAULT_CONVERGENCE_TIMER,
            jump_probe_sizes: JumpProbeSizes::default(),
            local_network_shortcut: defaults::DEFAULT_LOCAL_NETWORK_SHORTCUT,
            local_pmtu: PacketSize(defaults::DEFAULT_LOCAL_PMTU),
            local_networks: Vec::new(),
            interface_mtu: None,
            rto: RtoConfig::default(),
            retry_backoff: defaults::DEFAULT_RETRY_BACKOFF,
            max_retry_backoff: defaults::DEFAULT_MAX_RETRY_BACKOFF,
        }
    }
}

impl ProbeConfig {
    /// The ceiling that `search_high` starts from and is reset to.
    ///
    /// This is the configured ceiling, lowered to one byte above the
    /// interface MTU if that is tighter.
    #[must_use]
    pub fn search_ceiling(&self) -> PacketSize {
        match self.interface_mtu {
            Some(mtu) => self
                .initial_search_high
                .min(PacketSize(mtu.0.saturating_add(1))),
            None => self.initial_search_high,
        }
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::BadConfig(msg));
        if self.min_search_step < 2 {
            return bad(format!(
                "min_search_step must be at least 2 (got {})",
                self.min_search_step
            ));
        }
        if self.initial_search_low < MIN_PMTU {
            return bad(format!(
                "initial_search_low must be at least {MIN_PMTU} (got {})",
                self.initial_search_low
            ));
        }
        if !(self.initial_search_low <= self.initial_eff_pmtu
            && self.initial_eff_pmtu < self.initial_search_high)
        {
            return bad(format!(
                "expected initial_search_low ({}) <= initial_eff_pmtu ({}) < initial_search_high ({})",
                self.initial_search_low, self.initial_eff_pmtu, self.initial_search_high
            ));
        }
        if let Some(mtu) = self.interface_mtu {
            if mtu < self.initial_search_low {
                return bad(format!(
                    "interface_mtu ({mtu}) must not be below initial_search_low ({})",
                    self.initial_search_low
                ));
            }
        }
        if self.local_pmtu < MIN_PMTU {
            return bad(format!(
                "local_pmtu must be at least {MIN_PMTU} (got {})",
                self.local_pmtu
            ));
        }
        let Some(floor) = self.jump_probe_sizes.floor() else {
            return bad(String::from("jump_probe_sizes must not be empty"));
        };
        if floor < MIN_PMTU {
            return bad(format!(
                "the last jump probe size must be at least {MIN_PMTU} (got {floor})"
            ));
        }
        if !self
            .jump_probe_sizes
            .iter()
            .tuple_windows()
            .all(|((_, a), (_, b))| a > b)
        {
            return bad(String::from(
                "jump_probe_sizes must be strictly descending",
            ));
        }
        if let Some((_, largest)) = self.jump_probe_sizes.iter().next() {
            if largest >= self.initial_search_high {
                return bad(format!(
                    "jump probe size {largest} must be below initial_search_high ({})",
                    self.initial_search_high
                ));
            }
        }
        if self.convergence_timer < MIN_CONVERGENCE_TIMER {
            return bad(format!(
                "convergence_timer must be at least {}s (got {}s)",
                MIN_CONVERGENCE_TIMER.as_secs(),
                self.convergence_timer.as_secs()
            ));
        }
        if !(self.rto.min <= self.rto.initial && self.rto.initial <= self.rto.max)
            || self.rto.min.is_zero()
        {
            return bad(format!(
                "expected 0 < rto_min ({:?}) <= rto_initial ({:?}) <= rto_max ({:?})",
                self.rto.min, self.rto.initial, self.rto.max
            ));
        }
        if self.retry_backoff.is_zero() || self.retry_backoff > self.max_retry_backoff {
            return bad(format!(
                "expected 0 < retry_backoff ({:?}) <= max_retry_backoff ({:?})",
                self.retry_backoff, self.max_retry_backoff
            ));
        }
        Ok(())
    }
}
