use crate::cache::PmtuCache;
use crate::config::{defaults, JumpProbeSizes, LocalNetworkShortcut, ProbeConfig, RtoConfig};
use crate::congestion::CongestionAdapter;
use crate::error::Result;
use crate::probe::ProbeTransport;
use crate::types::{AssociationId, PacketSize};
use crate::{Association, Notification};
use ipnetwork::IpNetwork;
use std::sync::Arc;
use std::time::Duration;

/// Build an association.
///
/// The configuration is resolved and validated once, by
/// [`Builder::build`], and shared by every path of the association.
///
/// # Examples
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// # use std::net::SocketAddr;
/// use pmtud_core::{Builder, CongestionWindows, LocalNetworkShortcut, PacketSize, ProbeHandle, ProbeTransport};
///
/// struct Transport;
///
/// impl ProbeTransport for Transport {
///     fn send_probe(&mut self, _addr: SocketAddr, _size: PacketSize) -> pmtud_core::Result<ProbeHandle> {
///         Ok(ProbeHandle(1))
///     }
///     fn has_capacity(&self, _addr: SocketAddr, _size: PacketSize) -> bool {
///         true
///     }
/// }
///
/// let association = Builder::new()
///     .initial_search_high(9000)
///     .jump_probe_sizes(&[8000, 4352, 1500, 1280, 68])
///     .local_network_shortcut(LocalNetworkShortcut::Enabled)
///     .build(Transport, CongestionWindows::new(10), |n| println!("{n:?}"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    id: AssociationId,
    initial_search_low: PacketSize,
    initial_search_high: PacketSize,
    initial_eff_pmtu: PacketSize,
    min_search_step: u16,
    convergence_timer: Duration,
    jump_probe_sizes: Vec<u16>,
    local_network_shortcut: LocalNetworkShortcut,
    local_pmtu: PacketSize,
    local_networks: Vec<IpNetwork>,
    interface_mtu: Option<PacketSize>,
    rto_initial: Duration,
    rto_min: Duration,
    rto_max: Duration,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
    cache: Option<Arc<dyn PmtuCache>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            id: AssociationId::default(),
            initial_search_low: ProbeConfig::default().initial_search_low,
            initial_search_high: ProbeConfig::default().initial_search_high,
            initial_eff_pmtu: ProbeConfig::default().initial_eff_pmtu,
            min_search_step: ProbeConfig::default().min_search_step,
            convergence_timer: ProbeConfig::default().convergence_timer,
            jump_probe_sizes: defaults::DEFAULT_JUMP_PROBE_SIZES.to_vec(),
            local_network_shortcut: ProbeConfig::default().local_network_shortcut,
            local_pmtu: ProbeConfig::default().local_pmtu,
            local_networks: Vec::new(),
            interface_mtu: None,
            rto_initial: RtoConfig::default().initial,
            rto_min: RtoConfig::default().min,
            rto_max: RtoConfig::default().max,
            retry_backoff: ProbeConfig::default().retry_backoff,
            max_retry_backoff: ProbeConfig::default().max_retry_backoff,
            cache: None,
        }
    }
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the association identifier, used in logs and thread names.
    #[must_use]
    pub fn id(self, id: u32) -> Self {
        Self {
            id: AssociationId(id),
            ..self
        }
    }

    /// Set the initial `search_low`, a size assumed deliverable on any path.
    #[must_use]
    pub fn initial_search_low(self, size: u16) -> Self {
        Self {
            initial_search_low: PacketSize(size),
            ..self
        }
    }

    /// Set the initial `search_high`, the ceiling of the search.
    #[must_use]
    pub fn initial_search_high(self, size: u16) -> Self {
        Self {
            initial_search_high: PacketSize(size),
            ..self
        }
    }

    /// Set the `eff_pmtu` used before any probe is acknowledged.
    #[must_use]
    pub fn initial_eff_pmtu(self, size: u16) -> Self {
        Self {
            initial_eff_pmtu: PacketSize(size),
            ..self
        }
    }

    /// Set the granularity, in bytes, below which the search has converged.
    #[must_use]
    pub fn min_search_step(self, min_search_step: u16) -> Self {
        Self {
            min_search_step,
            ..self
        }
    }

    /// Set how long a converged path waits before probing upward again.
    ///
    /// Must be at least 5 minutes.
    #[must_use]
    pub fn convergence_timer(self, convergence_timer: Duration) -> Self {
        Self {
            convergence_timer,
            ..self
        }
    }

    /// Set the sizes sent by a quick-probe burst.
    ///
    /// Sizes must be strictly descending and end with a floor size
    /// deliverable on virtually any network.
    #[must_use]
    pub fn jump_probe_sizes(self, sizes: &[u16]) -> Self {
        Self {
            jump_probe_sizes: sizes.to_vec(),
            ..self
        }
    }

    #[must_use]
    pub fn local_network_shortcut(self, local_network_shortcut: LocalNetworkShortcut) -> Self {
        Self {
            local_network_shortcut,
            ..self
        }
    }

    /// Set the `eff_pmtu` of local peers when the local network shortcut is enabled.
    #[must_use]
    pub fn local_pmtu(self, size: u16) -> Self {
        Self {
            local_pmtu: PacketSize(size),
            ..self
        }
    }

    /// Treat peers in these networks as local, in addition to loopback,
    /// link-local and private addresses.
    #[must_use]
    pub fn local_networks(self, local_networks: Vec<IpNetwork>) -> Self {
        Self {
            local_networks,
            ..self
        }
    }

    /// Set the MTU of the outgoing interface, which caps every path.
    #[must_use]
    pub fn interface_mtu(self, mtu: Option<u16>) -> Self {
        Self {
            interface_mtu: mtu.map(PacketSize),
            ..self
        }
    }

    #[must_use]
    pub fn rto_initial(self, rto_initial: Duration) -> Self {
        Self {
            rto_initial,
            ..self
        }
    }

    #[must_use]
    pub fn rto_min(self, rto_min: Duration) -> Self {
        Self { rto_min, ..self }
    }

    #[must_use]
    pub fn rto_max(self, rto_max: Duration) -> Self {
        Self { rto_max, ..self }
    }

    /// Set the first wait after an inconclusive search probe, doubled on
    /// every further one up to `max_retry_backoff`.
    #[must_use]
    pub fn retry_backoff(self, retry_backoff: Duration) -> Self {
        Self {
            retry_backoff,
            ..self
        }
    }

    #[must_use]
    pub fn max_retry_backoff(self, max_retry_backoff: Duration) -> Self {
        Self {
            max_retry_backoff,
            ..self
        }
    }

    /// Seed new paths from, and store converged values to, a PMTU cache.
    #[must_use]
    pub fn cache(self, cache: Arc<dyn PmtuCache>) -> Self {
        Self {
            cache: Some(cache),
            ..self
        }
    }

    /// Resolve and validate the configuration.
    pub fn config(&self) -> Result<ProbeConfig> {
        let config = ProbeConfig {
            initial_search_low: self.initial_search_low,
            initial_search_high: self.initial_search_high,
            initial_eff_pmtu: self.initial_eff_pmtu,
            min_search_step: self.min_search_step,
            convergence_timer: self.convergence_timer,
            jump_probe_sizes: JumpProbeSizes::new(&self.jump_probe_sizes)?,
            local_network_shortcut: self.local_network_shortcut,
            local_pmtu: self.local_pmtu,
            local_networks: self.local_networks.clone(),
            interface_mtu: self.interface_mtu,
            rto: RtoConfig {
                initial: self.rto_initial,
                min: self.rto_min,
                max: self.rto_max,
            },
            retry_backoff: self.retry_backoff,
            max_retry_backoff: self.max_retry_backoff,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the [`Association`].
    pub fn build<T, C, F>(self, transport: T, congestion: C, publish: F) -> Result<Association<T, C, F>>
    where
        T: ProbeTransport,
        C: CongestionAdapter,
        F: FnMut(&Notification),
    {
        let config = self.config()?;
        tracing::debug!(id = %self.id, ?config);
        Ok(Association::new(
            self.id,
            config,
            transport,
            congestion,
            self.cache,
            publish,
        ))
    }
}
