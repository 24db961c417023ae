use serde::Deserialize;
use std::net::SocketAddr;

/// A simulated association.
#[derive(Debug, Clone, Deserialize)]
pub struct Simulation {
    pub name: String,
    /// The seed of the random loss generator.
    #[serde(default)]
    pub seed: u64,
    /// How long to simulate, in seconds.
    pub duration_s: u64,
    #[serde(default)]
    pub config: Config,
    pub paths: Vec<Path>,
    pub expect: Expect,
}

/// Overrides of the association configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub initial_search_low: Option<u16>,
    pub initial_search_high: Option<u16>,
    pub initial_eff_pmtu: Option<u16>,
    pub min_search_step: Option<u16>,
    pub convergence_timer_s: Option<u64>,
    pub jump_probe_sizes: Option<Vec<u16>>,
    #[serde(default)]
    pub local_network_shortcut: bool,
    pub interface_mtu: Option<u16>,
}

/// A simulated network path to one destination address.
#[derive(Debug, Clone, Deserialize)]
pub struct Path {
    pub addr: SocketAddr,
    /// The largest packet the path delivers.
    pub pmtu: u16,
    /// The simulated round trip time (RTT) in ms.
    pub rtt_ms: u64,
    /// The probability that any probe is dropped, regardless of size.
    #[serde(default)]
    pub loss: f64,
    /// How losses of oversized probes are classified.
    #[serde(default)]
    pub attribution: Attribution,
    /// Changes of the path MTU over time.
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// The path MTU becomes `pmtu` after `at_s` seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub at_s: u64,
    pub pmtu: u16,
}

#[derive(Debug, Copy, Clone, Default, Deserialize)]
pub enum Attribution {
    #[default]
    Attributable,
    Ambiguous,
}

/// The expected outcome of a simulation.
#[derive(Debug, Clone, Deserialize)]
pub struct Expect {
    pub connection_up: bool,
    pub primary: Option<SocketAddr>,
    #[serde(default)]
    pub paths: Vec<ExpectPath>,
}

/// The expected state of a path at the end of a simulation.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectPath {
    pub addr: SocketAddr,
    pub eff_pmtu_min: u16,
    pub eff_pmtu_max: u16,
    /// Did the search converge at least once?
    #[serde(default)]
    pub converged: bool,
    pub congested: Option<bool>,
    /// The phase, as displayed.
    pub phase: Option<String>,
    /// The exact number of probes sent to the path.
    pub probes: Option<usize>,
}
