//! Packetization-layer path MTU discovery.
//!
//! This crate implements path MTU discovery (RFC 4821) for a multi-homed,
//! message-oriented transport, where an association may reach its peer over
//! several destination addresses, each with its own path MTU.
//!
//! When an association comes up every path sends a quick-probe burst of
//! well-known sizes, which gives every path a usable effective PMTU within a
//! single round trip. Each path then runs a bounded binary search between the
//! largest size known to be deliverable and the smallest size known not to
//! be, one probe at a time, until the bounds are closer than the configured
//! step. Converged paths probe upward again after a convergence timer.
//!
//! The crate does not send packets itself. The transport supplies a
//! [`ProbeTransport`] to send probes, a [`CongestionAdapter`] to rescale its
//! congestion state when the effective PMTU of a path changes, and reports
//! acknowledgments and loss classifications back as [`Event`]s.
//!
//! # Example
//!
//! The following example runs an association on the current thread with a
//! single path:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! # use std::net::SocketAddr;
//! # use std::str::FromStr;
//! # use std::time::Instant;
//! use pmtud_core::{Builder, CongestionWindows, PacketSize, ProbeHandle, ProbeTransport};
//!
//! struct Transport(u64);
//!
//! impl ProbeTransport for Transport {
//!     fn send_probe(&mut self, _addr: SocketAddr, _size: PacketSize) -> pmtud_core::Result<ProbeHandle> {
//!         self.0 += 1;
//!         Ok(ProbeHandle(self.0))
//!     }
//!     fn has_capacity(&self, _addr: SocketAddr, _size: PacketSize) -> bool {
//!         true
//!     }
//! }
//!
//! let mut association = Builder::new()
//!     .build(Transport(0), CongestionWindows::new(10), |n| println!("{n:?}"))?;
//! association.add_path(SocketAddr::from_str("192.0.2.1:2905")?, Instant::now())?;
//! association.connection_up(Instant::now())?;
//! association.poll(Instant::now())?;
//! # Ok(())
//! # }
//! ```
//!
//! # See Also
//!
//! - [`Builder`] - Build an [`Association`].
//! - [`Association::post`] - Report an acknowledgment or loss attribution.
//! - [`Association::poll`] - Process queued events and expired timers.
//! - [`Session::spawn`] - Run an association on a new thread.
#![warn(clippy::all, clippy::pedantic, clippy::nursery, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::use_self,
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc
)]
#![deny(unsafe_code)]

mod association;
mod builder;
mod cache;
mod config;
mod congestion;
mod constants;
mod error;
mod local;
mod path;
mod probe;
mod quick;
mod rtt;
mod search;
mod selector;
mod session;
mod state;
mod timer;
mod types;

pub use association::{Association, Event, Notification};
pub use builder::Builder;
pub use cache::{MemoryPmtuCache, PmtuCache};
pub use config::{defaults, JumpProbeSizes, LocalNetworkShortcut, ProbeConfig, RtoConfig};
pub use congestion::{CongestionAdapter, CongestionWindows};
pub use constants::{MAX_PMTU, MIN_CONVERGENCE_TIMER, MIN_PMTU};
pub use error::{Error, Result};
pub use local::is_local;
pub use path::{OutstandingProbe, Path, PathPhase};
pub use probe::{LossAttribution, ProbeOutcome, ProbeTransport};
pub use rtt::RttEstimator;
pub use session::Session;
pub use state::{PathState, Snapshot};
pub use timer::TimerKind;
pub use types::{AssociationId, JumpIndex, PacketSize, PathFlags, ProbeHandle};
