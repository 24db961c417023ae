use crate::sim::simulation::{Attribution, Path, Simulation};
use pmtud_core::{
    Error, Event, LossAttribution, PacketSize, ProbeHandle, ProbeOutcome, ProbeTransport,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Losses are reported after this many round trips.
const LOSS_DETECTION_RTTS: u32 = 3;

/// A simulated network which delivers or drops probes and reports their
/// fate after a delay, driven by a virtual clock.
#[derive(Debug)]
pub struct Network {
    start: Instant,
    now: Instant,
    paths: HashMap<SocketAddr, Path>,
    rng: StdRng,
    next_handle: u64,
    pending: Vec<(Instant, Event)>,
    sent: HashMap<SocketAddr, usize>,
}

impl Network {
    pub fn new(sim: &Simulation, start: Instant) -> Self {
        Self {
            start,
            now: start,
            paths: sim
                .paths
                .iter()
                .map(|path| (path.addr, path.clone()))
                .collect(),
            rng: StdRng::seed_from_u64(sim.seed),
            next_handle: 0,
            pending: vec![],
            sent: HashMap::new(),
        }
    }

    /// Advance the virtual clock.
    pub fn set_now(&mut self, now: Instant) {
        self.now = now;
    }

    /// The earliest pending acknowledgment or loss report.
    pub fn next_delivery(&self) -> Option<Instant> {
        self.pending.iter().map(|(at, _)| *at).min()
    }

    /// Remove every event due at `now`, in the order they fall due.
    pub fn take_due(&mut self, now: Instant) -> Vec<Event> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|(at, _)| *at <= now);
        self.pending = pending;
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, event)| event).collect()
    }

    /// The number of probes sent to `addr`.
    pub fn sent(&self, addr: SocketAddr) -> usize {
        self.sent.get(&addr).copied().unwrap_or_default()
    }

    fn pmtu(&self, path: &Path) -> u16 {
        let elapsed = self.now.saturating_duration_since(self.start);
        path.changes
            .iter()
            .filter(|change| Duration::from_secs(change.at_s) <= elapsed)
            .max_by_key(|change| change.at_s)
            .map_or(path.pmtu, |change| change.pmtu)
    }
}

impl ProbeTransport for Network {
    fn send_probe(
        &mut self,
        addr: SocketAddr,
        size: PacketSize,
    ) -> pmtud_core::Result<ProbeHandle> {
        let Some(path) = self.paths.get(&addr).cloned() else {
            return Err(Error::ProbeFailed(format!("no route to {addr}")));
        };
        self.next_handle += 1;
        let handle = ProbeHandle(self.next_handle);
        *self.sent.entry(addr).or_default() += 1;
        let rtt = Duration::from_millis(path.rtt_ms);
        let pmtu = self.pmtu(&path);
        let dropped = self.rng.random_bool(path.loss);
        if !dropped && size.0 <= pmtu {
            debug!(%addr, %size, %handle, "delivered");
            self.pending.push((
                self.now + rtt,
                Event::ProbeOutcome {
                    handle,
                    outcome: ProbeOutcome::Acked {
                        confirmed_size: size,
                        received: self.now + rtt,
                    },
                },
            ));
        } else {
            let attribution = match (dropped, path.attribution) {
                (false, Attribution::Attributable) => LossAttribution::Attributable,
                _ => LossAttribution::Ambiguous,
            };
            debug!(%addr, %size, %handle, pmtu, ?attribution, "dropped");
            let at = self.now + rtt * LOSS_DETECTION_RTTS;
            self.pending.push((
                at,
                Event::ProbeOutcome {
                    handle,
                    outcome: ProbeOutcome::Timeout,
                },
            ));
            self.pending.push((
                at,
                Event::LossAttribution {
                    handle,
                    attribution,
                },
            ));
        }
        Ok(handle)
    }

    fn has_capacity(&self, _addr: SocketAddr, _size: PacketSize) -> bool {
        true
    }
}
