use crate::cache::PmtuCache;
use crate::config::ProbeConfig;
use crate::congestion::CongestionAdapter;
use crate::error::{Error, Result};
use crate::path::{Path, PathPhase};
use crate::probe::{InFlight, LossAttribution, Probe, ProbeKind, ProbeOutcome, ProbeTransport};
use crate::quick::{self, BurstStatus};
use crate::search::{self, SearchResult};
use crate::state::Snapshot;
use crate::timer::{TimerKind, Timers};
use crate::types::{AssociationId, PacketSize, ProbeHandle};
use crate::{local, selector};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// An input reported by the collaborating transport and reliability layers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    /// The acknowledgment layer resolved a probe.
    ProbeOutcome {
        handle: ProbeHandle,
        outcome: ProbeOutcome,
    },
    /// The loss scoreboard classified the loss of a probe.
    LossAttribution {
        handle: ProbeHandle,
        attribution: LossAttribution,
    },
}

/// A notification published to the upper layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Notification {
    /// Every path finished its quick-probe burst and the association is usable.
    ConnectionUp { primary: SocketAddr },
    /// Probing for a path converged.
    PathConverged { addr: SocketAddr, pmtu: PacketSize },
    /// The effective PMTU of a path changed.
    EffPmtuChanged {
        addr: SocketAddr,
        old: PacketSize,
        new: PacketSize,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Queued {
    Event(Event),
    Timer(SocketAddr, TimerKind),
}

/// Everything a state transition of one path may touch, other than the path.
pub(crate) struct Context<'a, T, C, F> {
    pub(crate) config: &'a ProbeConfig,
    pub(crate) transport: &'a mut T,
    pub(crate) congestion: &'a mut C,
    pub(crate) timers: &'a mut Timers,
    pub(crate) inflight: &'a mut InFlight,
    pub(crate) cache: Option<&'a dyn PmtuCache>,
    pub(crate) publish: &'a mut F,
}

impl<T, C, F> Context<'_, T, C, F>
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    /// Send a probe and record it as in flight.
    ///
    /// Returns `None` if the transport failed to send the probe.
    pub(crate) fn send(
        &mut self,
        addr: SocketAddr,
        size: PacketSize,
        kind: ProbeKind,
        now: Instant,
    ) -> Result<Option<ProbeHandle>> {
        match self.transport.send_probe(addr, size) {
            Ok(handle) => {
                if self.inflight.contains_key(&handle) {
                    return Err(Error::Other(format!(
                        "probe handle {handle} is already in flight"
                    )));
                }
                self.inflight
                    .insert(handle, Probe::new(handle, addr, size, kind, now));
                tracing::trace!(%addr, %size, %handle, ?kind, "probe sent");
                Ok(Some(handle))
            }
            Err(Error::ProbeFailed(reason)) => {
                tracing::debug!(%addr, %size, reason, "probe failed to send");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Set the effective PMTU of a path, rescaling congestion state on change.
    pub(crate) fn set_eff_pmtu(&mut self, path: &mut Path, new: PacketSize) {
        let old = path.eff_pmtu;
        if old == new {
            return;
        }
        path.eff_pmtu = new;
        self.congestion.rescale(path.addr, old, new);
        tracing::debug!(addr = %path.addr, %old, %new, "eff_pmtu changed");
        (self.publish)(&Notification::EffPmtuChanged {
            addr: path.addr,
            old,
            new,
        });
    }
}

/// Path MTU discovery for every path of one association.
///
/// Inputs are serialized through a single event queue, see
/// [`Association::poll`]. Separate associations share no state and may run
/// on separate threads.
///
/// Use the [`crate::Builder`] type to create an [`Association`].
pub struct Association<T, C, F> {
    id: AssociationId,
    config: ProbeConfig,
    transport: T,
    congestion: C,
    publish: F,
    cache: Option<Arc<dyn PmtuCache>>,
    paths: IndexMap<SocketAddr, Path>,
    inflight: InFlight,
    timers: Timers,
    queue: VecDeque<Queued>,
    is_quick_probe: bool,
    is_up: bool,
    primary: Option<SocketAddr>,
    completions: u64,
}

impl<T, C, F> Association<T, C, F>
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    pub(crate) fn new(
        id: AssociationId,
        config: ProbeConfig,
        transport: T,
        congestion: C,
        cache: Option<Arc<dyn PmtuCache>>,
        publish: F,
    ) -> Self {
        Self {
            id,
            config,
            transport,
            congestion,
            publish,
            cache,
            paths: IndexMap::new(),
            inflight: InFlight::new(),
            timers: Timers::new(),
            queue: VecDeque::new(),
            is_quick_probe: false,
            is_up: false,
            primary: None,
            completions: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> AssociationId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The primary path, if selected.
    #[must_use]
    pub fn primary(&self) -> Option<SocketAddr> {
        self.primary
    }

    /// Is the initial quick-probe phase running?
    #[must_use]
    pub fn is_quick_probe(&self) -> bool {
        self.is_quick_probe
    }

    /// Has the initial quick-probe phase completed?
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.is_up
    }

    #[must_use]
    pub fn path(&self, addr: SocketAddr) -> Option<&Path> {
        self.paths.get(&addr)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn congestion(&self) -> &C {
        &self.congestion
    }

    /// The number of probes awaiting an outcome.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// The earliest time at which [`Association::poll`] has timer work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Take a snapshot of the state of every path.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.id,
            self.is_quick_probe,
            self.is_up,
            self.primary,
            self.paths.values(),
            &self.timers,
        )
    }

    /// Add a path to a newly learned destination address.
    ///
    /// A path added while the association is up, or coming up, starts its
    /// own quick-probe burst at once. Peers on a local network are never
    /// probed when the local network shortcut is enabled.
    #[instrument(skip(self), level = "trace")]
    pub fn add_path(&mut self, addr: SocketAddr, now: Instant) -> Result<()> {
        if self.paths.contains_key(&addr) {
            return Err(Error::DuplicatePath(addr));
        }
        let is_local = self.config.local_network_shortcut.is_enabled()
            && local::is_local(addr.ip(), &self.config.local_networks);
        let path = if is_local {
            Path::new_local(addr, &self.config)
        } else {
            let cached = self
                .cache
                .as_ref()
                .and_then(|cache| cache.lookup(addr.ip(), now));
            Path::new(addr, &self.config, cached)
        };
        tracing::debug!(id = %self.id, %addr, is_local, eff_pmtu = %path.eff_pmtu, "path added");
        self.congestion.path_added(addr, path.eff_pmtu);
        self.paths.insert(addr, path);
        if self.is_quick_probe || self.is_up {
            self.begin(addr, now)?;
        }
        Ok(())
    }

    /// Remove a path, discarding its timers and probes in flight.
    ///
    /// If it was the primary path the association is left without one until
    /// [`Association::select_primary`] is called.
    #[instrument(skip(self), level = "trace")]
    pub fn remove_path(&mut self, addr: SocketAddr) -> Result<()> {
        if self.paths.shift_remove(&addr).is_none() {
            return Err(Error::UnknownPath(addr));
        }
        self.timers.cancel_all(addr);
        self.inflight.retain(|_, probe| probe.addr != addr);
        self.congestion.path_removed(addr);
        if self.primary == Some(addr) {
            self.primary = None;
        }
        tracing::debug!(id = %self.id, %addr, "path removed");
        self.maybe_finish_quick_probe();
        Ok(())
    }

    /// The association is established: start a quick-probe burst on every path.
    #[instrument(skip(self), level = "trace")]
    pub fn connection_up(&mut self, now: Instant) -> Result<()> {
        if self.is_up || self.is_quick_probe {
            return Err(Error::AlreadyUp);
        }
        if self.paths.is_empty() {
            return Err(Error::NoPaths);
        }
        self.is_quick_probe = true;
        let addrs = self.paths.keys().copied().collect::<Vec<_>>();
        for addr in addrs {
            self.begin(addr, now)?;
        }
        self.maybe_finish_quick_probe();
        Ok(())
    }

    /// Choose the primary path again, such as after a path failure.
    pub fn select_primary(&mut self) -> Option<SocketAddr> {
        self.primary = selector::select(self.paths.values());
        self.primary
    }

    /// Set the primary path.
    pub fn set_primary(&mut self, addr: SocketAddr) -> Result<()> {
        if !self.paths.contains_key(&addr) {
            return Err(Error::UnknownPath(addr));
        }
        self.primary = Some(addr);
        Ok(())
    }

    /// Queue an event for processing on the next [`Association::poll`].
    pub fn post(&mut self, event: Event) {
        self.queue.push_back(Queued::Event(event));
    }

    /// Process everything due at `now`.
    ///
    /// Expired timers are queued behind any posted events, the queue is then
    /// drained in order and finally every path that may send a search probe
    /// is offered the chance to.
    #[instrument(skip(self), level = "trace")]
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        for (addr, kind) in self.timers.pop_expired(now) {
            self.queue.push_back(Queued::Timer(addr, kind));
        }
        while let Some(queued) = self.queue.pop_front() {
            match queued {
                Queued::Event(Event::ProbeOutcome { handle, outcome }) => {
                    self.on_probe_outcome(handle, outcome, now);
                }
                Queued::Event(Event::LossAttribution {
                    handle,
                    attribution,
                }) => self.on_loss_attribution(handle, attribution, now),
                Queued::Timer(addr, kind) => self.on_timer(addr, kind, now),
            }
        }
        if self.is_up {
            let (paths, mut ctx) = self.split();
            for path in paths.values_mut() {
                search::maybe_send_probe(&mut ctx, path, now)?;
            }
        }
        Ok(())
    }

    fn split(&mut self) -> (&mut IndexMap<SocketAddr, Path>, Context<'_, T, C, F>) {
        (
            &mut self.paths,
            Context {
                config: &self.config,
                transport: &mut self.transport,
                congestion: &mut self.congestion,
                timers: &mut self.timers,
                inflight: &mut self.inflight,
                cache: self.cache.as_deref(),
                publish: &mut self.publish,
            },
        )
    }

    fn next_completion(&mut self) -> u64 {
        let order = self.completions;
        self.completions += 1;
        order
    }

    /// Bring a path up, either by starting its burst or, for a local path,
    /// by completing at once.
    fn begin(&mut self, addr: SocketAddr, now: Instant) -> Result<()> {
        let status = {
            let (paths, mut ctx) = self.split();
            let Some(path) = paths.get_mut(&addr) else {
                return Ok(());
            };
            if path.phase == PathPhase::Local {
                None
            } else {
                Some(quick::start(&mut ctx, path, now)?)
            }
        };
        match status {
            None => {
                let order = self.next_completion();
                if let Some(path) = self.paths.get_mut(&addr) {
                    path.completion_order = Some(order);
                }
            }
            Some(BurstStatus::Complete) => self.finish_burst(addr, now),
            Some(BurstStatus::Running) => {}
        }
        Ok(())
    }

    fn finish_burst(&mut self, addr: SocketAddr, now: Instant) {
        let order = self.next_completion();
        let congested = {
            let (paths, mut ctx) = self.split();
            let Some(path) = paths.get_mut(&addr) else {
                return;
            };
            path.completion_order = Some(order);
            quick::complete(&mut ctx, path, now);
            path.congested_during_fast_probe()
        };
        if self.is_quick_probe {
            self.maybe_finish_quick_probe();
        } else if congested {
            self.congestion.backoff(addr);
        }
    }

    /// End the quick-probe phase once every path completed its burst.
    fn maybe_finish_quick_probe(&mut self) {
        if !self.is_quick_probe
            || self.paths.is_empty()
            || !self.paths.values().all(Path::is_burst_complete)
        {
            return;
        }
        for path in self
            .paths
            .values()
            .filter(|path| path.congested_during_fast_probe())
        {
            self.congestion.backoff(path.addr);
        }
        self.primary = selector::select(self.paths.values());
        self.is_quick_probe = false;
        self.is_up = true;
        if let Some(primary) = self.primary {
            tracing::info!(id = %self.id, %primary, "connection up");
            (self.publish)(&Notification::ConnectionUp { primary });
        }
    }

    fn on_probe_outcome(&mut self, handle: ProbeHandle, outcome: ProbeOutcome, now: Instant) {
        let Some(probe) = self.inflight.get(&handle).copied() else {
            tracing::debug!(%handle, "outcome for unknown or resolved probe");
            return;
        };
        match (probe.kind, outcome) {
            (ProbeKind::Quick(index), outcome) => {
                self.inflight.shift_remove(&handle);
                let status = {
                    let (paths, mut ctx) = self.split();
                    let Some(path) = paths
                        .get_mut(&probe.addr)
                        .filter(|path| path.phase == PathPhase::QuickProbe)
                    else {
                        return;
                    };
                    match outcome {
                        ProbeOutcome::Acked {
                            confirmed_size,
                            received,
                        } => quick::on_ack(
                            &mut ctx,
                            path,
                            &probe,
                            index,
                            confirmed_size,
                            received,
                            now,
                        ),
                        ProbeOutcome::Timeout => quick::on_lost(path),
                    }
                };
                if status == BurstStatus::Complete {
                    self.finish_burst(probe.addr, now);
                }
            }
            (
                ProbeKind::Search,
                ProbeOutcome::Acked {
                    confirmed_size,
                    received,
                },
            ) => {
                self.inflight.shift_remove(&handle);
                let result = if confirmed_size > probe.size {
                    tracing::debug!(%handle, %confirmed_size, size = %probe.size, "malformed acknowledgment");
                    SearchResult::Inconclusive
                } else {
                    let size = if confirmed_size.0 == 0 {
                        probe.size
                    } else {
                        confirmed_size
                    };
                    SearchResult::Acked {
                        size,
                        rtt: received.saturating_duration_since(probe.sent),
                    }
                };
                self.resolve_search(&probe, result, now);
            }
            (ProbeKind::Search, ProbeOutcome::Timeout) => {
                if let Some(probe) = self.inflight.get_mut(&handle) {
                    probe.lost = true;
                }
                self.maybe_resolve_loss(handle, now);
            }
        }
    }

    fn on_loss_attribution(
        &mut self,
        handle: ProbeHandle,
        attribution: LossAttribution,
        now: Instant,
    ) {
        let Some(probe) = self.inflight.get_mut(&handle) else {
            tracing::debug!(%handle, "loss attribution for unknown or resolved probe");
            return;
        };
        if probe.is_quick() {
            tracing::debug!(%handle, "loss attribution ignored for quick probe");
            return;
        }
        if probe.attribution.is_some() {
            tracing::debug!(%handle, "duplicate loss attribution");
            return;
        }
        probe.attribution = Some(attribution);
        self.maybe_resolve_loss(handle, now);
    }

    /// Resolve a search probe once it is both lost and attributed.
    fn maybe_resolve_loss(&mut self, handle: ProbeHandle, now: Instant) {
        let Some(probe) = self.inflight.get(&handle).copied() else {
            return;
        };
        if let (true, Some(attribution)) = (probe.lost, probe.attribution) {
            self.inflight.shift_remove(&handle);
            self.resolve_search(&probe, SearchResult::Lost(attribution), now);
        }
    }

    fn resolve_search(&mut self, probe: &Probe, result: SearchResult, now: Instant) {
        let (paths, mut ctx) = self.split();
        let Some(path) = paths.get_mut(&probe.addr) else {
            return;
        };
        if path.outstanding_probe.map(|p| p.handle) != Some(probe.handle) {
            tracing::debug!(handle = %probe.handle, "search probe superseded");
            return;
        }
        search::on_probe_result(&mut ctx, path, probe.size, result, now);
    }

    fn on_timer(&mut self, addr: SocketAddr, kind: TimerKind, now: Instant) {
        if self.timers.is_armed(addr, kind) {
            tracing::debug!(%addr, %kind, "timer rearmed before it was handled");
            return;
        }
        let Some(phase) = self.paths.get(&addr).map(Path::phase) else {
            tracing::debug!(%addr, %kind, "timer for removed path");
            return;
        };
        match (kind, phase) {
            (TimerKind::QuickProbe, PathPhase::QuickProbe) => {
                tracing::debug!(%addr, "quick probe timer expired");
                self.finish_burst(addr, now);
            }
            (TimerKind::ProbeTimeout, _) => {
                let (paths, mut ctx) = self.split();
                let Some(path) = paths.get_mut(&addr) else {
                    return;
                };
                if let Some(outstanding) = path.outstanding_probe {
                    tracing::debug!(%addr, handle = %outstanding.handle, "search probe unresolved, discarding");
                    ctx.inflight.shift_remove(&outstanding.handle);
                    path.rtt.backoff();
                    search::on_probe_result(
                        &mut ctx,
                        path,
                        outstanding.size,
                        SearchResult::Inconclusive,
                        now,
                    );
                }
            }
            (TimerKind::RetryBackoff, _) => {
                tracing::trace!(%addr, "retry backoff elapsed");
            }
            (TimerKind::Convergence, PathPhase::Converged) => {
                let (paths, mut ctx) = self.split();
                if let Some(path) = paths.get_mut(&addr) {
                    search::on_convergence_timer_fired(&mut ctx, path, now);
                }
            }
            (kind, phase) => {
                tracing::debug!(%addr, %kind, %phase, "stale timer");
            }
        }
    }
}
