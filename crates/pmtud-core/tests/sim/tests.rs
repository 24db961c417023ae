use crate::sim::network::Network;
use crate::sim::simulation::Simulation;
use pmtud_core::{
    Association, Builder, CongestionWindows, LocalNetworkShortcut, Notification, PacketSize,
    PathPhase,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use test_case::test_case;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;

/// The maximum number of steps of the virtual clock.
const MAX_STEPS: usize = 1_000_000;

static LOGGING: OnceLock<()> = OnceLock::new();

fn logging() {
    LOGGING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::NONE)
            .with_env_filter("sim=info,pmtud_core=info")
            .with_test_writer()
            .init();
    });
}

macro_rules! sim {
    ($path:expr) => {{
        let data = include_str!(concat!("../resources/simulation/", $path));
        toml::from_str(data)?
    }};
}

#[test_case(sim!("single_path_ethernet.toml"))]
#[test_case(sim!("single_path_pppoe.toml"))]
#[test_case(sim!("multi_path_jumbo.toml"))]
#[test_case(sim!("total_loss_path.toml"))]
#[test_case(sim!("lossy_path.toml"))]
#[test_case(sim!("pmtu_increase.toml"))]
#[test_case(sim!("local_shortcut.toml"))]
#[test_case(sim!("interface_mtu.toml"))]
#[test_case(sim!("ambiguous_losses.toml"))]
#[test_case(sim!("slow_path.toml"))]
fn test_simulation(simulation: Simulation) -> anyhow::Result<()> {
    logging();
    info!("start simulating {}", simulation.name);
    run_simulation(&simulation)?;
    info!("end simulating {}", simulation.name);
    Ok(())
}

fn builder(sim: &Simulation) -> Builder {
    let config = &sim.config;
    let mut builder = Builder::new()
        .local_network_shortcut(if config.local_network_shortcut {
            LocalNetworkShortcut::Enabled
        } else {
            LocalNetworkShortcut::Disabled
        })
        .interface_mtu(config.interface_mtu);
    if let Some(size) = config.initial_search_low {
        builder = builder.initial_search_low(size);
    }
    if let Some(size) = config.initial_search_high {
        builder = builder.initial_search_high(size);
    }
    if let Some(size) = config.initial_eff_pmtu {
        builder = builder.initial_eff_pmtu(size);
    }
    if let Some(step) = config.min_search_step {
        builder = builder.min_search_step(step);
    }
    if let Some(secs) = config.convergence_timer_s {
        builder = builder.convergence_timer(Duration::from_secs(secs));
    }
    if let Some(sizes) = &config.jump_probe_sizes {
        builder = builder.jump_probe_sizes(sizes);
    }
    builder
}

fn run_simulation(sim: &Simulation) -> anyhow::Result<()> {
    let start = Instant::now();
    let end = start + Duration::from_secs(sim.duration_s);
    let notifications = Rc::new(RefCell::new(vec![]));
    let sink = notifications.clone();
    let mut association = builder(sim).build(
        Network::new(sim, start),
        CongestionWindows::new(10),
        move |n: &Notification| sink.borrow_mut().push(*n),
    )?;
    for path in &sim.paths {
        association.add_path(path.addr, start)?;
    }
    association.connection_up(start)?;
    association.poll(start)?;
    let mut previous: HashMap<SocketAddr, (PacketSize, PacketSize, PathPhase)> = HashMap::new();
    let mut now = start;
    for _ in 0..MAX_STEPS {
        let next = [
            association.next_deadline(),
            association.transport().next_delivery(),
        ]
        .into_iter()
        .flatten()
        .min();
        let Some(next) = next.filter(|next| *next <= end) else {
            return check_expectations(sim, &association, &notifications.borrow());
        };
        now = now.max(next);
        association.transport_mut().set_now(now);
        for event in association.transport_mut().take_due(now) {
            association.post(event);
        }
        association.poll(now)?;
        for path in association.paths() {
            anyhow::ensure!(
                path.bounds_hold(),
                "{}: bounds violated on {}: {} <= {} < {}",
                sim.name,
                path.addr(),
                path.search_low(),
                path.eff_pmtu(),
                path.search_high()
            );
            if let Some(&(low, high, phase)) = previous.get(&path.addr()) {
                check_monotonic(sim, path, low, high, phase)?;
            }
            previous.insert(
                path.addr(),
                (path.search_low(), path.search_high(), path.phase()),
            );
        }
    }
    anyhow::bail!("{}: did not finish within {MAX_STEPS} steps", sim.name)
}

/// Once searching, `search_low` never falls and `search_high` only rises
/// when the convergence timer reopens the range.
fn check_monotonic(
    sim: &Simulation,
    path: &pmtud_core::Path,
    low: PacketSize,
    high: PacketSize,
    phase: PathPhase,
) -> anyhow::Result<()> {
    if !matches!(phase, PathPhase::Search | PathPhase::Converged) {
        return Ok(());
    }
    anyhow::ensure!(
        path.search_low() >= low,
        "{}: search_low of {} fell from {low} to {}",
        sim.name,
        path.addr(),
        path.search_low()
    );
    anyhow::ensure!(
        phase == PathPhase::Converged || path.search_high() <= high,
        "{}: search_high of {} rose from {high} to {} in phase {phase}",
        sim.name,
        path.addr(),
        path.search_high()
    );
    Ok(())
}

fn check_expectations<F>(
    sim: &Simulation,
    association: &Association<Network, CongestionWindows, F>,
    notifications: &[Notification],
) -> anyhow::Result<()>
where
    F: FnMut(&Notification),
{
    let expect = &sim.expect;
    let connection_up = notifications
        .iter()
        .any(|n| matches!(n, Notification::ConnectionUp { .. }));
    anyhow::ensure!(
        connection_up == expect.connection_up,
        "{}: expected connection_up {} but was {connection_up}",
        sim.name,
        expect.connection_up
    );
    if let Some(primary) = expect.primary {
        anyhow::ensure!(
            association.primary() == Some(primary),
            "{}: expected primary {primary} but was {:?}",
            sim.name,
            association.primary()
        );
    }
    let snapshot = association.snapshot();
    for expected in &expect.paths {
        let Some(path) = snapshot.path(expected.addr) else {
            anyhow::bail!("{}: no path {}", sim.name, expected.addr);
        };
        let eff_pmtu = path.eff_pmtu.0;
        anyhow::ensure!(
            (expected.eff_pmtu_min..=expected.eff_pmtu_max).contains(&eff_pmtu),
            "{}: expected eff_pmtu of {} in {}..={} but was {eff_pmtu}",
            sim.name,
            expected.addr,
            expected.eff_pmtu_min,
            expected.eff_pmtu_max
        );
        let converged = notifications.iter().any(
            |n| matches!(n, Notification::PathConverged { addr, .. } if *addr == expected.addr),
        );
        anyhow::ensure!(
            converged == expected.converged,
            "{}: expected converged {} for {} but was {converged}",
            sim.name,
            expected.converged,
            expected.addr
        );
        if let Some(congested) = expected.congested {
            anyhow::ensure!(
                path.congested_during_fast_probe() == congested,
                "{}: expected congested {congested} for {}",
                sim.name,
                expected.addr
            );
        }
        if let Some(phase) = &expected.phase {
            anyhow::ensure!(
                path.phase.to_string() == *phase,
                "{}: expected phase {phase} for {} but was {}",
                sim.name,
                expected.addr,
                path.phase
            );
        }
        if let Some(probes) = expected.probes {
            let sent = association.transport().sent(expected.addr);
            anyhow::ensure!(
                sent == probes,
                "{}: expected {probes} probes to {} but sent {sent}",
                sim.name,
                expected.addr
            );
        }
    }
    Ok(())
}
