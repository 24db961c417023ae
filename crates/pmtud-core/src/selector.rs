use crate::path::Path;
use std::cmp::Reverse;
use std::net::SocketAddr;

/// Choose the primary path.
///
/// The path with the highest `eff_pmtu` among paths which confirmed a
/// deliverable size wins, ties going to the path which completed its
/// quick-probe burst first. If no path is confirmed every path is considered.
pub fn select<'a>(paths: impl IntoIterator<Item = &'a Path> + Clone) -> Option<SocketAddr> {
    let best = |paths: &mut dyn Iterator<Item = &'a Path>| {
        paths
            .max_by_key(|path| {
                (
                    path.eff_pmtu(),
                    Reverse(path.completion_order.unwrap_or(u64::MAX)),
                )
            })
            .map(Path::addr)
    };
    best(&mut paths.clone().into_iter().filter(|path| path.is_confirmed()))
        .or_else(|| best(&mut paths.into_iter()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::types::PacketSize;
    use std::net::{IpAddr, Ipv4Addr};

    fn path(last_octet: u8, eff: u16, counter: usize, order: u64) -> Path {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)), 2905);
        let mut path = Path::new(addr, &ProbeConfig::default(), None);
        path.eff_pmtu = PacketSize(eff);
        path.quick_probe_counter = counter;
        path.completion_order = Some(order);
        path
    }

    #[test]
    fn test_highest_eff_pmtu_wins() {
        let paths = [path(1, 1400, 2, 0), path(2, 1500, 3, 1)];
        assert_eq!(select(&paths), Some(paths[1].addr()));
    }

    #[test]
    fn test_tie_goes_to_earliest_completion() {
        let paths = [path(1, 1500, 2, 4), path(2, 1500, 3, 1), path(3, 1500, 1, 2)];
        assert_eq!(select(&paths), Some(paths[1].addr()));
    }

    #[test]
    fn test_unconfirmed_paths_ignored() {
        let paths = [path(1, 9000, 0, 0), path(2, 1280, 1, 1)];
        assert_eq!(select(&paths), Some(paths[1].addr()));
    }

    #[test]
    fn test_falls_back_to_unconfirmed() {
        let paths = [path(1, 68, 0, 1), path(2, 68, 0, 0)];
        assert_eq!(select(&paths), Some(paths[1].addr()));
    }

    #[test]
    fn test_no_paths() {
        let paths: [Path; 0] = [];
        assert_eq!(select(&paths), None);
    }
}
