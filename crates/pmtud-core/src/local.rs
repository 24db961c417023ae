use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Is `addr` a loopback, link-local or private address, or within one of
/// the `extra` networks?
#[must_use]
pub fn is_local(addr: IpAddr, extra: &[IpNetwork]) -> bool {
    let builtin = match addr {
        IpAddr::V4(addr) => is_local_v4(addr),
        IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
            Some(mapped) => is_local_v4(mapped),
            None => is_local_v6(addr),
        },
    };
    builtin || extra.iter().any(|network| network.contains(addr))
}

fn is_local_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_link_local() || addr.is_private()
}

fn is_local_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    // fe80::/10 link-local and fc00::/7 unique local
    addr.is_loopback() || first & 0xffc0 == 0xfe80 || first & 0xfe00 == 0xfc00
}
