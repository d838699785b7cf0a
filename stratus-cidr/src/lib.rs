//! # Stratus CIDR
//!
//! Pure IPv4 CIDR arithmetic for the VPC control plane: canonical parsing,
//! containment and overlap checks, gateway and host-offset computation, and
//! the fixed auto-mode region fan-out table.
//!
//! Nothing in this crate touches the database or the container runtime;
//! every function is deterministic over its inputs.

pub mod fanout;

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use stratus_core::{Result, StratusError};

pub use fanout::{AUTO_MODE_FANOUT, region_cidr, regions};

/// Parse a canonical IPv4 CIDR like `10.0.1.0/24`.
///
/// Inputs with host bits set (`10.0.1.5/24`) are rejected: control-plane
/// ranges are always network addresses.
pub fn parse(raw: &str) -> Result<Ipv4Net> {
    let net: Ipv4Net = raw
        .trim()
        .parse()
        .map_err(|_| StratusError::invalid_argument(format!("invalid CIDR '{raw}'")))?;
    if net.addr() != net.network() {
        return Err(StratusError::invalid_argument(format!(
            "CIDR '{raw}' has host bits set; expected '{}/{}'",
            net.network(),
            net.prefix_len()
        )));
    }
    Ok(net)
}

/// Whether `inner` lies entirely within `outer`.
pub fn contains(outer: Ipv4Net, inner: Ipv4Net) -> bool {
    outer.prefix_len() <= inner.prefix_len()
        && range(outer).0 <= range(inner).0
        && range(inner).1 <= range(outer).1
}

/// Whether the address ranges of `a` and `b` intersect at all.
pub fn overlaps(a: Ipv4Net, b: Ipv4Net) -> bool {
    let (a_lo, a_hi) = range(a);
    let (b_lo, b_hi) = range(b);
    a_lo <= b_hi && b_lo <= a_hi
}

/// The gateway address of a range: the first usable host (`network + 1`).
pub fn gateway_of(cidr: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(cidr.network()) + 1)
}

/// The host address at `offset` from the network address.
///
/// Offsets 0 (network), 1 (gateway) and the broadcast address are not
/// assignable; anything past the broadcast is out of range.
pub fn host_at(cidr: Ipv4Net, offset: u32) -> Result<Ipv4Addr> {
    let (lo, hi) = range(cidr);
    if offset < 2 {
        return Err(StratusError::invalid_argument(format!(
            "offset {offset} collides with the network or gateway address of {cidr}"
        )));
    }
    let candidate = lo
        .checked_add(offset)
        .ok_or_else(|| StratusError::out_of_range(format!("offset {offset} overflows {cidr}")))?;
    if candidate >= hi {
        return Err(StratusError::out_of_range(format!(
            "offset {offset} is past the last usable address of {cidr}"
        ))
        .with_reason("subnetExhausted"));
    }
    Ok(Ipv4Addr::from(candidate))
}

/// Usable host addresses in a range: total minus network and broadcast.
/// Reporting layers subtract a further 2 (gateway + reserved) for provider
/// parity; that adjustment is theirs, not ours.
pub fn usable_count(cidr: Ipv4Net) -> u64 {
    let total = 1u64 << (32 - cidr.prefix_len() as u64);
    total.saturating_sub(2)
}

/// The region a zone belongs to: `us-central1-a` → `us-central1`.
pub fn zone_region(zone: &str) -> Result<&str> {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if !region.is_empty() && suffix.len() == 1 => Ok(region),
        _ => Err(StratusError::invalid_argument(format!("invalid zone '{zone}'"))),
    }
}

/// Deterministically derive the host-side /24 for a VPC from its identity.
///
/// Several emulated VPCs share one Docker daemon, so each needs a distinct
/// host CIDR. The project/name pair hashes into a /24 slot inside the
/// reserved host supernet; `attempt` linearly probes subsequent slots when
/// the daemon reports a conflict.
pub fn derive_host_cidr(
    project: &str,
    name: &str,
    supernet: Ipv4Net,
    attempt: u32,
) -> Result<Ipv4Net> {
    if supernet.prefix_len() > 24 {
        return Err(StratusError::invalid_argument(format!(
            "host supernet {supernet} is smaller than a /24"
        )));
    }
    let slots = 1u64 << (24 - supernet.prefix_len() as u64);
    if u64::from(attempt) >= slots {
        return Err(StratusError::out_of_range(format!(
            "host supernet {supernet} has no free /24 slot left"
        )));
    }
    let slot = (fnv1a(&format!("{project}/{name}")) + u64::from(attempt)) % slots;
    let base = u32::from(supernet.network()) + (slot as u32) * 256;
    Ipv4Net::new(Ipv4Addr::from(base), 24)
        .map_err(|_| StratusError::internal("derived host CIDR out of bounds"))
}

fn range(cidr: Ipv4Net) -> (u32, u32) {
    (u32::from(cidr.network()), u32::from(cidr.broadcast()))
}

fn fnv1a(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(raw: &str) -> Ipv4Net {
        parse(raw).unwrap()
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("10.0.0.0/24").is_ok());
        assert!(parse(" 10.0.0.0/24 ").is_ok());
        assert!(parse("10.0.0.0").is_err());
        assert!(parse("10.0.0.0/33").is_err());
        assert!(parse("300.0.0.0/8").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn parse_rejects_host_bits() {
        let err = parse("10.0.1.5/24").unwrap_err();
        assert!(err.to_string().contains("host bits"));
    }

    #[test]
    fn containment_is_strict_subset_or_equal() {
        assert!(contains(net("10.0.0.0/16"), net("10.0.1.0/24")));
        assert!(contains(net("10.0.0.0/16"), net("10.0.0.0/16")));
        assert!(!contains(net("10.0.1.0/24"), net("10.0.0.0/16")));
        assert!(!contains(net("10.0.0.0/16"), net("10.1.0.0/24")));
    }

    #[test]
    fn overlap_detects_subset_superset_and_disjoint() {
        assert!(overlaps(net("10.0.1.0/24"), net("10.0.1.128/25")));
        assert!(overlaps(net("10.0.1.128/25"), net("10.0.1.0/24")));
        assert!(overlaps(net("10.0.1.0/24"), net("10.0.1.0/24")));
        assert!(!overlaps(net("10.0.1.0/24"), net("10.0.2.0/24")));
    }

    #[test]
    fn gateway_is_network_plus_one() {
        assert_eq!(gateway_of(net("10.128.0.0/20")), Ipv4Addr::new(10, 128, 0, 1));
        assert_eq!(gateway_of(net("192.168.5.0/24")), Ipv4Addr::new(192, 168, 5, 1));
    }

    #[test]
    fn host_at_walks_from_first_assignable() {
        let subnet = net("10.128.0.0/20");
        assert_eq!(host_at(subnet, 2).unwrap(), Ipv4Addr::new(10, 128, 0, 2));
        assert_eq!(host_at(subnet, 3).unwrap(), Ipv4Addr::new(10, 128, 0, 3));
        assert_eq!(host_at(subnet, 300).unwrap(), Ipv4Addr::new(10, 128, 1, 44));
    }

    #[test]
    fn host_at_rejects_reserved_and_exhausted() {
        let subnet = net("10.0.0.0/29"); // 8 addresses, usable offsets 2..=6
        assert!(host_at(subnet, 0).is_err());
        assert!(host_at(subnet, 1).is_err());
        assert!(host_at(subnet, 6).is_ok());
        let err = host_at(subnet, 7).unwrap_err();
        assert_eq!(err.reason(), "subnetExhausted");
    }

    #[test]
    fn usable_count_excludes_network_and_broadcast() {
        assert_eq!(usable_count(net("10.0.0.0/24")), 254);
        assert_eq!(usable_count(net("10.128.0.0/20")), 4094);
        assert_eq!(usable_count(net("10.0.0.0/31")), 0);
    }

    #[test]
    fn zone_region_strips_the_zone_letter() {
        assert_eq!(zone_region("us-central1-a").unwrap(), "us-central1");
        assert_eq!(zone_region("europe-west4-c").unwrap(), "europe-west4");
        assert!(zone_region("us-central1").is_err());
        assert!(zone_region("").is_err());
    }

    #[test]
    fn host_cidr_is_deterministic_and_probes() {
        let supernet = net("172.24.0.0/13");
        let first = derive_host_cidr("proj", "vpc-a", supernet, 0).unwrap();
        assert_eq!(first, derive_host_cidr("proj", "vpc-a", supernet, 0).unwrap());
        assert_eq!(first.prefix_len(), 24);
        assert!(contains(supernet, first));

        let probed = derive_host_cidr("proj", "vpc-a", supernet, 1).unwrap();
        assert_ne!(first, probed);
        assert!(contains(supernet, probed));
    }

    #[test]
    fn host_cidr_differs_per_vpc_identity() {
        let supernet = net("172.24.0.0/13");
        let a = derive_host_cidr("proj", "vpc-a", supernet, 0).unwrap();
        let b = derive_host_cidr("proj", "vpc-b", supernet, 0).unwrap();
        assert_ne!(a, b);
    }
}
