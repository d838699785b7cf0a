//! The auto-mode region fan-out table.
//!
//! An auto-mode VPC receives exactly one /20 per supported region, carved
//! from the fixed auto-mode supernet. The table mirrors the provider's
//! published assignments and is the single source of truth for both subnet
//! creation and zone listings.

use ipnet::Ipv4Net;

/// `(region, cidr)` pairs, one /20 per region inside `10.128.0.0/9`.
pub const AUTO_MODE_FANOUT: [(&str, &str); 16] = [
    ("us-central1", "10.128.0.0/20"),
    ("europe-west1", "10.132.0.0/20"),
    ("us-west1", "10.138.0.0/20"),
    ("asia-east1", "10.140.0.0/20"),
    ("us-east1", "10.142.0.0/20"),
    ("asia-northeast1", "10.146.0.0/20"),
    ("asia-southeast1", "10.148.0.0/20"),
    ("us-east4", "10.150.0.0/20"),
    ("europe-west2", "10.154.0.0/20"),
    ("europe-west3", "10.156.0.0/20"),
    ("asia-south1", "10.160.0.0/20"),
    ("europe-west4", "10.164.0.0/20"),
    ("europe-north1", "10.166.0.0/20"),
    ("us-west2", "10.168.0.0/20"),
    ("us-west3", "10.180.0.0/20"),
    ("us-west4", "10.182.0.0/20"),
];

/// The fan-out CIDR for a region, if the region is supported.
pub fn region_cidr(region: &str) -> Option<Ipv4Net> {
    AUTO_MODE_FANOUT
        .iter()
        .find(|(name, _)| *name == region)
        .and_then(|(_, cidr)| cidr.parse().ok())
}

/// All supported region names, in table order.
pub fn regions() -> impl Iterator<Item = &'static str> {
    AUTO_MODE_FANOUT.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contains, overlaps, parse};

    #[test]
    fn every_entry_is_a_canonical_slash_20() {
        for (region, cidr) in AUTO_MODE_FANOUT {
            let net = parse(cidr).unwrap_or_else(|_| panic!("bad entry for {region}"));
            assert_eq!(net.prefix_len(), 20, "{region}");
        }
    }

    #[test]
    fn entries_fit_the_auto_mode_supernet_without_overlap() {
        let supernet = parse("10.128.0.0/9").unwrap();
        let nets: Vec<_> =
            AUTO_MODE_FANOUT.iter().map(|(_, cidr)| parse(cidr).unwrap()).collect();
        for net in &nets {
            assert!(contains(supernet, *net));
        }
        for (i, a) in nets.iter().enumerate() {
            for b in nets.iter().skip(i + 1) {
                assert!(!overlaps(*a, *b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn lookup_by_region() {
        assert_eq!(region_cidr("us-central1").unwrap(), parse("10.128.0.0/20").unwrap());
        assert!(region_cidr("mars-north1").is_none());
        assert_eq!(regions().count(), 16);
    }
}
