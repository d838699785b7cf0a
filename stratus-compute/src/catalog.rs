//! Fixed catalogs: machine types, image mapping, zones.

/// A supported machine type and its resource envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineType {
    pub name: &'static str,
    pub cpus: i64,
    pub memory_mb: i64,
    pub description: &'static str,
}

/// The machine-type table. Resolution takes the last path segment of the
/// request's `machineType`, so both bare names and full links work.
pub const MACHINE_TYPES: &[MachineType] = &[
    MachineType { name: "e2-micro", cpus: 1, memory_mb: 1024, description: "Efficient Instance, 1 vCPU, 1 GB RAM" },
    MachineType { name: "e2-small", cpus: 2, memory_mb: 2048, description: "Efficient Instance, 2 vCPUs, 2 GB RAM" },
    MachineType { name: "e2-medium", cpus: 2, memory_mb: 4096, description: "Efficient Instance, 2 vCPUs, 4 GB RAM" },
    MachineType { name: "e2-standard-2", cpus: 2, memory_mb: 8192, description: "Efficient Instance, 2 vCPUs, 8 GB RAM" },
    MachineType { name: "e2-standard-4", cpus: 4, memory_mb: 16384, description: "Efficient Instance, 4 vCPUs, 16 GB RAM" },
    MachineType { name: "n1-standard-1", cpus: 1, memory_mb: 3840, description: "1 vCPU, 3.75 GB RAM" },
    MachineType { name: "n1-standard-2", cpus: 2, memory_mb: 7680, description: "2 vCPUs, 7.5 GB RAM" },
    MachineType { name: "f1-micro", cpus: 1, memory_mb: 614, description: "1 vCPU (shared), 0.6 GB RAM" },
    MachineType { name: "g1-small", cpus: 1, memory_mb: 1740, description: "1 vCPU (shared), 1.7 GB RAM" },
];

/// Resolve a `machineType` value (bare name or full link).
pub fn machine_type(raw: &str) -> Option<&'static MachineType> {
    let name = raw.rsplit('/').next().unwrap_or(raw);
    MACHINE_TYPES.iter().find(|mt| mt.name == name)
}

/// Map a source image reference to the container image that stands in for
/// it. Families resolve by substring so both family links and concrete
/// image links work.
pub fn image_for_source(source_image: &str) -> &'static str {
    let lowered = source_image.to_ascii_lowercase();
    if lowered.contains("debian") {
        "debian:12-slim"
    } else if lowered.contains("ubuntu") {
        "ubuntu:22.04"
    } else {
        "alpine:3.19"
    }
}

/// Every zone the emulator serves: each fan-out region with suffixes
/// a, b, c.
pub fn zones() -> Vec<String> {
    stratus_cidr::regions()
        .flat_map(|region| ["a", "b", "c"].map(|suffix| format!("{region}-{suffix}")))
        .collect()
}

/// Whether a zone is one the emulator serves.
pub fn zone_exists(zone: &str) -> bool {
    let Ok(region) = stratus_cidr::zone_region(zone) else {
        return false;
    };
    stratus_cidr::region_cidr(region).is_some()
        && zone.ends_with(['a', 'b', 'c'])
}
