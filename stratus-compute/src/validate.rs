//! RFC 1035 resource-name validation shared by networks, subnets,
//! firewalls, routes and instances.

use std::sync::LazyLock;

use regex::Regex;
use stratus_core::{Result, StratusError};

static RESOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap());

/// Lowercase letter first, then up to 62 more of `[-a-z0-9]`, not ending
/// with a hyphen.
pub(crate) fn resource_name(kind: &str, name: &str) -> Result<()> {
    if RESOURCE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StratusError::invalid_argument(format!(
            "{kind} name '{name}' must match [a-z]([-a-z0-9]*[a-z0-9])? and be at most 63 characters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rfc1035_names() {
        assert!(resource_name("network", "default").is_ok());
        assert!(resource_name("network", "auto-vpc").is_ok());
        assert!(resource_name("instance", "vm1").is_ok());
        assert!(resource_name("instance", "a").is_ok());
    }

    #[test]
    fn rejects_everything_else() {
        assert!(resource_name("network", "").is_err());
        assert!(resource_name("network", "Upper").is_err());
        assert!(resource_name("network", "9leading").is_err());
        assert!(resource_name("network", "trailing-").is_err());
        assert!(resource_name("network", &"a".repeat(64)).is_err());
        assert!(resource_name("network", "under_score").is_err());
    }
}
