use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A dotted numeric kernel version (`5.10.63`). Ordering is component-wise
/// numeric, so `5.10` sorts after `5.9` even though it compares lower as a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion(Vec<u32>);

impl FromStr for KernelVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty kernel version".into()));
        }
        let mut parts = Vec::new();
        for seg in s.split('.') {
            let n: u32 = seg.parse().map_err(|_| {
                Error::Config(format!("invalid kernel version '{s}' (component '{seg}')"))
            })?;
            parts.push(n);
        }
        Ok(KernelVersion(parts))
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::KernelVersion;

    fn v(s: &str) -> KernelVersion {
        s.parse().expect("test version must parse")
    }

    #[test]
    fn orders_numerically_not_lexicographically() {
        // String ordering gets this backwards; version ordering must not.
        assert!("5.10" < "5.9");
        assert!(v("5.10") > v("5.9"));
        assert!(v("5.10.63") > v("5.10.9"));
        assert!(v("4.19.118") < v("5.4.0"));
    }

    #[test]
    fn shorter_prefix_sorts_before_longer() {
        assert!(v("5.10") < v("5.10.0"));
    }

    #[test]
    fn equal_versions_compare_equal() {
        assert_eq!(v("5.10.63"), v("5.10.63"));
    }

    #[test]
    fn round_trips_through_display() {
        assert_eq!(v("5.10.63").to_string(), "5.10.63");
        assert_eq!(v("6.1").to_string(), "6.1");
    }

    #[test]
    fn rejects_junk() {
        assert!("".parse::<KernelVersion>().is_err());
        assert!("5.".parse::<KernelVersion>().is_err());
        assert!("5.x.1".parse::<KernelVersion>().is_err());
        assert!("v5.10".parse::<KernelVersion>().is_err());
    }
}
