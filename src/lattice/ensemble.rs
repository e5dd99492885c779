//! Ensemble bookkeeping: configuration ids and chained-submission stride.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one gauge configuration, e.g. `-a-001880`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fixed, ordered set of configurations processed one job at a time.
///
/// Configurations are addressed by a 1-based index. Chained jobs advance the
/// index by `stride`, which equals the number of chains running side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensemble {
    pub run_prefix: String,
    pub start: u32,
    pub size: u32,
    pub gap: u32,
    pub stride: u32,
}

impl Ensemble {
    /// Build an ensemble, filling in the trajectory gap for known run series.
    pub fn new(
        run_prefix: &str,
        start: u32,
        size: u32,
        gap: Option<u32>,
        stride: u32,
    ) -> Result<Self> {
        if run_prefix.is_empty() {
            bail!("Ensemble run_prefix must not be empty");
        }
        if size == 0 {
            bail!("Ensemble size must be at least 1");
        }
        if stride == 0 {
            bail!("Ensemble stride (simultaneous_jobs) must be at least 1");
        }
        let gap = match gap.or_else(|| default_gap(run_prefix)) {
            Some(0) => bail!("Ensemble gap must be at least 1"),
            Some(gap) => gap,
            None => bail!(
                "No default trajectory gap for run prefix '{}'; set ensemble.gap",
                run_prefix
            ),
        };
        if (size - 1)
            .checked_mul(gap)
            .and_then(|span| span.checked_add(start))
            .is_none()
        {
            bail!(
                "Ensemble of {} configurations from trajectory {} with gap {} overflows the trajectory range",
                size,
                start,
                gap
            );
        }
        Ok(Self {
            run_prefix: run_prefix.to_string(),
            start,
            size,
            gap,
            stride,
        })
    }

    /// Id of the `nth` configuration (1-based). Indices past the ensemble
    /// saturate at the largest trajectory.
    pub fn config_id(&self, nth: u32) -> ConfigId {
        let trajectory = nth
            .saturating_sub(1)
            .saturating_mul(self.gap)
            .saturating_add(self.start);
        ConfigId(format!("-{}-00{}", self.run_prefix, trajectory))
    }

    pub fn contains(&self, nth: u32) -> bool {
        (1..=self.size).contains(&nth)
    }
}

/// Trajectory spacing of the standard run series.
fn default_gap(run_prefix: &str) -> Option<u32> {
    match run_prefix {
        "a" | "b" => Some(10),
        p if p.len() == 2 && p.ends_with('M') => Some(20),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_id_first_and_later() {
        let ens = Ensemble::new("a", 1880, 400, None, 1).unwrap();
        assert_eq!(ens.config_id(1).as_str(), "-a-001880");
        assert_eq!(ens.config_id(3).as_str(), "-a-001900");
    }

    #[test]
    fn test_default_gaps() {
        assert_eq!(Ensemble::new("b", 1, 1, None, 1).unwrap().gap, 10);
        assert_eq!(Ensemble::new("gM", 1, 1, None, 1).unwrap().gap, 20);
        assert!(Ensemble::new("q", 1, 1, None, 1).is_err());
        assert_eq!(Ensemble::new("q", 1, 1, Some(4), 1).unwrap().gap, 4);
    }

    #[test]
    fn test_rejects_zero_stride_and_size() {
        assert!(Ensemble::new("a", 1, 400, None, 0).is_err());
        assert!(Ensemble::new("a", 1, 0, None, 1).is_err());
        assert!(Ensemble::new("a", 1, 4, Some(0), 1).is_err());
    }

    #[test]
    fn test_rejects_trajectory_overflow() {
        assert!(Ensemble::new("a", u32::MAX - 5, 2, Some(10), 1).is_err());
        assert!(Ensemble::new("a", 1, u32::MAX, Some(10), 1).is_err());
        let edge = Ensemble::new("a", u32::MAX - 10, 2, Some(10), 1).unwrap();
        assert_eq!(edge.config_id(2).as_str(), format!("-a-00{}", u32::MAX));
        // Indices past the ensemble do not panic
        assert_eq!(edge.config_id(u32::MAX).as_str(), format!("-a-00{}", u32::MAX));
    }

    #[test]
    fn test_contains() {
        let ens = Ensemble::new("a", 1880, 400, None, 1).unwrap();
        assert!(!ens.contains(0));
        assert!(ens.contains(1));
        assert!(ens.contains(400));
        assert!(!ens.contains(401));
    }
}
