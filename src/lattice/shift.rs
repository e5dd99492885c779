//! Lattice shift specifiers.
//!
//! A shift is written as direction/offset pairs in `x`, `y`, `z`, `t` order,
//! e.g. `x08y16z24t32`. Directions that are left out take the `x` offset, or
//! zero when `x` is also absent, so `x16t08` means `16 16 16 8`.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::errors::ShiftError;

static SHIFT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([xyzt]\d+)+$").unwrap());
static COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([a-z])(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shift {
    label: String,
    x: u32,
    y: u32,
    z: u32,
    t: u32,
}

impl Shift {
    /// The shift exactly as written in the configuration.
    ///
    /// Used for `sh<label>` directory names and archive member names.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn components(&self) -> [u32; 4] {
        [self.x, self.y, self.z, self.t]
    }

    /// Space-separated `x y z t` as the solver binaries read it.
    pub fn solver_format(&self) -> String {
        format!("{} {} {} {}", self.x, self.y, self.z, self.t)
    }

    /// Label of the spatial part only. Eigenmode files are keyed by this.
    pub fn spatial_label(&self) -> String {
        format!("x{}y{}z{}", self.x, self.y, self.z)
    }

    /// Whether eigenmodes computed at this shift remain valid at `next`.
    ///
    /// Eigenmodes do not depend on the time offset, so only `x`, `y` and `z`
    /// are compared. There is nothing to carry over when there is no next
    /// shift.
    pub fn spatially_equivalent(&self, next: Option<&Shift>) -> bool {
        match next {
            Some(next) => self.x == next.x && self.y == next.y && self.z == next.z,
            None => false,
        }
    }
}

impl FromStr for Shift {
    type Err = ShiftError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(ShiftError::Empty(spec.to_string()));
        }

        let mut slots: [Option<u32>; 4] = [None; 4];
        for caps in COMPONENT_REGEX.captures_iter(trimmed) {
            let direction = caps[1].chars().next().unwrap_or('?');
            let slot = match direction {
                'x' => 0,
                'y' => 1,
                'z' => 2,
                't' => 3,
                other => {
                    return Err(ShiftError::UnknownDirection {
                        spec: spec.to_string(),
                        direction: other,
                    });
                }
            };
            let value = caps[2].parse::<u32>().map_err(|_| ShiftError::Malformed {
                spec: spec.to_string(),
                fragment: caps[0].to_string(),
            })?;
            if slots[slot].replace(value).is_some() {
                return Err(ShiftError::Malformed {
                    spec: spec.to_string(),
                    fragment: caps[0].to_string(),
                });
            }
        }

        if !SHIFT_REGEX.is_match(trimmed) {
            return Err(ShiftError::Malformed {
                spec: spec.to_string(),
                fragment: trimmed.to_string(),
            });
        }

        let x = slots[0].unwrap_or(0);
        Ok(Shift {
            label: trimmed.to_string(),
            x,
            y: slots[1].unwrap_or(x),
            z: slots[2].unwrap_or(x),
            t: slots[3].unwrap_or(x),
        })
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}
