//! Quark flavours, interpolator structures, and source/sink kinds.
//!
//! Source and sink kinds are closed enums resolved once when the job context
//! is built; everything downstream matches on them directly.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A quark flavour as it appears in a structure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavour {
    U,
    D,
    S,
    /// Neutral light quark
    N,
    /// Neutral heavy quark
    Nh,
}

impl Flavour {
    /// Background-field charge in units of the down-quark charge.
    pub fn charge(self) -> i32 {
        match self {
            Flavour::U => 2,
            Flavour::D | Flavour::S => -1,
            Flavour::N | Flavour::Nh => 0,
        }
    }

    /// Heavy flavours are solved at the strange kappa.
    pub fn is_heavy(self) -> bool {
        matches!(self, Flavour::S | Flavour::Nh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flavour::U => "u",
            Flavour::D => "d",
            Flavour::S => "s",
            Flavour::N => "n",
            Flavour::Nh => "nh",
        }
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered flavour content of an interpolator, e.g. `[u, d, s]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Structure(Vec<Flavour>);

impl Structure {
    pub fn new(flavours: Vec<Flavour>) -> Result<Self> {
        if flavours.is_empty() {
            bail!("Quark structure must name at least one flavour");
        }
        Ok(Self(flavours))
    }

    pub fn flavours(&self) -> &[Flavour] {
        &self.0
    }

    /// Concatenated flavour labels, e.g. `uds`.
    pub fn label(&self) -> String {
        self.0.iter().map(|f| f.as_str()).collect()
    }
}

/// A (chi, chibar) interpolator pairing for one correlator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticlePair {
    pub chi: String,
    pub chibar: String,
}

/// Pairs of interpolators that mix under isospin and give identically zero
/// correlators when the background field is off.
const ISOSPIN_MIXING: &[&[&str]] = &[&["lambda0", "sigma0"]];

impl ParticlePair {
    pub fn new(chi: impl Into<String>, chibar: impl Into<String>) -> Self {
        Self {
            chi: chi.into(),
            chibar: chibar.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.chi, self.chibar)
    }

    /// Whether this pairing vanishes identically at field strength `kd`.
    pub fn is_vanishing(&self, kd: i32) -> bool {
        if kd != 0 {
            return false;
        }
        ISOSPIN_MIXING.iter().any(|set| {
            set.iter().any(|a| {
                set.iter()
                    .any(|b| a != b && self.chi.contains(a) && self.chibar.contains(b))
            })
        })
    }
}

/// Sink smearing applied when tying up correlators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Laplacian,
    Smeared,
}

impl SinkKind {
    /// Short tag used in file names.
    pub fn tag(self) -> &'static str {
        match self {
            SinkKind::Laplacian => "lp",
            SinkKind::Smeared => "sm",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Laplacian => write!(f, "laplacian"),
            SinkKind::Smeared => write!(f, "smeared"),
        }
    }
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "laplacian" | "lp" => Ok(SinkKind::Laplacian),
            "smeared" | "sm" => Ok(SinkKind::Smeared),
            _ => bail!(
                "Invalid sink type '{}'. Valid values: laplacian, smeared",
                s
            ),
        }
    }
}

/// One sink kind with every value it is tied up at.
///
/// Values are Laplacian mode counts or smearing sweep counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSpec {
    pub kind: SinkKind,
    pub values: Vec<u32>,
}

impl SinkSpec {
    /// File-name label for one sink value, e.g. `lp96` or `sm250`.
    pub fn label(&self, value: u32) -> String {
        format!("{}{}", self.kind.tag(), value)
    }
}

/// Source construction used by the propagator solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pt,
    #[default]
    Sm,
    Lp,
    Xyz,
    Lpsm,
    Lpxyz,
}

impl SourceKind {
    /// Source-type number understood by the propagator binary.
    pub fn solver_code(self) -> u32 {
        match self {
            SourceKind::Pt => 1,
            SourceKind::Sm => 3,
            SourceKind::Lp => 7,
            SourceKind::Xyz => 8,
            SourceKind::Lpsm => 9,
            SourceKind::Lpxyz => 10,
        }
    }

    /// Laplacian-projected sources are built from eigenmodes.
    pub fn needs_eigenmodes(self) -> bool {
        matches!(self, SourceKind::Lp | SourceKind::Lpsm | SourceKind::Lpxyz)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Pt => "pt",
            SourceKind::Sm => "sm",
            SourceKind::Lp => "lp",
            SourceKind::Xyz => "xyz",
            SourceKind::Lpsm => "lpsm",
            SourceKind::Lpxyz => "lpxyz",
        };
        f.write_str(s)
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pt" => Ok(SourceKind::Pt),
            "sm" => Ok(SourceKind::Sm),
            "lp" => Ok(SourceKind::Lp),
            "xyz" => Ok(SourceKind::Xyz),
            "lpsm" => Ok(SourceKind::Lpsm),
            "lpxyz" => Ok(SourceKind::Lpxyz),
            _ => bail!(
                "Invalid source type '{}'. Valid values: pt, sm, lp, xyz, lpsm, lpxyz",
                s
            ),
        }
    }
}
