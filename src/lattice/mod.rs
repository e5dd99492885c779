//! Lattice-domain value types shared by every layer of the orchestrator.
//!
//! - `shift` — per-direction lattice translations and the eigenmode
//!   retention predicate
//! - `ensemble` — configuration ids and the chained-submission stride
//! - `physics` — quark flavours, structures, particle pairs, sink and
//!   source kinds

pub mod ensemble;
pub mod physics;
pub mod shift;

pub use ensemble::{ConfigId, Ensemble};
pub use physics::{Flavour, ParticlePair, SinkKind, SinkSpec, SourceKind, Structure};
pub use shift::Shift;
