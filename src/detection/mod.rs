//! # Host Detection
//!
//! Cascading-fallback detection of the target's operating system and country, and the
//! mirror policy that decides which package and registry sources to use.
//!
//! ```text
//! detect-os      os-release -> lsb_release -> redhat-release -> debian_version -> uname
//! detect-geo     geo endpoint 1 -> endpoint 2 -> ... (first usable answer wins)
//! select-mirror  CN / China -> China mirrors, anything else -> official
//! ```

pub mod geo;
pub mod mirror;
pub mod os;
pub mod probe;
pub mod service;
pub mod steps;

pub use geo::normalize_country;
pub use mirror::{is_china, MirrorRegion, MirrorSelectionPolicy, MirrorSet};
pub use os::OsFacts;
pub use probe::{CommandProbe, Probe, ProbeCascade, ProbeHit};
pub use service::GeoOsDetectionService;
pub use steps::{DetectGeoStep, DetectOsStep, SelectMirrorStep};
