//! Mirror selection policy.
//!
//! A binary rule: `CN` or `China` (any case) selects the China mirror set, every other
//! value, `unknown` included, selects the official upstream sources.

use crate::constants::mirrors;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorRegion {
    China,
    Official,
}

impl fmt::Display for MirrorRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::China => write!(f, "china"),
            Self::Official => write!(f, "official"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSet {
    pub region: MirrorRegion,
    /// Distribution package mirror, `None` when the distribution has no known mirror
    pub package_mirror: Option<String>,
    pub docker_ce: String,
    pub registry: String,
}

pub fn is_china(country_code: &str) -> bool {
    let code = country_code.trim();
    code.eq_ignore_ascii_case("CN") || code.eq_ignore_ascii_case("China")
}

pub struct MirrorSelectionPolicy;

impl MirrorSelectionPolicy {
    /// `os_family` may be a distribution id (`ubuntu`) or a family (`rhel`)
    pub fn select(country_code: &str, os_family: &str) -> MirrorSet {
        let region = if is_china(country_code) {
            MirrorRegion::China
        } else {
            MirrorRegion::Official
        };

        let package_mirror = package_mirror(region, &os_family.trim().to_ascii_lowercase());
        let (docker_ce, registry) = match region {
            MirrorRegion::China => (mirrors::CN_DOCKER_CE, mirrors::CN_DOCKER_REGISTRY),
            MirrorRegion::Official => (
                mirrors::OFFICIAL_DOCKER_CE,
                mirrors::OFFICIAL_DOCKER_REGISTRY,
            ),
        };

        MirrorSet {
            region,
            package_mirror: package_mirror.map(str::to_string),
            docker_ce: docker_ce.to_string(),
            registry: registry.to_string(),
        }
    }
}

fn package_mirror(region: MirrorRegion, os: &str) -> Option<&'static str> {
    let china = region == MirrorRegion::China;
    let mirror = match os {
        "ubuntu" => {
            if china {
                mirrors::CN_UBUNTU
            } else {
                mirrors::OFFICIAL_UBUNTU
            }
        }
        "debian" => {
            if china {
                mirrors::CN_DEBIAN
            } else {
                mirrors::OFFICIAL_DEBIAN
            }
        }
        "centos" | "rhel" | "rocky" | "almalinux" => {
            if china {
                mirrors::CN_CENTOS
            } else {
                mirrors::OFFICIAL_CENTOS
            }
        }
        "alpine" => {
            if china {
                mirrors::CN_ALPINE
            } else {
                mirrors::OFFICIAL_ALPINE
            }
        }
        _ => return None,
    };
    Some(mirror)
}
