//! Operating system detection from release metadata.
//!
//! Probes run from most to least specific; each fills only the fields that are still
//! unset, so the most specific source wins every field it knows about.

use super::probe::{CommandProbe, ProbeCascade};
use crate::constants::UNKNOWN;
use crate::context::ExecutionContext;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const PROBE_OS_RELEASE: &str = "os-release";
pub const PROBE_LSB_RELEASE: &str = "lsb_release";
pub const PROBE_REDHAT_RELEASE: &str = "redhat-release";
pub const PROBE_DEBIAN_VERSION: &str = "debian_version";
pub const PROBE_UNAME: &str = "uname";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsFacts {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub codename: Option<String>,
    /// Parent distributions from `ID_LIKE`
    #[serde(default)]
    pub id_like: Vec<String>,
}

impl OsFacts {
    /// Copy every field of `other` that is still unset here
    pub fn fill_from(&mut self, other: OsFacts) {
        fill(&mut self.id, other.id);
        fill(&mut self.name, other.name);
        fill(&mut self.version, other.version);
        fill(&mut self.codename, other.codename);
        if self.id_like.is_empty() {
            self.id_like = other.id_like;
        }
    }

    /// Identity and version known; later probes have nothing to add
    pub fn is_complete(&self) -> bool {
        self.id.is_some() && self.name.is_some() && self.version.is_some()
    }

    pub fn family(&self) -> String {
        let candidates = self.id.iter().chain(self.id_like.iter());
        for candidate in candidates {
            if let Some(family) = family_of(candidate) {
                return family.to_string();
            }
        }
        UNKNOWN.to_string()
    }

    pub fn package_manager(&self) -> String {
        let id = self.id.as_deref().unwrap_or_default();
        let manager = match self.family().as_str() {
            "debian" => "apt",
            "rhel" if id == "fedora" || major_version(self.version.as_deref()) >= Some(8) => {
                "dnf"
            }
            "rhel" => "yum",
            "alpine" => "apk",
            "arch" => "pacman",
            "suse" => "zypper",
            _ => UNKNOWN,
        };
        manager.to_string()
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.filter(|v| !v.trim().is_empty());
    }
}

fn family_of(id: &str) -> Option<&'static str> {
    match id {
        "debian" | "ubuntu" | "raspbian" | "linuxmint" | "kali" | "deepin" | "uos" => {
            Some("debian")
        }
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" | "anolis"
        | "openeuler" => Some("rhel"),
        "alpine" => Some("alpine"),
        "arch" | "manjaro" => Some("arch"),
        "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "suse" => Some("suse"),
        _ => None,
    }
}

fn major_version(version: Option<&str>) -> Option<u32> {
    version?.split('.').next()?.trim().parse().ok()
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// `/etc/os-release` key=value format
pub fn parse_os_release(text: &str) -> OsFacts {
    let mut facts = OsFacts::default();
    let mut pretty_name = None;
    let mut ubuntu_codename = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value);
        match key.trim() {
            "ID" => facts.id = non_empty(value.to_ascii_lowercase()),
            "NAME" => facts.name = non_empty(value),
            "PRETTY_NAME" => pretty_name = non_empty(value),
            "VERSION_ID" => facts.version = non_empty(value),
            "VERSION_CODENAME" => facts.codename = non_empty(value),
            "UBUNTU_CODENAME" => ubuntu_codename = non_empty(value),
            "ID_LIKE" => {
                facts.id_like = value
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            }
            _ => {}
        }
    }

    fill(&mut facts.name, pretty_name);
    fill(&mut facts.codename, ubuntu_codename);
    facts
}

/// `lsb_release -a` output
pub fn parse_lsb_release(text: &str) -> OsFacts {
    let mut facts = OsFacts::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if value.is_empty() || value.eq_ignore_ascii_case("n/a") {
            continue;
        }
        match key.trim() {
            "Distributor ID" => facts.id = Some(value.to_ascii_lowercase()),
            "Description" => facts.name = Some(value),
            "Release" => facts.version = Some(value),
            "Codename" => facts.codename = Some(value),
            _ => {}
        }
    }
    facts
}

fn version_regex() -> Option<&'static regex::Regex> {
    static VERSION: OnceLock<Option<regex::Regex>> = OnceLock::new();
    VERSION
        .get_or_init(|| regex::Regex::new(r"(\d+(?:\.\d+)*)").ok())
        .as_ref()
}

/// `/etc/redhat-release`, e.g. `CentOS Linux release 7.9.2009 (Core)`
pub fn parse_redhat_release(text: &str) -> OsFacts {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return OsFacts::default();
    }

    let lower = line.to_ascii_lowercase();
    let id = if lower.starts_with("red hat") {
        "rhel"
    } else if lower.starts_with("centos") {
        "centos"
    } else if lower.starts_with("rocky") {
        "rocky"
    } else if lower.starts_with("almalinux") {
        "almalinux"
    } else if lower.starts_with("fedora") {
        "fedora"
    } else {
        "rhel"
    };

    let version = version_regex()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let codename = line
        .rsplit_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(inner, _)| inner.trim().to_string())
        .filter(|c| !c.is_empty());

    OsFacts {
        id: Some(id.to_string()),
        name: Some(line.split(" release").next().unwrap_or(line).trim().to_string()),
        version,
        codename,
        id_like: vec!["rhel".to_string()],
    }
}

/// `/etc/debian_version`, either `12.5` or a codename such as `bookworm/sid`
pub fn parse_debian_version(text: &str) -> OsFacts {
    let value = text.trim();
    if value.is_empty() {
        return OsFacts::default();
    }

    let starts_numeric = value.chars().next().is_some_and(|c| c.is_ascii_digit());
    OsFacts {
        id: Some("debian".to_string()),
        name: Some("Debian GNU/Linux".to_string()),
        version: starts_numeric.then(|| value.to_string()),
        codename: (!starts_numeric).then(|| value.split('/').next().unwrap_or(value).to_string()),
        id_like: Vec::new(),
    }
}

/// `uname -sr`, e.g. `Linux 5.15.0-105-generic`
pub fn parse_uname(text: &str) -> OsFacts {
    let mut parts = text.split_whitespace();
    let Some(kernel) = parts.next() else {
        return OsFacts::default();
    };
    OsFacts {
        id: Some(kernel.to_ascii_lowercase()),
        name: Some(kernel.to_string()),
        version: parts.next().map(str::to_string),
        codename: None,
        id_like: Vec::new(),
    }
}

fn parser_for(probe: &str) -> fn(&str) -> OsFacts {
    match probe {
        PROBE_OS_RELEASE => parse_os_release,
        PROBE_LSB_RELEASE => parse_lsb_release,
        PROBE_REDHAT_RELEASE => parse_redhat_release,
        PROBE_DEBIAN_VERSION => parse_debian_version,
        _ => parse_uname,
    }
}

/// The fixed OS probe order: structured release file, distro tool, legacy files, kernel
pub fn os_cascade(timeout: Duration) -> ProbeCascade {
    ProbeCascade::new()
        .with_probe(CommandProbe::new(
            PROBE_OS_RELEASE,
            "cat /etc/os-release 2>/dev/null",
            timeout,
        ))
        .with_probe(CommandProbe::new(
            PROBE_LSB_RELEASE,
            "lsb_release -a 2>/dev/null",
            timeout,
        ))
        .with_probe(CommandProbe::new(
            PROBE_REDHAT_RELEASE,
            "cat /etc/redhat-release 2>/dev/null",
            timeout,
        ))
        .with_probe(CommandProbe::new(
            PROBE_DEBIAN_VERSION,
            "cat /etc/debian_version 2>/dev/null",
            timeout,
        ))
        .with_probe(CommandProbe::new(PROBE_UNAME, "uname -sr", timeout))
}

/// Run the OS cascade, merging fields first-writer-wins until identity and version are known
pub async fn detect_os(cascade: &ProbeCascade, context: &ExecutionContext) -> Result<OsFacts> {
    let mut facts = OsFacts::default();
    cascade
        .until(context, |probe, output| {
            let parsed = parser_for(probe)(output);
            debug!(probe = %probe, ?parsed, "OS probe answered");
            facts.fill_from(parsed);
            facts.is_complete()
        })
        .await?;
    Ok(facts)
}
