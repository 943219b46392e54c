//! # System Constants
//!
//! Ambient property keys, default timeouts and mirror endpoints shared across the engine.

use std::time::Duration;

/// Well-known ambient property keys written by the detection steps
pub mod ambient {
    pub const OS_ID: &str = "os_id";
    pub const OS_NAME: &str = "os_name";
    pub const OS_VERSION: &str = "os_version";
    pub const OS_CODENAME: &str = "os_codename";
    pub const OS_FAMILY: &str = "os_family";
    pub const PACKAGE_MANAGER: &str = "package_manager";
    pub const ARCH: &str = "arch";
    pub const COUNTRY_CODE: &str = "country_code";
    pub const MIRROR_REGION: &str = "mirror_region";
    pub const PACKAGE_MIRROR: &str = "package_mirror";
    pub const DOCKER_MIRROR: &str = "docker_mirror";
    pub const REGISTRY_MIRROR: &str = "registry_mirror";
}

/// Value written when a probe cascade finds nothing
pub const UNKNOWN: &str = "unknown";

/// Maximum characters of a remote command kept in log previews
pub const COMMAND_PREVIEW_LEN: usize = 120;

/// Sentinel used by the connection health check
pub const HEALTH_CHECK_COMMAND: &str = "echo true";
pub const HEALTH_CHECK_EXPECTED: &str = "true";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INTERACTION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Geo lookup services queried in priority order
pub const DEFAULT_GEO_ENDPOINTS: &[&str] = &[
    "https://ipinfo.io/country",
    "https://ifconfig.co/country-iso",
    "https://ipapi.co/country",
    "https://api.country.is",
];

/// Mirror endpoints for the two supported regions
pub mod mirrors {
    pub const OFFICIAL_DOCKER_CE: &str = "https://download.docker.com";
    pub const OFFICIAL_DOCKER_REGISTRY: &str = "https://registry-1.docker.io";
    pub const OFFICIAL_UBUNTU: &str = "http://archive.ubuntu.com/ubuntu";
    pub const OFFICIAL_DEBIAN: &str = "http://deb.debian.org/debian";
    pub const OFFICIAL_CENTOS: &str = "http://mirror.centos.org";
    pub const OFFICIAL_ALPINE: &str = "https://dl-cdn.alpinelinux.org/alpine";

    pub const CN_DOCKER_CE: &str = "https://mirrors.aliyun.com/docker-ce";
    pub const CN_DOCKER_REGISTRY: &str = "https://docker.m.daocloud.io";
    pub const CN_UBUNTU: &str = "https://mirrors.aliyun.com/ubuntu";
    pub const CN_DEBIAN: &str = "https://mirrors.aliyun.com/debian";
    pub const CN_CENTOS: &str = "https://mirrors.aliyun.com/centos";
    pub const CN_ALPINE: &str = "https://mirrors.aliyun.com/alpine";
}

/// Truncate a remote command for logging
/// Placeholder shown instead of secret values in logs, snapshots and errors
pub const REDACTED: &str = "[REDACTED]";

pub fn command_preview(command: &str) -> String {
    let single_line = command.replace('\n', " ");
    if single_line.chars().count() <= COMMAND_PREVIEW_LEN {
        single_line
    } else {
        let truncated: String = single_line.chars().take(COMMAND_PREVIEW_LEN).collect();
        format!("{truncated}...")
    }
}
