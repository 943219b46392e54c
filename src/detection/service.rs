use super::geo::{detect_country, geo_cascade};
use super::os::{detect_os, os_cascade, OsFacts};
use super::probe::ProbeCascade;
use crate::config::DetectionConfig;
use crate::constants::{DEFAULT_GEO_ENDPOINTS, DEFAULT_PROBE_TIMEOUT, UNKNOWN};
use crate::context::ExecutionContext;
use crate::error::Result;
use std::time::Duration;

/// OS, architecture and country detection for one target host
#[derive(Debug, Clone)]
pub struct GeoOsDetectionService {
    os: ProbeCascade,
    geo: ProbeCascade,
    probe_timeout: Duration,
}

impl Default for GeoOsDetectionService {
    fn default() -> Self {
        let endpoints: Vec<String> = DEFAULT_GEO_ENDPOINTS.iter().map(|s| s.to_string()).collect();
        Self::new(DEFAULT_PROBE_TIMEOUT, &endpoints)
    }
}

impl GeoOsDetectionService {
    pub fn new(probe_timeout: Duration, geo_endpoints: &[String]) -> Self {
        Self {
            os: os_cascade(probe_timeout),
            geo: geo_cascade(geo_endpoints, probe_timeout),
            probe_timeout,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.probe_timeout(), &config.geo_endpoints)
    }

    /// Replace the geolocation probes
    pub fn with_geo_cascade(mut self, cascade: ProbeCascade) -> Self {
        self.geo = cascade;
        self
    }

    pub fn with_os_cascade(mut self, cascade: ProbeCascade) -> Self {
        self.os = cascade;
        self
    }

    pub async fn detect_os(&self, context: &ExecutionContext) -> Result<OsFacts> {
        detect_os(&self.os, context).await
    }

    pub async fn detect_arch(&self, context: &ExecutionContext) -> Result<String> {
        let result = context
            .execute_with_timeout("uname -m", self.probe_timeout)
            .await?;
        let arch = result.stdout_trimmed();
        if result.is_success() && !arch.is_empty() {
            Ok(arch.to_string())
        } else {
            Ok(UNKNOWN.to_string())
        }
    }

    pub async fn detect_country(&self, context: &ExecutionContext) -> Result<String> {
        detect_country(&self.geo, context).await
    }
}
