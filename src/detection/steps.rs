//! Detection and decision steps writing well-known ambient properties.

use super::mirror::MirrorSelectionPolicy;
use super::service::GeoOsDetectionService;
use crate::constants::{ambient, UNKNOWN};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::step::{Step, StepOutput};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const DETECT_OS_STEP: &str = "detect-os";
pub const DETECT_GEO_STEP: &str = "detect-geo";
pub const SELECT_MIRROR_STEP: &str = "select-mirror";

/// Writes `os_*`, `package_manager` and `arch`
#[derive(Debug, Clone)]
pub struct DetectOsStep {
    service: Arc<GeoOsDetectionService>,
}

impl DetectOsStep {
    pub fn new(service: Arc<GeoOsDetectionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Step for DetectOsStep {
    fn name(&self) -> &str {
        DETECT_OS_STEP
    }

    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput> {
        let facts = self.service.detect_os(context).await?;
        let arch = self.service.detect_arch(context).await?;

        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_string());
        let family = facts.family();
        let package_manager = facts.package_manager();

        context.set_ambient(ambient::OS_ID, or_unknown(&facts.id));
        context.set_ambient(ambient::OS_NAME, or_unknown(&facts.name));
        context.set_ambient(ambient::OS_VERSION, or_unknown(&facts.version));
        context.set_ambient(ambient::OS_CODENAME, or_unknown(&facts.codename));
        context.set_ambient(ambient::OS_FAMILY, family.clone());
        context.set_ambient(ambient::PACKAGE_MANAGER, package_manager.clone());
        context.set_ambient(ambient::ARCH, arch.clone());

        let message = format!(
            "{} {} ({arch})",
            or_unknown(&facts.name),
            or_unknown(&facts.version)
        );
        Ok(StepOutput::message(message).with_payload(json!({
            "os": facts,
            "family": family,
            "packageManager": package_manager,
            "arch": arch,
        })))
    }
}

/// Writes `country_code`, `unknown` when every lookup service failed
#[derive(Debug, Clone)]
pub struct DetectGeoStep {
    service: Arc<GeoOsDetectionService>,
}

impl DetectGeoStep {
    pub fn new(service: Arc<GeoOsDetectionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Step for DetectGeoStep {
    fn name(&self) -> &str {
        DETECT_GEO_STEP
    }

    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput> {
        let country = self.service.detect_country(context).await?;
        context.set_ambient(ambient::COUNTRY_CODE, country.clone());
        Ok(StepOutput::message(format!("Country: {country}")))
    }
}

/// Applies the mirror policy to the detected country and distribution
#[derive(Debug, Clone, Default)]
pub struct SelectMirrorStep;

impl SelectMirrorStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for SelectMirrorStep {
    fn name(&self) -> &str {
        SELECT_MIRROR_STEP
    }

    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput> {
        let country = context
            .ambient_str(ambient::COUNTRY_CODE)
            .unwrap_or(UNKNOWN)
            .to_string();
        let os_id = context.ambient_str(ambient::OS_ID).unwrap_or(UNKNOWN).to_string();
        let family = context
            .ambient_str(ambient::OS_FAMILY)
            .unwrap_or(UNKNOWN)
            .to_string();

        let mut mirrors = MirrorSelectionPolicy::select(&country, &os_id);
        if mirrors.package_mirror.is_none() {
            mirrors = MirrorSelectionPolicy::select(&country, &family);
        }

        context.set_ambient(ambient::MIRROR_REGION, mirrors.region.to_string());
        context.set_ambient(ambient::DOCKER_MIRROR, mirrors.docker_ce.clone());
        context.set_ambient(ambient::REGISTRY_MIRROR, mirrors.registry.clone());
        if let Some(package_mirror) = &mirrors.package_mirror {
            context.set_ambient(ambient::PACKAGE_MIRROR, package_mirror.clone());
        }

        Ok(
            StepOutput::message(format!("Using {} mirrors", mirrors.region))
                .with_payload(json!(mirrors)),
        )
    }
}
