//! # Built-in Scripts
//!
//! - `detect-system` (STATIC): OS, geolocation and mirror region
//! - `install-docker` (CONFIGURABLE): Docker CE from the region's mirror
//! - `deploy-app` (INTERACTIVE): run a container, confirming before replacing one

pub mod builtin;

pub use builtin::{
    builtin_scripts, register_builtin_scripts, DEPLOY_APP, DETECT_SYSTEM, INSTALL_DOCKER,
};
