//! # Script Registry
//!
//! Resolves a script id to its [`ScriptDefinition`]. Compiled-in scripts are registered
//! once at start-up; anything else is looked up in the optional [`ScriptSource`].
//!
//! The registry is an explicit instance handed to the dispatcher, never a global.

use super::definition::{ScriptClassification, ScriptDefinition};
use super::source::ScriptSource;
use crate::error::{ProvisionerError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Catalogue entry returned by [`ScriptRegistry::list`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub id: String,
    pub classification: ScriptClassification,
    pub description: String,
    pub steps: usize,
}

pub struct ScriptRegistry {
    scripts: DashMap<String, Arc<ScriptDefinition>>,
    source: Option<Arc<dyn ScriptSource>>,
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
            source: None,
        }
    }

    pub fn with_source(source: Arc<dyn ScriptSource>) -> Self {
        Self {
            scripts: DashMap::new(),
            source: Some(source),
        }
    }

    /// Register a compiled-in script, replacing any earlier one with the same id
    pub fn register(&self, definition: ScriptDefinition) -> Result<()> {
        definition.validate()?;
        let id = definition.id().to_string();
        info!(
            script_id = %id,
            classification = %definition.classification(),
            steps = definition.steps().len(),
            "📋 Registered script"
        );
        if self
            .scripts
            .insert(id.clone(), Arc::new(definition))
            .is_some()
        {
            warn!(script_id = %id, "Replaced previously registered script");
        }
        Ok(())
    }

    pub fn contains(&self, script_id: &str) -> bool {
        self.scripts.contains_key(script_id)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Resolve a script id
    ///
    /// User-defined scripts are re-read from the source on every call so edits take
    /// effect on the next execution; the returned definition is immutable.
    pub async fn resolve(&self, script_id: &str) -> Result<Arc<ScriptDefinition>> {
        if let Some(definition) = self.scripts.get(script_id) {
            return Ok(Arc::clone(definition.value()));
        }

        let Some(source) = &self.source else {
            return Err(ProvisionerError::ScriptNotFound(script_id.to_string()));
        };

        match source.load(script_id).await? {
            Some(document) => {
                debug!(script_id = %script_id, "Loaded user-defined script");
                Ok(Arc::new(document.into_definition()?))
            }
            None => Err(ProvisionerError::ScriptNotFound(script_id.to_string())),
        }
    }

    /// Compiled-in scripts followed by user-defined ones, each sorted by id
    ///
    /// User documents that fail to load are logged and left out.
    pub async fn list(&self) -> Result<Vec<ScriptSummary>> {
        let mut builtin: Vec<ScriptSummary> = self
            .scripts
            .iter()
            .map(|entry| summarize(entry.value()))
            .collect();
        builtin.sort_by(|a, b| a.id.cmp(&b.id));

        let mut user = Vec::new();
        if let Some(source) = &self.source {
            for id in source.list().await? {
                if self.scripts.contains_key(&id) {
                    continue;
                }
                match source.load(&id).await.and_then(|doc| match doc {
                    Some(doc) => doc.into_definition().map(Some),
                    None => Ok(None),
                }) {
                    Ok(Some(definition)) => user.push(summarize(&definition)),
                    Ok(None) => {}
                    Err(e) => warn!(script_id = %id, error = %e, "Skipping unloadable script"),
                }
            }
        }

        builtin.extend(user);
        Ok(builtin)
    }
}

fn summarize(definition: &ScriptDefinition) -> ScriptSummary {
    ScriptSummary {
        id: definition.id().to_string(),
        classification: definition.classification(),
        description: definition.description().to_string(),
        steps: definition.steps().len(),
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("scripts", &self.scripts.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
