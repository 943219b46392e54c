//! # Script Sources
//!
//! External storage for user-defined scripts. The registry consults its source only for
//! ids that are not compiled in, and converts each loaded [`UserScriptDocument`] into a
//! [`ScriptDefinition`] with the `USER_DEFINED` classification.

use super::definition::{ParameterSchema, ScriptClassification, ScriptDefinition};
use crate::error::{ProvisionerError, Result};
use crate::step::StepSpec;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Serialized form of a user-authored script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserScriptDocument {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
    pub steps: Vec<StepSpec>,
}

impl UserScriptDocument {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn into_definition(self) -> Result<ScriptDefinition> {
        let mut definition = ScriptDefinition::new(&self.id, ScriptClassification::UserDefined)
            .with_description(self.description)
            .with_schema(self.parameters);
        for spec in &self.steps {
            definition = definition.with_shared_step(spec.build()?);
        }
        definition.validate()?;
        Ok(definition)
    }
}

#[async_trait]
pub trait ScriptSource: Send + Sync {
    /// Load the document for `script_id`, `Ok(None)` when the source has no such script
    async fn load(&self, script_id: &str) -> Result<Option<UserScriptDocument>>;

    /// Ids of every script the source can load
    async fn list(&self) -> Result<Vec<String>>;
}

/// Script source backed by a concurrent map, used by embedders and tests
#[derive(Debug, Default)]
pub struct InMemoryScriptSource {
    documents: DashMap<String, UserScriptDocument>,
}

impl InMemoryScriptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: UserScriptDocument) {
        self.documents.insert(document.id.clone(), document);
    }

    pub fn remove(&self, script_id: &str) -> Option<UserScriptDocument> {
        self.documents.remove(script_id).map(|(_, doc)| doc)
    }
}

#[async_trait]
impl ScriptSource for InMemoryScriptSource {
    async fn load(&self, script_id: &str) -> Result<Option<UserScriptDocument>> {
        Ok(self.documents.get(script_id).map(|doc| doc.clone()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

/// Script source reading `<directory>/<script_id>.yaml`
#[derive(Debug, Clone)]
pub struct YamlDirectoryScriptSource {
    directory: PathBuf,
}

impl YamlDirectoryScriptSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, script_id: &str) -> Result<PathBuf> {
        let valid = !script_id.is_empty()
            && script_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ProvisionerError::InvalidScript(format!(
                "invalid script id '{script_id}'"
            )));
        }
        Ok(self.directory.join(format!("{script_id}.yaml")))
    }
}

#[async_trait]
impl ScriptSource for YamlDirectoryScriptSource {
    async fn load(&self, script_id: &str) -> Result<Option<UserScriptDocument>> {
        let path = self.path_for(script_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No user script file");
                return Ok(None);
            }
            Err(e) => {
                return Err(ProvisionerError::Internal(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let document = UserScriptDocument::from_yaml(&text)?;
        if document.id != script_id {
            return Err(ProvisionerError::InvalidScript(format!(
                "{} declares id '{}'",
                path.display(),
                document.id
            )));
        }
        Ok(Some(document))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ProvisionerError::Internal(format!(
                    "failed to list {}: {e}",
                    self.directory.display()
                )))
            }
        };

        let mut ids = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            ids.push(stem.to_string());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(directory = %self.directory.display(), error = %e, "Stopped listing scripts early");
                    break;
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX_SCRIPT: &str = r#"
id: nginx-site
description: Install nginx and write a landing page
parameters:
  - name: greeting
    type: string
    required: false
    default: hello
steps:
  - kind: command
    name: install
    script: apt-get install -y nginx
  - kind: command
    name: landing-page
    script: echo '${greeting}' > /var/www/html/index.html
"#;

    #[tokio::test]
    async fn test_yaml_directory_source_loads_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx-site.yaml"), NGINX_SCRIPT).unwrap();

        let source = YamlDirectoryScriptSource::new(dir.path());
        let document = source.load("nginx-site").await.unwrap().unwrap();
        assert_eq!(document.steps.len(), 2);

        let definition = document.into_definition().unwrap();
        assert_eq!(definition.classification(), ScriptClassification::UserDefined);
        assert_eq!(definition.step_names(), vec!["install", "landing-page"]);

        assert_eq!(source.list().await.unwrap(), vec!["nginx-site".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = YamlDirectoryScriptSource::new(dir.path());
        assert!(source.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = YamlDirectoryScriptSource::new(dir.path());
        assert!(matches!(
            source.load("../etc/passwd").await,
            Err(ProvisionerError::InvalidScript(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryScriptSource::new();
        source.insert(UserScriptDocument::from_yaml(NGINX_SCRIPT).unwrap());
        assert!(source.load("nginx-site").await.unwrap().is_some());
        assert!(source.remove("nginx-site").is_some());
        assert!(source.list().await.unwrap().is_empty());
    }
}
