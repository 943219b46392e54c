//! Script definitions and their parameter schemas.

use crate::context::VariableType;
use crate::error::{FieldError, ProvisionerError, Result};
use crate::step::Step;
use crate::validation::{coerce_to_type, validate_json_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// How a script is parameterised and where its steps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptClassification {
    /// No parameters; runs immediately
    Static,
    /// Parameters validated before any remote work
    Configurable,
    /// Configurable, and steps may pause for operator input
    Interactive,
    /// Steps and schema loaded from an external script source
    UserDefined,
}

impl ScriptClassification {
    pub fn accepts_parameters(&self) -> bool {
        !matches!(self, Self::Static)
    }

    /// Whether steps may suspend the execution for operator input
    pub fn allows_interaction(&self) -> bool {
        matches!(self, Self::Interactive | Self::UserDefined)
    }
}

impl fmt::Display for ScriptClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "STATIC"),
            Self::Configurable => write!(f, "CONFIGURABLE"),
            Self::Interactive => write!(f, "INTERACTIVE"),
            Self::UserDefined => write!(f, "USER_DEFINED"),
        }
    }
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: VariableType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When non-empty, the coerced value must be one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, ty: VariableType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
            allowed_values: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, ty: VariableType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_allowed_values<V: Into<Value>>(mut self, values: Vec<V>) -> Self {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    fn check(&self, raw: &Value) -> std::result::Result<Value, FieldError> {
        validate_json_payload(&self.name, raw)?;

        let value = coerce_to_type(raw, self.ty).ok_or_else(|| {
            FieldError::new(
                &self.name,
                format!("expected {}, got {}", self.ty, describe(raw)),
            )
        })?;

        if !self.allowed_values.is_empty() && !self.allowed_values.contains(&value) {
            let allowed = self
                .allowed_values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(FieldError::new(
                &self.name,
                format!("must be one of [{allowed}]"),
            ));
        }

        Ok(value)
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A parameter that passed validation, ready to seed a declared variable
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParameter {
    pub name: String,
    pub ty: VariableType,
    /// `None` for an optional parameter that was neither supplied nor defaulted
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    parameters: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new(parameters: Vec<ParameterSpec>) -> Self {
        Self { parameters }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn push(&mut self, spec: ParameterSpec) {
        self.parameters.push(spec);
    }

    /// Validate caller input against the schema
    ///
    /// Every invalid field contributes one [`FieldError`]; the input is only accepted when
    /// there are none. Null counts as absent. Unknown parameter names are rejected.
    pub fn validate(
        &self,
        input: &Map<String, Value>,
    ) -> std::result::Result<Vec<ValidatedParameter>, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut validated = Vec::with_capacity(self.parameters.len());

        for spec in &self.parameters {
            let supplied = input.get(&spec.name).filter(|v| !v.is_null());
            let raw = supplied.or(spec.default.as_ref());

            match raw {
                Some(raw) => match spec.check(raw) {
                    Ok(value) => validated.push(ValidatedParameter {
                        name: spec.name.clone(),
                        ty: spec.ty,
                        value: Some(value),
                    }),
                    Err(error) => errors.push(error),
                },
                None if spec.required => {
                    errors.push(FieldError::new(&spec.name, "is required"));
                }
                None => validated.push(ValidatedParameter {
                    name: spec.name.clone(),
                    ty: spec.ty,
                    value: None,
                }),
            }
        }

        let mut unknown: Vec<&String> = input
            .keys()
            .filter(|key| !self.parameters.iter().any(|spec| &spec.name == *key))
            .collect();
        unknown.sort();
        for key in unknown {
            errors.push(FieldError::new(key.as_str(), "unknown parameter"));
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }
}

/// A resolved, immutable script: classification, ordered steps and parameter schema
#[derive(Clone)]
pub struct ScriptDefinition {
    id: String,
    description: String,
    classification: ScriptClassification,
    steps: Vec<Arc<dyn Step>>,
    schema: ParameterSchema,
}

impl ScriptDefinition {
    pub fn new(id: impl Into<String>, classification: ScriptClassification) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            classification,
            steps: Vec::new(),
            schema: ParameterSchema::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.schema.push(spec);
        self
    }

    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn with_shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn classification(&self) -> ScriptClassification {
        self.classification
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Structural checks applied when a definition is registered or loaded
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ProvisionerError::InvalidScript(
                "script id must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(ProvisionerError::InvalidScript(format!(
                "script '{}' has no steps",
                self.id
            )));
        }
        if self.classification == ScriptClassification::Static && !self.schema.is_empty() {
            return Err(ProvisionerError::InvalidScript(format!(
                "static script '{}' must not declare parameters",
                self.id
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for spec in self.schema.parameters() {
            if !seen.insert(spec.name.as_str()) {
                return Err(ProvisionerError::InvalidScript(format!(
                    "script '{}' declares parameter '{}' twice",
                    self.id, spec.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ScriptDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDefinition")
            .field("id", &self.id)
            .field("classification", &self.classification)
            .field("steps", &self.step_names())
            .field("schema", &self.schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::RemoteCommandStep;
    use serde_json::json;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParameterSpec::required("image", VariableType::String),
            ParameterSpec::optional("host_port", VariableType::Int).with_default(8080),
            ParameterSpec::optional("restart", VariableType::String)
                .with_allowed_values(vec!["always", "no"]),
        ])
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_applies_defaults_and_coercion() {
        let validated = schema()
            .validate(&input(json!({"image": "nginx", "host_port": "9090"})))
            .unwrap();
        assert_eq!(validated[0].value, Some(json!("nginx")));
        assert_eq!(validated[1].value, Some(json!(9090)));
        assert_eq!(validated[2].value, None);

        let validated = schema().validate(&input(json!({"image": "nginx"}))).unwrap();
        assert_eq!(validated[1].value, Some(json!(8080)));
    }

    #[test]
    fn test_validate_reports_every_invalid_field() {
        let errors = schema()
            .validate(&input(json!({
                "host_port": "eighty",
                "restart": "sometimes",
                "colour": "blue"
            })))
            .unwrap_err();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["image", "host_port", "restart", "colour"]);
        assert_eq!(errors[0].message, "is required");
        assert_eq!(errors[1].message, "expected int, got string");
    }

    #[test]
    fn test_null_counts_as_missing() {
        let errors = schema()
            .validate(&input(json!({"image": null})))
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "image");
    }

    #[test]
    fn test_static_definition_rejects_parameters() {
        let definition = ScriptDefinition::new("hello", ScriptClassification::Static)
            .with_parameter(ParameterSpec::required("x", VariableType::String))
            .with_step(RemoteCommandStep::new("hello", "echo hello"));
        assert!(matches!(
            definition.validate(),
            Err(ProvisionerError::InvalidScript(_))
        ));
    }

    #[test]
    fn test_definition_without_steps_is_invalid() {
        let definition = ScriptDefinition::new("empty", ScriptClassification::Configurable);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_classification_wire_names() {
        assert_eq!(
            serde_json::to_string(&ScriptClassification::UserDefined).unwrap(),
            "\"USER_DEFINED\""
        );
        assert!(!ScriptClassification::Static.accepts_parameters());
        assert!(ScriptClassification::Interactive.accepts_parameters());
    }

    #[test]
    fn test_only_interactive_classes_allow_prompts() {
        assert!(!ScriptClassification::Static.allows_interaction());
        assert!(!ScriptClassification::Configurable.allows_interaction());
        assert!(ScriptClassification::Interactive.allows_interaction());
        assert!(ScriptClassification::UserDefined.allows_interaction());
    }
}
