//! Declarative execute-or-skip predicates.

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    #[default]
    Always,
    AmbientEquals {
        key: String,
        value: Value,
    },
    AmbientIn {
        key: String,
        values: Vec<Value>,
    },
    VariableEquals {
        name: String,
        value: Value,
    },
    VariableTrue {
        name: String,
    },
    /// True when a variable or ambient property of that name is set
    Exists {
        name: String,
    },
    Not {
        condition: Box<StepCondition>,
    },
    All {
        conditions: Vec<StepCondition>,
    },
    Any {
        conditions: Vec<StepCondition>,
    },
}

impl StepCondition {
    pub fn ambient_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::AmbientEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn ambient_in<V: Into<Value>>(key: impl Into<String>, values: Vec<V>) -> Self {
        Self::AmbientIn {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn variable_true(name: impl Into<String>) -> Self {
        Self::VariableTrue { name: name.into() }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            condition: Box::new(self),
        }
    }

    pub fn evaluate(&self, context: &ExecutionContext) -> bool {
        match self {
            Self::Always => true,
            Self::AmbientEquals { key, value } => context.get_ambient(key) == Some(value),
            Self::AmbientIn { key, values } => context
                .get_ambient(key)
                .map(|actual| values.contains(actual))
                .unwrap_or(false),
            Self::VariableEquals { name, value } => context.variable(name) == Some(value),
            Self::VariableTrue { name } => context
                .variable(name)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Self::Exists { name } => {
                context.variable(name).is_some() || context.get_ambient(name).is_some()
            }
            Self::Not { condition } => !condition.evaluate(context),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_deserializes_from_yaml() {
        let yaml = r#"
type: all
conditions:
  - type: ambient_in
    key: os_family
    values: [debian, rhel]
  - type: not
    condition:
      type: variable_true
      name: skip_install
"#;
        let condition: StepCondition = serde_yaml::from_str(yaml).unwrap();
        match condition {
            StepCondition::All { conditions } => assert_eq!(conditions.len(), 2),
            other => panic!("unexpected condition {other:?}"),
        }
    }
}
