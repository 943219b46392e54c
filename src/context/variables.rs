//! Typed variables shared between the steps of one script.
//!
//! A variable's type is fixed by its first declaration or first write; later writes of a
//! different type fail with `TypeMismatch` and leave the stored value untouched.

use crate::error::{ProvisionerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Int,
    Bool,
    Array,
    Object,
}

impl VariableType {
    /// Type of a JSON value, `None` for null and non-integral numbers
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Int),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
            Value::Number(_) | Value::Null => None,
        }
    }

    fn describe(value: &Value) -> String {
        match Self::of(value) {
            Some(ty) => ty.to_string(),
            None if value.is_null() => "null".to_string(),
            None => "float".to_string(),
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    declarations: HashMap<String, VariableType>,
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the type of `name` without giving it a value
    pub fn declare(&mut self, name: &str, ty: VariableType) -> Result<()> {
        match self.declarations.get(name) {
            Some(existing) if *existing != ty => Err(ProvisionerError::TypeMismatch {
                name: name.to_string(),
                declared: existing.to_string(),
                actual: ty.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.declarations.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let actual = VariableType::of(&value);

        match (self.declarations.get(name), actual) {
            (Some(declared), Some(actual)) if *declared == actual => {}
            (Some(declared), _) => {
                return Err(ProvisionerError::TypeMismatch {
                    name: name.to_string(),
                    declared: declared.to_string(),
                    actual: VariableType::describe(&value),
                })
            }
            (None, Some(actual)) => {
                self.declarations.insert(name.to_string(), actual);
            }
            (None, None) => {
                return Err(ProvisionerError::TypeMismatch {
                    name: name.to_string(),
                    declared: "undeclared".to_string(),
                    actual: VariableType::describe(&value),
                })
            }
        }

        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read `name` as `ty`; asking for the wrong type is an error even when unset
    pub fn get(&self, name: &str, ty: VariableType) -> Result<Option<&Value>> {
        match self.declarations.get(name) {
            Some(declared) if *declared != ty => Err(ProvisionerError::TypeMismatch {
                name: name.to_string(),
                declared: declared.to_string(),
                actual: ty.to_string(),
            }),
            _ => Ok(self.values.get(name)),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn declared_type(&self, name: &str) -> Option<VariableType> {
        self.declarations.get(name).copied()
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}
