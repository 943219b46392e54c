//! Serializable step descriptions used by user-defined scripts.

use super::condition::StepCondition;
use super::prompt::PromptStep;
use super::remote_command::RemoteCommandStep;
use super::traits::Step;
use crate::error::{ProvisionerError, Result};
use crate::interaction::{InteractionPrompt, PromptKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    Command {
        name: String,
        script: String,
        #[serde(default)]
        when: StepCondition,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        tolerate_failure: bool,
        #[serde(default)]
        capture: Option<String>,
    },
    Prompt {
        name: String,
        prompt: PromptKind,
        message: String,
        variable: String,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        when: StepCondition,
    },
}

impl StepSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Command { name, .. } | Self::Prompt { name, .. } => name,
        }
    }

    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::Prompt { .. })
    }

    /// Build the executable step
    pub fn build(&self) -> Result<Arc<dyn Step>> {
        match self {
            Self::Command {
                name,
                script,
                when,
                timeout_secs,
                tolerate_failure,
                capture,
            } => {
                if script.trim().is_empty() {
                    return Err(ProvisionerError::InvalidScript(format!(
                        "step '{name}' has an empty script"
                    )));
                }
                let mut step = RemoteCommandStep::new(name, script).when(when.clone());
                if let Some(secs) = timeout_secs {
                    if *secs == 0 {
                        return Err(ProvisionerError::InvalidScript(format!(
                            "step '{name}' has a zero timeout"
                        )));
                    }
                    step = step.timeout(Duration::from_secs(*secs));
                }
                if *tolerate_failure {
                    step = step.tolerate_failure();
                }
                if let Some(variable) = capture {
                    step = step.capture_into(variable);
                }
                Ok(Arc::new(step))
            }
            Self::Prompt {
                name,
                prompt,
                message,
                variable,
                default,
                when,
            } => {
                let prompt = match prompt {
                    PromptKind::Confirmation => InteractionPrompt {
                        kind: PromptKind::Confirmation,
                        message: message.clone(),
                        default: default.clone(),
                    },
                    PromptKind::Text => InteractionPrompt::text(message, default.clone()),
                    PromptKind::Password => InteractionPrompt::password(message),
                };
                Ok(Arc::new(
                    PromptStep::new(name, prompt, variable).when(when.clone()),
                ))
            }
        }
    }
}
