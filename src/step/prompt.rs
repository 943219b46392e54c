use super::condition::StepCondition;
use super::traits::{Step, StepOutput};
use crate::context::{ExecutionContext, VariableType};
use crate::error::{ProvisionerError, Result};
use crate::interaction::{parse_confirmation, InteractionPrompt, PromptKind};
use async_trait::async_trait;

/// Asks the operator a question and stores the answer in a declared variable
///
/// Confirmation answers are stored as `bool`, everything else as `string`. Password
/// answers are masked in context snapshots.
#[derive(Debug, Clone)]
pub struct PromptStep {
    name: String,
    prompt: InteractionPrompt,
    variable: String,
    condition: StepCondition,
}

impl PromptStep {
    pub fn new(
        name: impl Into<String>,
        prompt: InteractionPrompt,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prompt,
            variable: variable.into(),
            condition: StepCondition::Always,
        }
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    fn variable_type(&self) -> VariableType {
        match self.prompt.kind {
            PromptKind::Confirmation => VariableType::Bool,
            PromptKind::Text | PromptKind::Password => VariableType::String,
        }
    }
}

#[async_trait]
impl Step for PromptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_execute(&self, context: &ExecutionContext) -> bool {
        self.condition.evaluate(context)
    }

    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput> {
        context.declare_variable(&self.variable, self.variable_type())?;
        if self.prompt.kind == PromptKind::Password {
            context.mark_secret(&self.variable);
        }

        let answer = context.prompt(self.prompt.clone()).await?;

        match self.prompt.kind {
            PromptKind::Confirmation => {
                let confirmed = parse_confirmation(&answer).ok_or_else(|| {
                    ProvisionerError::InteractionRejected {
                        session_id: context.session_id().to_string(),
                        reason: format!("'{answer}' is not a yes/no answer"),
                    }
                })?;
                context.set_variable(&self.variable, confirmed)?;
                Ok(StepOutput::message(format!(
                    "{} = {}",
                    self.variable, confirmed
                )))
            }
            PromptKind::Text => {
                context.set_variable(&self.variable, answer.clone())?;
                Ok(StepOutput::message(format!("{} = {}", self.variable, answer)))
            }
            PromptKind::Password => {
                context.set_variable(&self.variable, answer)?;
                Ok(StepOutput::message(format!("{} received", self.variable)))
            }
        }
    }
}
