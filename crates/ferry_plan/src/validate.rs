//! Workflow validation.
//!
//! Structural problems (no steps, duplicate names, a step reading from
//! itself) are errors and reject the definition. References that cannot be
//! satisfied when the step runs are only warnings: the orchestrator skips
//! such steps at run time instead.

use indexmap::IndexSet;
use std::collections::HashSet;

use crate::workflow::WorkflowDefinition;

/// Reasons a definition is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No steps at all
    #[error("workflow has no steps")]
    Empty,
    /// Step at this index has a blank name
    #[error("step #{index} has an empty name")]
    EmptyStepName {
        /// Position in the step list
        index: usize,
    },
    /// Two steps share a name
    #[error("duplicate step name `{step}`")]
    DuplicateStep {
        /// Repeated name
        step: String,
    },
    /// A step lists itself in `inputsFrom`
    #[error("step `{step}` reads its own output")]
    SelfReference {
        /// Offending step
        step: String,
    },
    /// A step has a blank agent or operation
    #[error("step `{step}` has an empty {field}")]
    MissingField {
        /// Offending step
        step: String,
        /// `agent` or `operation`
        field: &'static str,
    },
    /// Two dependencies feed the same input key
    #[error("step `{step}` maps more than one dependency onto input `{key}`")]
    DuplicateInputKey {
        /// Offending step
        step: String,
        /// Input key
        key: String,
    },
    /// A zero deadline
    #[error("step `{step}` has a zero timeout")]
    ZeroTimeout {
        /// Offending step
        step: String,
    },
}

/// Problems that do not reject a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Depends on a step declared later; it will not have run yet
    ForwardReference {
        /// Dependent step
        step: String,
        /// Later step
        dependency: String,
    },
    /// Depends on a step that does not exist
    UnknownReference {
        /// Dependent step
        step: String,
        /// Missing step
        dependency: String,
    },
    /// Invokes an agent that is not registered
    UnknownAgent {
        /// Step
        step: String,
        /// Agent name
        agent: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForwardReference { step, dependency } => write!(
                f,
                "step `{}` reads from later step `{}` and will be skipped",
                step, dependency
            ),
            Self::UnknownReference { step, dependency } => write!(
                f,
                "step `{}` reads from unknown step `{}` and will be skipped",
                step, dependency
            ),
            Self::UnknownAgent { step, agent } => {
                write!(f, "step `{}` uses unregistered agent `{}`", step, agent)
            }
        }
    }
}

/// Validator for workflow definitions
#[derive(Debug, Clone, Default)]
pub struct Validator {
    known_agents: Option<HashSet<String>>,
}

impl Validator {
    /// Create a validator that does not check agent names
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also warn about steps that use agents outside `agents`
    #[must_use]
    pub fn with_known_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    /// Validate a definition
    ///
    /// # Errors
    ///
    /// Returns every structural error found
    pub fn validate(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if definition.is_empty() {
            return Err(vec![ValidationError::Empty]);
        }

        let all: HashSet<&str> = definition.steps.iter().map(|s| s.name.as_str()).collect();
        let mut seen: IndexSet<&str> = IndexSet::new();

        for (index, step) in definition.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                errors.push(ValidationError::EmptyStepName { index });
            } else if !seen.insert(step.name.as_str()) {
                errors.push(ValidationError::DuplicateStep {
                    step: step.name.clone(),
                });
            }

            if step.agent.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    step: step.name.clone(),
                    field: "agent",
                });
            } else if let Some(known) = &self.known_agents {
                if !known.contains(&step.agent) {
                    warnings.push(ValidationWarning::UnknownAgent {
                        step: step.name.clone(),
                        agent: step.agent.clone(),
                    });
                }
            }
            if step.operation.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    step: step.name.clone(),
                    field: "operation",
                });
            }

            if step.timeout_ms == Some(0) {
                errors.push(ValidationError::ZeroTimeout {
                    step: step.name.clone(),
                });
            }

            let mut keys: HashSet<&str> = HashSet::new();
            for (dependency, key) in &step.inputs_from {
                if !keys.insert(key.as_str()) {
                    errors.push(ValidationError::DuplicateInputKey {
                        step: step.name.clone(),
                        key: key.clone(),
                    });
                }

                if *dependency == step.name {
                    errors.push(ValidationError::SelfReference {
                        step: step.name.clone(),
                    });
                } else if !all.contains(dependency.as_str()) {
                    warnings.push(ValidationWarning::UnknownReference {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                } else if !seen.contains(dependency.as_str()) {
                    warnings.push(ValidationWarning::ForwardReference {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;
    use proptest::prelude::*;

    fn step(name: &str) -> WorkflowStep {
        WorkflowStep::new(name, "agent", "op")
    }

    #[test]
    fn test_valid_linear() {
        let wf = WorkflowDefinition::new()
            .step(step("a"))
            .step(step("b").with_input("a", "input"));
        assert_eq!(Validator::new().validate(&wf), Ok(vec![]));
    }

    #[test]
    fn test_empty() {
        let wf = WorkflowDefinition::new();
        assert_eq!(Validator::new().validate(&wf), Err(vec![ValidationError::Empty]));
    }

    #[test]
    fn test_duplicate_and_self_reference() {
        let wf = WorkflowDefinition::new()
            .step(step("a"))
            .step(step("a"))
            .step(step("c").with_input("c", "x"));
        let errors = Validator::new().validate(&wf).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateStep {
            step: "a".to_string()
        }));
        assert!(errors.contains(&ValidationError::SelfReference {
            step: "c".to_string()
        }));
    }

    #[test]
    fn test_missing_fields_and_zero_timeout() {
        let wf = WorkflowDefinition::new()
            .step(WorkflowStep::new("", "agent", "op"))
            .step(WorkflowStep::new("b", "", "").with_timeout_ms(0));
        let errors = Validator::new().validate(&wf).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::EmptyStepName { index: 0 }));
        assert!(errors.contains(&ValidationError::ZeroTimeout {
            step: "b".to_string()
        }));
    }

    #[test]
    fn test_duplicate_input_key() {
        let wf = WorkflowDefinition::new()
            .step(step("a"))
            .step(step("b"))
            .step(step("c").with_input("a", "data").with_input("b", "data"));
        let errors = Validator::new().validate(&wf).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateInputKey {
                step: "c".to_string(),
                key: "data".to_string()
            }]
        );
    }

    #[test]
    fn test_forward_and_unknown_references_warn() {
        let wf = WorkflowDefinition::new()
            .step(step("a").with_input("b", "later"))
            .step(step("b").with_input("ghost", "x"));
        let warnings = Validator::new().validate(&wf).unwrap();
        assert_eq!(
            warnings,
            vec![
                ValidationWarning::ForwardReference {
                    step: "a".to_string(),
                    dependency: "b".to_string()
                },
                ValidationWarning::UnknownReference {
                    step: "b".to_string(),
                    dependency: "ghost".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_agent_warns() {
        let wf = WorkflowDefinition::new()
            .step(WorkflowStep::new("a", "sql", "query"))
            .step(WorkflowStep::new("b", "pdf", "compose"));
        let warnings = Validator::new()
            .with_known_agents(["sql"])
            .validate(&wf)
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("pdf"));
    }

    proptest! {
        #[test]
        fn prop_backward_references_never_warn(
            len in 1usize..12,
            picks in proptest::collection::vec((any::<usize>(), any::<usize>()), 0..12),
        ) {
            let mut wf = WorkflowDefinition::new();
            for i in 0..len {
                let mut s = step(&format!("s{}", i));
                if i > 0 {
                    if let Some((dep, _)) = picks.get(i) {
                        s = s.with_input(format!("s{}", dep % i), "input");
                    }
                }
                wf = wf.step(s);
            }
            let warnings = Validator::new().validate(&wf).unwrap();
            prop_assert!(warnings.is_empty());
        }
    }
}
