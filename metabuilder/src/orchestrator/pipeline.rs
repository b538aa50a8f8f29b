//! Pipeline definitions: which agent runs in which phase.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PipelineVersion;
use crate::agents::AgentRole;
use crate::executor::{QueueClass, TaskPayload};

/// A run phase. Each maps to one non-terminal run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Goal analysis and design.
    Planning,
    /// Code generation.
    Generating,
    /// Tests, review and scans.
    Evaluating,
}

impl Phase {
    /// The phase after this one, `None` after evaluation.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Planning => Some(Self::Generating),
            Self::Generating => Some(Self::Evaluating),
            Self::Evaluating => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Generating => write!(f, "generating"),
            Self::Evaluating => write!(f, "evaluating"),
        }
    }
}

/// One agent invocation within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStep {
    /// Step id, unique within a pipeline.
    pub step_id: String,
    /// Agent to call.
    pub role: AgentRole,
    /// Action to request.
    pub action: String,
    /// Queue the task is scheduled on.
    pub queue_class: QueueClass,
}

impl StageStep {
    /// Creates a step with id `"{role}.{action}"`.
    #[must_use]
    pub fn new(role: AgentRole, action: impl Into<String>, queue_class: QueueClass) -> Self {
        let action = action.into();
        Self {
            step_id: format!("{role}.{action}"),
            role,
            action,
            queue_class,
        }
    }

    /// Builds the task payload for this step.
    #[must_use]
    pub fn payload(&self, input: serde_json::Value) -> TaskPayload {
        TaskPayload {
            role: self.role,
            action: self.action.clone(),
            input,
        }
    }
}

/// Ordered steps of each phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Version label.
    pub version: PipelineVersion,
    /// Planning steps.
    pub planning: Vec<StageStep>,
    /// Generation steps.
    pub generating: Vec<StageStep>,
    /// Evaluation steps.
    pub evaluating: Vec<StageStep>,
}

impl PipelineDefinition {
    /// The current pipeline.
    #[must_use]
    pub fn control() -> Self {
        Self {
            version: PipelineVersion::Control,
            planning: vec![
                StageStep::new(AgentRole::ProductArchitect, "analyze_goal", QueueClass::Io),
                StageStep::new(AgentRole::SystemDesigner, "design", QueueClass::Cpu),
            ],
            generating: vec![StageStep::new(AgentRole::CodegenEngineer, "generate", QueueClass::Cpu)],
            evaluating: vec![
                StageStep::new(AgentRole::QaEvaluator, "evaluate", QueueClass::Cpu),
                StageStep::new(AgentRole::SecurityCompliance, "scan", QueueClass::Io),
            ],
        }
    }

    /// The candidate pipeline: control plus packaging and review.
    #[must_use]
    pub fn experimental() -> Self {
        let mut pipeline = Self::control();
        pipeline.version = PipelineVersion::Experimental;
        pipeline
            .generating
            .push(StageStep::new(AgentRole::DevOps, "package", QueueClass::Io));
        pipeline
            .evaluating
            .push(StageStep::new(AgentRole::Reviewer, "review", QueueClass::Io));
        pipeline
    }

    /// Steps of a phase.
    #[must_use]
    pub fn steps(&self, phase: Phase) -> &[StageStep] {
        match phase {
            Phase::Planning => &self.planning,
            Phase::Generating => &self.generating,
            Phase::Evaluating => &self.evaluating,
        }
    }

    /// Every role the pipeline calls, deduplicated, in order.
    #[must_use]
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles = Vec::new();
        for step in self.planning.iter().chain(&self.generating).chain(&self.evaluating) {
            if !roles.contains(&step.role) {
                roles.push(step.role);
            }
        }
        roles
    }
}

/// The two pipelines a canary compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSet {
    /// Control pipeline.
    pub control: PipelineDefinition,
    /// Experimental pipeline.
    pub experimental: PipelineDefinition,
}

impl Default for PipelineSet {
    fn default() -> Self {
        Self {
            control: PipelineDefinition::control(),
            experimental: PipelineDefinition::experimental(),
        }
    }
}

impl PipelineSet {
    /// The pipeline for a version.
    #[must_use]
    pub fn get(&self, version: PipelineVersion) -> &PipelineDefinition {
        match version {
            PipelineVersion::Control => &self.control,
            PipelineVersion::Experimental => &self.experimental,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_pipeline() {
        let pipeline = PipelineDefinition::control();
        let ids: Vec<_> = pipeline
            .planning
            .iter()
            .chain(&pipeline.generating)
            .chain(&pipeline.evaluating)
            .map(|s| s.step_id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "product_architect.analyze_goal",
                "system_designer.design",
                "codegen_engineer.generate",
                "qa_evaluator.evaluate",
                "security_compliance.scan",
            ]
        );
        assert_eq!(pipeline.steps(Phase::Planning)[0].queue_class, QueueClass::Io);
    }

    #[test]
    fn test_experimental_adds_steps() {
        let set = PipelineSet::default();
        let experimental = set.get(PipelineVersion::Experimental);
        assert_eq!(experimental.generating.len(), 2);
        assert_eq!(experimental.evaluating.last().unwrap().role, AgentRole::Reviewer);
        assert!(experimental.roles().contains(&AgentRole::DevOps));
        assert!(!set.get(PipelineVersion::Control).roles().contains(&AgentRole::DevOps));
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::Planning.next(), Some(Phase::Generating));
        assert_eq!(Phase::Generating.next(), Some(Phase::Evaluating));
        assert_eq!(Phase::Evaluating.next(), None);
    }
}
