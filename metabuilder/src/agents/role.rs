//! Agent roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role an agent fills in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Turns the goal into requirements.
    ProductArchitect,
    /// Turns requirements into a system design.
    SystemDesigner,
    /// Reviews designs and scans generated code for security issues.
    SecurityCompliance,
    /// Generates code.
    CodegenEngineer,
    /// Runs tests and scores the output.
    QaEvaluator,
    /// Packages and deploys artifacts.
    DevOps,
    /// Reviews the final output.
    Reviewer,
}

impl AgentRole {
    /// Every role.
    pub const ALL: [Self; 7] = [
        Self::ProductArchitect,
        Self::SystemDesigner,
        Self::SecurityCompliance,
        Self::CodegenEngineer,
        Self::QaEvaluator,
        Self::DevOps,
        Self::Reviewer,
    ];
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProductArchitect => write!(f, "product_architect"),
            Self::SystemDesigner => write!(f, "system_designer"),
            Self::SecurityCompliance => write!(f, "security_compliance"),
            Self::CodegenEngineer => write!(f, "codegen_engineer"),
            Self::QaEvaluator => write!(f, "qa_evaluator"),
            Self::DevOps => write!(f, "dev_ops"),
            Self::Reviewer => write!(f, "reviewer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_matches_serde() {
        for role in AgentRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }
}
