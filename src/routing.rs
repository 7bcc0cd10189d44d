//! Routing gate: decides whether a verified caller may be transferred.

use crate::config::DepartmentConfig;
use crate::verification::{CallIntent, VerificationSession};

/// An authorized transfer destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub department: String,
    pub destination: String,
}

/// Why a transfer was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NotVerified,
    UnknownDepartment { requested: String, valid: Vec<String> },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotVerified => write!(f, "identity not verified"),
            Self::UnknownDepartment { requested, valid } => write!(
                f,
                "unknown department '{requested}'; valid departments: {}",
                valid.join(", ")
            ),
        }
    }
}

/// Result of a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Allow(Route),
    Deny(DenyReason),
}

impl RoutingDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Caller-facing reply for this decision.
    ///
    /// A denial for an unverified caller says nothing about whether the
    /// requested department exists.
    pub fn reply(&self) -> String {
        match self {
            Self::Allow(route) => format!("Connecting you to {}.", route.department),
            Self::Deny(DenyReason::NotVerified) => {
                "I need to verify your identity first.".to_string()
            }
            Self::Deny(DenyReason::UnknownDepartment { requested, valid }) => format!(
                "Unknown department '{requested}'. Available: {}.",
                valid.join(", ")
            ),
        }
    }

    /// Call-control intent for this decision, if any.
    pub fn intent(&self) -> Option<CallIntent> {
        match self {
            Self::Allow(route) => Some(CallIntent::Transfer {
                route: route.destination.clone(),
                is_final: true,
            }),
            Self::Deny(_) => None,
        }
    }
}

/// Static department → route table guarded by verification status.
#[derive(Debug, Clone)]
pub struct RoutingGate {
    departments: Vec<DepartmentConfig>,
}

impl RoutingGate {
    pub fn new(departments: &[DepartmentConfig]) -> Self {
        Self {
            departments: departments.to_vec(),
        }
    }

    /// Authorize a transfer. Verification is checked before the department
    /// name so unverified callers learn nothing about the table.
    pub fn authorize_transfer(
        &self,
        session: &VerificationSession,
        department: &str,
    ) -> RoutingDecision {
        if !session.is_verified() {
            tracing::info!(
                call_id = %session.call_id(),
                stage = %session.stage(),
                "Transfer denied: identity not verified"
            );
            return RoutingDecision::Deny(DenyReason::NotVerified);
        }

        let requested = department.trim().to_lowercase();
        match self.departments.iter().find(|d| d.name == requested) {
            Some(found) => {
                tracing::info!(
                    call_id = %session.call_id(),
                    department = %found.name,
                    "Transfer authorized"
                );
                RoutingDecision::Allow(Route {
                    department: found.name.clone(),
                    destination: found.route.clone(),
                })
            }
            None => RoutingDecision::Deny(DenyReason::UnknownDepartment {
                requested,
                valid: self.department_names(),
            }),
        }
    }

    pub fn department_names(&self) -> Vec<String> {
        self.departments.iter().map(|d| d.name.clone()).collect()
    }

    /// Public description of every department.
    pub fn describe_departments(&self) -> String {
        let listed = self
            .departments
            .iter()
            .map(|d| format!("{}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("; ");
        format!("Available departments: {listed}")
    }
}
