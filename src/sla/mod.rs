pub mod engine;
pub mod error;
pub mod handlers;
pub mod legacy;
pub mod resolver;
pub mod storage;
pub mod store;

use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::state::AppState;

pub use engine::SlaEngine;
pub use error::{ConfigurationError, SlaError};
pub use handlers::*;
pub use resolver::SlaResolver;
pub use storage::PgSlaStore;
pub use store::{ContractDirectory, MemorySlaStore, SlaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    /// Exact match only; no aliases, so a rule is never picked for a neighbouring priority.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Support,
    Maintenance,
    Development,
    Consulting,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Support => "support",
            ContractType::Maintenance => "maintenance",
            ContractType::Development => "development",
            ContractType::Consulting => "consulting",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "support" => Ok(ContractType::Support),
            "maintenance" => Ok(ContractType::Maintenance),
            "development" => Ok(ContractType::Development),
            "consulting" => Ok(ContractType::Consulting),
            _ => Err(format!("Invalid contract type: {s}")),
        }
    }
}

/// What the contract subsystem tells us about a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub contract_type: ContractType,
    pub sla_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub contract_type: ContractType,
    pub is_default: bool,
    pub is_active: bool,
    pub calendar_id: Option<Uuid>,
    /// Inline rule array from before `sla_template_rules` existed. Read only through `legacy`.
    pub legacy_rules: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SlaTemplate {
    pub fn new(name: &str, contract_type: ContractType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            contract_type,
            is_default: false,
            is_active: true,
            calendar_id: None,
            legacy_rules: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_calendar(mut self, calendar_id: Uuid) -> Self {
        self.calendar_id = Some(calendar_id);
        self
    }

    pub fn with_legacy_rules(mut self, rules: serde_json::Value) -> Self {
        self.legacy_rules = Some(rules);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaTemplateRule {
    pub id: Uuid,
    pub template_id: Uuid,
    pub priority: Priority,
    pub response_time_minutes: i64,
    pub solution_time_minutes: i64,
    pub escalation_time_minutes: Option<i64>,
    pub escalation_enabled: bool,
}

impl SlaTemplateRule {
    pub fn new(template_id: Uuid, priority: Priority, response: i64, solution: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id,
            priority,
            response_time_minutes: response,
            solution_time_minutes: solution,
            escalation_time_minutes: None,
            escalation_enabled: false,
        }
    }

    pub fn with_escalation(mut self, minutes: i64) -> Self {
        self.escalation_time_minutes = Some(minutes);
        self.escalation_enabled = true;
        self
    }

    /// Every configured duration must be a positive number of minutes.
    pub fn check_durations(&self) -> Result<(), String> {
        let durations = [
            ("response", Some(self.response_time_minutes)),
            ("solution", Some(self.solution_time_minutes)),
            ("escalation", self.escalation_time_minutes),
        ];
        for (name, minutes) in durations {
            if let Some(minutes) = minutes.filter(|m| *m <= 0) {
                return Err(format!("{name} time must be positive, got {minutes} minutes"));
            }
        }
        Ok(())
    }
}

/// The minute triple a calculation runs with, whichever representation it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaRule {
    pub priority: Priority,
    pub response_time_minutes: i64,
    pub solution_time_minutes: i64,
    /// Already gated by `escalation_enabled`.
    pub escalation_time_minutes: Option<i64>,
}

impl From<&SlaTemplateRule> for SlaRule {
    fn from(rule: &SlaTemplateRule) -> Self {
        Self {
            priority: rule.priority,
            response_time_minutes: rule.response_time_minutes,
            solution_time_minutes: rule.solution_time_minutes,
            escalation_time_minutes: rule
                .escalation_time_minutes
                .filter(|_| rule.escalation_enabled),
        }
    }
}

/// One row of the calculation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaCalculation {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub calculated_at: DateTime<Utc>,
    pub priority: Priority,
    pub response_due_at: DateTime<Utc>,
    pub solution_due_at: DateTime<Utc>,
    pub escalation_due_at: Option<DateTime<Utc>>,
    pub business_minutes_used: i64,
    pub calendar_id: Uuid,
    pub sla_template_id: Uuid,
    pub is_current: bool,
    pub recalculated_reason: Option<String>,
}

/// Delivered by ticket create/update events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSlaContext {
    pub ticket_id: Uuid,
    pub priority: Priority,
    pub contract_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaCalculationResult {
    pub response_due_at: DateTime<Utc>,
    pub solution_due_at: DateTime<Utc>,
    pub escalation_due_at: Option<DateTime<Utc>>,
    pub template_id: Uuid,
    pub calendar_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaTemplateWithRules {
    pub template: SlaTemplate,
    pub rules: Vec<SlaTemplateRule>,
}

pub fn configure_sla_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sla/calculate", post(handle_calculate_ticket_sla))
        .route(
            "/api/sla/tickets/:id/recalculate",
            post(handle_recalculate_ticket_sla),
        )
        .route("/api/sla/tickets/:id/history", get(handle_get_sla_history))
        .route("/api/sla/templates", get(handle_list_templates))
        .route("/api/sla/templates/:id", get(handle_get_template))
        .route(
            "/api/sla/templates/:id/migrate-rules",
            post(handle_migrate_legacy_rules),
        )
        .route("/api/sla/calendars", get(handle_list_calendars))
        .route("/api/sla/calendars", put(handle_save_calendar))
        .route("/api/sla/calendars/:id", get(handle_get_calendar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_round_trips_through_strings() {
        for priority in Priority::ALL {
            assert_eq!(priority.as_str().parse::<Priority>(), Ok(priority));
        }
        assert!("Critical".parse::<Priority>().is_err());
        assert!("normal".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_serializes_lowercase() {
        let json = serde_json::to_value(Priority::Urgent).unwrap();
        assert_eq!(json, serde_json::json!("urgent"));
    }

    #[test]
    fn test_contract_type_parse() {
        assert_eq!("maintenance".parse::<ContractType>(), Ok(ContractType::Maintenance));
        assert!("retail".parse::<ContractType>().is_err());
    }

    #[test]
    fn test_disabled_escalation_is_dropped() {
        let template_id = Uuid::new_v4();
        let mut rule = SlaTemplateRule::new(template_id, Priority::High, 60, 240).with_escalation(120);
        assert_eq!(SlaRule::from(&rule).escalation_time_minutes, Some(120));

        rule.escalation_enabled = false;
        assert_eq!(SlaRule::from(&rule).escalation_time_minutes, None);
    }

    #[test]
    fn test_rule_durations_must_be_positive() {
        let template_id = Uuid::new_v4();
        assert!(SlaTemplateRule::new(template_id, Priority::Low, 480, 2400)
            .check_durations()
            .is_ok());

        let zero_response = SlaTemplateRule::new(template_id, Priority::Low, 0, 2400);
        assert!(zero_response.check_durations().unwrap_err().contains("response"));

        let negative_solution = SlaTemplateRule::new(template_id, Priority::Low, 480, -60);
        assert!(negative_solution.check_durations().unwrap_err().contains("-60"));

        let zero_escalation = SlaTemplateRule::new(template_id, Priority::Low, 480, 2400).with_escalation(0);
        assert!(zero_escalation.check_durations().unwrap_err().contains("escalation"));
    }
}
