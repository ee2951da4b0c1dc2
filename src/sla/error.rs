use axum::{response::IntoResponse, Json};
use uuid::Uuid;

use crate::calendar::CalendarValidationError;
use crate::sla::{ContractType, Priority, SlaTemplateRule};

/// Missing or unusable SLA configuration. Always blocks the ticket operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("No default SLA template configured for contract type '{contract_type}'")]
    NoDefaultTemplate { contract_type: ContractType },

    #[error("Contract {contract_id} not found while resolving its SLA template")]
    ContractNotFound { contract_id: Uuid },

    #[error("SLA template '{template_name}' ({template_id}) has no rule for priority '{priority}'")]
    MissingRule {
        template_id: Uuid,
        template_name: String,
        priority: Priority,
    },

    #[error("No business calendar available for SLA template '{template_name}' ({template_id})")]
    NoCalendar {
        template_id: Uuid,
        template_name: String,
    },

    #[error("SLA rule for priority '{priority}' on template {template_id} is invalid: {reason}")]
    InvalidRule {
        template_id: Uuid,
        priority: Priority,
        reason: String,
    },

    #[error("SLA template '{template_name}' ({template_id}) gives priority '{priority}' a deadline of {minutes} business minutes, beyond any representable date")]
    DeadlineOutOfRange {
        template_id: Uuid,
        template_name: String,
        priority: Priority,
        minutes: i64,
    },
}

impl ConfigurationError {
    pub fn invalid_rule(rule: &SlaTemplateRule, reason: String) -> Self {
        Self::InvalidRule {
            template_id: rule.template_id,
            priority: rule.priority,
            reason,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SlaError {
    #[error("SLA configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("{0}")]
    InvalidCalendar(#[from] CalendarValidationError),
    #[error("Ticket not found: {0}")]
    TicketNotFound(Uuid),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<diesel::result::Error> for SlaError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for SlaError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl IntoResponse for SlaError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidCalendar(_) => StatusCode::BAD_REQUEST,
            Self::TicketNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_missing_rule_message_is_actionable() {
        let err = ConfigurationError::MissingRule {
            template_id: Uuid::nil(),
            template_name: "Suporte Padrão".to_string(),
            priority: Priority::Critical,
        };
        let message = err.to_string();
        assert!(message.contains("Suporte Padrão"));
        assert!(message.contains("critical"));
    }

    #[test]
    fn test_status_codes() {
        let config: SlaError = ConfigurationError::NoDefaultTemplate {
            contract_type: ContractType::Support,
        }
        .into();
        assert_eq!(config.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        let invalid: SlaError = ConfigurationError::invalid_rule(
            &SlaTemplateRule::new(Uuid::nil(), Priority::Low, 0, 60),
            "response time must be positive, got 0 minutes".to_string(),
        )
        .into();
        assert_eq!(invalid.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            SlaError::TicketNotFound(Uuid::nil()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SlaError::Storage("down".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
