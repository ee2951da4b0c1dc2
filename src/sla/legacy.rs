//! Legacy inline SLA rules
//!
//! Templates created before `sla_template_rules` existed carry their rules in
//! the `sla_templates.rules` JSON column, either as an array or as a string
//! holding the serialized array. This module is the only reader of that blob:
//! the resolver falls back to it when no normalized row exists, and
//! [`rules_to_migrate`] turns it into normalized rows once.

use log::warn;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::sla::{Priority, SlaRule, SlaTemplate, SlaTemplateRule};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRule {
    priority: String,
    #[serde(alias = "response_time_minutes")]
    response_time_minutes: i64,
    #[serde(alias = "solution_time_minutes")]
    solution_time_minutes: i64,
    #[serde(default, alias = "escalation_time_minutes")]
    escalation_time_minutes: Option<i64>,
    #[serde(default, alias = "escalation_enabled")]
    escalation_enabled: Option<bool>,
}

impl LegacyRule {
    fn to_template_rule(&self, template_id: Uuid) -> Option<SlaTemplateRule> {
        let priority = match self.priority.parse::<Priority>() {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping legacy SLA rule on template {template_id}: {e}");
                return None;
            }
        };
        let rule = SlaTemplateRule {
            id: Uuid::new_v4(),
            template_id,
            priority,
            response_time_minutes: self.response_time_minutes,
            solution_time_minutes: self.solution_time_minutes,
            escalation_time_minutes: self.escalation_time_minutes,
            escalation_enabled: self
                .escalation_enabled
                .unwrap_or(self.escalation_time_minutes.is_some()),
        };
        if let Err(reason) = rule.check_durations() {
            warn!("Skipping legacy SLA rule '{priority}' on template {template_id}: {reason}");
            return None;
        }
        Some(rule)
    }
}

fn parse_entries(template: &SlaTemplate) -> Vec<LegacyRule> {
    let entries: Vec<Value> = match &template.legacy_rules {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Vec<Value>>(text) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    "Legacy rules on SLA template '{}' are not a JSON array: {e}",
                    template.name
                );
                return Vec::new();
            }
        },
        Some(other) => {
            warn!(
                "Legacy rules on SLA template '{}' have unexpected shape: {other}",
                template.name
            );
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<LegacyRule>(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(
                    "Skipping malformed legacy rule on SLA template '{}': {e}",
                    template.name
                );
                None
            }
        })
        .collect()
}

/// Every usable legacy rule on the template, first entry per priority wins.
pub fn legacy_template_rules(template: &SlaTemplate) -> Vec<SlaTemplateRule> {
    let mut rules: Vec<SlaTemplateRule> = Vec::new();
    for entry in parse_entries(template) {
        if let Some(rule) = entry.to_template_rule(template.id) {
            if !rules.iter().any(|r| r.priority == rule.priority) {
                rules.push(rule);
            }
        }
    }
    rules.sort_by_key(|r| r.priority);
    rules
}

/// The legacy entry for exactly `priority`, if any.
pub fn find_legacy_rule(template: &SlaTemplate, priority: Priority) -> Option<SlaRule> {
    legacy_template_rules(template)
        .iter()
        .find(|r| r.priority == priority)
        .map(SlaRule::from)
}

/// Legacy rules whose priority has no normalized row yet.
pub fn rules_to_migrate(
    template: &SlaTemplate,
    existing: &[SlaTemplateRule],
) -> Vec<SlaTemplateRule> {
    legacy_template_rules(template)
        .into_iter()
        .filter(|rule| !existing.iter().any(|e| e.priority == rule.priority))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::ContractType;
    use serde_json::json;

    fn template_with(rules: Value) -> SlaTemplate {
        SlaTemplate::new("Legado", ContractType::Maintenance).with_legacy_rules(rules)
    }

    #[test]
    fn test_structured_array() {
        let template = template_with(json!([
            { "priority": "low", "responseTimeMinutes": 480, "solutionTimeMinutes": 2400 },
            { "priority": "high", "responseTimeMinutes": 60, "solutionTimeMinutes": 480,
              "escalationTimeMinutes": 240 }
        ]));

        let high = find_legacy_rule(&template, Priority::High).unwrap();
        assert_eq!(high.response_time_minutes, 60);
        assert_eq!(high.escalation_time_minutes, Some(240));

        let low = find_legacy_rule(&template, Priority::Low).unwrap();
        assert_eq!(low.escalation_time_minutes, None);
    }

    #[test]
    fn test_string_encoded_array_with_snake_case_keys() {
        let blob = r#"[{"priority":"urgent","response_time_minutes":15,"solution_time_minutes":120}]"#;
        let template = template_with(Value::String(blob.to_string()));

        let urgent = find_legacy_rule(&template, Priority::Urgent).unwrap();
        assert_eq!(urgent.solution_time_minutes, 120);
    }

    #[test]
    fn test_no_cross_priority_match() {
        let template = template_with(json!([
            { "priority": "low", "responseTimeMinutes": 480, "solutionTimeMinutes": 2400 },
            { "priority": "medium", "responseTimeMinutes": 240, "solutionTimeMinutes": 960 }
        ]));
        assert!(find_legacy_rule(&template, Priority::Critical).is_none());
        assert!(find_legacy_rule(&template, Priority::High).is_none());
    }

    #[test]
    fn test_escalation_can_be_disabled_explicitly() {
        let template = template_with(json!([
            { "priority": "high", "responseTimeMinutes": 60, "solutionTimeMinutes": 480,
              "escalationTimeMinutes": 240, "escalationEnabled": false }
        ]));
        let high = find_legacy_rule(&template, Priority::High).unwrap();
        assert_eq!(high.escalation_time_minutes, None);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let template = template_with(json!([
            { "priority": "Critical", "responseTimeMinutes": 5, "solutionTimeMinutes": 60 },
            { "priority": "high" },
            "garbage",
            { "priority": "medium", "responseTimeMinutes": 240, "solutionTimeMinutes": 960 }
        ]));
        let rules = legacy_template_rules(&template);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority, Priority::Medium);
        assert_eq!(rules[0].template_id, template.id);
    }

    #[test]
    fn test_non_positive_minutes_are_skipped() {
        let template = template_with(json!([
            { "priority": "low", "responseTimeMinutes": 0, "solutionTimeMinutes": 2400 },
            { "priority": "medium", "responseTimeMinutes": 240, "solutionTimeMinutes": -1 },
            { "priority": "urgent", "responseTimeMinutes": 15, "solutionTimeMinutes": 120,
              "escalationTimeMinutes": 0 },
            { "priority": "high", "responseTimeMinutes": 60, "solutionTimeMinutes": 480 }
        ]));
        let rules = legacy_template_rules(&template);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority, Priority::High);
        assert!(find_legacy_rule(&template, Priority::Low).is_none());
        assert!(rules_to_migrate(&template, &[]).iter().all(|r| r.priority == Priority::High));
    }

    #[test]
    fn test_unparseable_blob_yields_nothing() {
        assert!(legacy_template_rules(&template_with(json!("not json"))).is_empty());
        assert!(legacy_template_rules(&template_with(json!({ "low": 10 }))).is_empty());
        assert!(legacy_template_rules(&SlaTemplate::new("Empty", ContractType::Support)).is_empty());
    }

    #[test]
    fn test_rules_to_migrate_skips_normalized_priorities() {
        let template = template_with(json!([
            { "priority": "low", "responseTimeMinutes": 480, "solutionTimeMinutes": 2400 },
            { "priority": "high", "responseTimeMinutes": 60, "solutionTimeMinutes": 480 }
        ]));
        let existing = vec![SlaTemplateRule::new(template.id, Priority::Low, 300, 1200)];

        let pending = rules_to_migrate(&template, &existing);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, Priority::High);
    }
}
