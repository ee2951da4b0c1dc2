//! SLA Calculation Orchestrator
//!
//! Resolves template, rule and calendar for a ticket, runs the business clock
//! for each deadline and appends the outcome to the calculation history.
//!
//! Resolution failures are fatal to the call. A failed history write is
//! logged and swallowed: the deadlines are still returned.

use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::{BusinessCalendar, BusinessClock};
use crate::core::config::EngineSettings;
use crate::sla::legacy;
use crate::sla::resolver::SlaResolver;
use crate::sla::store::{ContractDirectory, SlaStore};
use crate::sla::{
    ConfigurationError, SlaCalculation, SlaCalculationResult, SlaError, SlaTemplate,
    SlaTemplateWithRules, TicketSlaContext,
};

pub struct SlaEngine {
    store: Arc<dyn SlaStore>,
    directory: Arc<dyn ContractDirectory>,
    resolver: SlaResolver,
    clock: BusinessClock,
}

impl SlaEngine {
    pub fn new(
        store: Arc<dyn SlaStore>,
        directory: Arc<dyn ContractDirectory>,
        settings: &EngineSettings,
    ) -> Self {
        let resolver = SlaResolver::new(
            store.clone(),
            directory.clone(),
            settings.default_calendar_name.clone(),
        );
        Self {
            store,
            directory,
            resolver,
            clock: BusinessClock::new(settings.clock_settings()),
        }
    }

    pub fn resolver(&self) -> &SlaResolver {
        &self.resolver
    }

    pub fn clock(&self) -> &BusinessClock {
        &self.clock
    }

    pub fn calculate_ticket_sla(
        &self,
        context: &TicketSlaContext,
    ) -> Result<SlaCalculationResult, SlaError> {
        self.calculate_and_record(context, None)
    }

    /// Re-runs the calculation from the ticket's current attributes and
    /// stores `reason` on the new current row.
    pub fn recalculate_ticket_sla(
        &self,
        ticket_id: Uuid,
        reason: &str,
    ) -> Result<SlaCalculationResult, SlaError> {
        let context = self
            .directory
            .get_ticket_context(ticket_id)?
            .ok_or(SlaError::TicketNotFound(ticket_id))?;
        self.calculate_and_record(&context, Some(reason))
    }

    fn calculate_and_record(
        &self,
        context: &TicketSlaContext,
        reason: Option<&str>,
    ) -> Result<SlaCalculationResult, SlaError> {
        let result = self.compute(context)?;

        // The store restamps `calculated_at` when the row is committed.
        let calculation = SlaCalculation {
            id: Uuid::new_v4(),
            ticket_id: context.ticket_id,
            calculated_at: Utc::now(),
            priority: context.priority,
            response_due_at: result.response_due_at,
            solution_due_at: result.solution_due_at,
            escalation_due_at: result.escalation_due_at,
            business_minutes_used: 0,
            calendar_id: result.calendar_id,
            sla_template_id: result.template_id,
            is_current: true,
            recalculated_reason: reason.map(str::to_string),
        };

        match self.store.record_calculation(&calculation) {
            Ok(()) => info!(
                "SLA for ticket {} ({}): response {} solution {}",
                context.ticket_id,
                context.priority,
                result.response_due_at,
                result.solution_due_at
            ),
            Err(e) => warn!(
                "PersistenceWarning: SLA calculation for ticket {} was not recorded: {}",
                context.ticket_id, e
            ),
        }

        Ok(result)
    }

    /// Deadlines for `context` without touching the history.
    pub fn compute(&self, context: &TicketSlaContext) -> Result<SlaCalculationResult, SlaError> {
        let template = self.resolver.resolve_template(context.contract_id)?;

        let rule = self
            .resolver
            .rule_for_template(&template, context.priority)?
            .ok_or_else(|| ConfigurationError::MissingRule {
                template_id: template.id,
                template_name: template.name.clone(),
                priority: context.priority,
            })?;

        let calendar = self
            .resolver
            .calendar_for_template(&template)?
            .ok_or_else(|| ConfigurationError::NoCalendar {
                template_id: template.id,
                template_name: template.name.clone(),
            })?;

        // Every deadline counts from ticket creation, not from the previous deadline.
        let start = context.created_at;
        let due = |minutes: i64| {
            self.clock
                .add_business_minutes(start, minutes, &calendar)
                .map_err(|_| ConfigurationError::DeadlineOutOfRange {
                    template_id: template.id,
                    template_name: template.name.clone(),
                    priority: context.priority,
                    minutes,
                })
        };
        let response_due_at = due(rule.response_time_minutes)?;
        let solution_due_at = due(rule.solution_time_minutes)?;
        let escalation_due_at = rule.escalation_time_minutes.map(&due).transpose()?;

        Ok(SlaCalculationResult {
            response_due_at,
            solution_due_at,
            escalation_due_at,
            template_id: template.id,
            calendar_id: calendar.id,
        })
    }

    pub fn get_sla_history(&self, ticket_id: Uuid) -> Result<Vec<SlaCalculation>, SlaError> {
        self.store.history(ticket_id)
    }

    pub fn get_all_sla_templates(&self, only_active: bool) -> Result<Vec<SlaTemplate>, SlaError> {
        self.store.list_templates(only_active)
    }

    /// Normalized rules, or the legacy inline ones when the template has none.
    pub fn get_sla_template_with_rules(
        &self,
        id: Uuid,
    ) -> Result<Option<SlaTemplateWithRules>, SlaError> {
        let Some(template) = self.store.get_template(id)? else {
            return Ok(None);
        };
        let mut rules = self.store.list_rules(id)?;
        if rules.is_empty() {
            rules = legacy::legacy_template_rules(&template);
        }
        Ok(Some(SlaTemplateWithRules { template, rules }))
    }

    pub fn get_all_business_calendars(&self) -> Result<Vec<BusinessCalendar>, SlaError> {
        self.store.list_calendars()
    }

    pub fn get_business_calendar_with_config(
        &self,
        id: Uuid,
    ) -> Result<Option<BusinessCalendar>, SlaError> {
        self.store.get_calendar(id)
    }

    /// Administrative save path; invalid calendars never reach the store.
    pub fn save_business_calendar(
        &self,
        mut calendar: BusinessCalendar,
    ) -> Result<BusinessCalendar, SlaError> {
        calendar.validate()?;
        calendar.updated_at = Utc::now();
        self.store.save_calendar(&calendar)?;
        info!("Saved business calendar '{}' ({})", calendar.name, calendar.id);
        Ok(calendar)
    }

    /// Copies legacy inline rules into `sla_template_rules` for priorities
    /// that have no row yet. Returns how many rows were written.
    pub fn migrate_legacy_rules(&self, template_id: Uuid) -> Result<usize, SlaError> {
        let template = self
            .store
            .get_template(template_id)?
            .ok_or_else(|| SlaError::NotFound(format!("SLA template {template_id}")))?;
        let existing = self.store.list_rules(template_id)?;
        let pending = legacy::rules_to_migrate(&template, &existing);
        if !pending.is_empty() {
            self.store.insert_rules(&pending)?;
            info!(
                "Migrated {} legacy rules on SLA template '{}'",
                pending.len(),
                template.name
            );
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::WorkingHours;
    use crate::sla::store::MemorySlaStore;
    use crate::sla::{ContractType, Priority, SlaTemplateRule};
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemorySlaStore>,
        engine: SlaEngine,
        template: SlaTemplate,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySlaStore::new());
        let calendar = BusinessCalendar::new(
            "Comercial Brasil",
            "UTC",
            WorkingHours::weekdays("08:00", "18:00"),
        );
        let template = SlaTemplate::new("Suporte Padrão", ContractType::Support)
            .as_default()
            .with_calendar(calendar.id);
        store.add_calendar(calendar).unwrap();
        store.add_template(template.clone()).unwrap();
        store
            .add_rule(SlaTemplateRule::new(template.id, Priority::Medium, 60, 480).with_escalation(240))
            .unwrap();
        let engine = SlaEngine::new(store.clone(), store.clone(), &EngineSettings::default());
        Fixture {
            store,
            engine,
            template,
        }
    }

    fn monday_nine() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn context(ticket_id: Uuid, priority: Priority) -> TicketSlaContext {
        TicketSlaContext {
            ticket_id,
            priority,
            contract_id: None,
            created_at: monday_nine(),
        }
    }

    #[test]
    fn test_deadlines_are_independent_of_each_other() {
        let f = fixture();
        let result = f
            .engine
            .calculate_ticket_sla(&context(Uuid::new_v4(), Priority::Medium))
            .unwrap();

        assert_eq!(result.response_due_at, Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap());
        assert_eq!(result.escalation_due_at, Some(Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap()));
        // 540 minutes left on Monday, so 480 fits the same day.
        assert_eq!(result.solution_due_at, Utc.with_ymd_and_hms(2024, 6, 3, 17, 0, 0).unwrap());
        assert_eq!(result.template_id, f.template.id);
    }

    #[test]
    fn test_unreachable_deadline_is_configuration_error() {
        let f = fixture();
        f.store
            .add_rule(SlaTemplateRule::new(
                f.template.id,
                Priority::Critical,
                30,
                1_000_000_000_000,
            ))
            .unwrap();
        let ticket = Uuid::new_v4();

        let err = f
            .engine
            .calculate_ticket_sla(&context(ticket, Priority::Critical))
            .unwrap_err();
        assert!(matches!(
            err,
            SlaError::Configuration(ConfigurationError::DeadlineOutOfRange {
                priority: Priority::Critical,
                minutes: 1_000_000_000_000,
                ..
            })
        ));
        assert!(f.engine.get_sla_history(ticket).unwrap().is_empty());
    }

    #[test]
    fn test_history_failure_does_not_fail_calculation() {
        let f = fixture();
        let ticket = Uuid::new_v4();
        f.store.fail_history_writes(true);

        let result = f.engine.calculate_ticket_sla(&context(ticket, Priority::Medium));
        assert!(result.is_ok());
        assert!(f.engine.get_sla_history(ticket).unwrap().is_empty());
    }

    #[test]
    fn test_recalculation_records_reason_and_new_priority() {
        let f = fixture();
        let ticket = Uuid::new_v4();
        f.store
            .add_rule(SlaTemplateRule::new(f.template.id, Priority::High, 30, 240))
            .unwrap();
        f.engine
            .calculate_ticket_sla(&context(ticket, Priority::Medium))
            .unwrap();
        f.store.upsert_ticket(context(ticket, Priority::High)).unwrap();

        let result = f
            .engine
            .recalculate_ticket_sla(ticket, "priority changed to high")
            .unwrap();
        assert_eq!(result.escalation_due_at, None);

        let history = f.engine.get_sla_history(ticket).unwrap();
        assert_eq!(history.len(), 2);
        let current: Vec<_> = history.iter().filter(|c| c.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].priority, Priority::High);
        assert_eq!(
            current[0].recalculated_reason.as_deref(),
            Some("priority changed to high")
        );
        assert!(history
            .iter()
            .any(|c| !c.is_current && c.priority == Priority::Medium && c.recalculated_reason.is_none()));
    }

    #[test]
    fn test_recalculate_unknown_ticket() {
        let f = fixture();
        let ticket = Uuid::new_v4();
        let err = f.engine.recalculate_ticket_sla(ticket, "manual").unwrap_err();
        assert!(matches!(err, SlaError::TicketNotFound(id) if id == ticket));
    }

    #[test]
    fn test_missing_calendar_is_configuration_error() {
        let store = Arc::new(MemorySlaStore::new());
        let template = SlaTemplate::new("Sem calendário", ContractType::Support).as_default();
        store.add_template(template.clone()).unwrap();
        store
            .add_rule(SlaTemplateRule::new(template.id, Priority::Low, 60, 600))
            .unwrap();
        let engine = SlaEngine::new(store.clone(), store.clone(), &EngineSettings::default());

        let err = engine
            .calculate_ticket_sla(&context(Uuid::new_v4(), Priority::Low))
            .unwrap_err();
        assert!(matches!(
            err,
            SlaError::Configuration(ConfigurationError::NoCalendar { .. })
        ));
        assert!(err.to_string().contains("Sem calendário"));
    }

    #[test]
    fn test_save_calendar_validates_first() {
        let f = fixture();
        let mut hours = WorkingHours::weekdays("08:00", "18:00");
        hours.friday.end = "07:00".to_string();
        let broken = BusinessCalendar::new("Quebrado", "UTC", hours);

        let err = f.engine.save_business_calendar(broken.clone()).unwrap_err();
        assert!(matches!(err, SlaError::InvalidCalendar(_)));
        assert!(f
            .engine
            .get_business_calendar_with_config(broken.id)
            .unwrap()
            .is_none());

        let fine = BusinessCalendar::new("Plantão", "America/Sao_Paulo", WorkingHours::weekdays("00:00", "23:59"));
        let saved = f.engine.save_business_calendar(fine).unwrap();
        assert_eq!(
            f.engine.get_business_calendar_with_config(saved.id).unwrap(),
            Some(saved)
        );
        assert_eq!(f.engine.get_all_business_calendars().unwrap().len(), 2);
    }

    #[test]
    fn test_migrate_legacy_rules_once() {
        let f = fixture();
        let legacy = SlaTemplate::new("Legado", ContractType::Maintenance).with_legacy_rules(json!([
            { "priority": "low", "responseTimeMinutes": 480, "solutionTimeMinutes": 2400 },
            { "priority": "critical", "responseTimeMinutes": 15, "solutionTimeMinutes": 120,
              "escalationTimeMinutes": 60 }
        ]));
        f.store.add_template(legacy.clone()).unwrap();

        let listed = f.engine.get_sla_template_with_rules(legacy.id).unwrap().unwrap();
        assert_eq!(listed.rules.len(), 2);

        assert_eq!(f.engine.migrate_legacy_rules(legacy.id).unwrap(), 2);
        assert_eq!(f.engine.migrate_legacy_rules(legacy.id).unwrap(), 0);

        let critical = f.store.get_rule(legacy.id, Priority::Critical).unwrap().unwrap();
        assert!(critical.escalation_enabled);
        assert_eq!(critical.escalation_time_minutes, Some(60));
    }

    #[test]
    fn test_migrate_unknown_template() {
        let f = fixture();
        let err = f.engine.migrate_legacy_rules(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SlaError::NotFound(_)));
    }

    #[test]
    fn test_template_query_surface() {
        let f = fixture();
        let mut retired = SlaTemplate::new("Antigo", ContractType::Support);
        retired.is_active = false;
        f.store.add_template(retired).unwrap();

        assert_eq!(f.engine.get_all_sla_templates(true).unwrap().len(), 1);
        assert_eq!(f.engine.get_all_sla_templates(false).unwrap().len(), 2);

        let with_rules = f
            .engine
            .get_sla_template_with_rules(f.template.id)
            .unwrap()
            .unwrap();
        assert_eq!(with_rules.rules.len(), 1);
        assert!(f
            .engine
            .get_sla_template_with_rules(Uuid::new_v4())
            .unwrap()
            .is_none());
    }
}
