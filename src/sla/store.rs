use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::sla::{
    ConfigurationError, Contract, ContractType, Priority, SlaCalculation, SlaError, SlaTemplate,
    SlaTemplateRule, TicketSlaContext,
};

/// Persistence boundary for templates, rules, calendars and the calculation history.
///
/// Implementations are synchronous; async callers go through `spawn_blocking`.
pub trait SlaStore: Send + Sync {
    fn get_template(&self, id: Uuid) -> Result<Option<SlaTemplate>, SlaError>;

    /// The active template flagged `is_default` for `contract_type`.
    fn find_default_template(
        &self,
        contract_type: ContractType,
    ) -> Result<Option<SlaTemplate>, SlaError>;

    fn list_templates(&self, only_active: bool) -> Result<Vec<SlaTemplate>, SlaError>;

    fn get_rule(
        &self,
        template_id: Uuid,
        priority: Priority,
    ) -> Result<Option<SlaTemplateRule>, SlaError>;

    fn list_rules(&self, template_id: Uuid) -> Result<Vec<SlaTemplateRule>, SlaError>;

    /// Rejects rules with non-positive durations before writing anything.
    fn insert_rules(&self, rules: &[SlaTemplateRule]) -> Result<(), SlaError>;

    fn get_calendar(&self, id: Uuid) -> Result<Option<BusinessCalendar>, SlaError>;

    fn find_calendar_by_name(&self, name: &str) -> Result<Option<BusinessCalendar>, SlaError>;

    /// Oldest calendar, used when nothing more specific exists.
    fn first_calendar(&self) -> Result<Option<BusinessCalendar>, SlaError>;

    fn list_calendars(&self) -> Result<Vec<BusinessCalendar>, SlaError>;

    /// Insert or replace by id. Callers validate first.
    fn save_calendar(&self, calendar: &BusinessCalendar) -> Result<(), SlaError>;

    /// Flips the ticket's current row to `is_current = false` and inserts
    /// `calculation` as the new current row, as one atomic unit.
    ///
    /// `calculated_at` is restamped inside that unit with
    /// [`next_calculated_at`], so the current row is always the newest one
    /// in [`SlaStore::history`].
    fn record_calculation(&self, calculation: &SlaCalculation) -> Result<(), SlaError>;

    /// Every calculation for the ticket, most recent first.
    fn history(&self, ticket_id: Uuid) -> Result<Vec<SlaCalculation>, SlaError>;
}

/// Commit time for a new history row: now at database precision, or one
/// microsecond past the ticket's latest row if the clock has not moved on.
pub fn next_calculated_at(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match latest {
        Some(latest) if latest >= now => latest + Duration::microseconds(1),
        _ => now,
    }
}

/// Lookups served by the ticket/contract subsystem.
pub trait ContractDirectory: Send + Sync {
    fn get_contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, SlaError>;

    fn get_ticket_context(&self, ticket_id: Uuid) -> Result<Option<TicketSlaContext>, SlaError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    templates: Vec<SlaTemplate>,
    rules: Vec<SlaTemplateRule>,
    calendars: Vec<BusinessCalendar>,
    calculations: Vec<SlaCalculation>,
    contracts: HashMap<Uuid, Contract>,
    tickets: HashMap<Uuid, TicketSlaContext>,
}

/// In-process store for tests and embedding. One lock guards everything, so
/// `record_calculation` is atomic.
#[derive(Debug, Default)]
pub struct MemorySlaStore {
    state: RwLock<MemoryState>,
    fail_history_writes: AtomicBool,
}

impl MemorySlaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, SlaError> {
        self.state
            .read()
            .map_err(|e| SlaError::Internal(format!("SLA store lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, SlaError> {
        self.state
            .write()
            .map_err(|e| SlaError::Internal(format!("SLA store lock poisoned: {e}")))
    }

    pub fn add_template(&self, template: SlaTemplate) -> Result<(), SlaError> {
        let mut state = self.write()?;
        state.templates.retain(|t| t.id != template.id);
        state.templates.push(template);
        Ok(())
    }

    pub fn add_rule(&self, rule: SlaTemplateRule) -> Result<(), SlaError> {
        self.insert_rules(std::slice::from_ref(&rule))
    }

    /// Seeds a calendar without validation.
    pub fn add_calendar(&self, calendar: BusinessCalendar) -> Result<(), SlaError> {
        self.save_calendar(&calendar)
    }

    pub fn add_contract(&self, contract: Contract) -> Result<(), SlaError> {
        self.write()?.contracts.insert(contract.id, contract);
        Ok(())
    }

    pub fn upsert_ticket(&self, ticket: TicketSlaContext) -> Result<(), SlaError> {
        self.write()?.tickets.insert(ticket.ticket_id, ticket);
        Ok(())
    }

    /// Makes every `record_calculation` fail, as a database would when the
    /// ticket row is not committed yet.
    pub fn fail_history_writes(&self, fail: bool) {
        self.fail_history_writes.store(fail, Ordering::SeqCst);
    }
}

impl SlaStore for MemorySlaStore {
    fn get_template(&self, id: Uuid) -> Result<Option<SlaTemplate>, SlaError> {
        Ok(self.read()?.templates.iter().find(|t| t.id == id).cloned())
    }

    fn find_default_template(
        &self,
        contract_type: ContractType,
    ) -> Result<Option<SlaTemplate>, SlaError> {
        Ok(self
            .read()?
            .templates
            .iter()
            .find(|t| t.is_default && t.is_active && t.contract_type == contract_type)
            .cloned())
    }

    fn list_templates(&self, only_active: bool) -> Result<Vec<SlaTemplate>, SlaError> {
        let mut templates: Vec<SlaTemplate> = self
            .read()?
            .templates
            .iter()
            .filter(|t| !only_active || t.is_active)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    fn get_rule(
        &self,
        template_id: Uuid,
        priority: Priority,
    ) -> Result<Option<SlaTemplateRule>, SlaError> {
        Ok(self
            .read()?
            .rules
            .iter()
            .find(|r| r.template_id == template_id && r.priority == priority)
            .cloned())
    }

    fn list_rules(&self, template_id: Uuid) -> Result<Vec<SlaTemplateRule>, SlaError> {
        let mut rules: Vec<SlaTemplateRule> = self
            .read()?
            .rules
            .iter()
            .filter(|r| r.template_id == template_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    fn insert_rules(&self, rules: &[SlaTemplateRule]) -> Result<(), SlaError> {
        let mut state = self.write()?;
        for rule in rules {
            rule.check_durations()
                .map_err(|reason| ConfigurationError::invalid_rule(rule, reason))?;
            let exists = state
                .rules
                .iter()
                .any(|r| r.template_id == rule.template_id && r.priority == rule.priority);
            if exists {
                return Err(SlaError::Storage(format!(
                    "duplicate rule for template {} priority {}",
                    rule.template_id, rule.priority
                )));
            }
        }
        state.rules.extend(rules.iter().cloned());
        Ok(())
    }

    fn get_calendar(&self, id: Uuid) -> Result<Option<BusinessCalendar>, SlaError> {
        Ok(self.read()?.calendars.iter().find(|c| c.id == id).cloned())
    }

    fn find_calendar_by_name(&self, name: &str) -> Result<Option<BusinessCalendar>, SlaError> {
        Ok(self
            .read()?
            .calendars
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    fn first_calendar(&self) -> Result<Option<BusinessCalendar>, SlaError> {
        Ok(self.read()?.calendars.first().cloned())
    }

    fn list_calendars(&self) -> Result<Vec<BusinessCalendar>, SlaError> {
        let mut calendars = self.read()?.calendars.clone();
        calendars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(calendars)
    }

    fn save_calendar(&self, calendar: &BusinessCalendar) -> Result<(), SlaError> {
        let mut state = self.write()?;
        if state
            .calendars
            .iter()
            .any(|c| c.name == calendar.name && c.id != calendar.id)
        {
            return Err(SlaError::Storage(format!(
                "business calendar name '{}' already in use",
                calendar.name
            )));
        }
        match state.calendars.iter_mut().find(|c| c.id == calendar.id) {
            Some(existing) => *existing = calendar.clone(),
            None => state.calendars.push(calendar.clone()),
        }
        Ok(())
    }

    fn record_calculation(&self, calculation: &SlaCalculation) -> Result<(), SlaError> {
        if self.fail_history_writes.load(Ordering::SeqCst) {
            return Err(SlaError::Storage(format!(
                "ticket {} is not visible to the history store",
                calculation.ticket_id
            )));
        }

        let mut state = self.write()?;
        let mut latest = None;
        for row in state
            .calculations
            .iter_mut()
            .filter(|c| c.ticket_id == calculation.ticket_id)
        {
            row.is_current = false;
            latest = latest.max(Some(row.calculated_at));
        }
        let mut row = calculation.clone();
        row.is_current = true;
        row.calculated_at = next_calculated_at(latest);
        state.calculations.push(row);
        Ok(())
    }

    fn history(&self, ticket_id: Uuid) -> Result<Vec<SlaCalculation>, SlaError> {
        let mut rows: Vec<SlaCalculation> = self
            .read()?
            .calculations
            .iter()
            .rev()
            .filter(|c| c.ticket_id == ticket_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at));
        Ok(rows)
    }
}

impl ContractDirectory for MemorySlaStore {
    fn get_contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, SlaError> {
        Ok(self.read()?.contracts.get(&id).cloned())
    }

    fn get_ticket_context(&self, ticket_id: Uuid) -> Result<Option<TicketSlaContext>, SlaError> {
        Ok(self.read()?.tickets.get(&ticket_id).cloned())
    }
}
