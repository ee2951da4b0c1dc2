use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::sla::legacy;
use crate::sla::store::{ContractDirectory, SlaStore};
use crate::sla::{ConfigurationError, ContractType, Priority, SlaError, SlaRule, SlaTemplate};

/// Finds the template, rule and calendar a ticket's SLA is computed with.
///
/// Pure reads. Never substitutes another priority's rule.
pub struct SlaResolver {
    store: Arc<dyn SlaStore>,
    directory: Arc<dyn ContractDirectory>,
    default_calendar_name: String,
}

impl SlaResolver {
    pub fn new(
        store: Arc<dyn SlaStore>,
        directory: Arc<dyn ContractDirectory>,
        default_calendar_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            default_calendar_name: default_calendar_name.into(),
        }
    }

    /// Without a contract the support default applies. A contract's direct
    /// template reference wins; a dangling one falls back to the default for
    /// the contract's type.
    pub fn resolve_template(&self, contract_id: Option<Uuid>) -> Result<SlaTemplate, SlaError> {
        let Some(contract_id) = contract_id else {
            return self.default_template(ContractType::Support);
        };

        let contract = self
            .directory
            .get_contract_by_id(contract_id)?
            .ok_or(ConfigurationError::ContractNotFound { contract_id })?;

        if let Some(template_id) = contract.sla_template_id {
            match self.store.get_template(template_id)? {
                Some(template) => return Ok(template),
                None => warn!(
                    "Contract {} references missing SLA template {}, using the default '{}' template",
                    contract.id, template_id, contract.contract_type
                ),
            }
        }

        self.default_template(contract.contract_type)
    }

    fn default_template(&self, contract_type: ContractType) -> Result<SlaTemplate, SlaError> {
        self.store
            .find_default_template(contract_type)?
            .ok_or_else(|| ConfigurationError::NoDefaultTemplate { contract_type }.into())
    }

    pub fn resolve_rule(
        &self,
        template_id: Uuid,
        priority: Priority,
    ) -> Result<Option<SlaRule>, SlaError> {
        if let Some(rule) = self.store.get_rule(template_id, priority)? {
            return Ok(Some(SlaRule::from(&rule)));
        }
        match self.store.get_template(template_id)? {
            Some(template) => Ok(legacy_rule(&template, priority)),
            None => Ok(None),
        }
    }

    /// Same as [`resolve_rule`](Self::resolve_rule) for an already loaded template.
    pub fn rule_for_template(
        &self,
        template: &SlaTemplate,
        priority: Priority,
    ) -> Result<Option<SlaRule>, SlaError> {
        if let Some(rule) = self.store.get_rule(template.id, priority)? {
            return Ok(Some(SlaRule::from(&rule)));
        }
        Ok(legacy_rule(template, priority))
    }

    pub fn resolve_calendar(&self, template_id: Uuid) -> Result<Option<BusinessCalendar>, SlaError> {
        match self.store.get_template(template_id)? {
            Some(template) => self.calendar_for_template(&template),
            None => self.fallback_calendar(),
        }
    }

    /// Template's own calendar, then the configured default by name, then the oldest calendar.
    pub fn calendar_for_template(
        &self,
        template: &SlaTemplate,
    ) -> Result<Option<BusinessCalendar>, SlaError> {
        if let Some(calendar_id) = template.calendar_id {
            match self.store.get_calendar(calendar_id)? {
                Some(calendar) => return Ok(Some(calendar)),
                None => warn!(
                    "SLA template '{}' references missing calendar {}, using fallback",
                    template.name, calendar_id
                ),
            }
        }
        self.fallback_calendar()
    }

    fn fallback_calendar(&self) -> Result<Option<BusinessCalendar>, SlaError> {
        if let Some(calendar) = self.store.find_calendar_by_name(&self.default_calendar_name)? {
            return Ok(Some(calendar));
        }
        let first = self.store.first_calendar()?;
        if let Some(calendar) = &first {
            warn!(
                "Business calendar '{}' not found, using '{}'",
                self.default_calendar_name, calendar.name
            );
        }
        Ok(first)
    }
}

fn legacy_rule(template: &SlaTemplate, priority: Priority) -> Option<SlaRule> {
    let rule = legacy::find_legacy_rule(template, priority);
    if rule.is_some() {
        debug!(
            "SLA template '{}' priority {} resolved from legacy inline rules",
            template.name, priority
        );
    }
    rule
}
