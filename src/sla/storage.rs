use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::core::shared::schema::{
    business_calendars, contracts, sla_calculations, sla_template_rules, sla_templates,
    support_tickets,
};
use crate::core::shared::utils::DbPool;
use crate::sla::store::{next_calculated_at, ContractDirectory, SlaStore};
use crate::sla::{
    ConfigurationError, Contract, ContractType, Priority, SlaCalculation, SlaError, SlaTemplate,
    SlaTemplateRule, TicketSlaContext,
};

type DbConn = diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>;

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = business_calendars)]
pub struct DbBusinessCalendar {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub timezone: String,
    pub working_hours: serde_json::Value,
    pub holidays: serde_json::Value,
    pub skip_weekends: bool,
    pub skip_holidays: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = sla_templates)]
pub struct DbSlaTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub contract_type: String,
    pub is_default: bool,
    pub is_active: bool,
    pub calendar_id: Option<Uuid>,
    pub rules: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = sla_template_rules)]
pub struct DbSlaTemplateRule {
    pub id: Uuid,
    pub template_id: Uuid,
    pub priority: String,
    pub response_time_minutes: i64,
    pub solution_time_minutes: i64,
    pub escalation_time_minutes: Option<i64>,
    pub escalation_enabled: bool,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = sla_calculations)]
pub struct DbSlaCalculation {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub calculated_at: DateTime<Utc>,
    pub priority: String,
    pub response_due_at: DateTime<Utc>,
    pub solution_due_at: DateTime<Utc>,
    pub escalation_due_at: Option<DateTime<Utc>>,
    pub business_minutes_used: i64,
    pub calendar_id: Uuid,
    pub sla_template_id: Uuid,
    pub is_current: bool,
    pub recalculated_reason: Option<String>,
}

fn parse_priority(value: &str, row: &str) -> Result<Priority, SlaError> {
    value
        .parse()
        .map_err(|e: String| SlaError::Storage(format!("{row}: {e}")))
}

fn parse_contract_type(value: &str, row: &str) -> Result<ContractType, SlaError> {
    value
        .parse()
        .map_err(|e: String| SlaError::Storage(format!("{row}: {e}")))
}

pub fn db_calendar_to_calendar(db: DbBusinessCalendar) -> Result<BusinessCalendar, SlaError> {
    let working_hours = serde_json::from_value(db.working_hours).map_err(|e| {
        SlaError::Storage(format!(
            "business calendar '{}' has unreadable working hours: {e}",
            db.name
        ))
    })?;
    let holidays = serde_json::from_value(db.holidays).map_err(|e| {
        SlaError::Storage(format!(
            "business calendar '{}' has unreadable holidays: {e}",
            db.name
        ))
    })?;

    Ok(BusinessCalendar {
        id: db.id,
        name: db.name,
        description: db.description,
        timezone: db.timezone,
        working_hours,
        holidays,
        skip_weekends: db.skip_weekends,
        skip_holidays: db.skip_holidays,
        created_at: db.created_at,
        updated_at: db.updated_at,
    })
}

pub fn calendar_to_db(calendar: &BusinessCalendar) -> Result<DbBusinessCalendar, SlaError> {
    let to_json = |value: serde_json::Result<serde_json::Value>| {
        value.map_err(|e| SlaError::Internal(format!("calendar serialization failed: {e}")))
    };
    Ok(DbBusinessCalendar {
        id: calendar.id,
        name: calendar.name.clone(),
        description: calendar.description.clone(),
        timezone: calendar.timezone.clone(),
        working_hours: to_json(serde_json::to_value(&calendar.working_hours))?,
        holidays: to_json(serde_json::to_value(&calendar.holidays))?,
        skip_weekends: calendar.skip_weekends,
        skip_holidays: calendar.skip_holidays,
        created_at: calendar.created_at,
        updated_at: calendar.updated_at,
    })
}

pub fn db_template_to_template(db: DbSlaTemplate) -> Result<SlaTemplate, SlaError> {
    let contract_type = parse_contract_type(&db.contract_type, &format!("SLA template {}", db.id))?;
    Ok(SlaTemplate {
        id: db.id,
        name: db.name,
        description: db.description,
        contract_type,
        is_default: db.is_default,
        is_active: db.is_active,
        calendar_id: db.calendar_id,
        legacy_rules: db.rules,
        created_at: db.created_at,
        updated_at: db.updated_at,
    })
}

pub fn template_to_db(template: &SlaTemplate) -> DbSlaTemplate {
    DbSlaTemplate {
        id: template.id,
        name: template.name.clone(),
        description: template.description.clone(),
        contract_type: template.contract_type.to_string(),
        is_default: template.is_default,
        is_active: template.is_active,
        calendar_id: template.calendar_id,
        rules: template.legacy_rules.clone(),
        created_at: template.created_at,
        updated_at: template.updated_at,
    }
}

pub fn db_rule_to_rule(db: DbSlaTemplateRule) -> Result<SlaTemplateRule, SlaError> {
    let priority = parse_priority(&db.priority, &format!("SLA rule {}", db.id))?;
    let rule = SlaTemplateRule {
        id: db.id,
        template_id: db.template_id,
        priority,
        response_time_minutes: db.response_time_minutes,
        solution_time_minutes: db.solution_time_minutes,
        escalation_time_minutes: db.escalation_time_minutes,
        escalation_enabled: db.escalation_enabled,
    };
    rule.check_durations()
        .map_err(|reason| ConfigurationError::invalid_rule(&rule, reason))?;
    Ok(rule)
}

pub fn rule_to_db(rule: &SlaTemplateRule) -> DbSlaTemplateRule {
    DbSlaTemplateRule {
        id: rule.id,
        template_id: rule.template_id,
        priority: rule.priority.to_string(),
        response_time_minutes: rule.response_time_minutes,
        solution_time_minutes: rule.solution_time_minutes,
        escalation_time_minutes: rule.escalation_time_minutes,
        escalation_enabled: rule.escalation_enabled,
    }
}

pub fn db_calculation_to_calculation(db: DbSlaCalculation) -> Result<SlaCalculation, SlaError> {
    let priority = parse_priority(&db.priority, &format!("SLA calculation {}", db.id))?;
    Ok(SlaCalculation {
        id: db.id,
        ticket_id: db.ticket_id,
        calculated_at: db.calculated_at,
        priority,
        response_due_at: db.response_due_at,
        solution_due_at: db.solution_due_at,
        escalation_due_at: db.escalation_due_at,
        business_minutes_used: db.business_minutes_used,
        calendar_id: db.calendar_id,
        sla_template_id: db.sla_template_id,
        is_current: db.is_current,
        recalculated_reason: db.recalculated_reason,
    })
}

pub fn calculation_to_db(calculation: &SlaCalculation) -> DbSlaCalculation {
    DbSlaCalculation {
        id: calculation.id,
        ticket_id: calculation.ticket_id,
        calculated_at: calculation.calculated_at,
        priority: calculation.priority.to_string(),
        response_due_at: calculation.response_due_at,
        solution_due_at: calculation.solution_due_at,
        escalation_due_at: calculation.escalation_due_at,
        business_minutes_used: calculation.business_minutes_used,
        calendar_id: calculation.calendar_id,
        sla_template_id: calculation.sla_template_id,
        is_current: true,
        recalculated_reason: calculation.recalculated_reason.clone(),
    }
}

/// Postgres-backed store. Every call checks a connection out of the pool
/// and blocks, so async code calls it from `spawn_blocking`.
#[derive(Clone)]
pub struct PgSlaStore {
    pool: DbPool,
}

impl PgSlaStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConn, SlaError> {
        Ok(self.pool.get()?)
    }

    fn supersede_and_insert(
        conn: &mut PgConnection,
        row: &DbSlaCalculation,
    ) -> Result<(), DieselError> {
        conn.transaction(|conn| {
            let current: Vec<Uuid> = sla_calculations::table
                .filter(sla_calculations::ticket_id.eq(row.ticket_id))
                .filter(sla_calculations::is_current.eq(true))
                .select(sla_calculations::id)
                .for_update()
                .load(conn)?;

            if !current.is_empty() {
                diesel::update(
                    sla_calculations::table.filter(sla_calculations::id.eq_any(&current)),
                )
                .set(sla_calculations::is_current.eq(false))
                .execute(conn)?;
            }

            let latest: Option<DateTime<Utc>> = sla_calculations::table
                .filter(sla_calculations::ticket_id.eq(row.ticket_id))
                .select(diesel::dsl::max(sla_calculations::calculated_at))
                .first(conn)?;
            let row = DbSlaCalculation {
                calculated_at: next_calculated_at(latest),
                ..row.clone()
            };

            diesel::insert_into(sla_calculations::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
    }
}

impl SlaStore for PgSlaStore {
    fn get_template(&self, id: Uuid) -> Result<Option<SlaTemplate>, SlaError> {
        let mut conn = self.conn()?;
        sla_templates::table
            .find(id)
            .first::<DbSlaTemplate>(&mut conn)
            .optional()?
            .map(db_template_to_template)
            .transpose()
    }

    fn find_default_template(
        &self,
        contract_type: ContractType,
    ) -> Result<Option<SlaTemplate>, SlaError> {
        let mut conn = self.conn()?;
        sla_templates::table
            .filter(sla_templates::contract_type.eq(contract_type.as_str()))
            .filter(sla_templates::is_default.eq(true))
            .filter(sla_templates::is_active.eq(true))
            .order(sla_templates::created_at.asc())
            .first::<DbSlaTemplate>(&mut conn)
            .optional()?
            .map(db_template_to_template)
            .transpose()
    }

    fn list_templates(&self, only_active: bool) -> Result<Vec<SlaTemplate>, SlaError> {
        let mut conn = self.conn()?;
        let mut query = sla_templates::table.into_boxed();
        if only_active {
            query = query.filter(sla_templates::is_active.eq(true));
        }
        query
            .order(sla_templates::name.asc())
            .load::<DbSlaTemplate>(&mut conn)?
            .into_iter()
            .map(db_template_to_template)
            .collect()
    }

    fn get_rule(
        &self,
        template_id: Uuid,
        priority: Priority,
    ) -> Result<Option<SlaTemplateRule>, SlaError> {
        let mut conn = self.conn()?;
        sla_template_rules::table
            .filter(sla_template_rules::template_id.eq(template_id))
            .filter(sla_template_rules::priority.eq(priority.as_str()))
            .first::<DbSlaTemplateRule>(&mut conn)
            .optional()?
            .map(db_rule_to_rule)
            .transpose()
    }

    fn list_rules(&self, template_id: Uuid) -> Result<Vec<SlaTemplateRule>, SlaError> {
        let mut conn = self.conn()?;
        let mut rules = sla_template_rules::table
            .filter(sla_template_rules::template_id.eq(template_id))
            .load::<DbSlaTemplateRule>(&mut conn)?
            .into_iter()
            .map(db_rule_to_rule)
            .collect::<Result<Vec<_>, _>>()?;
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    fn insert_rules(&self, rules: &[SlaTemplateRule]) -> Result<(), SlaError> {
        if rules.is_empty() {
            return Ok(());
        }
        for rule in rules {
            rule.check_durations()
                .map_err(|reason| ConfigurationError::invalid_rule(rule, reason))?;
        }
        let rows: Vec<DbSlaTemplateRule> = rules.iter().map(rule_to_db).collect();
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            diesel::insert_into(sla_template_rules::table)
                .values(&rows)
                .execute(conn)
        })?;
        Ok(())
    }

    fn get_calendar(&self, id: Uuid) -> Result<Option<BusinessCalendar>, SlaError> {
        let mut conn = self.conn()?;
        business_calendars::table
            .find(id)
            .first::<DbBusinessCalendar>(&mut conn)
            .optional()?
            .map(db_calendar_to_calendar)
            .transpose()
    }

    fn find_calendar_by_name(&self, name: &str) -> Result<Option<BusinessCalendar>, SlaError> {
        let mut conn = self.conn()?;
        business_calendars::table
            .filter(business_calendars::name.eq(name))
            .first::<DbBusinessCalendar>(&mut conn)
            .optional()?
            .map(db_calendar_to_calendar)
            .transpose()
    }

    fn first_calendar(&self) -> Result<Option<BusinessCalendar>, SlaError> {
        let mut conn = self.conn()?;
        business_calendars::table
            .order(business_calendars::created_at.asc())
            .first::<DbBusinessCalendar>(&mut conn)
            .optional()?
            .map(db_calendar_to_calendar)
            .transpose()
    }

    fn list_calendars(&self) -> Result<Vec<BusinessCalendar>, SlaError> {
        let mut conn = self.conn()?;
        business_calendars::table
            .order(business_calendars::name.asc())
            .load::<DbBusinessCalendar>(&mut conn)?
            .into_iter()
            .map(db_calendar_to_calendar)
            .collect()
    }

    fn save_calendar(&self, calendar: &BusinessCalendar) -> Result<(), SlaError> {
        let row = calendar_to_db(calendar)?;
        let mut conn = self.conn()?;
        diesel::insert_into(business_calendars::table)
            .values(&row)
            .on_conflict(business_calendars::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    fn record_calculation(&self, calculation: &SlaCalculation) -> Result<(), SlaError> {
        let row = calculation_to_db(calculation);
        let mut conn = self.conn()?;
        match Self::supersede_and_insert(&mut conn, &row) {
            // A concurrent first calculation for the same ticket won the
            // one-current-row index; its row is now there to supersede.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
                debug!(
                    "Retrying SLA calculation insert for ticket {}: {}",
                    row.ticket_id,
                    info.message()
                );
                Self::supersede_and_insert(&mut conn, &row)?;
            }
            other => other?,
        }
        Ok(())
    }

    fn history(&self, ticket_id: Uuid) -> Result<Vec<SlaCalculation>, SlaError> {
        let mut conn = self.conn()?;
        sla_calculations::table
            .filter(sla_calculations::ticket_id.eq(ticket_id))
            .order(sla_calculations::calculated_at.desc())
            .load::<DbSlaCalculation>(&mut conn)?
            .into_iter()
            .map(db_calculation_to_calculation)
            .collect()
    }
}

impl ContractDirectory for PgSlaStore {
    fn get_contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, SlaError> {
        let mut conn = self.conn()?;
        let row: Option<(Uuid, String, Option<Uuid>)> = contracts::table
            .find(id)
            .select((
                contracts::id,
                contracts::contract_type,
                contracts::sla_template_id,
            ))
            .first(&mut conn)
            .optional()?;

        let Some((id, contract_type, sla_template_id)) = row else {
            return Ok(None);
        };
        let contract_type = match contract_type.parse::<ContractType>() {
            Ok(contract_type) => contract_type,
            Err(e) => {
                warn!("Contract {id} has unsupported type, applying support SLA: {e}");
                ContractType::Support
            }
        };
        Ok(Some(Contract {
            id,
            contract_type,
            sla_template_id,
        }))
    }

    fn get_ticket_context(&self, ticket_id: Uuid) -> Result<Option<TicketSlaContext>, SlaError> {
        let mut conn = self.conn()?;
        let row: Option<(Uuid, String, Option<Uuid>, DateTime<Utc>)> = support_tickets::table
            .find(ticket_id)
            .select((
                support_tickets::id,
                support_tickets::priority,
                support_tickets::contract_id,
                support_tickets::created_at,
            ))
            .first(&mut conn)
            .optional()?;

        row.map(|(ticket_id, priority, contract_id, created_at)| {
            Ok(TicketSlaContext {
                ticket_id,
                priority: parse_priority(&priority, &format!("Ticket {ticket_id}"))?,
                contract_id,
                created_at,
            })
        })
        .transpose()
    }
}
