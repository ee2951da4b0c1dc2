use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::core::shared::state::AppState;
use crate::sla::{
    SlaCalculation, SlaCalculationResult, SlaEngine, SlaError, SlaTemplate, SlaTemplateWithRules,
    TicketSlaContext,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RecalculateRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTemplatesQuery {
    pub only_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateRulesResponse {
    pub template_id: Uuid,
    pub migrated: usize,
}

async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, SlaError>
where
    T: Send + 'static,
    F: FnOnce(&SlaEngine) -> Result<T, SlaError> + Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .map_err(|e| SlaError::Internal(e.to_string()))?
}

pub async fn handle_calculate_ticket_sla(
    State(state): State<Arc<AppState>>,
    Json(context): Json<TicketSlaContext>,
) -> Result<Json<SlaCalculationResult>, SlaError> {
    let result = run_blocking(&state, move |engine| engine.calculate_ticket_sla(&context)).await?;
    Ok(Json(result))
}

pub async fn handle_recalculate_ticket_sla(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<RecalculateRequest>,
) -> Result<Json<SlaCalculationResult>, SlaError> {
    let result = run_blocking(&state, move |engine| {
        engine.recalculate_ticket_sla(ticket_id, &req.reason)
    })
    .await?;
    Ok(Json(result))
}

pub async fn handle_get_sla_history(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<SlaCalculation>>, SlaError> {
    let history = run_blocking(&state, move |engine| engine.get_sla_history(ticket_id)).await?;
    Ok(Json(history))
}

pub async fn handle_list_templates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<Json<Vec<SlaTemplate>>, SlaError> {
    let only_active = query.only_active.unwrap_or(true);
    let templates =
        run_blocking(&state, move |engine| engine.get_all_sla_templates(only_active)).await?;
    Ok(Json(templates))
}

pub async fn handle_get_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<SlaTemplateWithRules>, SlaError> {
    run_blocking(&state, move |engine| engine.get_sla_template_with_rules(template_id))
        .await?
        .map(Json)
        .ok_or_else(|| SlaError::NotFound(format!("SLA template {template_id}")))
}

pub async fn handle_migrate_legacy_rules(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<MigrateRulesResponse>, SlaError> {
    let migrated =
        run_blocking(&state, move |engine| engine.migrate_legacy_rules(template_id)).await?;
    Ok(Json(MigrateRulesResponse {
        template_id,
        migrated,
    }))
}

pub async fn handle_list_calendars(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BusinessCalendar>>, SlaError> {
    let calendars = run_blocking(&state, |engine| engine.get_all_business_calendars()).await?;
    Ok(Json(calendars))
}

pub async fn handle_get_calendar(
    State(state): State<Arc<AppState>>,
    Path(calendar_id): Path<Uuid>,
) -> Result<Json<BusinessCalendar>, SlaError> {
    run_blocking(&state, move |engine| {
        engine.get_business_calendar_with_config(calendar_id)
    })
    .await?
    .map(Json)
    .ok_or_else(|| SlaError::NotFound(format!("Business calendar {calendar_id}")))
}

pub async fn handle_save_calendar(
    State(state): State<Arc<AppState>>,
    Json(calendar): Json<BusinessCalendar>,
) -> Result<Json<BusinessCalendar>, SlaError> {
    let saved = run_blocking(&state, move |engine| engine.save_business_calendar(calendar)).await?;
    Ok(Json(saved))
}
