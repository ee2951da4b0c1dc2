diesel::table! {
    business_calendars (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        timezone -> Varchar,
        working_hours -> Jsonb,
        holidays -> Jsonb,
        skip_weekends -> Bool,
        skip_holidays -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sla_templates (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        contract_type -> Varchar,
        is_default -> Bool,
        is_active -> Bool,
        calendar_id -> Nullable<Uuid>,
        rules -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sla_template_rules (id) {
        id -> Uuid,
        template_id -> Uuid,
        priority -> Varchar,
        response_time_minutes -> Int8,
        solution_time_minutes -> Int8,
        escalation_time_minutes -> Nullable<Int8>,
        escalation_enabled -> Bool,
    }
}

diesel::table! {
    sla_calculations (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        calculated_at -> Timestamptz,
        priority -> Varchar,
        response_due_at -> Timestamptz,
        solution_due_at -> Timestamptz,
        escalation_due_at -> Nullable<Timestamptz>,
        business_minutes_used -> Int8,
        calendar_id -> Uuid,
        sla_template_id -> Uuid,
        is_current -> Bool,
        recalculated_reason -> Nullable<Text>,
    }
}

diesel::joinable!(sla_template_rules -> sla_templates (template_id));
diesel::joinable!(sla_templates -> business_calendars (calendar_id));
diesel::joinable!(sla_calculations -> sla_templates (sla_template_id));
