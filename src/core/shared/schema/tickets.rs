// Owned by the ticket and contract services; only the columns read here.

diesel::table! {
    contracts (id) {
        id -> Uuid,
        contract_type -> Varchar,
        sla_template_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    support_tickets (id) {
        id -> Uuid,
        priority -> Varchar,
        contract_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}
