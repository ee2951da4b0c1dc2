pub mod sla;
pub use self::sla::*;

pub mod tickets;
pub use self::tickets::*;

diesel::allow_tables_to_appear_in_same_query!(
    business_calendars,
    sla_templates,
    sla_template_rules,
    sla_calculations,
    contracts,
    support_tickets,
);
