pub mod prelude;

pub mod accounts;
pub mod audit_entries;
pub mod centers;
pub mod login_tickets;
pub mod unit_assignments;
