pub use super::accounts::Entity as Accounts;
pub use super::audit_entries::Entity as AuditEntries;
pub use super::centers::Entity as Centers;
pub use super::login_tickets::Entity as LoginTickets;
pub use super::unit_assignments::Entity as UnitAssignments;
