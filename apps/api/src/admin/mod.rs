//! Admin proxy. Every admin action is answered by the record API handlers, so
//! an actor gets exactly the same allow/deny outcome here as over JSON.

pub mod forms;
pub mod handlers;

use crate::access::Section;

/// Fields named in the warning logged when a submission fails.
pub fn logged_fields(section: Section) -> &'static [&'static str] {
    match section {
        Section::Users => &["email", "first_name", "last_name", "role"],
        Section::Clients => &["email", "first_name", "last_name", "sales_contact_id"],
        Section::Contracts => &["client_id", "sales_contact_id"],
        Section::Events => &["client_id", "contract_id"],
    }
}
