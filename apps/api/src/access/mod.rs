//! Access policy: role-scoped ownership rules.
//!
//! Pure functions over (actor, operation, target). Record handlers call
//! [`authorize`] before touching the store; the admin layer never calls it
//! directly, it goes through the same handlers.

pub mod extract;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Client, Contract, Event, Role, User};

/// The authenticated, active user performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    List,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::List => "list",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// What an operation is aimed at. `None` means the collection (create, list)
/// or a record not loaded yet. User records carry no ownership, so the user
/// target has no payload.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    User,
    Client(Option<&'a Client>),
    Contract(Option<&'a Contract>),
    Event(Option<&'a Event>),
}

impl Target<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Target::User => "user",
            Target::Client(_) => "client",
            Target::Contract(_) => "contract",
            Target::Event(_) => "event",
        }
    }
}

/// Whether `actor` may perform `op` on `target`.
///
/// - manager: everything
/// - sales: create clients/contracts/events, read everything but users,
///   update/delete owned or claimable clients and owned contracts
/// - support: read everything but users, update/delete assigned events
pub fn is_allowed(actor: &Actor, op: Operation, target: Target<'_>) -> bool {
    match actor.role {
        Role::Manager => true,
        Role::Sales => sales_may(actor.id, op, target),
        Role::Support => support_may(actor.id, op, target),
    }
}

fn sales_may(actor: Uuid, op: Operation, target: Target<'_>) -> bool {
    match (op, target) {
        (_, Target::User) => false,
        (Operation::Read | Operation::List | Operation::Create, _) => true,
        (Operation::Update | Operation::Delete, Target::Client(Some(client))) => {
            client.sales_contact_id.map_or(true, |owner| owner == actor)
        }
        (Operation::Update | Operation::Delete, Target::Contract(Some(contract))) => {
            contract.sales_contact_id == actor
        }
        _ => false,
    }
}

fn support_may(actor: Uuid, op: Operation, target: Target<'_>) -> bool {
    match (op, target) {
        (_, Target::User) => false,
        (Operation::Read | Operation::List, _) => true,
        (Operation::Update | Operation::Delete, Target::Event(Some(event))) => {
            event.support_id == actor
        }
        _ => false,
    }
}

/// Fails with `AppError::Forbidden` when the policy denies the operation.
pub fn authorize(actor: &Actor, op: Operation, target: Target<'_>) -> Result<(), AppError> {
    if is_allowed(actor, op, target) {
        Ok(())
    } else {
        warn!(
            "Denied {} {} on {} for {}",
            actor.role,
            op.as_str(),
            target.kind(),
            actor.email
        );
        Err(AppError::Forbidden)
    }
}

/// Admin index sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Users,
    Clients,
    Contracts,
    Events,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Users,
        Section::Clients,
        Section::Contracts,
        Section::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Users => "users",
            Section::Clients => "clients",
            Section::Contracts => "contracts",
            Section::Events => "events",
        }
    }

    /// Singular record name used in log lines.
    pub fn record_name(&self) -> &'static str {
        match self {
            Section::Users => "user",
            Section::Clients => "client",
            Section::Contracts => "contract",
            Section::Events => "event",
        }
    }

    /// Cosmetic only: hiding a section does not deny its operations.
    pub fn visible_to(&self, role: Role) -> bool {
        match role {
            Role::Manager => true,
            Role::Sales => matches!(self, Section::Clients | Section::Contracts),
            Role::Support => matches!(self, Section::Events),
        }
    }
}

/// Whether `actor` may update or delete at least one record in `section`.
/// Used when a request names no record the policy could be run against.
pub fn may_modify_any(actor: &Actor, section: Section) -> bool {
    match (actor.role, section) {
        (Role::Manager, _) => true,
        (Role::Sales, Section::Clients | Section::Contracts) => true,
        (Role::Support, Section::Events) => true,
        _ => false,
    }
}

pub fn visible_sections(role: Role) -> Vec<Section> {
    Section::ALL
        .into_iter()
        .filter(|s| s.visible_to(role))
        .collect()
}
