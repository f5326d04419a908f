//! Entity store. The async seam between record orchestration and persistence.
//!
//! `PgStore` backs production; `MemoryStore` backs tests and `STORE_BACKEND=memory`.
//! `AppState` holds an `Arc<dyn Store>`, chosen at startup via config.
//!
//! Stores do no authorization and no cross-record validation. They persist
//! what the record layer hands them and apply the delete cascades.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Client, Contract, Event, Role, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ────────────────────────────────────────────────────────────────────────────
// List filters
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.email.as_ref().map_or(true, |e| &user.email == e)
            && self.role.map_or(true, |r| user.role == r)
            && self.is_active.map_or(true, |a| user.is_active == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientFilter {
    pub email: Option<String>,
    pub company_name: Option<String>,
    pub sales_contact_id: Option<Uuid>,
    /// `Some(true)` keeps only claimable clients, `Some(false)` only owned ones.
    pub unassigned: Option<bool>,
}

impl ClientFilter {
    pub fn matches(&self, client: &Client) -> bool {
        self.email.as_ref().map_or(true, |e| &client.email == e)
            && self
                .company_name
                .as_ref()
                .map_or(true, |c| &client.company_name == c)
            && self
                .sales_contact_id
                .map_or(true, |id| client.sales_contact_id == Some(id))
            && self
                .unassigned
                .map_or(true, |u| client.sales_contact_id.is_none() == u)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractFilter {
    pub client_id: Option<Uuid>,
    pub sales_contact_id: Option<Uuid>,
    pub signed: Option<bool>,
    /// Strict upper bound on `payment_due`; "overdue" is `due_before = now`.
    pub due_before: Option<DateTime<Utc>>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

impl ContractFilter {
    pub fn matches(&self, contract: &Contract) -> bool {
        self.client_id.map_or(true, |id| contract.client_id == id)
            && self
                .sales_contact_id
                .map_or(true, |id| contract.sales_contact_id == id)
            && self.signed.map_or(true, |s| contract.signed == s)
            && self.due_before.map_or(true, |d| contract.is_overdue(d))
            && self.min_amount.map_or(true, |m| contract.amount >= m)
            && self.max_amount.map_or(true, |m| contract.amount <= m)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub client_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub support_id: Option<Uuid>,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.client_id.map_or(true, |id| event.client_id == id)
            && self.contract_id.map_or(true, |id| event.contract_id == id)
            && self.support_id.map_or(true, |id| event.support_id == id)
            && self.starts_after.map_or(true, |d| event.starts_at >= d)
            && self.starts_before.map_or(true, |d| event.starts_at <= d)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Persistence for the four record types.
///
/// `delete_*` return `false` when the row did not exist. Lists come back in
/// display order: users by email, everything else by creation time.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<(), AppError>;
    async fn update_user(&self, user: &User) -> Result<(), AppError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, AppError>;
    /// Clears the user's client ownerships and removes their contracts and events.
    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_client(&self, client: &Client) -> Result<(), AppError>;
    async fn update_client(&self, client: &Client) -> Result<(), AppError>;
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError>;
    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, AppError>;
    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>, AppError>;
    /// Removes the client's contracts and events along with it.
    async fn delete_client(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_contract(&self, contract: &Contract) -> Result<(), AppError>;
    async fn update_contract(&self, contract: &Contract) -> Result<(), AppError>;
    async fn get_contract(&self, id: Uuid) -> Result<Option<Contract>, AppError>;
    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, AppError>;
    /// Removes the contract's event along with it.
    async fn delete_contract(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_event(&self, event: &Event) -> Result<(), AppError>;
    async fn update_event(&self, event: &Event) -> Result<(), AppError>;
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, AppError>;
    async fn find_event_by_contract(&self, contract_id: Uuid) -> Result<Option<Event>, AppError>;
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError>;
    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contract(amount: f64, signed: bool, due_in_days: i64) -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            sales_contact_id: Uuid::new_v4(),
            signed,
            amount,
            payment_due: now + Duration::days(due_in_days),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_default_filters_match_everything() {
        let c = contract(10.0, false, 3);
        assert!(ContractFilter::default().matches(&c));
    }

    #[test]
    fn test_contract_filter_amount_range_is_inclusive() {
        let c = contract(320.54, true, 3);
        let filter = ContractFilter {
            min_amount: Some(320.54),
            max_amount: Some(320.54),
            ..Default::default()
        };
        assert!(filter.matches(&c));

        let too_high = ContractFilter {
            min_amount: Some(400.0),
            ..Default::default()
        };
        assert!(!too_high.matches(&c));
    }

    #[test]
    fn test_contract_filter_due_before_selects_overdue() {
        let overdue = contract(1.0, false, -2);
        let upcoming = contract(1.0, false, 2);
        let filter = ContractFilter {
            due_before: Some(Utc::now()),
            ..Default::default()
        };
        assert!(filter.matches(&overdue));
        assert!(!filter.matches(&upcoming));
    }

    #[test]
    fn test_client_filter_unassigned() {
        let now = Utc::now();
        let mut client = Client {
            id: Uuid::new_v4(),
            first_name: "Client".into(),
            last_name: "ONE".into(),
            email: "client@acme.test".into(),
            phone_number: "+33666666666".into(),
            mobile_number: None,
            company_name: "Acme".into(),
            sales_contact_id: None,
            created_at: now,
            updated_at: now,
        };
        let unassigned = ClientFilter {
            unassigned: Some(true),
            ..Default::default()
        };
        assert!(unassigned.matches(&client));

        client.sales_contact_id = Some(Uuid::new_v4());
        assert!(!unassigned.matches(&client));
        let by_company = ClientFilter {
            company_name: Some("Acme".into()),
            unassigned: Some(false),
            ..Default::default()
        };
        assert!(by_company.matches(&client));
    }
}
