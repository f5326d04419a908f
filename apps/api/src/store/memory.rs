use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Client, Contract, Event, User};
use crate::store::{ClientFilter, ContractFilter, EventFilter, Store, UserFilter};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    clients: HashMap<Uuid, Client>,
    contracts: HashMap<Uuid, Contract>,
    events: HashMap<Uuid, Event>,
}

impl Tables {
    fn drop_contract(&mut self, id: Uuid) -> bool {
        self.events.retain(|_, e| e.contract_id != id);
        self.contracts.remove(&id).is_some()
    }

    fn drop_client(&mut self, id: Uuid) -> bool {
        let contract_ids: Vec<Uuid> = self
            .contracts
            .values()
            .filter(|c| c.client_id == id)
            .map(|c| c.id)
            .collect();
        for contract_id in contract_ids {
            self.drop_contract(contract_id);
        }
        self.events.retain(|_, e| e.client_id != id);
        self.clients.remove(&id).is_some()
    }
}

/// In-process store with the same cascade rules as the PostgreSQL schema.
/// Writers are serialised behind one `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Creation order with the id as tie-break, matching `ORDER BY created_at, id`.
fn sorted_by_creation<T, K>(rows: Vec<&T>, key: K) -> Vec<T>
where
    T: Clone,
    K: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    let mut out: Vec<T> = rows.into_iter().cloned().collect();
    out.sort_by_key(|r| key(r));
    out
}

fn missing(kind: &str, id: Uuid) -> AppError {
    AppError::NotFound(format!("{kind} {id} not found"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(AppError::invalid(
                "email",
                "A user with this email address already exists.",
            ));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(AppError::invalid(
                "email",
                "A user with this email address already exists.",
            ));
        }
        match t.users.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(missing("User", user.id)),
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, AppError> {
        let t = self.tables.read().await;
        let mut users: Vec<User> = t
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError> {
        let mut t = self.tables.write().await;
        if t.users.remove(&id).is_none() {
            return Ok(false);
        }
        for client in t.clients.values_mut() {
            if client.sales_contact_id == Some(id) {
                client.sales_contact_id = None;
            }
        }
        let owned: Vec<Uuid> = t
            .contracts
            .values()
            .filter(|c| c.sales_contact_id == id)
            .map(|c| c.id)
            .collect();
        for contract_id in owned {
            t.drop_contract(contract_id);
        }
        t.events.retain(|_, e| e.support_id != id);
        Ok(true)
    }

    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.clients.values().any(|c| c.email == client.email) {
            return Err(AppError::invalid(
                "email",
                "A client with this email address already exists.",
            ));
        }
        t.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn update_client(&self, client: &Client) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.clients
            .values()
            .any(|c| c.email == client.email && c.id != client.id)
        {
            return Err(AppError::invalid(
                "email",
                "A client with this email address already exists.",
            ));
        }
        match t.clients.get_mut(&client.id) {
            Some(row) => {
                *row = client.clone();
                Ok(())
            }
            None => Err(missing("Client", client.id)),
        }
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.tables.read().await.clients.get(&id).cloned())
    }

    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, AppError> {
        let t = self.tables.read().await;
        Ok(t.clients.values().find(|c| c.email == email).cloned())
    }

    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>, AppError> {
        let t = self.tables.read().await;
        let rows = t.clients.values().filter(|c| filter.matches(c)).collect();
        Ok(sorted_by_creation(rows, |c: &Client| (c.created_at, c.id)))
    }

    async fn delete_client(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.tables.write().await.drop_client(id))
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        t.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn update_contract(&self, contract: &Contract) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        match t.contracts.get_mut(&contract.id) {
            Some(row) => {
                *row = contract.clone();
                Ok(())
            }
            None => Err(missing("Contract", contract.id)),
        }
    }

    async fn get_contract(&self, id: Uuid) -> Result<Option<Contract>, AppError> {
        Ok(self.tables.read().await.contracts.get(&id).cloned())
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, AppError> {
        let t = self.tables.read().await;
        let rows = t.contracts.values().filter(|c| filter.matches(c)).collect();
        Ok(sorted_by_creation(rows, |c: &Contract| (c.created_at, c.id)))
    }

    async fn delete_contract(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.tables.write().await.drop_contract(id))
    }

    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.events.values().any(|e| e.contract_id == event.contract_id) {
            return Err(AppError::invalid(
                "contract_id",
                "This contract already has an event.",
            ));
        }
        t.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<(), AppError> {
        let mut t = self.tables.write().await;
        if t.events
            .values()
            .any(|e| e.contract_id == event.contract_id && e.id != event.id)
        {
            return Err(AppError::invalid(
                "contract_id",
                "This contract already has an event.",
            ));
        }
        match t.events.get_mut(&event.id) {
            Some(row) => {
                *row = event.clone();
                Ok(())
            }
            None => Err(missing("Event", event.id)),
        }
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn find_event_by_contract(&self, contract_id: Uuid) -> Result<Option<Event>, AppError> {
        let t = self.tables.read().await;
        Ok(t.events.values().find(|e| e.contract_id == contract_id).cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError> {
        let t = self.tables.read().await;
        let rows = t.events.values().filter(|e| filter.matches(e)).collect();
        Ok(sorted_by_creation(rows, |e: &Event| (e.created_at, e.id)))
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.tables.write().await.events.remove(&id).is_some())
    }
}
