//! Shared fixtures: a memory store seeded with one manager and two users of
//! each other role.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::access::Actor;
use crate::models::{Client, Contract, Event, Role, User};
use crate::records::clients::{create_client, NewClient};
use crate::records::contracts::{create_contract, NewContract};
use crate::records::events::{create_event, NewEvent};
use crate::state::AppState;
use crate::store::{MemoryStore, Store};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub manager: Actor,
    pub sales_a: Actor,
    pub sales_b: Actor,
    pub support_a: Actor,
    pub support_b: Actor,
}

async fn seed_user(store: &MemoryStore, email: &str, role: Role) -> Actor {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "BRAVO".to_string(),
        role,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    store.insert_user(&user).await.unwrap();
    Actor::from(&user)
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            manager: seed_user(&store, "corentin@epic.test", Role::Manager).await,
            sales_a: seed_user(&store, "thomas@epic.test", Role::Sales).await,
            sales_b: seed_user(&store, "thomas2@epic.test", Role::Sales).await,
            support_a: seed_user(&store, "timothee@epic.test", Role::Support).await,
            support_b: seed_user(&store, "tiphaine@epic.test", Role::Support).await,
            store,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
        }
    }

    pub fn client_payload(email: &str) -> NewClient {
        NewClient {
            first_name: "client_test".to_string(),
            last_name: "1".to_string(),
            email: email.to_string(),
            phone_number: "+33666666666".to_string(),
            mobile_number: None,
            company_name: "test_1".to_string(),
            sales_contact_id: None,
        }
    }

    pub async fn client_owned_by(&self, owner: Option<Uuid>, email: &str) -> Client {
        create_client(
            self.store(),
            &self.manager,
            NewClient {
                sales_contact_id: owner,
                ..Self::client_payload(email)
            },
        )
        .await
        .unwrap()
        .client
    }

    pub async fn contract_for(&self, client: &Client, owner: Uuid) -> Contract {
        create_contract(
            self.store(),
            &self.manager,
            NewContract {
                client_id: client.id,
                sales_contact_id: owner,
                signed: false,
                amount: 320.54,
                payment_due: Utc::now() + Duration::days(30),
            },
        )
        .await
        .unwrap()
        .contract
    }

    pub async fn event_for(&self, contract: &Contract, support: Uuid) -> Event {
        create_event(
            self.store(),
            &self.manager,
            NewEvent {
                client_id: contract.client_id,
                contract_id: contract.id,
                support_id: support,
                attendees: 40,
                starts_at: Utc::now() + Duration::days(60),
                notes: String::new(),
            },
        )
        .await
        .unwrap()
        .event
    }
}
