use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Client, Contract, Event, Role, User};
use crate::store::{ClientFilter, ContractFilter, EventFilter, Store, UserFilter};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed store. Cascades live in the schema's foreign keys.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow!("user {}: {e}", row.id)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ClientRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    phone_number: String,
    mobile_number: Option<String>,
    company_name: String,
    sales_contact_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone_number: row.phone_number,
            mobile_number: row.mobile_number,
            company_name: row.company_name,
            sales_contact_id: row.sales_contact_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ContractRow {
    id: Uuid,
    client_id: Uuid,
    sales_contact_id: Uuid,
    signed: bool,
    amount: f64,
    payment_due: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContractRow> for Contract {
    fn from(row: ContractRow) -> Self {
        Contract {
            id: row.id,
            client_id: row.client_id,
            sales_contact_id: row.sales_contact_id,
            signed: row.signed,
            amount: row.amount,
            payment_due: row.payment_due,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    client_id: Uuid,
    contract_id: Uuid,
    support_id: Uuid,
    attendees: i32,
    starts_at: DateTime<Utc>,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let attendees = u32::try_from(row.attendees).map_err(|_| {
            AppError::Internal(anyhow!("event {} has negative attendees", row.id))
        })?;
        Ok(Event {
            id: row.id,
            client_id: row.client_id,
            contract_id: row.contract_id,
            support_id: row.support_id,
            attendees,
            starts_at: row.starts_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Reports a unique-constraint violation as a validation failure on `field`.
fn map_unique(err: sqlx::Error, field: &str, message: &str) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return AppError::invalid(field, message);
        }
    }
    AppError::Database(err)
}

fn attendees_column(event: &Event) -> Result<i32, AppError> {
    i32::try_from(event.attendees).map_err(|_| {
        AppError::invalid(
            "attendees",
            format!("Ensure this value is less than or equal to {}.", i32::MAX),
        )
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Store implementation
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, last_name, role, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email", "A user with this email address already exists."))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4, role = $5, is_active = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email", "A user with this email address already exists."))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users WHERE TRUE");
        if let Some(email) = &filter.email {
            qb.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(role) = filter.role {
            qb.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(active) = filter.is_active {
            qb.push(" AND is_active = ").push_bind(active);
        }
        qb.push(" ORDER BY email");

        let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO clients
                (id, first_name, last_name, email, phone_number, mobile_number,
                 company_name, sales_contact_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(client.id)
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(&client.email)
        .bind(&client.phone_number)
        .bind(&client.mobile_number)
        .bind(&client.company_name)
        .bind(client.sales_contact_id)
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email", "A client with this email address already exists."))?;
        Ok(())
    }

    async fn update_client(&self, client: &Client) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE clients
            SET first_name = $2, last_name = $3, email = $4, phone_number = $5,
                mobile_number = $6, company_name = $7, sales_contact_id = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(client.id)
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(&client.email)
        .bind(&client.phone_number)
        .bind(&client.mobile_number)
        .bind(&client.company_name)
        .bind(client.sales_contact_id)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "email", "A client with this email address already exists."))?;
        Ok(())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError> {
        let row: Option<ClientRow> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Client::from))
    }

    async fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, AppError> {
        let row: Option<ClientRow> = sqlx::query_as("SELECT * FROM clients WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Client::from))
    }

    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM clients WHERE TRUE");
        if let Some(email) = &filter.email {
            qb.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(company) = &filter.company_name {
            qb.push(" AND company_name = ").push_bind(company.clone());
        }
        if let Some(owner) = filter.sales_contact_id {
            qb.push(" AND sales_contact_id = ").push_bind(owner);
        }
        match filter.unassigned {
            Some(true) => {
                qb.push(" AND sales_contact_id IS NULL");
            }
            Some(false) => {
                qb.push(" AND sales_contact_id IS NOT NULL");
            }
            None => {}
        }
        qb.push(" ORDER BY created_at, id");

        let rows: Vec<ClientRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Client::from).collect())
    }

    async fn delete_client(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO contracts
                (id, client_id, sales_contact_id, signed, amount, payment_due, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(contract.id)
        .bind(contract.client_id)
        .bind(contract.sales_contact_id)
        .bind(contract.signed)
        .bind(contract.amount)
        .bind(contract.payment_due)
        .bind(contract.created_at)
        .bind(contract.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_contract(&self, contract: &Contract) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE contracts
            SET client_id = $2, sales_contact_id = $3, signed = $4, amount = $5,
                payment_due = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(contract.id)
        .bind(contract.client_id)
        .bind(contract.sales_contact_id)
        .bind(contract.signed)
        .bind(contract.amount)
        .bind(contract.payment_due)
        .bind(contract.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_contract(&self, id: Uuid) -> Result<Option<Contract>, AppError> {
        let row: Option<ContractRow> = sqlx::query_as("SELECT * FROM contracts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Contract::from))
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM contracts WHERE TRUE");
        if let Some(client) = filter.client_id {
            qb.push(" AND client_id = ").push_bind(client);
        }
        if let Some(owner) = filter.sales_contact_id {
            qb.push(" AND sales_contact_id = ").push_bind(owner);
        }
        if let Some(signed) = filter.signed {
            qb.push(" AND signed = ").push_bind(signed);
        }
        if let Some(due) = filter.due_before {
            qb.push(" AND payment_due < ").push_bind(due);
        }
        if let Some(min) = filter.min_amount {
            qb.push(" AND amount >= ").push_bind(min);
        }
        if let Some(max) = filter.max_amount {
            qb.push(" AND amount <= ").push_bind(max);
        }
        qb.push(" ORDER BY created_at, id");

        let rows: Vec<ContractRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Contract::from).collect())
    }

    async fn delete_contract(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM contracts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_event(&self, event: &Event) -> Result<(), AppError> {
        let attendees = attendees_column(event)?;
        sqlx::query(
            r#"
            INSERT INTO events
                (id, client_id, contract_id, support_id, attendees, starts_at, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.client_id)
        .bind(event.contract_id)
        .bind(event.support_id)
        .bind(attendees)
        .bind(event.starts_at)
        .bind(&event.notes)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "contract_id", "This contract already has an event."))?;
        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<(), AppError> {
        let attendees = attendees_column(event)?;
        sqlx::query(
            r#"
            UPDATE events
            SET client_id = $2, contract_id = $3, support_id = $4, attendees = $5,
                starts_at = $6, notes = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(event.client_id)
        .bind(event.contract_id)
        .bind(event.support_id)
        .bind(attendees)
        .bind(event.starts_at)
        .bind(&event.notes)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "contract_id", "This contract already has an event."))?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Event::try_from).transpose()
    }

    async fn find_event_by_contract(&self, contract_id: Uuid) -> Result<Option<Event>, AppError> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE contract_id = $1")
            .bind(contract_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM events WHERE TRUE");
        if let Some(client) = filter.client_id {
            qb.push(" AND client_id = ").push_bind(client);
        }
        if let Some(contract) = filter.contract_id {
            qb.push(" AND contract_id = ").push_bind(contract);
        }
        if let Some(support) = filter.support_id {
            qb.push(" AND support_id = ").push_bind(support);
        }
        if let Some(after) = filter.starts_after {
            qb.push(" AND starts_at >= ").push_bind(after);
        }
        if let Some(before) = filter.starts_before {
            qb.push(" AND starts_at <= ").push_bind(before);
        }
        qb.push(" ORDER BY created_at, id");

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
