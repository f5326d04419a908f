use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: Uuid,
    pub client_id: Uuid,
    pub sales_contact_id: Uuid,
    pub signed: bool,
    pub amount: f64,
    pub payment_due: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.payment_due < now
    }
}
