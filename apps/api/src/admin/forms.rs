//! Urlencoded admin forms to record payloads.
//!
//! Empty strings mean "not set". Date/time widgets post `<field>_0` (date)
//! and `<field>_1` (time); a single RFC 3339 `<field>` is accepted too.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::errors::FieldErrors;
use crate::models::Role;
use crate::records::clients::{ClientChanges, NewClient};
use crate::records::contracts::{ContractChanges, NewContract};
use crate::records::events::{EventChanges, NewEvent};
use crate::records::users::{NewUser, UserChanges};

const REQUIRED: &str = "This field is required.";
const INVALID_UUID: &str = "Enter a valid UUID.";
const INVALID_CHOICE: &str = "Select a valid choice.";
const INVALID_NUMBER: &str = "Enter a number.";
const INVALID_WHOLE: &str = "Enter a whole number.";

/// Raw submitted pairs, in order.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        FormData { pairs }
    }

    /// Last non-blank value for `key`, trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .find(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Every value for `key`, repeated fields and comma lists flattened.
    pub fn all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Submitted values as echoed back on a re-rendered form.
    pub fn values(&self) -> BTreeMap<String, String> {
        self.pairs.iter().cloned().collect()
    }

    /// `field=value` pairs for log lines. Missing fields are skipped.
    pub fn summary(&self, fields: &[&str]) -> String {
        fields
            .iter()
            .filter_map(|f| self.get(f).map(|v| format!("{f}={v}")))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Reads typed fields out of a form, collecting every error on the way.
struct Reader<'a> {
    form: &'a FormData,
    errors: FieldErrors,
}

impl<'a> Reader<'a> {
    fn new(form: &'a FormData) -> Self {
        Reader {
            form,
            errors: FieldErrors::new(),
        }
    }

    /// Blank when absent; required-ness is left to record validation.
    fn text(&self, key: &str) -> String {
        self.form.get(key).unwrap_or_default().to_string()
    }

    fn changed_text(&self, key: &str) -> Option<String> {
        if self.form.contains(key) {
            Some(self.text(key))
        } else {
            None
        }
    }

    fn parse<T: FromStr>(&mut self, key: &str, message: &str) -> Option<T> {
        let raw = self.form.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.errors.push(key, message);
                None
            }
        }
    }

    fn require<T: FromStr>(&mut self, key: &str, message: &str) -> Option<T> {
        if self.form.get(key).is_none() {
            self.errors.push(key, REQUIRED);
            return None;
        }
        self.parse(key, message)
    }

    /// Present and blank clears the field: `Some(None)`.
    fn nullable<T: FromStr>(&mut self, key: &str, message: &str) -> Option<Option<T>> {
        if !self.form.contains(key) {
            return None;
        }
        match self.form.get(key) {
            None => Some(None),
            Some(_) => self.parse(key, message).map(Some),
        }
    }

    fn checkbox(&self, key: &str) -> Option<bool> {
        if !self.form.contains(key) {
            return None;
        }
        Some(matches!(
            self.form.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("on" | "true" | "1" | "yes")
        ))
    }

    fn datetime(&mut self, key: &str) -> Option<DateTime<Utc>> {
        match merge_date_time(self.form, key) {
            Ok(value) => value,
            Err(message) => {
                self.errors.push(key, message);
                None
            }
        }
    }

    fn require_datetime(&mut self, key: &str) -> Option<DateTime<Utc>> {
        let value = self.datetime(key);
        if value.is_none() && !self.errors.has(key) {
            self.errors.push(key, REQUIRED);
        }
        value
    }

    fn finish(self) -> FieldErrors {
        self.errors
    }
}

/// Merges `<key>_0` and `<key>_1` into one UTC timestamp. Falls back to an
/// RFC 3339 value under `<key>`. `Ok(None)` when nothing was submitted.
pub fn merge_date_time(form: &FormData, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    let date = form.get(&format!("{key}_0"));
    let time = form.get(&format!("{key}_1"));
    match (date, time) {
        (None, None) => match form.get(key) {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| "Enter a valid date/time.".to_string()),
        },
        (Some(_), None) => Err("Enter a valid time.".to_string()),
        (None, Some(_)) => Err("Enter a valid date.".to_string()),
        (Some(date), Some(time)) => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| "Enter a valid date.".to_string())?;
            let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
                .map_err(|_| "Enter a valid time.".to_string())?;
            Ok(Some(date.and_time(time).and_utc()))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Users
// ────────────────────────────────────────────────────────────────────────────

pub fn new_user(form: &FormData) -> Result<NewUser, FieldErrors> {
    let mut r = Reader::new(form);
    let role = r.require::<Role>("role", INVALID_CHOICE);
    let is_active = r.checkbox("is_active").unwrap_or(true);
    let email = r.text("email");
    let first_name = r.text("first_name");
    let last_name = r.text("last_name");
    let errors = r.finish();
    match role {
        Some(role) if errors.is_empty() => Ok(NewUser {
            email,
            first_name,
            last_name,
            role,
            is_active,
        }),
        _ => Err(errors),
    }
}

pub fn user_changes(form: &FormData) -> Result<UserChanges, FieldErrors> {
    let mut r = Reader::new(form);
    let changes = UserChanges {
        email: r.changed_text("email"),
        first_name: r.changed_text("first_name"),
        last_name: r.changed_text("last_name"),
        role: r.parse("role", INVALID_CHOICE),
        is_active: r.checkbox("is_active"),
    };
    let errors = r.finish();
    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Clients
// ────────────────────────────────────────────────────────────────────────────

pub fn new_client(form: &FormData) -> Result<NewClient, FieldErrors> {
    let mut r = Reader::new(form);
    let sales_contact_id = r.parse::<Uuid>("sales_contact_id", INVALID_UUID);
    let payload = NewClient {
        first_name: r.text("first_name"),
        last_name: r.text("last_name"),
        email: r.text("email"),
        phone_number: r.text("phone_number"),
        mobile_number: form.get("mobile_number").map(str::to_string),
        company_name: r.text("company_name"),
        sales_contact_id,
    };
    let errors = r.finish();
    if errors.is_empty() {
        Ok(payload)
    } else {
        Err(errors)
    }
}

pub fn client_changes(form: &FormData) -> Result<ClientChanges, FieldErrors> {
    let mut r = Reader::new(form);
    let sales_contact_id = r.nullable::<Uuid>("sales_contact_id", INVALID_UUID);
    let mobile_number = if form.contains("mobile_number") {
        Some(form.get("mobile_number").map(str::to_string))
    } else {
        None
    };
    let changes = ClientChanges {
        first_name: r.changed_text("first_name"),
        last_name: r.changed_text("last_name"),
        email: r.changed_text("email"),
        phone_number: r.changed_text("phone_number"),
        mobile_number,
        company_name: r.changed_text("company_name"),
        sales_contact_id,
    };
    let errors = r.finish();
    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Contracts
// ────────────────────────────────────────────────────────────────────────────

pub fn new_contract(form: &FormData) -> Result<NewContract, FieldErrors> {
    let mut r = Reader::new(form);
    let client_id = r.require::<Uuid>("client_id", INVALID_UUID);
    let sales_contact_id = r.require::<Uuid>("sales_contact_id", INVALID_UUID);
    let amount = r.require::<f64>("amount", INVALID_NUMBER);
    let payment_due = r.require_datetime("payment_due");
    let signed = r.checkbox("signed").unwrap_or(false);
    let errors = r.finish();
    match (client_id, sales_contact_id, amount, payment_due) {
        (Some(client_id), Some(sales_contact_id), Some(amount), Some(payment_due))
            if errors.is_empty() =>
        {
            Ok(NewContract {
                client_id,
                sales_contact_id,
                signed,
                amount,
                payment_due,
            })
        }
        _ => Err(errors),
    }
}

pub fn contract_changes(form: &FormData) -> Result<ContractChanges, FieldErrors> {
    let mut r = Reader::new(form);
    let changes = ContractChanges {
        client_id: r.parse("client_id", INVALID_UUID),
        sales_contact_id: r.parse("sales_contact_id", INVALID_UUID),
        signed: r.checkbox("signed"),
        amount: r.parse("amount", INVALID_NUMBER),
        payment_due: r.datetime("payment_due"),
    };
    let errors = r.finish();
    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

pub fn new_event(form: &FormData) -> Result<NewEvent, FieldErrors> {
    let mut r = Reader::new(form);
    let client_id = r.require::<Uuid>("client_id", INVALID_UUID);
    let contract_id = r.require::<Uuid>("contract_id", INVALID_UUID);
    let support_id = r.require::<Uuid>("support_id", INVALID_UUID);
    let attendees = r.require::<u32>("attendees", INVALID_WHOLE);
    let starts_at = r.require_datetime("starts_at");
    let notes = r.text("notes");
    let errors = r.finish();
    match (client_id, contract_id, support_id, attendees, starts_at) {
        (Some(client_id), Some(contract_id), Some(support_id), Some(attendees), Some(starts_at))
            if errors.is_empty() =>
        {
            Ok(NewEvent {
                client_id,
                contract_id,
                support_id,
                attendees,
                starts_at,
                notes,
            })
        }
        _ => Err(errors),
    }
}

pub fn event_changes(form: &FormData) -> Result<EventChanges, FieldErrors> {
    let mut r = Reader::new(form);
    let changes = EventChanges {
        client_id: r.parse("client_id", INVALID_UUID),
        contract_id: r.parse("contract_id", INVALID_UUID),
        support_id: r.parse("support_id", INVALID_UUID),
        attendees: r.parse("attendees", INVALID_WHOLE),
        starts_at: r.datetime("starts_at"),
        notes: r.changed_text("notes"),
    };
    let errors = r.finish();
    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}
