//! Record orchestration: authorize, then validate and persist.
//!
//! Each entity module exposes the same five operations. `handlers` wraps
//! them for the JSON API; the admin layer calls those handlers in turn.

pub mod clients;
pub mod contracts;
pub mod events;
pub mod handlers;
pub mod users;
pub mod validation;

#[cfg(test)]
pub mod testing;
