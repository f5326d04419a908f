pub mod client;
pub mod contract;
pub mod event;
pub mod user;

pub use client::Client;
pub use contract::Contract;
pub use event::Event;
pub use user::{Role, User};
