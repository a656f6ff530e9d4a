#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod entities;
pub mod events;
pub mod game;
pub mod ledger;
pub mod pool;
pub mod processors;
pub mod scheduler;
pub mod store;
pub mod utils;
