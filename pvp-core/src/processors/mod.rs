//! Long-running engine loops.
//!
//! The reconciler consumes decoded ledger events and mutates the store; the
//! drivers run on fixed-period timers against the same store. Every loop
//! takes a `watch::Receiver<bool>` shutdown signal and observes it at each
//! suspension point.

pub mod game_timeout;
pub mod pool_maintenance;
pub mod reconciler;
pub mod refund_driver;
pub mod resolver;

pub use game_timeout::GameTimeoutSweeper;
pub use pool_maintenance::PoolMaintenance;
pub use reconciler::Reconciler;
pub use refund_driver::RefundDriver;
pub use resolver::{ResolveDriver, ResolveOutcome, Resolver};
