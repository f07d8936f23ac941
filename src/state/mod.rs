//! State management with PostgreSQL persistence
//!
//! Handles:
//! - Account configuration written at initialization
//! - The registry region, rewritten atomically on every change
//! - Event storage
//! - Published order proposals

mod manager;

pub use manager::StateManager;
