//! Database queries

pub mod identity;
pub mod roster;
pub mod session;
