//! Business logic services

pub mod job_history;
pub mod stores;
pub mod sync;
pub mod upload_processor;
