//! Notification delivery pipeline.
//!
//! - [`sender`] makes one delivery attempt and categorizes failures
//! - [`queue`] buffers requests in priority order for the background drain
//! - [`tracker`] persists delivery records and schedules retries
//! - [`service`] wires the pieces together and offers guaranteed delivery

pub mod backend;
pub mod memory_store;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod service;
pub mod store;
pub mod tracker;
