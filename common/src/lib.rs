// Shared library for the publication scheduler: domain model, sanitizer,
// transformer, state machine, store, transport, scheduler loop and validator.

pub mod bootstrap;
pub mod circuit_breaker;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod markup;
pub mod models;
pub mod ops;
pub mod publication;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod transform;
pub mod transport;
pub mod validator;
