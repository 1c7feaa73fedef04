//! Infrastructure layer: event store, dispatcher, adapters, read models and
//! the stock count service.

pub mod adapters;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod service;

pub use command_dispatcher::{CommandDispatcher, Committed, DispatchError};
pub use config::StockCountConfig;
pub use service::{NewSession, StockCountError, StockCountPorts, StockCountService};

#[cfg(test)]
mod integration_tests;
