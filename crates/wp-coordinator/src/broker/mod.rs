//! Command/result correlation
//!
//! The broker hands command envelopes to the transport and keeps the table
//! in which asynchronously delivered replies wait for whoever asked.

mod sweeper;
mod table;

pub use sweeper::run_result_sweeper;
pub use table::CommandBroker;
