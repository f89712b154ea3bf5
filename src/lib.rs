pub mod app;
pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod location;
pub mod output;
pub mod pipeline;
pub mod snapshot;
pub mod store;
