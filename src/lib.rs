pub mod app;
pub mod client;
pub mod config;
pub mod derived;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod parser;
pub mod query;
pub mod registry;
pub mod store;
