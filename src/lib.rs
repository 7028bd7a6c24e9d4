pub mod catalog;
pub mod cli;
pub mod config;
pub mod database_ops;
pub mod error;
pub mod fetch;
pub mod normalization;
pub mod parsers;
pub mod pipeline;
pub mod raw_store;
pub mod tracing;

pub mod util {
    pub mod env;
}
