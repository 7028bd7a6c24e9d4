//! Postgres implementations of the catalog repository traits.
pub mod db;
pub mod performers;
pub mod prices;
pub mod products;
pub mod raw_content;

pub use db::Db;
