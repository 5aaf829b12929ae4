pub mod auth;
pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod edit;
pub mod migrate;
pub mod series;
pub mod sermon;
pub mod sync;
