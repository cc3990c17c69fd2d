pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod history;
pub mod import;
pub mod memory;
pub mod models;
pub mod picker;
pub mod selector;
pub mod store;
pub mod validate;
