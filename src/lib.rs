pub mod config;
pub mod core;
pub mod example;
pub mod inmemory_db;
pub mod server;
