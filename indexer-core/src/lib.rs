pub mod abi;
pub mod cache;
pub mod config;
pub mod crawl;
pub mod db;
pub mod decoder;
pub mod error;
pub mod models;
pub mod rpc;
pub mod scheduler;
pub mod store;
pub mod ticker;
