pub mod auth;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod lineage;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod search;
pub mod sessions;
pub mod state;
pub mod storage;
pub mod utils;
