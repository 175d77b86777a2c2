pub mod auth;
pub mod choices;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod validation;
