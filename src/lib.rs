pub mod accounts;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod response;
pub mod routes;
pub mod schema;
pub mod scope;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workflow;
