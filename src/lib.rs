pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod models;
pub mod notify;
pub mod routes;
pub mod schema;
pub mod state;
pub mod tracking;
