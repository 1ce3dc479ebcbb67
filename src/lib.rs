pub mod client;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod framing;
pub mod models;
pub mod persistence;
pub mod routes;
pub mod service;
pub mod upstream;
