//! parley HTTP server.
//!
//! This crate wires the conversation orchestrator to PostgreSQL, the Gemini
//! backends and a thin axum routing layer.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
