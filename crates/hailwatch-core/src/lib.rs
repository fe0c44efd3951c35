//! Core hailwatch library (session lifecycle, route authorization, config).

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
