//! API route handlers

pub mod analytics;
pub mod evaluations;
pub mod health;
pub mod traces;
