//! Utility functions for the application

pub mod api_key;
pub mod file;
pub mod string;
pub mod terminal;
pub mod time;
