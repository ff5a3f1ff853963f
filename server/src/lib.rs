//! Arbor server: trace ingestion, span tree reconstruction, cost roll-up and
//! evaluation storage for AI applications.

pub mod api;
mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
