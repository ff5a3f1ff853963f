//! Trace processing
//!
//! - `model` - Stored trace and span records
//! - `ingest` - Payload wire types and whole-payload validation
//! - `tree` - Hierarchy reconstruction (orphans, cycles, ordering)
//! - `aggregate` - Latency, cost and token roll-ups
//! - `service` - Ingest and read orchestration over a `TraceRepository`

pub mod aggregate;
pub mod ingest;
pub mod model;
mod service;
pub mod tree;

pub use aggregate::{CostSource, SpanCost, TraceMetrics, aggregate, span_cost};
pub use ingest::{
    IngestPayload, IngestRejection, IssueCode, SpanPayload, TracePayload, ValidatedTrace,
    ValidationIssue,
};
pub use model::{SpanRecord, SpanStatus, SpanType, TokenUsage, TraceRecord};
pub use service::{IngestError, IngestReceipt, SpanNodeView, TraceDetail, TraceService};
pub use tree::{AnomalyKind, SpanNode, SpanTree, TreeAnomaly};
