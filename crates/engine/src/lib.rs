//! # timegraph engine
//!
//! Ingestion, temporal projection and retrieval over a temporally-versioned
//! knowledge graph.
//!
//! ## Flow
//!
//! - `chunking` splits period-tagged documents into token windows
//! - `extraction` asks the model for entity and relationship records
//! - `merge` folds them into the durable graph, keeping per-period provenance
//! - `temporal` projects the graph onto a set of periods for one query
//! - `retrieval` ranks and packs a local context from a projection
//! - `community` and `global` build and query community reports
//! - `planner` scopes questions in time, or splits multi-time questions and
//!   composes their answers
//!
//! [`TimeGraph`] wires all of it to the stores of one working directory.

pub mod chunking;
pub mod community;
pub mod extraction;
pub mod global;
pub mod merge;
pub mod param;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod retrieval;
pub mod table;
pub mod temporal;
pub mod token;

#[cfg(test)]
mod test_helpers;

pub use chunking::{Chunker, TokenWindowChunker};
pub use param::QueryParam;
pub use pipeline::{InsertOutcome, TimeGraph};
pub use planner::{PlannerError, ScopeKind, SubQuestion, TimeScope};
pub use prompts::FAIL_RESPONSE;
pub use temporal::{DEFAULT_MAX_RANGE_YEARS, Projection, SelectorError, TimeSelector};
