//! Store implementations for timegraph.
//!
//! Every store keeps its data in memory behind a tokio `RwLock` and writes a
//! JSON snapshot under the working directory on `flush`. The `in_memory`
//! constructors build scratch stores that are never written, used for
//! query-time projections.

mod cluster;
pub mod graph;
pub mod kv;
mod persist;
pub mod vector;

pub use graph::JsonGraphStore;
pub use kv::JsonKvStore;
pub use vector::{NanoVectorStore, cosine_similarity};
