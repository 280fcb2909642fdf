//! `sktrs` computes probabilistic summaries of `u32` tuple streams in a
//! single pass: a basic summary (count/min/max/sum/sum²), a HyperLogLog
//! cardinality sketch, an AGMS tug-of-war sketch for second frequency
//! moments and a Count-Min frequency sketch, all driven by one hash
//! evaluation per tuple.
//!
//! Collectors accumulate locklessly on their own threads and merge
//! cell-wise afterwards, which is what the TCP ingest server and the
//! mmap file client build on. The command-line tools live in
//! `src/bin/`.

mod error;

pub mod collector;
pub mod hash;
pub mod queue;
pub mod reducers;
pub mod server;

pub use collector::{collect_sharded, Geometry, SketchCollector, StreamSummary};
pub use error::SketchError;
pub use hash::HashKind;
pub use server::{IngestServer, ServerConfig, ServerReport, INGEST_PORT};
