//! katapipe-core — request/response correspondence for the analysis pipeline.
//!
//! A user query that asks for several turns is expanded into one request per
//! turn. The engine answers those requests concurrently and in arbitrary
//! order; the [`Sorter`] re-establishes the correspondence by `(id,
//! turnNumber)` and the [`Joiner`] decides when matched pairs may leave the
//! pipeline (arrival order, request order, or joined per query).

pub mod classify;
pub mod joiner;
pub mod record;
pub mod sorter;

pub use joiner::Joiner;
pub use record::{merge_fields, same_by, truthy, Fields, Pair, Record, Request, Response};
pub use sorter::{Counts, Sorter, SorterConfig};
