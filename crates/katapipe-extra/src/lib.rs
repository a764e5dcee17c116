//! katapipe-extra — derived data stitched onto engine responses.
//!
//! Board reconstruction from move history, ownership-based metrics
//! (unsettledness, moyo, settled territory), next-move lookahead, and the
//! successor/join hooks the Joiner is wired with.

pub mod board;
pub mod enrich;
pub mod stitch;

pub use board::Board;
pub use enrich::{Enricher, ExtraMode};
pub use stitch::{join_pairs, stitch_successive};
