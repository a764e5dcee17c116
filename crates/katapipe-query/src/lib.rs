//! katapipe-query — turns user query lines into engine queries and
//! per-turn requests.
//!
//! A query line may be a JSON object, an inline SGF record or a path to an
//! SGF file. Cooking merges defaults and overrides, reconstructs the query
//! from SGF where needed, synthesizes `analyzeTurns`, and expands the query
//! into one request per turn for the sorter pool.

pub mod cook;
pub mod id;
pub mod sgf;

pub use cook::{parse_json_lenient, query_from_line, CookedLine, CookerConfig, QueryCooker};
pub use id::IdGenerator;
