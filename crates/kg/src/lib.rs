//! Knowledge-graph boundary: the Known Set, search-index and SPARQL-endpoint
//! interfaces, per-KG managers over prebuilt on-disk artifacts, and the KG
//! half of the tool registry.

pub mod examples;
pub mod functions;
pub mod index;
pub mod items;
pub mod known;
pub mod manager;
pub mod sparql;

pub use known::KnownSet;
pub use manager::{find_manager, format_kgs, merged_prefixes, KgManager};
pub use sparql::{HttpSparqlClient, SparqlClient};
