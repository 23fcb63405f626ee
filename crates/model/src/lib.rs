//! The model bridge: a uniform request/response layer over the two LLM wire
//! shapes (chat completions and responses). Conversations are kept in the
//! neutral form of `grasp_domain::model` and serialized per API on the way
//! out.

mod bridge;
pub mod completions;
mod http;
pub mod responses;

pub use bridge::{select_api, ModelBridge};
pub use http::HttpBridge;
