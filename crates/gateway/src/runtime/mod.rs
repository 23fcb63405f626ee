//! The per-request runtime: cancellation, the feedback sub-loop, and the
//! agent loop that drives LLM turns and tool calls.

pub mod cancel;
pub mod feedback;
pub mod generate;

pub use cancel::CancelToken;
pub use generate::{spawn_generation, GenerationDeps, Produced};
