pub mod actor;
mod builder;
pub mod retry;

pub use builder::{ServerBuilder, ServerBuilderOptions};
