//! Builders to assemble a dispatcher context from configuration.

pub mod context_builder;

pub use context_builder::ContextBuilder;
