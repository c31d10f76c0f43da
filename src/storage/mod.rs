//! Storage backends

pub mod elasticsearch;
