// src/core/mod.rs — Extraction pipeline engine

pub mod batch;
pub mod cost;
pub mod fields;
pub mod orchestrator;
pub mod output;
pub mod scorer;
pub mod session;
pub mod types;
pub mod validation;
