// src/lib.rs — Library root for billwise

pub mod audit;
pub mod cli;
pub mod core;
pub mod infra;
pub mod tier;
