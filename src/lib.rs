// src/lib.rs — Library root for ARF

pub mod backend;
pub mod core;
pub mod docs;
pub mod infra;
pub mod pipeline;
pub mod sources;
pub mod validate;
