// src/core/mod.rs

pub mod checkpoint;
pub mod scheduler;
pub mod state;
