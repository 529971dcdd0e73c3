// src/data/mod.rs

pub mod envelope;

pub use envelope::{DataEnvelope, DataSlice};
