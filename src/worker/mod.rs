// src/worker/mod.rs

pub mod worker;

pub use worker::Worker;
