//! Analysis worker: a bounded pool of queue consumers running analysis
//! attempts.

pub mod config;
pub mod pool;
