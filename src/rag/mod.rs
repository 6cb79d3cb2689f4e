pub mod metrics;
pub mod stream;
