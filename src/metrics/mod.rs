pub mod throughput;

pub use throughput::UpdateRateCounter;
