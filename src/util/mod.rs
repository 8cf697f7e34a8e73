//! Internal utilities shared by the scheduler and the progress sink.

pub mod cache;
pub mod rate;

pub use cache::CachePadded;
pub use rate::RateGate;
