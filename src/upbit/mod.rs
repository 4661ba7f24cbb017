// =============================================================================
// Upbit upstream access — cache, circuit breaker, resilient REST client
// =============================================================================

pub mod cache;
pub mod circuit;
pub mod client;

pub use cache::TtlCache;
pub use circuit::CircuitBreaker;
pub use client::UpbitClient;
