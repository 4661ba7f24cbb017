pub mod ohlcv;
pub mod ticker_hub;
pub mod ticker_stream;

// Re-export the workhorse types (e.g. `use crate::market_data::Candle`).
pub use ohlcv::{Candle, MarketTicker};
pub use ticker_hub::{LiveTickerState, TickerHub};
pub use ticker_stream::TickerStreamConfig;
