//! Historical candle providers.

pub mod binance;

pub use binance::BinanceProvider;
