pub mod market_data;
pub mod binance;
pub mod memory;

pub use market_data::{ HistoricalAggregate, MarketDataProvider, MarketSnapshot };
pub use binance::BinanceMarketData;
pub use memory::InMemoryMarketData;
