pub mod coingecko;

pub use coingecko::{CoinGeckoClient, FeedError, MarketChartData};
