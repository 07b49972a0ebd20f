pub mod binance;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod snapshot;

pub mod test_support;

pub use binance::BinanceFutures;
pub use error::{ExchangeError, MarketError};
pub use exchange::{CloseRequest, ExchangeApi, ExchangeOrder, OrderAck, OrderTicket};
pub use snapshot::SnapshotProvider;
