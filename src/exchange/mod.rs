//! Broker integration.
//!
//! ## Interfaces
//! - [`OrderGateway`]: order placement, modification, cancellation and status pulls
//! - [`QuoteSource`]: quotes and instrument lot sizes
//! - [`MarketDataFeed`]: tick subscriptions
//!
//! ## Implementations
//! - [`KiteClient`]: Kite Connect v3 REST
//! - [`PaperBroker`]: in-memory simulation for paper trading and tests
//! - [`QuotePollingFeed`]: tick feed built on a quote source

mod client;
pub mod error;
pub mod feed;
pub mod mock;
pub mod retry;
pub mod traits;
mod types;

pub use client::KiteClient;
pub use error::GatewayError;
pub use feed::QuotePollingFeed;
pub use mock::{PaperBroker, PaperOp};
pub use retry::with_retry;
pub use traits::{MarketDataFeed, OrderGateway, QuoteSource};
pub use types::*;
