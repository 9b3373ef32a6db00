//! Market data: sources, the on-disk price store, and symbol universes.

pub mod circuit_breaker;
pub mod groups;
pub mod listing;
pub mod normalize;
pub mod price_store;
pub mod source;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, RateLimitBreaker};
pub use groups::{GroupsError, TickerGroups};
pub use listing::{download_listing, load_listing_files, ListingError, ListingSettings};
pub use normalize::{normalize_frame, NormalizeError};
pub use price_store::{ParquetPriceStore, PriceStore, StoreError, StoreMeta};
pub use source::{MarketDataSource, SourceError};
pub use yahoo::{YahooSettings, YahooSource};
