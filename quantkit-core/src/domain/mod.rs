//! Domain types shared by the registry, the price store and the update engine.

pub mod price_point;
pub mod symbol_record;

pub use price_point::{max_date, PricePoint};
pub use symbol_record::SymbolRecord;
