pub mod condense;
pub mod store;

pub use condense::{condense, Bucket, Condenser};
pub use store::{CandleSeries, CandleStore};
