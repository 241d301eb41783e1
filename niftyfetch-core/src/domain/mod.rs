//! Domain types: intervals, candles, series and fetch windows.

pub mod candle;
pub mod interval;
pub mod series;
pub mod timestamp;
pub mod window;

pub use candle::Candle;
pub use interval::{Granularity, Interval};
pub use series::Series;
pub use timestamp::parse_timestamp;
pub use window::{default_history_start, FetchWindow, WindowError, DEFAULT_MAX_CHUNK_DAYS};
