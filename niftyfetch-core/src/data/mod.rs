//! Symbol directory, providers, sessions, rate budget and retry policy.

pub mod directory;
pub mod fivepaisa;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod yahoo;

pub use directory::{strip_exchange_suffix, DirectoryError, SymbolDirectory, NIFTY50, NSE_SUFFIX};
pub use fivepaisa::{FivePaisaAuthenticator, FivePaisaProvider};
pub use provider::{CandleProvider, Exchange, FetchError, FetchRequest};
pub use rate_limit::{
    RateLimiter, RecordingSleeper, Sleeper, ThreadSleeper, CONCURRENT_RATE_CEILING,
    DEFAULT_RATE_WINDOW, SEQUENTIAL_RATE_CEILING,
};
pub use retry::RetryPolicy;
pub use session::{AuthError, Authenticator, Credentials, Session, SessionStatus};
pub use yahoo::YahooProvider;
