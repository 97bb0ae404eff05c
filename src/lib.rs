pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod finalize;
pub mod merkle;
pub mod models;
pub mod processor;
pub mod tasks;
pub mod validator;
pub mod voting;

pub use config::Config;
pub use db::{BallotInsert, SqliteStore};
pub use error::{FinalizeError, ProcessingError, StoreError, ValidationError};
pub use finalize::{FinalizeManager, FinalizeOutcome};
pub use processor::{RateLimiter, VoteProcessor};
pub use validator::{IdentityError, IdentityProvider, TierInfo};
