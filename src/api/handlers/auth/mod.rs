//! Authentication, verification, and account recovery handlers.

pub mod login;
pub mod otp;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod session;
pub mod state;
pub(crate) mod storage;
pub mod types;
pub(crate) mod utils;
pub mod verification;

pub use state::{AppConfig, AppState};
