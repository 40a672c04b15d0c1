//! Faculty profile endpoints, records, and the lock/edit policy.

pub mod policy;
pub mod profiles;
pub(crate) mod storage;
pub mod types;
