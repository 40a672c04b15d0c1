//! HTTP handlers grouped by surface.

pub mod admin;
pub mod auth;
pub mod health;
pub mod profiles;
pub mod root;

#[cfg(test)]
mod integration_tests;
