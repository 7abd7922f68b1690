//! HTTP request handlers.

pub mod accounts;
pub mod entitlements;
pub mod health;
pub mod plans;
pub mod reconcile;
pub mod webhooks;
