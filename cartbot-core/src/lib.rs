#![doc = "cartbot-core: core logic library for cartbot."]

//! This crate contains all list reconciliation, ranking and session logic
//! for cartbot. Transport glue and concrete provider clients are not
//! included here.
//!
//! # Usage
//! Add this as a dependency for all shared reconciliation, pricing,
//! suggestion and coordination code.

pub mod config;
pub mod contract;
pub mod error;
pub mod list_store;
pub mod match_index;
pub mod model;
pub mod price_history;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod suggest;
