//! reqdesk tracks media requests through their open/closed lifecycle.
//!
//! The lifecycle rules live in [`request::LifecycleManager`], persistence
//! behind [`storage::RequestStore`], and the HTTP surface in [`api`].

pub mod api;
pub mod config;
pub mod core;
pub mod logging;
pub mod request;
pub mod service;
pub mod storage;
pub(crate) mod utils;
