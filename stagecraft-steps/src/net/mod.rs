//! Network steps.

pub mod http_client;
