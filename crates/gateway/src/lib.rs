//! coderelay gateway: the inbound dispatcher, the HTTP surface and the CLI.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod codex_sync;
pub mod dispatch;
pub mod limiter;
pub mod safety;
pub mod state;
