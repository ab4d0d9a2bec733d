pub mod auth;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod process;
pub mod pty;
pub mod server;
pub mod ssh;
pub mod utils;
