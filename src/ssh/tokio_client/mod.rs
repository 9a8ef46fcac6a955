//! A small asynchronous SSH client for jump host sessions, built on russh
//! and the tokio runtime.
//!
//! The heart of this module is [`Client`]. Use it for connection, host key
//! verification and authentication; channels are opened on the handle it
//! yields.
//!
//! # Features
//! * Connect to a host by name or IP, trying every resolved address
//! * Host key verdicts, including host certificates, reported to the caller
//! * Private key and SSH agent authentication

pub mod authentication;
pub mod connection;
pub mod error;

pub use authentication::AuthMethod;
pub use connection::{Client, ClientHandler};
pub use error::Error;

// Re-export russh types commonly used with this module
pub use russh::client::Config;
