pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod submit;
