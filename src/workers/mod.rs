pub mod args;
pub mod backend;
pub mod transfer;
