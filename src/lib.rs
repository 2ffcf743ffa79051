#![warn(clippy::all, clippy::nursery, clippy::pedantic)]

pub mod attributes;
pub mod config;
mod encoding;
pub mod ipc;
pub mod mapping;
pub mod remarks;
pub mod session;
pub mod sidecar;
