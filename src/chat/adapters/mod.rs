//! Adapters for the chat ports.
//!
//! # Available Adapters
//!
//! - [`memory::InMemoryChatGateway`]: thread-safe in-process chat server for
//!   tests and simulation, implementing both the gateway and push ports

pub mod memory;
