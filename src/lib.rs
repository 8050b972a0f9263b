//! Ephemera: expiry-aware chat delivery core.
//!
//! This crate keeps a client's view of one-to-one conversations consistent
//! with an external chat server while every message carries its own
//! self-destruct timer.
//!
//! # Architecture
//!
//! Ephemera follows hexagonal architecture principles:
//!
//! - **Domain**: Pure types with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for the chat server
//! - **Adapters**: Concrete implementations of ports
//!
//! # Modules
//!
//! - [`chat`]: Message store, conversation index, and delivery coordination

pub mod chat;
