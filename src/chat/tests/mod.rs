//! Unit tests for the chat module.
//!
//! Tests are organised by component, covering happy paths, error cases,
//! and the expiry and ordering edge cases of every public API.
