#![deny(unsafe_code)]

//! Terminal chat client for the vet assistant.
//!
//! Conversations, identity and pet selection live here; the wire protocol is in
//! `vetchat-agent`.
pub mod app;
/// Conversation state, stream reduction and the controller that drives it.
pub mod chat;
/// Signed-in identity shared across the client.
pub mod session;
/// Settings persistence.
pub mod settings;
