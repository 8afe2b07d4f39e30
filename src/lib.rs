//! antitoxic: toxicity moderation for group chats.

pub mod bot;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod error;
pub mod moderation;
pub mod platform;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
