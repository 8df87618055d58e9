//! Pawlink - real-time chat sync over STOMP/WebSocket.
//!
//! This crate keeps a client in sync with a chat backend: it holds one
//! STOMP session open, routes topic messages to per-destination callbacks,
//! and tracks which chats have unread messages.
//!
//! # Architecture
//!
//! - **Session** - owns the connection task, reconnects, heart-beats
//! - **Registry** - destination to subscription/callback map
//! - **Unread** - per-chat indicators with change-only notifications
//! - **Realtime** - facade mapping chat ids to wire destinations
//!
//! # Modules
//!
//! - [`stomp`] - STOMP 1.2 frame codec and heart-beat negotiation
//! - [`ws`] - WebSocket transport wrapper
//! - [`session`] - Transport session and connection task
//! - [`registry`] - Subscription registry
//! - [`unread`] - Unread reconciliation engine
//! - [`realtime`] - Message dispatch facade
//! - [`api`] - Chat list REST client
//! - [`config`] - Configuration loading/saving

pub mod api;
pub mod chat;
pub mod config;
pub mod constants;
pub mod realtime;
pub mod registry;
pub mod session;
pub mod stomp;
pub mod unread;
pub mod ws;

// Re-export commonly used types
pub use api::ChatApi;
pub use chat::{ChatId, ChatSummary};
pub use config::Config;
pub use realtime::RealtimeClient;
pub use session::{
    ConnectionHandle, ConnectionState, Session, SessionConfig, StompErrorReport, Subscription,
};
pub use unread::{UnreadIndicators, UnreadSnapshot};
