//! Agent service client.
//!
//! This module provides:
//! - [`AgentService`] trait, the logical operations the session needs
//! - [`AgentClient`], the reqwest implementation over the REST API
//! - Request/response types of the service

mod dispatcher;
mod types;

use async_trait::async_trait;

use crate::Result;

pub use dispatcher::AgentClient;
pub use types::{AgentResponse, ConversationThread, ErrorResponse, SendMessageRequest, UserProfile};

/// Logical operations of the agent service.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Send a chat message. `None` asks the server to start a new thread.
    async fn send_message(&self, message: &str, thread_id: Option<&str>) -> Result<AgentResponse>;

    async fn get_profile(&self) -> Result<UserProfile>;

    async fn update_profile(&self, profile: &UserProfile) -> Result<()>;

    /// Conversations in server order.
    async fn list_conversations(&self) -> Result<Vec<ConversationThread>>;
}
