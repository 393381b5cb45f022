mod openai_like;
#[cfg(test)]
pub mod scripted;

pub use openai_like::OpenAiLikeClient;

use async_trait::async_trait;

use crate::{
    errors::Result,
    models::{ClientResponse, ContentBlock},
};

/// A chat-style model endpoint that turns task input into normalized content blocks.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        system_prompt: &str,
        task_input: &[ContentBlock],
    ) -> Result<ClientResponse>;
}
