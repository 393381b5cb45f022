use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;

use super::CompletionBackend;
use crate::{
    errors::{DecoratorError, Result},
    models::{ClientResponse, ContentBlock},
};

/// Replays canned replies in order and records every call it receives.
pub struct ScriptedBackend {
    model: String,
    replies: Mutex<VecDeque<std::result::Result<ClientResponse, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub task_input: Vec<ContentBlock>,
}

impl RecordedCall {
    pub fn text(&self) -> String {
        self.task_input
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ScriptedBackend {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, response: ClientResponse) -> Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.reply(ClientResponse::from_blocks(vec![ContentBlock::text(text)]))
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        task_input: &[ContentBlock],
    ) -> Result<ClientResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            task_input: task_input.to_vec(),
        });

        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(DecoratorError::other(message)),
            None => Err(DecoratorError::other(format!(
                "no scripted reply left for {}",
                self.model
            ))),
        }
    }
}
