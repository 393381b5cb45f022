use std::path::Path;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::CompletionBackend;
use crate::{
    config::ClientConfig,
    errors::{DecoratorError, Result},
    models::{
        Base64Payload, ClientResponse, ContentBlock, MediaKind, MediaReference, MediaSource,
        Usage, mime_for_extension,
    },
};

/// Client for any endpoint speaking the OpenAI chat/completions protocol
/// (llama.cpp server, vLLM, OpenRouter, ...).
///
/// Besides plain text it understands the image-capable response extensions:
/// `image_url` / `inline_data` content segments and a top-level `images` array.
#[derive(Clone)]
pub struct OpenAiLikeClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    endpoint: String,
    default_system_prompt: String,
}

impl OpenAiLikeClient {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("room-decorator/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            default_system_prompt: config.system_prompt.clone(),
        })
    }

    async fn encode_parts(task_input: &[ContentBlock]) -> Result<Vec<RequestPart>> {
        let mut parts = Vec::with_capacity(task_input.len());
        for block in task_input {
            match block {
                ContentBlock::Text(text) => parts.push(RequestPart::Text { text: text.clone() }),
                ContentBlock::Media(media) => {
                    let url = media_url(media).await?;
                    parts.push(RequestPart::ImageUrl {
                        image_url: ImageUrl { url },
                    });
                }
                // Prior tool invocations are not replayed to the endpoint.
                ContentBlock::FunctionCall { .. } => {}
            }
        }
        Ok(parts)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiLikeClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        task_input: &[ContentBlock],
    ) -> Result<ClientResponse> {
        let parts = Self::encode_parts(task_input).await?;
        if parts.is_empty() {
            return Err(DecoratorError::EmptyTaskInput);
        }

        let system_prompt = if system_prompt.is_empty() {
            self.default_system_prompt.as_str()
        } else {
            system_prompt
        };

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(RequestMessage {
                role: "system",
                content: RequestContent::Text(system_prompt.to_string()),
            });
        }
        messages.push(RequestMessage {
            role: "user",
            content: RequestContent::Parts(parts),
        });

        let payload = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut request = self.http_client.post(&self.endpoint).json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DecoratorError::Provider { status, body });
        }

        let body = response.text().await?;
        let chat_response: ChatResponse = serde_json::from_str(&body)?;
        let normalized = chat_response.normalize();

        debug!(
            target: "provider",
            model = %self.model,
            blocks = normalized.content.len(),
            stop_reason = ?normalized.stop_reason,
            total_tokens = normalized.usage.total_tokens,
            "completion received"
        );

        Ok(normalized)
    }
}

async fn media_url(media: &MediaReference) -> Result<String> {
    let mime = |fallback: Option<&str>| {
        media
            .extension
            .as_deref()
            .or(fallback)
            .map(mime_for_extension)
            .unwrap_or("image/jpeg")
    };

    match &media.source {
        MediaSource::Url(url) => Ok(url.clone()),
        MediaSource::Base64(payload) => {
            Ok(format!("data:{};base64,{}", mime(None), payload.to_base64()))
        }
        MediaSource::Path(path) => {
            let bytes = tokio::fs::read(path).await?;
            let mime = mime(path.extension().and_then(|ext| ext.to_str()));
            Ok(format!(
                "data:{};base64,{}",
                mime,
                general_purpose::STANDARD.encode(bytes)
            ))
        }
    }
}

/// Turns a `data:<mime>;base64,<data>` URL or a plain URL into a media reference.
fn media_from_url(url: &str) -> MediaReference {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((header, data)) = rest.split_once(',') {
            if let Some(mime) = header.strip_suffix(";base64") {
                return inline_media(mime, data.to_string());
            }
        }
    }

    MediaReference {
        kind: MediaKind::Image,
        source: MediaSource::Url(url.to_string()),
        extension: Path::new(url)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_string),
    }
}

fn inline_media(mime: &str, data: String) -> MediaReference {
    let extension = mime
        .split_once('/')
        .map(|(_, subtype)| subtype.trim().to_string())
        .filter(|subtype| !subtype.is_empty());

    MediaReference {
        kind: MediaKind::from_mime(mime),
        source: MediaSource::Base64(Base64Payload::Encoded(data)),
        extension,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
}

#[derive(Serialize)]
struct RequestMessage {
    role: &'static str,
    content: RequestContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestContent {
    Text(String),
    Parts(Vec<RequestPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ChatResponse {
    fn normalize(self) -> ClientResponse {
        let usage = self.usage.unwrap_or_default();
        let Some(choice) = self.choices.into_iter().next() else {
            return ClientResponse {
                content: Vec::new(),
                stop_reason: None,
                usage,
            };
        };

        let content = choice
            .message
            .map(ResponseMessage::into_blocks)
            .unwrap_or_default();

        ClientResponse {
            content,
            stop_reason: choice.finish_reason,
            usage,
        }
    }
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<MessageContent>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    images: Option<Vec<MessageSegment>>,
}

impl ResponseMessage {
    fn into_blocks(self) -> Vec<ContentBlock> {
        let tool_calls = self.tool_calls.unwrap_or_default();
        if !tool_calls.is_empty() {
            return tool_calls.into_iter().map(ToolCall::into_block).collect();
        }

        let mut blocks = Vec::new();

        match self.content {
            Some(MessageContent::Text(text)) => push_text(&mut blocks, text),
            Some(MessageContent::Segments(segments)) => {
                blocks.extend(segments.into_iter().filter_map(MessageSegment::into_block));
            }
            None => {}
        }

        blocks.extend(
            self.images
                .unwrap_or_default()
                .into_iter()
                .filter_map(MessageSegment::into_block),
        );

        // Reasoning trails the answer so the first text block is the reply itself.
        if let Some(thought) = self.reasoning_content.or(self.reasoning) {
            push_text(&mut blocks, thought);
        }

        blocks
    }
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: String) {
    if !text.trim().is_empty() {
        blocks.push(ContentBlock::Text(text));
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Segments(Vec<MessageSegment>),
}

#[derive(Deserialize)]
struct MessageSegment {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<SegmentUrl>,
    #[serde(default, alias = "inlineData")]
    inline_data: Option<InlineData>,
}

impl MessageSegment {
    fn into_block(self) -> Option<ContentBlock> {
        if let Some(inline) = self.inline_data {
            let mime = inline.mime_type.unwrap_or_default();
            return Some(ContentBlock::Media(inline_media(&mime, inline.data)));
        }
        if let Some(image_url) = self.image_url {
            return Some(ContentBlock::Media(media_from_url(image_url.as_str())));
        }
        self.text
            .filter(|text| !text.trim().is_empty())
            .map(ContentBlock::Text)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SegmentUrl {
    Plain(String),
    Object { url: String },
}

impl SegmentUrl {
    fn as_str(&self) -> &str {
        match self {
            SegmentUrl::Plain(url) | SegmentUrl::Object { url } => url,
        }
    }
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(default, alias = "mimeType")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

impl ToolCall {
    fn into_block(self) -> ContentBlock {
        let arguments = match self.function.arguments {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            None => Value::Null,
        };
        ContentBlock::FunctionCall {
            name: self.function.name,
            arguments,
        }
    }
}
