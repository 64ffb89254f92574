//! Canonicalizes a completed interaction into the ShareGPT-style shape
//! spec §4.7 names and enqueues it non-blockingly. Grounded on
//! `gproxy-core/src/handler.rs`'s `build_downstream_event`/`build_downstream_meta`
//! (this crate keeps the header/body-to-string conventions in spirit), but
//! narrowed from the teacher's generic `ProxyRequest` dispatch down to the
//! handful of request shapes this gateway actually canonicalizes.

use gproxy_protocol::openai::chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use gproxy_storage::InteractionRecord;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub from: &'static str,
    pub value: String,
    /// `Some(false)` marks a turn that shouldn't contribute to training loss
    /// (spec §4.7: tool-response turns echoed back verbatim). Omitted from
    /// the serialized record entirely when `None`, matching the spec's
    /// `[loss: bool]` optional-field notation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<bool>,
}

impl ConversationTurn {
    fn new(from: &'static str, value: String) -> Self {
        Self { from, value, loss: None }
    }
}

#[derive(Debug, Default)]
pub struct CanonicalInteraction {
    pub conversations: Vec<ConversationTurn>,
    pub tools: Option<Value>,
    pub tool_calls: Option<Value>,
}

/// The request shapes the recorder knows how to canonicalize (spec §4.7).
/// Anything else (embeddings, rerank, unrecognized bodies) records with
/// `conversations = []` and only the raw bodies.
pub enum RequestShape<'a> {
    OpenAiChat {
        request: &'a ChatCompletionRequest,
        response: Option<&'a ChatCompletionResponse>,
    },
    AnthropicMessages {
        request_json: &'a Value,
        response_json: &'a Value,
    },
    Other,
}

pub fn canonicalize_openai(
    request: &ChatCompletionRequest,
    response: Option<&ChatCompletionResponse>,
) -> CanonicalInteraction {
    let mut conversations = Vec::new();
    for message in &request.messages {
        match message {
            ChatMessage::System { content, .. } => {
                conversations.push(ConversationTurn::new("system", content.to_plain_text()))
            }
            ChatMessage::User { content, .. } => {
                conversations.push(ConversationTurn::new("human", content.to_plain_text()))
            }
            ChatMessage::Assistant { content, .. } => conversations.push(ConversationTurn::new(
                "gpt",
                content.as_ref().map(|c| c.to_plain_text()).unwrap_or_default(),
            )),
            ChatMessage::Tool { content, .. } => {
                let mut turn = ConversationTurn::new("tool", content.to_plain_text());
                turn.loss = Some(false);
                conversations.push(turn);
            }
        }
    }

    let mut tool_calls = None;
    if let Some(response) = response
        && let Some(choice) = response.choices.first()
    {
        conversations.push(ConversationTurn::new(
            "gpt",
            choice.message.content.clone().unwrap_or_default(),
        ));
        if let Some(calls) = &choice.message.tool_calls {
            tool_calls = serde_json::to_value(calls).ok();
        }
    }

    let tools = request
        .tools
        .as_ref()
        .and_then(|tools| serde_json::to_value(tools).ok());

    CanonicalInteraction {
        conversations,
        tools,
        tool_calls,
    }
}

pub fn canonicalize_anthropic(request_json: &Value, response_json: &Value) -> CanonicalInteraction {
    let mut conversations = Vec::new();

    if let Some(system) = request_json.get("system").and_then(|value| value.as_str()) {
        conversations.push(ConversationTurn::new("system", system.to_string()));
    }

    if let Some(messages) = request_json.get("messages").and_then(|value| value.as_array()) {
        for message in messages {
            let role = message.get("role").and_then(|value| value.as_str()).unwrap_or("user");
            let from = if role == "assistant" { "gpt" } else { "human" };
            conversations.push(ConversationTurn::new(from, anthropic_content_text(message.get("content"))));
        }
    }

    let mut tool_calls = None;
    if let Some(content) = response_json.get("content").and_then(|value| value.as_array()) {
        let mut text = String::new();
        let mut calls = Vec::new();
        for block in content {
            match block.get("type").and_then(|value| value.as_str()) {
                Some("text") => {
                    if let Some(part) = block.get("text").and_then(|value| value.as_str()) {
                        text.push_str(part);
                    }
                }
                Some("tool_use") => calls.push(block.clone()),
                _ => {}
            }
        }
        conversations.push(ConversationTurn::new("gpt", text));
        if !calls.is_empty() {
            tool_calls = Some(Value::Array(calls));
        }
    }

    let tools = request_json.get("tools").cloned();

    CanonicalInteraction {
        conversations,
        tools,
        tool_calls,
    }
}

fn anthropic_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(|value| value.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_record(
    created_at: String,
    model: Option<String>,
    source_provider: String,
    auth_scheme: String,
    shape: RequestShape<'_>,
    raw_request: String,
    raw_response: String,
    truncated: bool,
) -> InteractionRecord {
    let canonical = match shape {
        RequestShape::OpenAiChat { request, response } => canonicalize_openai(request, response),
        RequestShape::AnthropicMessages {
            request_json,
            response_json,
        } => canonicalize_anthropic(request_json, response_json),
        RequestShape::Other => CanonicalInteraction::default(),
    };

    InteractionRecord {
        created_at,
        model,
        source_provider,
        auth_scheme,
        conversations: serde_json::to_string(&canonical.conversations).unwrap_or_else(|_| "[]".to_string()),
        tools: canonical.tools.map(|value| value.to_string()),
        tool_calls: canonical.tool_calls.map(|value| value.to_string()),
        raw_request,
        raw_response,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::chat::{ChatMessage, Choice, FinishReason, MessageContent, ResponseMessage};

    #[test]
    fn openai_chat_builds_human_and_gpt_turns() {
        let request = ChatCompletionRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![ChatMessage::User {
                content: MessageContent::Text("hi".to_string()),
                extra: Default::default(),
            }],
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            extra: Default::default(),
        };
        let response = ChatCompletionResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 1000,
            model: "deepseek-chat".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: Some("hello".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: None,
        };
        let canonical = canonicalize_openai(&request, Some(&response));
        assert_eq!(canonical.conversations.len(), 2);
        assert_eq!(canonical.conversations[0].from, "human");
        assert_eq!(canonical.conversations[0].value, "hi");
        assert_eq!(canonical.conversations[1].from, "gpt");
        assert_eq!(canonical.conversations[1].value, "hello");
    }

    #[test]
    fn openai_tool_message_is_marked_loss_false() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::User {
                    content: MessageContent::Text("what's the weather?".to_string()),
                    extra: Default::default(),
                },
                ChatMessage::Tool {
                    content: MessageContent::Text("72F and sunny".to_string()),
                    tool_call_id: "call_1".to_string(),
                    extra: Default::default(),
                },
            ],
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            extra: Default::default(),
        };
        let canonical = canonicalize_openai(&request, None);
        let tool_turn = &canonical.conversations[1];
        assert_eq!(tool_turn.from, "tool");
        assert_eq!(tool_turn.loss, Some(false));
        assert_eq!(canonical.conversations[0].loss, None);
    }

    #[test]
    fn anthropic_messages_maps_assistant_to_gpt() {
        let request_json = serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}]
        });
        let response_json = serde_json::json!({
            "content": [{"type": "text", "text": "hello"}]
        });
        let canonical = canonicalize_anthropic(&request_json, &response_json);
        assert_eq!(canonical.conversations[0].from, "human");
        assert_eq!(canonical.conversations[1].from, "gpt");
        assert_eq!(canonical.conversations[1].value, "hello");
    }

    #[test]
    fn other_shape_records_empty_conversations() {
        let record = build_record(
            "2026-07-28T00:00:00Z".to_string(),
            None,
            "api.openai.com".to_string(),
            "openai".to_string(),
            RequestShape::Other,
            "{}".to_string(),
            "{}".to_string(),
            false,
        );
        assert_eq!(record.conversations, "[]");
    }
}
