//! OpenAI chat-completion request -> Google `generateContent` request
//! (spec §4.5, request direction).

use std::collections::HashMap;

use gproxy_protocol::gemini::content::{
    Content, ContentRole, FileData, FunctionCall, FunctionDeclaration, FunctionResponse,
    GenerateContentRequestBody, GenerationConfig, Part, Tool,
};
use gproxy_protocol::openai::chat::{ChatCompletionRequest, ChatMessage, ContentPart, MessageContent};

pub struct TranscodedRequest {
    pub body: GenerateContentRequestBody,
    /// Everything after `/v1beta/` in the upstream path, e.g.
    /// `models/gemini-2.0-flash-exp:generateContent`.
    pub path_suffix: String,
    pub is_stream: bool,
}

pub fn transform_request(req: &ChatCompletionRequest) -> TranscodedRequest {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    let mut tool_call_names: HashMap<String, String> = HashMap::new();

    for message in &req.messages {
        match message {
            ChatMessage::System { content, .. } => {
                let text = content.to_plain_text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            ChatMessage::User { content, .. } => {
                contents.push(map_user_message(content));
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
                ..
            } => {
                if let Some(calls) = tool_calls {
                    for call in calls {
                        tool_call_names.insert(call.id.clone(), call.function.name.clone());
                    }
                }
                contents.push(map_assistant_message(content.as_ref(), tool_calls.as_deref()));
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
                ..
            } => {
                let name = tool_call_names
                    .get(tool_call_id)
                    .cloned()
                    .unwrap_or_else(|| tool_call_id.clone());
                contents.push(map_tool_message(content, &name));
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content::text_only(None, system_texts.join("\n\n")))
    };

    let tools = req.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: Some(tools.iter().map(map_tool_declaration).collect()),
        }]
    });

    let mut generation_config = GenerationConfig::default();
    generation_config.temperature = req.temperature;
    generation_config.top_p = req.top_p;
    generation_config.max_output_tokens = req.max_tokens;
    generation_config.stop_sequences = req.stop.clone().map(|stop| stop.into_vec());
    let generation_config = if generation_config.is_empty() {
        None
    } else {
        Some(generation_config)
    };

    let body = GenerateContentRequestBody {
        contents,
        tools,
        system_instruction,
        generation_config,
        extra: Default::default(),
    };

    let is_stream = req.stream.unwrap_or(false);
    let path_suffix = if is_stream {
        format!("models/{}:streamGenerateContent?alt=sse", req.model)
    } else {
        format!("models/{}:generateContent", req.model)
    };

    TranscodedRequest {
        body,
        path_suffix,
        is_stream,
    }
}

fn map_user_message(content: &MessageContent) -> Content {
    let parts = match content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Parts(parts) => parts.iter().map(map_content_part).collect(),
    };
    Content {
        parts,
        role: Some(ContentRole::User),
    }
}

fn map_content_part(part: &ContentPart) -> Part {
    match part {
        ContentPart::Text { text } => Part::text(text.clone()),
        ContentPart::ImageUrl { image_url } => {
            if let Some(rest) = image_url.url.strip_prefix("data:") {
                if let Some((meta, data)) = rest.split_once(',') {
                    let mime_type = meta
                        .split(';')
                        .next()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    return Part {
                        inline_data: Some(gproxy_protocol::gemini::content::Blob {
                            mime_type,
                            data: data.to_string(),
                        }),
                        ..Default::default()
                    };
                }
            }
            Part {
                file_data: Some(FileData {
                    mime_type: None,
                    file_uri: image_url.url.clone(),
                }),
                ..Default::default()
            }
        }
    }
}

fn map_assistant_message(
    content: Option<&MessageContent>,
    tool_calls: Option<&[gproxy_protocol::openai::chat::ToolCall]>,
) -> Content {
    let mut parts = Vec::new();
    if let Some(content) = content {
        match content {
            MessageContent::Text(text) if !text.is_empty() => parts.push(Part::text(text.clone())),
            MessageContent::Parts(content_parts) => {
                parts.extend(content_parts.iter().map(map_content_part))
            }
            _ => {}
        }
    }
    if let Some(calls) = tool_calls {
        for call in calls {
            let args = serde_json::from_str(&call.function.arguments).ok();
            parts.push(Part {
                function_call: Some(FunctionCall {
                    name: call.function.name.clone(),
                    args,
                }),
                ..Default::default()
            });
        }
    }
    Content {
        parts,
        role: Some(ContentRole::Model),
    }
}

fn map_tool_message(content: &MessageContent, function_name: &str) -> Content {
    let text = content.to_plain_text();
    let value: serde_json::Value =
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
    Content {
        parts: vec![Part {
            function_response: Some(FunctionResponse {
                name: function_name.to_string(),
                response: serde_json::json!({ "content": value }),
            }),
            ..Default::default()
        }],
        role: Some(ContentRole::Function),
    }
}

fn map_tool_declaration(
    tool: &gproxy_protocol::openai::chat::ToolDefinition,
) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        parameters: tool.function.parameters.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::chat::{ChatCompletionRequest, MessageContent};

    fn user(text: &str) -> ChatMessage {
        ChatMessage::User {
            content: MessageContent::Text(text.to_string()),
            extra: Default::default(),
        }
    }

    #[test]
    fn maps_system_message_into_system_instruction() {
        let req = ChatCompletionRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![
                ChatMessage::System {
                    content: MessageContent::Text("be terse".to_string()),
                    extra: Default::default(),
                },
                user("hi"),
            ],
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            extra: Default::default(),
        };
        let transcoded = transform_request(&req);
        assert_eq!(transcoded.body.contents.len(), 1);
        let instruction = transcoded.body.system_instruction.unwrap();
        assert_eq!(instruction.concat_text(), "be terse");
    }

    #[test]
    fn non_streaming_path_uses_generate_content() {
        let req = ChatCompletionRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![user("hi")],
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            extra: Default::default(),
        };
        let transcoded = transform_request(&req);
        assert_eq!(
            transcoded.path_suffix,
            "models/gemini-2.0-flash-exp:generateContent"
        );
        assert!(!transcoded.is_stream);
    }

    #[test]
    fn streaming_path_uses_stream_generate_content_sse() {
        let req = ChatCompletionRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![user("hi")],
            stream: Some(true),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            extra: Default::default(),
        };
        let transcoded = transform_request(&req);
        assert_eq!(
            transcoded.path_suffix,
            "models/gemini-2.0-flash-exp:streamGenerateContent?alt=sse"
        );
        assert!(transcoded.is_stream);
    }

    #[test]
    fn data_uri_image_maps_to_inline_data() {
        let req = ChatCompletionRequest {
            model: "gemini-2.0-flash-exp".to_string(),
            messages: vec![ChatMessage::User {
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "what's this?".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: gproxy_protocol::openai::chat::ImageUrl {
                            url: "data:image/png;base64,QUFB".to_string(),
                            detail: None,
                        },
                    },
                ]),
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
        let transcoded = transform_request(&req);
        let parts = &transcoded.body.contents[0].parts;
        assert!(parts[1].inline_data.is_some());
        assert_eq!(parts[1].inline_data.as_ref().unwrap().mime_type, "image/png");
    }
}
