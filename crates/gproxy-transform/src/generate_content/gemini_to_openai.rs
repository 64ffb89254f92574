//! Google `generateContent` response -> OpenAI chat-completion response,
//! non-streaming and streaming (spec §4.5, response direction).

use std::collections::BTreeMap;

use gproxy_protocol::gemini::content::{
    Candidate, FinishReason as GeminiFinishReason, GenerateContentResponse,
    UsageMetadata as GeminiUsage,
};
use gproxy_protocol::openai::chat::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, Delta, FinishReason as OpenAiFinishReason,
    FunctionCall, FunctionCallChunk, ResponseMessage, StreamChoice, ToolCall, ToolCallChunk, Usage,
};

pub fn transform_response(
    resp: &GenerateContentResponse,
    model: &str,
    id: String,
    created: i64,
) -> ChatCompletionResponse {
    let candidate = resp.candidates.first();
    let (content, tool_calls) = match candidate {
        Some(candidate) => extract_message(candidate),
        None => (Some(String::new()), None),
    };
    let finish_reason = candidate.and_then(|c| c.finish_reason).map(map_finish_reason);
    let message = ResponseMessage {
        role: "assistant".to_string(),
        content: if tool_calls.is_some() { None } else { content },
        tool_calls,
    };
    let usage = resp.usage_metadata.as_ref().map(map_usage);
    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason,
        }],
        usage,
    }
}

fn extract_message(candidate: &Candidate) -> (Option<String>, Option<Vec<ToolCall>>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut call_index = 0_i64;
    for part in &candidate.content.parts {
        if let Some(part_text) = &part.text {
            text.push_str(part_text);
        }
        if let Some(call) = &part.function_call {
            let arguments = call
                .args
                .as_ref()
                .map(|value| serde_json::to_string(value).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());
            tool_calls.push(ToolCall {
                id: format!("call_{call_index}"),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments,
                },
            });
            call_index += 1;
        }
    }
    if tool_calls.is_empty() {
        (Some(text), None)
    } else {
        (None, Some(tool_calls))
    }
}

pub fn map_finish_reason(reason: GeminiFinishReason) -> OpenAiFinishReason {
    match reason {
        GeminiFinishReason::Stop => OpenAiFinishReason::Stop,
        GeminiFinishReason::MaxTokens => OpenAiFinishReason::Length,
        GeminiFinishReason::Safety => OpenAiFinishReason::ContentFilter,
        GeminiFinishReason::ToolUse => OpenAiFinishReason::ToolCalls,
        GeminiFinishReason::Other => OpenAiFinishReason::Stop,
    }
}

fn map_usage(usage: &GeminiUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_token_count.unwrap_or(0),
        completion_tokens: usage.candidates_token_count.unwrap_or(0),
        total_tokens: usage.total_token_count.unwrap_or(0),
        extra: Default::default(),
    }
}

/// Per-stream state for converting one Google SSE frame at a time into one
/// or more OpenAI `chat.completion.chunk` frames. Google resends the full
/// candidate text on every frame rather than an incremental delta, so this
/// keeps a running buffer per candidate index and diffs against it.
pub struct GeminiToOpenAiStreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: BTreeMap<i64, bool>,
    text_buffers: BTreeMap<i64, String>,
    tool_call_counters: BTreeMap<i64, i64>,
}

impl GeminiToOpenAiStreamState {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            role_sent: BTreeMap::new(),
            text_buffers: BTreeMap::new(),
            tool_call_counters: BTreeMap::new(),
        }
    }

    /// Consumes one parsed Google SSE frame and returns the OpenAI chunk(s)
    /// it translates to (normally exactly one, per candidate present).
    pub fn push(&mut self, resp: &GenerateContentResponse) -> Vec<ChatCompletionChunk> {
        let mut chunks = Vec::new();
        for candidate in &resp.candidates {
            let index = candidate.index.unwrap_or(0);
            let mut delta = Delta::default();

            if !*self.role_sent.entry(index).or_insert(false) {
                delta.role = Some("assistant".to_string());
                self.role_sent.insert(index, true);
            }

            let full_text = candidate.content.concat_text();
            if !full_text.is_empty() {
                let buffer = self.text_buffers.entry(index).or_default();
                if let Some(new_text) = full_text.strip_prefix(buffer.as_str()) {
                    if !new_text.is_empty() {
                        delta.content = Some(new_text.to_string());
                    }
                } else {
                    // Upstream sent something that isn't a continuation of
                    // the buffered text; fall back to emitting it whole.
                    delta.content = Some(full_text.clone());
                }
                *buffer = full_text;
            }

            let mut tool_calls = Vec::new();
            for part in &candidate.content.parts {
                if let Some(call) = &part.function_call {
                    let counter = self.tool_call_counters.entry(index).or_insert(0);
                    let tool_index = *counter;
                    *counter += 1;
                    let arguments = call
                        .args
                        .as_ref()
                        .map(|value| serde_json::to_string(value).unwrap_or_default())
                        .unwrap_or_else(|| "{}".to_string());
                    tool_calls.push(ToolCallChunk {
                        index: tool_index,
                        id: Some(format!("call_{tool_index}")),
                        kind: Some("function".to_string()),
                        function: Some(FunctionCallChunk {
                            name: Some(call.name.clone()),
                            arguments: Some(arguments),
                        }),
                    });
                }
            }
            if !tool_calls.is_empty() {
                delta.tool_calls = Some(tool_calls);
            }

            let finish_reason = candidate.finish_reason.map(map_finish_reason);

            if delta.content.is_some()
                || delta.role.is_some()
                || delta.tool_calls.is_some()
                || finish_reason.is_some()
            {
                chunks.push(self.make_chunk(index, delta, finish_reason));
            }
        }
        chunks
    }

    fn make_chunk(
        &self,
        index: i64,
        delta: Delta,
        finish_reason: Option<OpenAiFinishReason>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![StreamChoice {
                index,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::gemini::content::{Content, Part};

    fn candidate_with_text(text: &str, finish: Option<GeminiFinishReason>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part::text(text)],
                    role: None,
                },
                finish_reason: finish,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: None,
        }
    }

    #[test]
    fn non_streaming_candidate_text_round_trips() {
        let resp = candidate_with_text("hello there", Some(GeminiFinishReason::Stop));
        let out = transform_response(&resp, "gemini-2.0-flash-exp", "chatcmpl-1".into(), 1000);
        assert_eq!(out.choices[0].message.content.as_deref(), Some("hello there"));
        assert_eq!(out.choices[0].finish_reason, Some(OpenAiFinishReason::Stop));
    }

    #[test]
    fn finish_reason_maps_per_spec_table() {
        assert_eq!(map_finish_reason(GeminiFinishReason::Stop), OpenAiFinishReason::Stop);
        assert_eq!(map_finish_reason(GeminiFinishReason::MaxTokens), OpenAiFinishReason::Length);
        assert_eq!(map_finish_reason(GeminiFinishReason::Safety), OpenAiFinishReason::ContentFilter);
        assert_eq!(map_finish_reason(GeminiFinishReason::ToolUse), OpenAiFinishReason::ToolCalls);
    }

    #[test]
    fn streaming_state_emits_incremental_deltas_from_cumulative_frames() {
        let mut state = GeminiToOpenAiStreamState::new("chatcmpl-1".into(), "gemini-2.0-flash-exp".into(), 1000);
        let frame1 = candidate_with_text("hel", None);
        let frame2 = candidate_with_text("hello", Some(GeminiFinishReason::Stop));

        let chunks1 = state.push(&frame1);
        assert_eq!(chunks1.len(), 1);
        assert_eq!(chunks1[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks1[0].choices[0].delta.content.as_deref(), Some("hel"));

        let chunks2 = state.push(&frame2);
        assert_eq!(chunks2.len(), 1);
        assert_eq!(chunks2[0].choices[0].delta.role, None);
        assert_eq!(chunks2[0].choices[0].delta.content.as_deref(), Some("lo"));
        assert_eq!(chunks2[0].choices[0].finish_reason, Some(OpenAiFinishReason::Stop));
    }

    #[test]
    fn tool_call_arguments_round_trip_byte_identical() {
        use gproxy_protocol::gemini::content::FunctionCall;

        let args = serde_json::json!({"city": "Tokyo", "unit": "celsius"});
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part {
                        function_call: Some(FunctionCall {
                            name: "get_weather".to_string(),
                            args: Some(args.clone()),
                        }),
                        ..Default::default()
                    }],
                    role: None,
                },
                finish_reason: Some(GeminiFinishReason::ToolUse),
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: None,
        };
        let out = transform_response(&resp, "gemini-2.0-flash-exp", "chatcmpl-1".into(), 1000);
        let tool_calls = out.choices[0].message.tool_calls.as_ref().unwrap();
        let expected = serde_json::to_string(&args).unwrap();
        assert_eq!(tool_calls[0].function.arguments, expected);
    }
}
