use super::{api_error_from_http, api_error_from_value, DEFAULT_BASE_URL};
use crate::error::ErrorContext;
use crate::stream::{BoxChunkStream, ConvertStream};
use crate::transformer::{ApiFormat, Outbound, ResponseAggregator};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent, ToolCall, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Talks to OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiOutbound {
    base_url: String,
    api_key: String,
}

impl OpenAiOutbound {
    pub fn new(base_url: Option<&str>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn decode_chunk(event: &StreamEvent) -> Result<Vec<Response>> {
    if event.is_done() {
        return Ok(vec![Response::done()]);
    }
    if event.data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(&event.data)?;
    if let Some(err) = api_error_from_value(500, &value) {
        return Err(err);
    }
    Ok(vec![serde_json::from_value(value)?])
}

#[async_trait]
impl Outbound for OpenAiOutbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAiChatCompletion
    }

    async fn transform_request(&self, request: &Request) -> Result<HttpRequest> {
        let mut body = request.clone();
        for message in &mut body.messages {
            message.tool_calls.iter_mut().for_each(ToolCall::fill_empty_arguments);
        }
        if body.is_stream() {
            let mut options = match body.stream_options.take() {
                Some(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            options.insert("include_usage".to_string(), Value::Bool(true));
            body.stream_options = Some(Value::Object(options));
        }

        let mut http = HttpRequest::post_json(self.endpoint(), &body)?
            .with_header("authorization", format!("Bearer {}", self.api_key));
        if body.is_stream() {
            http.set_header("accept", "text/event-stream");
        }
        Ok(http)
    }

    async fn transform_response(&self, response: &HttpResponse) -> Result<Response> {
        let value: Value = serde_json::from_slice(&response.body).map_err(|e| {
            Error::runtime_with_context(
                "invalid upstream response body",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("openai"),
            )
        })?;
        let status = if response.status >= 400 {
            response.status
        } else {
            502
        };
        if let Some(err) = api_error_from_value(status, &value) {
            return Err(err);
        }
        let mut unified: Response = serde_json::from_value(value)?;
        for message in unified.choices.iter_mut().filter_map(|c| c.message.as_mut()) {
            message.tool_calls.iter_mut().for_each(ToolCall::fill_empty_arguments);
        }
        Ok(unified)
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<StreamEvent>,
    ) -> Result<BoxChunkStream<Response>> {
        Ok(ConvertStream::boxed(stream, |event: StreamEvent| {
            decode_chunk(&event)
        }))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, Option<Usage>)> {
        let mut aggregator = ResponseAggregator::new();
        for event in chunks {
            for chunk in decode_chunk(event)? {
                aggregator.push(&chunk);
            }
        }
        let usage = aggregator.usage();
        Ok((Bytes::from(serde_json::to_vec(&aggregator.finish())?), usage))
    }

    async fn transform_error(&self, error: Error) -> Error {
        match &error {
            Error::Http(e) => api_error_from_http(e).unwrap_or(error),
            _ => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, VecStream};
    use crate::types::Message;

    #[tokio::test]
    async fn streaming_request_asks_for_usage() {
        let outbound = OpenAiOutbound::new(Some("https://api.example.com/v1/"), "sk-test");
        let request = Request::new("gpt-4", vec![Message::user("Hi")]).with_stream(true);
        let http = outbound.transform_request(&request).await.unwrap();

        assert_eq!(http.url, "https://api.example.com/v1/chat/completions");
        assert_eq!(http.header("Authorization"), Some("Bearer sk-test"));
        let body: Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[tokio::test]
    async fn complete_calls_without_arguments_get_empty_object() {
        let outbound = OpenAiOutbound::new(None, "k");
        let response = HttpResponse::json(
            200,
            &serde_json::json!({
                "id": "c1",
                "object": "chat.completion",
                "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "ping"}}]
                    },
                    "finish_reason": "tool_calls"
                }]
            }),
        )
        .unwrap();
        let unified = outbound.transform_response(&response).await.unwrap();
        let message = unified.choices[0].message.as_ref().unwrap();
        assert_eq!(message.tool_calls[0].function.arguments, "{}");

        let request = Request::new(
            "gpt-4",
            vec![Message::assistant("").with_tool_calls(vec![ToolCall::new("call_1", "ping", "")])],
        );
        let http = outbound.transform_request(&request).await.unwrap();
        let body: Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["messages"][0]["tool_calls"][0]["function"]["arguments"], "{}");
    }

    #[tokio::test]
    async fn stream_error_payload_is_terminal() {
        let outbound = OpenAiOutbound::new(None, "k");
        let events: BoxChunkStream<StreamEvent> = Box::new(VecStream::new(vec![
            StreamEvent::new("", r#"{"id":"1","object":"chat.completion.chunk","choices":[]}"#),
            StreamEvent::new("", r#"{"error":{"message":"overloaded","type":"server_error"}}"#),
        ]));
        let err = collect(outbound.transform_stream(events).await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { ref error_type, .. } if error_type == "server_error"));
    }

    #[tokio::test]
    async fn http_error_body_becomes_api_error() {
        let outbound = OpenAiOutbound::new(None, "k");
        let err = outbound
            .transform_error(Error::http(
                "POST",
                "https://api.openai.com/v1/chat/completions",
                429,
                r#"{"error":{"message":"rate limit exceeded","type":"requests","code":"rate_limit"}}"#,
            ))
            .await;
        match err {
            Error::Api {
                status, code, message, ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(code.as_deref(), Some("rate_limit"));
                assert_eq!(message, "rate limit exceeded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
