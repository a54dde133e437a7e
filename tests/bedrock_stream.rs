//! Anthropic clients served by a Bedrock channel over the binary event stream.

use axonhub::channel::registry::channels_from_config;
use axonhub::channel::{ChannelRegistry, ModelChannelSelector};
use axonhub::codec::eventstream::{
    encode_frame, HeaderValue, HEADER_EVENT_TYPE, HEADER_MESSAGE_TYPE,
};
use axonhub::config::GatewayConfig;
use axonhub::persistence::{InMemoryPersistence, RecordStatus};
use axonhub::pipeline::{Pipeline, PipelineResponse, RequestContext};
use axonhub::stream::collect;
use axonhub::transformer::anthropic::AnthropicInbound;
use axonhub::transport::{HttpExecutor, HttpRequest};
use base64::Engine;
use serde_json::Value;
use std::sync::Arc;

const MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

fn setup(base_url: &str) -> (Arc<InMemoryPersistence>, Pipeline) {
    let yaml = format!(
        r#"
channels:
  - id: bedrock-east
    kind: bedrock
    base_url: "{base_url}"
    supported_models: ["claude-3-haiku"]
    model_mappings:
      - from: claude-3-haiku
        to: "{MODEL}"
    bedrock:
      region: us-east-1
      access_key_id: AKIDEXAMPLE
      secret_access_key: wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY
"#
    );
    let config = GatewayConfig::from_yaml_str(&yaml).unwrap();
    let http = HttpExecutor::new(&config.http).unwrap();
    let registry = Arc::new(ChannelRegistry::with_channels(
        channels_from_config(&config, &http).unwrap(),
    ));
    let store = Arc::new(InMemoryPersistence::new());
    let pipeline = Pipeline::new(
        Arc::new(ModelChannelSelector::new(registry)),
        Arc::new(http),
        store.clone(),
        store.clone(),
    );
    (store, pipeline)
}

fn messages_request(stream: bool) -> HttpRequest {
    let body = serde_json::json!({
        "model": "claude-3-haiku",
        "max_tokens": 64,
        "messages": [{"role": "user", "content": "Hi"}],
        "stream": stream,
    });
    HttpRequest::post("/v1/messages", body.to_string())
}

fn chunk_frame(event: Value) -> Vec<u8> {
    let payload = serde_json::json!({
        "bytes": base64::engine::general_purpose::STANDARD.encode(event.to_string()),
    });
    encode_frame(
        &[
            (HEADER_MESSAGE_TYPE, HeaderValue::String("event".into())),
            (HEADER_EVENT_TYPE, HeaderValue::String("chunk".into())),
        ],
        payload.to_string().as_bytes(),
    )
    .to_vec()
}

fn text_reply_frames() -> Vec<u8> {
    let events = [
        serde_json::json!({"type": "message_start", "message": {"id": "msg_1", "type": "message", "role": "assistant", "model": MODEL, "content": [], "usage": {"input_tokens": 10, "output_tokens": 0}}}),
        serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
        serde_json::json!({"type": "content_block_stop", "index": 0}),
        serde_json::json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
        serde_json::json!({"type": "message_stop"}),
    ];
    events.into_iter().flat_map(chunk_frame).collect()
}

fn stream_path() -> String {
    "/invoke-with-response-stream$".to_string()
}

#[tokio::test]
async fn signed_stream_is_decoded_and_recorded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", mockito::Matcher::Regex(stream_path()))
        .match_header(
            "authorization",
            mockito::Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/".into()),
        )
        .match_body(mockito::Matcher::PartialJson(
            serde_json::json!({"anthropic_version": "bedrock-2023-05-31"}),
        ))
        .with_status(200)
        .with_header("content-type", "application/vnd.amazon.eventstream")
        .with_body(text_reply_frames())
        .create_async()
        .await;

    let (store, pipeline) = setup(&server.url());
    let response = pipeline
        .process(
            &RequestContext::new(),
            Arc::new(AnthropicInbound::new()),
            &messages_request(true),
        )
        .await;
    let PipelineResponse::Stream { stream, .. } = response else {
        panic!("expected a stream");
    };
    let events = collect(stream).await.unwrap();
    mock.assert_async().await;

    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"message_start"));
    assert_eq!(types.last(), Some(&"message_stop"));
    assert!(types.contains(&"content_block_delta"));

    let execution = store.executions()[0].clone();
    assert_eq!(execution.channel_id, "bedrock-east");
    assert_eq!(execution.model, MODEL);
    assert_eq!(execution.status, RecordStatus::Completed);
    let sent: Value = serde_json::from_slice(&execution.request_body).unwrap();
    assert!(sent.get("model").is_none());
    assert!(sent.get("stream").is_none());

    let usage = store.usage_records()[0].clone();
    assert_eq!(usage.usage.prompt_tokens, 10);
    assert_eq!(usage.usage.completion_tokens, 2);

    let request = store.requests()[0].clone();
    assert_eq!(request.status, RecordStatus::Completed);
    let body: Value = serde_json::from_slice(request.response_body.as_ref().unwrap()).unwrap();
    assert_eq!(body["content"][0]["text"], "Hello");
}

#[tokio::test]
async fn exception_frame_ends_the_stream_with_its_type() {
    let mut body = chunk_frame(serde_json::json!({"type": "message_start", "message": {"id": "msg_2", "type": "message", "role": "assistant", "model": MODEL, "content": [], "usage": {"input_tokens": 3, "output_tokens": 0}}}));
    body.extend(
        encode_frame(
            &[(HEADER_MESSAGE_TYPE, HeaderValue::String("exception".into()))],
            br#"{"__type":"ThrottlingException","message":"Too many requests, please wait"}"#,
        )
        .to_vec(),
    );

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", mockito::Matcher::Regex(stream_path()))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let (store, pipeline) = setup(&server.url());
    let response = pipeline
        .process(
            &RequestContext::new(),
            Arc::new(AnthropicInbound::new()),
            &messages_request(true),
        )
        .await;
    let PipelineResponse::Stream { stream, .. } = response else {
        panic!("expected a stream");
    };
    let err = collect(stream).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("received exception ThrottlingException: Too many requests, please wait"));

    assert_eq!(store.executions()[0].status, RecordStatus::Failed);
    assert_eq!(store.requests()[0].status, RecordStatus::Failed);
}

#[tokio::test]
async fn upstream_json_error_uses_the_client_dialect() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", mockito::Matcher::Regex("/invoke$".into()))
        .with_status(400)
        .with_header("x-amzn-ErrorType", "ValidationException")
        .with_body(r#"{"message":"Malformed input request"}"#)
        .create_async()
        .await;

    let (store, pipeline) = setup(&server.url());
    let response = pipeline
        .process(
            &RequestContext::new(),
            Arc::new(AnthropicInbound::new()),
            &messages_request(false),
        )
        .await;
    let PipelineResponse::Json(http) = response else {
        panic!("expected a json error");
    };
    assert_eq!(http.status, 400);
    let body: Value = serde_json::from_slice(&http.body).unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["message"], "Malformed input request");
    assert_eq!(store.executions()[0].status, RecordStatus::Failed);
}
