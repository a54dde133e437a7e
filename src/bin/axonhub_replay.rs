//! axonhub-replay: run one recorded client request through the gateway core.
//!
//! Usage:
//!   axonhub-replay <config.yaml> <inbound-format> <request.json>
//!
//! `inbound-format` is one of: openai, anthropic, ui_text, data_stream.

use anyhow::{bail, Context};
use axonhub::channel::registry::channels_from_config;
use axonhub::channel::{ChannelRegistry, ModelChannelSelector};
use axonhub::config::GatewayConfig;
use axonhub::logging;
use axonhub::persistence::InMemoryPersistence;
use axonhub::pipeline::{Pipeline, PipelineResponse, RequestContext, RetryPolicy};
use axonhub::transformer::anthropic::AnthropicInbound;
use axonhub::transformer::data_stream::DataStreamInbound;
use axonhub::transformer::openai::OpenAiInbound;
use axonhub::transformer::ui_text::UiTextInbound;
use axonhub::transformer::{ApiFormat, Inbound};
use axonhub::transport::{HttpExecutor, HttpRequest};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn print_usage() {
    eprintln!(
        r#"axonhub-replay: replay one client request through configured channels

USAGE:
    axonhub-replay <config.yaml> <inbound-format> <request.json>

FORMATS:
    openai | anthropic | ui_text | data_stream

ENVIRONMENT:
    AXONHUB_LOG                 Log filter (falls back to RUST_LOG)
    AXONHUB_*                   Config overrides, see GatewayConfig"#
    );
}

fn inbound_for(format: ApiFormat) -> anyhow::Result<(Arc<dyn Inbound>, &'static str)> {
    match format {
        ApiFormat::OpenAiChatCompletion => {
            Ok((Arc::new(OpenAiInbound::new()), "/v1/chat/completions"))
        }
        ApiFormat::AnthropicMessages => Ok((Arc::new(AnthropicInbound::new()), "/v1/messages")),
        ApiFormat::UiText => Ok((Arc::new(UiTextInbound::new()), "/v1/chat")),
        ApiFormat::UiDataStream => Ok((Arc::new(DataStreamInbound::new()), "/v1/chat")),
        ApiFormat::Bedrock => bail!("bedrock is not a client dialect"),
    }
}

#[tokio::main]
async fn main() {
    logging::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        print_usage();
        std::process::exit(2);
    }
    if let Err(e) = run(&args[1], &args[2], &args[3]).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config_path: &str, format: &str, request_path: &str) -> anyhow::Result<()> {
    let config = GatewayConfig::load(config_path)
        .with_context(|| format!("loading {config_path}"))?;
    let (inbound, path) = inbound_for(format.parse()?)?;
    let body =
        std::fs::read(request_path).with_context(|| format!("reading {request_path}"))?;

    let http = HttpExecutor::new(&config.http)?;
    let registry = Arc::new(ChannelRegistry::with_channels(channels_from_config(
        &config, &http,
    )?));
    let store = Arc::new(InMemoryPersistence::new());
    let mut pipeline = Pipeline::new(
        Arc::new(ModelChannelSelector::new(registry)),
        Arc::new(http),
        store.clone(),
        store.clone(),
    )
    .with_retry_policy(RetryPolicy::from_config(&config.retry));
    if let Some(secs) = config.request_timeout_secs {
        pipeline = pipeline.with_request_timeout(Duration::from_secs(secs));
    }

    let request = HttpRequest::post(path, body).with_header("content-type", "application/json");
    let response = pipeline
        .process(&RequestContext::new(), inbound.clone(), &request)
        .await;

    let mut out = std::io::stdout().lock();
    match response {
        PipelineResponse::Json(resp) => {
            writeln!(out, "HTTP {}", resp.status)?;
            out.write_all(&resp.body)?;
            writeln!(out)?;
        }
        PipelineResponse::Stream { headers, mut stream } => {
            writeln!(out, "HTTP 200")?;
            for (name, value) in &headers {
                writeln!(out, "{name}: {value}")?;
            }
            writeln!(out)?;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => out.write_all(&inbound.encode_event(&event))?,
                    Err(e) => {
                        eprintln!("stream error: {e}");
                        break;
                    }
                }
            }
            stream.close().await?;
        }
    }
    out.flush()?;
    drop(out);

    eprintln!();
    for request in store.requests() {
        eprintln!(
            "request {} model={} status={:?}",
            request.id, request.model, request.status
        );
    }
    for execution in store.executions() {
        eprintln!(
            "  execution {} channel={} model={} status={:?}{}",
            execution.id,
            execution.channel_id,
            execution.model,
            execution.status,
            execution
                .error
                .as_deref()
                .map(|e| format!(" error={e}"))
                .unwrap_or_default()
        );
    }
    for usage in store.usage_records() {
        eprintln!(
            "  usage channel={} prompt={} completion={} total={}",
            usage.channel_id,
            usage.usage.prompt_tokens,
            usage.usage.completion_tokens,
            usage.usage.total_tokens
        );
    }
    Ok(())
}
