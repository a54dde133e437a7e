//! Shared doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axonhub::channel::{Channel, ChannelRegistry, ModelChannelSelector};
use axonhub::persistence::InMemoryPersistence;
use axonhub::pipeline::{Pipeline, RequestContext};
use axonhub::stream::{BoxChunkStream, VecStream};
use axonhub::transformer::openai::OpenAiOutbound;
use axonhub::transport::{Executor, HttpRequest, HttpResponse};
use axonhub::types::StreamEvent;
use axonhub::{Error, ErrorContext, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub enum Reply {
    Json(HttpResponse),
    Events(Vec<StreamEvent>),
    Fail(Error),
}

/// Executor that answers from a script and records what it was sent.
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedExecutor {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn next(&self, request: &HttpRequest) -> Reply {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Fail(Error::validation("script exhausted")))
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, _ctx: &RequestContext, request: &HttpRequest) -> Result<HttpResponse> {
        match self.next(request) {
            Reply::Json(resp) => Ok(resp),
            Reply::Events(_) => Err(Error::validation("scripted a stream for a json call")),
            Reply::Fail(e) => Err(e),
        }
    }

    async fn execute_stream(
        &self,
        _ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        match self.next(request) {
            Reply::Events(events) => Ok(Box::new(VecStream::new(events))),
            Reply::Json(_) => Err(Error::validation("scripted json for a stream call")),
            Reply::Fail(e) => Err(e),
        }
    }
}

pub fn transient(message: &str) -> Reply {
    Reply::Fail(Error::runtime_with_context(
        message,
        ErrorContext::new().with_source("scripted"),
    ))
}

pub fn openai_channel(id: &str, priority: i32) -> Channel {
    Channel::new(
        id,
        Arc::new(OpenAiOutbound::new(Some(&format!("http://{id}.test/v1")), "sk-test")),
    )
    .with_priority(priority)
}

pub fn pipeline(
    channels: Vec<Channel>,
    executor: Arc<ScriptedExecutor>,
) -> (Arc<InMemoryPersistence>, Pipeline) {
    let registry = Arc::new(ChannelRegistry::with_channels(
        channels.into_iter().map(Arc::new).collect(),
    ));
    let store = Arc::new(InMemoryPersistence::new());
    let pipeline = Pipeline::new(
        Arc::new(ModelChannelSelector::new(registry)),
        executor,
        store.clone(),
        store.clone(),
    );
    (store, pipeline)
}

pub fn openai_chunk(json: &str) -> StreamEvent {
    StreamEvent::new("", json.to_string())
}
