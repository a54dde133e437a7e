use super::signer::SigV4Signer;
use crate::codec::eventstream::EventStreamDecoder;
use crate::context::RequestContext;
use crate::stream::BoxChunkStream;
use crate::transport::{Executor, HttpExecutor, HttpRequest, HttpResponse};
use crate::types::StreamEvent;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Signs every call and decodes streamed replies from binary event-stream
/// frames instead of SSE.
#[derive(Clone)]
pub struct BedrockExecutor {
    http: HttpExecutor,
    signer: SigV4Signer,
}

impl BedrockExecutor {
    pub fn new(http: HttpExecutor, signer: SigV4Signer) -> Self {
        Self { http, signer }
    }

    fn signed(&self, request: &HttpRequest) -> Result<HttpRequest> {
        let mut signed = request.clone();
        self.signer.sign(&mut signed, Utc::now())?;
        debug!(
            url = signed.url.as_str(),
            region = self.signer.region(),
            "signed bedrock request"
        );
        Ok(signed)
    }
}

#[async_trait]
impl Executor for BedrockExecutor {
    async fn execute(&self, ctx: &RequestContext, request: &HttpRequest) -> Result<HttpResponse> {
        let signed = self.signed(request)?;
        self.http.execute(ctx, &signed).await
    }

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        let signed = self.signed(request)?;
        let resp = self.http.send(ctx, &signed).await?;
        let body = HttpExecutor::body_stream(ctx, resp);
        Ok(Box::new(
            EventStreamDecoder::new(body).with_cancellation(ctx.cancel.clone()),
        ))
    }
}
