//! In-process persistence backend.

use super::{
    ExecutionRecord, NewExecution, NewRequest, PersistenceService, RecordStatus, RequestRecord,
    UsageRecord, UsageService,
};
use crate::types::StreamEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct Store {
    requests: Vec<RequestRecord>,
    executions: Vec<ExecutionRecord>,
    request_chunks: HashMap<String, Vec<StreamEvent>>,
    execution_chunks: HashMap<String, Vec<StreamEvent>>,
    usage: Vec<UsageRecord>,
}

/// Keeps every record in memory. Write failures can be switched on to
/// exercise the best-effort paths.
#[derive(Default)]
pub struct InMemoryPersistence {
    store: RwLock<Store>,
    fail_chunk_writes: AtomicBool,
    fail_final_writes: AtomicBool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_chunk_writes(&self, fail: bool) {
        self.fail_chunk_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_final_writes(&self, fail: bool) {
        self.fail_final_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::persistence(format!("{what} write rejected")));
        }
        Ok(())
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.read().requests.clone()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.read().executions.clone()
    }

    pub fn request_chunks(&self, request_id: &str) -> Vec<StreamEvent> {
        self.read()
            .request_chunks
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn execution_chunks(&self, execution_id: &str) -> Vec<StreamEvent> {
        self.read()
            .execution_chunks
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.read().usage.clone()
    }

    fn update_request(&self, id: &str, f: impl FnOnce(&mut RequestRecord)) -> Result<()> {
        let mut store = self.write();
        let record = store
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::persistence(format!("unknown request {id}")))?;
        f(record);
        Ok(())
    }

    fn update_execution(&self, id: &str, f: impl FnOnce(&mut ExecutionRecord)) -> Result<()> {
        let mut store = self.write();
        let record = store
            .executions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::persistence(format!("unknown execution {id}")))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn create_request(&self, request: NewRequest) -> Result<RequestRecord> {
        let record = RequestRecord {
            id: Uuid::new_v4().to_string(),
            model: request.model,
            api_format: request.api_format,
            stream: request.stream,
            request_body: request.body,
            status: RecordStatus::Processing,
            response_body: None,
            error: None,
        };
        self.write().requests.push(record.clone());
        Ok(record)
    }

    async fn create_execution(&self, execution: NewExecution) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            request_id: execution.request_id,
            channel_id: execution.channel_id,
            model: execution.model,
            request_body: execution.body,
            status: RecordStatus::Processing,
            response_body: None,
            error: None,
        };
        self.write().executions.push(record.clone());
        Ok(record)
    }

    async fn append_request_chunk(&self, request_id: &str, chunk: &StreamEvent) -> Result<()> {
        Self::check(&self.fail_chunk_writes, "chunk")?;
        self.write()
            .request_chunks
            .entry(request_id.to_string())
            .or_default()
            .push(chunk.clone());
        Ok(())
    }

    async fn append_execution_chunk(&self, execution_id: &str, chunk: &StreamEvent) -> Result<()> {
        Self::check(&self.fail_chunk_writes, "chunk")?;
        self.write()
            .execution_chunks
            .entry(execution_id.to_string())
            .or_default()
            .push(chunk.clone());
        Ok(())
    }

    async fn complete_request(&self, request_id: &str, body: Bytes) -> Result<()> {
        Self::check(&self.fail_final_writes, "final")?;
        self.update_request(request_id, |r| {
            r.status = RecordStatus::Completed;
            r.response_body = Some(body);
        })
    }

    async fn fail_request(&self, request_id: &str, error: &str) -> Result<()> {
        Self::check(&self.fail_final_writes, "final")?;
        self.update_request(request_id, |r| {
            r.status = RecordStatus::Failed;
            r.error = Some(error.to_string());
        })
    }

    async fn complete_execution(&self, execution_id: &str, body: Bytes) -> Result<()> {
        Self::check(&self.fail_final_writes, "final")?;
        self.update_execution(execution_id, |r| {
            r.status = RecordStatus::Completed;
            r.response_body = Some(body);
        })
    }

    async fn fail_execution(&self, execution_id: &str, error: &str) -> Result<()> {
        Self::check(&self.fail_final_writes, "final")?;
        self.update_execution(execution_id, |r| {
            r.status = RecordStatus::Failed;
            r.error = Some(error.to_string());
        })
    }
}

#[async_trait]
impl UsageService for InMemoryPersistence {
    async fn record_usage(&self, record: UsageRecord) -> Result<()> {
        Self::check(&self.fail_final_writes, "usage")?;
        self.write().usage.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::ApiFormat;

    #[tokio::test]
    async fn lifecycle_updates_status() {
        let store = InMemoryPersistence::new();
        let request = store
            .create_request(NewRequest {
                model: "gpt-4".into(),
                api_format: ApiFormat::OpenAiChatCompletion,
                stream: false,
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();
        let execution = store
            .create_execution(NewExecution {
                request_id: request.id.clone(),
                channel_id: "c1".into(),
                model: "gpt-4".into(),
                body: Bytes::new(),
            })
            .await
            .unwrap();

        store.fail_execution(&execution.id, "boom").await.unwrap();
        store
            .complete_request(&request.id, Bytes::from_static(b"ok"))
            .await
            .unwrap();

        assert_eq!(store.executions()[0].status, RecordStatus::Failed);
        assert_eq!(store.executions()[0].error.as_deref(), Some("boom"));
        assert_eq!(store.requests()[0].status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_ids_and_injected_failures_error() {
        let store = InMemoryPersistence::new();
        assert!(store.fail_request("nope", "x").await.is_err());

        store.set_fail_chunk_writes(true);
        let err = store
            .append_request_chunk("r", &StreamEvent::done())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(store.request_chunks("r").is_empty());
    }
}
