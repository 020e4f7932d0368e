//! Asynchronous completion jobs.
//!
//! Only the queue contract exists today; the HTTP surface answers 501 until
//! a worker implementation lands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::providers::UnifiedRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: Uuid,
    pub tenant_id: String,
    pub request: UnifiedRequest,
    pub callback_url: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: AsyncJob) -> Result<()>;

    /// Runs the worker loop until cancelled.
    async fn process(&self) -> Result<()>;
}
