use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::analysis::result::AnalysisResult;
use crate::error::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanSource {
    Photo,
    Text,
}

/// One accepted verdict. `preview` is the stored full-resolution cutout (or
/// frame) for photo scans.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub result: AnalysisResult,
    pub preview: Option<Arc<RgbaImage>>,
    pub source: ScanSource,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(result: AnalysisResult, preview: Option<Arc<RgbaImage>>, source: ScanSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            result,
            preview,
            source,
            recorded_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError>;
}

/// Newest-last list, optionally bounded; the oldest entries fall off first.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
    capacity: Option<usize>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: Some(capacity),
        }
    }

    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        if self.capacity == Some(0) {
            return Err(HistoryError::Storage("history capacity is zero".to_string()));
        }
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        if let Some(capacity) = self.capacity {
            while entries.len() > capacity {
                entries.pop_front();
            }
        }
        Ok(())
    }
}
