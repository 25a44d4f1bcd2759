use std::fmt;

use async_trait::async_trait;

use crate::capture::compositor::UploadImage;
use crate::error::TransportError;

/// Identifies one analysis attempt. Later tokens compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Image,
    Text,
}

/// Optional context forwarded to the model with either payload kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisHints {
    pub location: Option<String>,
    pub item_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisPayload {
    Image {
        image: UploadImage,
        hints: AnalysisHints,
    },
    Text {
        text: String,
        hints: AnalysisHints,
    },
}

impl AnalysisPayload {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisPayload::Image { .. } => AnalysisKind::Image,
            AnalysisPayload::Text { .. } => AnalysisKind::Text,
        }
    }

    pub fn hints(&self) -> &AnalysisHints {
        match self {
            AnalysisPayload::Image { hints, .. } | AnalysisPayload::Text { hints, .. } => hints,
        }
    }
}

/// Remote vision-language model. Sends a payload, returns the raw reply text;
/// retries and backoff belong to the implementation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn analyze(&self, payload: AnalysisPayload) -> Result<String, TransportError>;
}
