pub mod client;
pub mod normalizer;
pub mod result;
pub mod service;

pub use client::{AnalysisHints, AnalysisKind, AnalysisPayload, ModelClient, RequestToken};
pub use normalizer::{DecodeStage, ResultNormalizer};
pub use result::{AnalysisResult, BinCategory, UNKNOWN};
pub use service::AnalysisService;
