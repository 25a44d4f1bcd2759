pub mod analysis;
pub mod capture;
pub mod common;
pub mod config;
pub mod error;
pub mod history;

use tracing::Level;

pub use analysis::{AnalysisResult, BinCategory, ModelClient, ResultNormalizer};
pub use capture::{SessionController, SessionHandle};
pub use config::Settings;
pub use error::AppError;
pub use history::{HistoryEntry, HistoryStore, InMemoryHistoryStore, ScanSource};

/// Installs a global `fmt` subscriber. Call once, from the embedding binary.
pub fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}
