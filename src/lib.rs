//! Whale Scope Library
//!
//! Portfolio analysis of a token's largest holders: cross-holdings
//! aggregation, address clustering and target concentration ranking.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod provider;

// Re-export commonly used types
pub use analysis::{AnalysisHandle, AnalysisResult, Analyzer, ResultCache};
pub use config::Config;
pub use error::{Error, Result};
