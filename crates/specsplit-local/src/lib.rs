//! Category resolution for construction specification documents.
//!
//! VMSW-numbered documents are resolved from their chapter numbers alone;
//! everything else goes through a Gemini-backed semantic matcher. The
//! [`hybrid::HybridDispatcher`] picks the path per document.

pub mod ai_client;
pub mod config;
pub mod extract;
pub mod gemini;
pub mod hybrid;
pub mod logging;
pub mod report;
pub mod retry;
pub mod semantic;
pub mod split;
pub mod taxonomy;
pub mod toc;
pub mod vmsw;

#[cfg(test)]
mod testutil;

pub use ai_client::AiClient;
pub use config::Settings;
pub use gemini::{GeminiAuth, GeminiModel};
pub use hybrid::{detect_kind, HybridDispatcher};
pub use semantic::{BatchOutcome, RunControl, SemanticConfig, SemanticMatcher};
pub use vmsw::NumericResolver;
