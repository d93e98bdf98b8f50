use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Category id used when a unit could not be mapped to any taxonomy entry.
pub const UNCATEGORIZED: &str = "UNCATEGORIZED";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },
    #[error("model call failed after {attempts} attempts: {message}")]
    TransientCall { attempts: u32, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("taxonomy error: {0}")]
    Taxonomy(String),
    #[error("toc error: {0}")]
    Toc(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// True when the failure message carries a quota / rate-limit signal.
    ///
    /// Backends surface these as free text (HTTP status + provider body), so this
    /// is a keyword match rather than a structured check.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            Error::Llm(msg) | Error::TransientCall { message: msg, .. } => {
                message_is_rate_limit(msg)
            }
            _ => false,
        }
    }
}

pub fn message_is_rate_limit(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    m.contains("429")
        || m.contains("resource exhausted")
        || m.contains("resource_exhausted")
        || m.contains("rate limit")
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TocLevel {
    Chapter,
    Section,
}

/// One chapter or section from a document's table of contents.
///
/// Deserialization applies the same page-range check as [`TocUnit::new`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawTocUnit")]
pub struct TocUnit {
    /// Numeric code such as `"02.40"`; empty for documents without numbering.
    #[serde(default)]
    pub code: String,
    pub title: String,
    pub level: TocLevel,
    pub page_start: u32,
    pub page_end: u32,
}

impl TocUnit {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        level: TocLevel,
        page_start: u32,
        page_end: u32,
    ) -> Result<Self> {
        let title = title.into();
        if page_start > page_end {
            return Err(Error::InvalidInput(format!(
                "unit {title:?}: page_start {page_start} > page_end {page_end}"
            )));
        }
        Ok(Self {
            code: code.into(),
            title,
            level,
            page_start,
            page_end,
        })
    }

    /// Join key back to the unit: the code when present, otherwise the title.
    pub fn key(&self) -> &str {
        let code = self.code.trim();
        if code.is_empty() {
            self.title.trim()
        } else {
            code
        }
    }
}

#[derive(Deserialize)]
struct RawTocUnit {
    #[serde(default)]
    code: String,
    title: String,
    level: TocLevel,
    page_start: u32,
    page_end: u32,
}

impl TryFrom<RawTocUnit> for TocUnit {
    type Error = Error;

    fn try_from(raw: RawTocUnit) -> Result<Self> {
        TocUnit::new(raw.code, raw.title, raw.level, raw.page_start, raw.page_end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryDefinition {
    pub id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CategoryDefinition {
    pub fn new(id: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            id: id.into(),
            keywords,
        }
    }

    /// Leading number of the id (`"01. Afbraak"` -> `Some(1)`). Ordering only.
    pub fn number(&self) -> Option<u32> {
        category_number(&self.id)
    }
}

/// Leading number of a category id, if any.
pub fn category_number(id: &str) -> Option<u32> {
    let digits: String = id
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Rewrites `"1. Name"` as `"01. Name"`; anything else is returned trimmed.
pub fn standardize_category_id(raw: &str) -> String {
    let raw = raw.trim();
    let Some((num, rest)) = raw.split_once('.') else {
        return raw.to_string();
    };
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }
    let name = rest.trim_start();
    if name.is_empty() {
        return raw.to_string();
    }
    format!("{num:0>2}. {name}")
}

/// An ordered set of category definitions with unique ids.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Taxonomy {
    categories: Vec<CategoryDefinition>,
}

impl Taxonomy {
    pub fn new(categories: Vec<CategoryDefinition>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for c in &categories {
            if c.id.trim().is_empty() {
                return Err(Error::Taxonomy("empty category id".to_string()));
            }
            if c.id == UNCATEGORIZED {
                return Err(Error::Taxonomy(format!(
                    "{UNCATEGORIZED} is reserved and cannot be a category id"
                )));
            }
            if !seen.insert(c.id.as_str()) {
                return Err(Error::Taxonomy(format!("duplicate category id: {}", c.id)));
            }
        }
        Ok(Self { categories })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryDefinition> {
        self.categories.iter()
    }

    pub fn get(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Maps a model-provided id onto a taxonomy id (exact, zero-padded, then
    /// case-insensitive). `None` when nothing matches.
    pub fn canonical_id(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        if let Some(c) = self.get(raw) {
            return Some(&c.id);
        }
        let padded = standardize_category_id(raw);
        if let Some(c) = self.get(&padded) {
            return Some(&c.id);
        }
        let lower = padded.to_lowercase();
        self.categories
            .iter()
            .find(|c| c.id.trim().to_lowercase() == lower)
            .map(|c| c.id.as_str())
    }

    /// Ids ordered by their leading number; unnumbered ids keep input order after them.
    pub fn ids_by_number(&self) -> Vec<&str> {
        let mut ids: Vec<(Option<u32>, usize, &str)> = self
            .categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.number(), i, c.id.as_str()))
            .collect();
        ids.sort_by_key(|(n, i, _)| (n.is_none(), n.unwrap_or(0), *i));
        ids.into_iter().map(|(_, _, id)| id).collect()
    }
}

impl<'de> Deserialize<'de> for Taxonomy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            categories: Vec<CategoryDefinition>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Taxonomy::new(raw.categories).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    Numeric,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryAssignment {
    /// `TocUnit::key()` of the unit this assignment belongs to.
    pub key: String,
    pub category_id: String,
    pub confidence: f64,
    pub source: AssignmentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl CategoryAssignment {
    pub fn numeric(key: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            category_id: category_id.into(),
            confidence: 1.0,
            source: AssignmentSource::Numeric,
            explanation: None,
        }
    }

    pub fn semantic(
        key: impl Into<String>,
        category_id: impl Into<String>,
        confidence: f64,
        explanation: Option<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            key: key.into(),
            category_id: category_id.into(),
            confidence,
            source: AssignmentSource::Semantic,
            explanation,
        }
    }

    pub fn uncategorized(key: impl Into<String>, source: AssignmentSource) -> Self {
        Self {
            key: key.into(),
            category_id: UNCATEGORIZED.to_string(),
            confidence: 0.0,
            source,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn is_uncategorized(&self) -> bool {
        self.category_id == UNCATEGORIZED
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    #[default]
    Auto,
    Vmsw,
    NonVmsw,
}

impl FromStr for ResolutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "vmsw" => Ok(Self::Vmsw),
            "non-vmsw" | "non_vmsw" | "ai" => Ok(Self::NonVmsw),
            other => Err(Error::Configuration(format!(
                "unknown resolution mode {other:?} (expected auto, vmsw or non-vmsw)"
            ))),
        }
    }
}

/// The resolution path actually taken for a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    Vmsw,
    NonVmsw,
}

/// Result of structured extraction from free-form model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Structured(serde_json::Map<String, serde_json::Value>),
    /// Extraction did not apply; the original text, unchanged.
    Raw(String),
}

impl Extracted {
    pub fn as_structured(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Extracted::Structured(m) => Some(m),
            Extracted::Raw(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<serde_json::Map<String, serde_json::Value>> {
        match self {
            Extracted::Structured(m) => Some(m),
            Extracted::Raw(_) => None,
        }
    }
}

/// Document-level resolution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: DocumentKind,
    /// One entry per input unit, in input order (a prefix when `cancelled`).
    pub assignments: Vec<CategoryAssignment>,
    pub batches_total: usize,
    /// Degraded batches, rate-limited ones included.
    pub batches_failed: usize,
    pub batches_rate_limited: usize,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl Resolution {
    pub fn uncategorized_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.is_uncategorized())
            .count()
    }
}

/// Remote text-generation endpoint.
///
/// Errors should carry the provider's message verbatim (status code included) so
/// callers can classify rate limiting.
#[async_trait::async_trait]
pub trait GenerativeModel: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[async_trait::async_trait]
impl<M: GenerativeModel + ?Sized> GenerativeModel for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStarted {
        index: usize,
        total: usize,
    },
    BatchFinished {
        index: usize,
        total: usize,
        degraded: bool,
    },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Cooperative cancellation shared between the host and a running resolution.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_key_prefers_code() {
        let u = TocUnit::new(" 02.40 ", "Funderingen", TocLevel::Section, 3, 4).unwrap();
        assert_eq!(u.key(), "02.40");
        let u = TocUnit::new("", " Dakwerken ", TocLevel::Chapter, 3, 4).unwrap();
        assert_eq!(u.key(), "Dakwerken");
    }

    #[test]
    fn inverted_page_range_is_rejected() {
        let err = TocUnit::new("01", "x", TocLevel::Chapter, 5, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn deserialized_units_are_range_checked() {
        let ok: TocUnit = serde_json::from_str(
            r#"{"title": "Ramen", "level": "section", "page_start": 3, "page_end": 9}"#,
        )
        .unwrap();
        assert_eq!(ok.code, "");
        assert_eq!(ok.page_end, 9);
        let inverted = serde_json::from_str::<TocUnit>(
            r#"{"code": "02.40", "title": "x", "level": "section", "page_start": 9, "page_end": 3}"#,
        );
        assert!(inverted.is_err());
    }

    #[test]
    fn taxonomy_rejects_duplicates_and_reserved_ids() {
        let dup = Taxonomy::new(vec![
            CategoryDefinition::new("01. A", vec![]),
            CategoryDefinition::new("01. A", vec![]),
        ]);
        assert!(matches!(dup, Err(Error::Taxonomy(_))));
        let reserved = Taxonomy::new(vec![CategoryDefinition::new(UNCATEGORIZED, vec![])]);
        assert!(reserved.is_err());
    }

    #[test]
    fn canonical_id_accepts_unpadded_and_case_variants() {
        let t = Taxonomy::new(vec![
            CategoryDefinition::new("01. Afbraak en Grondwerken", vec![]),
            CategoryDefinition::new("12. Sanitair", vec![]),
        ])
        .unwrap();
        assert_eq!(t.canonical_id("12. Sanitair"), Some("12. Sanitair"));
        assert_eq!(
            t.canonical_id("1. Afbraak en Grondwerken"),
            Some("01. Afbraak en Grondwerken")
        );
        assert_eq!(t.canonical_id(" 12. SANITAIR "), Some("12. Sanitair"));
        assert_eq!(t.canonical_id("13. Verwarming"), None);
    }

    #[test]
    fn ids_by_number_orders_numerically() {
        let t = Taxonomy::new(vec![
            CategoryDefinition::new("Misc", vec![]),
            CategoryDefinition::new("10. B", vec![]),
            CategoryDefinition::new("02. A", vec![]),
        ])
        .unwrap();
        assert_eq!(t.ids_by_number(), vec!["02. A", "10. B", "Misc"]);
    }

    #[test]
    fn semantic_confidence_is_clamped() {
        let a = CategoryAssignment::semantic("k", "01. A", 1.7, None);
        assert_eq!(a.confidence, 1.0);
        let a = CategoryAssignment::semantic("k", "01. A", f64::NAN, None);
        assert_eq!(a.confidence, 0.0);
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("non_vmsw".parse::<ResolutionMode>().unwrap(), ResolutionMode::NonVmsw);
        assert_eq!("AI".parse::<ResolutionMode>().unwrap(), ResolutionMode::NonVmsw);
        assert_eq!(" vmsw ".parse::<ResolutionMode>().unwrap(), ResolutionMode::Vmsw);
        assert!("fast".parse::<ResolutionMode>().is_err());
    }

    #[test]
    fn rate_limit_classifier() {
        assert!(Error::Llm("gemini HTTP 429 Too Many Requests".into()).is_rate_limit());
        assert!(Error::Llm("Resource Exhausted: quota".into()).is_rate_limit());
        assert!(Error::Llm("status RESOURCE_EXHAUSTED".into()).is_rate_limit());
        assert!(!Error::Llm("gemini HTTP 500".into()).is_rate_limit());
        assert!(!Error::Cancelled.is_rate_limit());
    }

    #[test]
    fn closures_are_progress_sinks() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| seen.lock().unwrap().push(e);
        sink.on_event(ProgressEvent::BatchStarted { index: 0, total: 1 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
