//! AI-backed category matching for documents without reliable numbering.
//!
//! Units are sent to the model in contiguous batches, strictly one batch at a
//! time, through a single `AiClient` so every batch sees the same rate-limit
//! streak. A batch that cannot be resolved degrades to `UNCATEGORIZED` and the
//! run continues.

use crate::ai_client::{pause, AiClient};
use crate::vmsw::DEMOLITION_CATEGORY;
use serde::Serialize;
use serde_json::{Map, Value};
use specsplit_core::{
    AssignmentSource, CancelFlag, CategoryAssignment, Error, Extracted, GenerativeModel,
    ProgressEvent, ProgressSink, Result, Taxonomy, TocLevel, TocUnit,
};
use std::time::Duration;

/// Confidence used when the model names a valid category but no score.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct SemanticConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Pause between consecutive batches.
    pub inter_batch_delay: Duration,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_retries: 3,
            inter_batch_delay: Duration::from_secs(2),
        }
    }
}

/// Progress reporting and cancellation for one run. Both are optional.
#[derive(Clone, Copy, Default)]
pub struct RunControl<'a> {
    pub progress: Option<&'a dyn ProgressSink>,
    pub cancel: Option<&'a CancelFlag>,
}

impl<'a> RunControl<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = self.progress {
            sink.on_event(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.is_cancelled())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// One entry per processed unit, in input order.
    pub assignments: Vec<CategoryAssignment>,
    pub batches_total: usize,
    /// Degraded batches, rate-limited ones included.
    pub batches_failed: usize,
    pub batches_rate_limited: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct SemanticMatcher<M> {
    client: AiClient<M>,
    config: SemanticConfig,
}

impl<M: GenerativeModel> SemanticMatcher<M> {
    pub fn new(client: AiClient<M>) -> Self {
        Self::with_config(client, SemanticConfig::default())
    }

    pub fn with_config(client: AiClient<M>, config: SemanticConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &AiClient<M> {
        &self.client
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    /// Classifies `units` against `taxonomy`, `batch_size` units per model call.
    ///
    /// Only configuration failures from the backend are returned as errors;
    /// everything else degrades the affected batch. On cancellation the
    /// outcome holds the units resolved so far.
    pub async fn match_batch(
        &self,
        units: &[TocUnit],
        taxonomy: &Taxonomy,
        batch_size: usize,
        control: RunControl<'_>,
    ) -> Result<BatchOutcome> {
        let batch_size = batch_size.max(1);
        let total = units.len().div_ceil(batch_size);
        let mut out = BatchOutcome {
            assignments: Vec::with_capacity(units.len()),
            batches_total: total,
            ..Default::default()
        };

        for (index, batch) in units.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.inter_batch_delay.is_zero() {
                if let Err(Error::Cancelled) =
                    pause(self.config.inter_batch_delay, control.cancel).await
                {
                    out.cancelled = true;
                    break;
                }
            }
            if control.is_cancelled() {
                out.cancelled = true;
                break;
            }

            control.emit(ProgressEvent::BatchStarted { index, total });
            tracing::info!(batch = index + 1, total, units = batch.len(), "matching batch");

            let prompt = build_prompt(batch, taxonomy);
            let result = self
                .client
                .call_with_cancel(&prompt, true, self.config.max_retries, control.cancel)
                .await;

            let degraded = match result {
                Ok(Extracted::Structured(map)) => {
                    out.assignments
                        .extend(batch.iter().map(|u| assignment_from_response(u, &map, taxonomy)));
                    false
                }
                Ok(Extracted::Raw(text)) => {
                    tracing::warn!(
                        batch = index + 1,
                        len = text.len(),
                        "model response had no usable mapping; batch left uncategorized"
                    );
                    out.batches_failed += 1;
                    out.assignments
                        .extend(degrade(batch, "model response could not be parsed"));
                    true
                }
                Err(Error::Cancelled) => {
                    out.cancelled = true;
                    break;
                }
                Err(e @ (Error::NotConfigured(_) | Error::Configuration(_))) => return Err(e),
                Err(e) => {
                    let rate_limited = e.is_rate_limit();
                    tracing::warn!(
                        batch = index + 1,
                        rate_limited,
                        error = %e,
                        "batch failed; left uncategorized"
                    );
                    out.batches_failed += 1;
                    if rate_limited {
                        out.batches_rate_limited += 1;
                    }
                    let reason = if rate_limited {
                        "batch failed: rate limited"
                    } else {
                        "batch failed: model call error"
                    };
                    out.assignments.extend(degrade(batch, reason));
                    true
                }
            };
            control.emit(ProgressEvent::BatchFinished {
                index,
                total,
                degraded,
            });
        }

        if out.cancelled {
            tracing::info!(
                resolved = out.assignments.len(),
                units = units.len(),
                "semantic matching cancelled"
            );
        }
        Ok(out)
    }
}

fn degrade<'a>(
    batch: &'a [TocUnit],
    reason: &'static str,
) -> impl Iterator<Item = CategoryAssignment> + 'a {
    batch.iter().map(move |u| {
        CategoryAssignment::uncategorized(u.key(), AssignmentSource::Semantic)
            .with_explanation(reason)
    })
}

/// Prompt for one batch. Units are keyed by title in the requested mapping.
pub fn build_prompt(batch: &[TocUnit], taxonomy: &Taxonomy) -> String {
    let mut p = String::new();
    p.push_str(&format!(
        "You are a construction categorization expert. Assign each of the {} construction document items below to exactly one category from the list.\n\n",
        batch.len()
    ));

    if let Some(demo) = taxonomy.get(DEMOLITION_CATEGORY) {
        p.push_str(&format!(
            "DEMOLITION/REMOVAL RULE: items describing removal or demolition work (keywords such as \"verwijderen\", \"slopen\", \"uitbreken\", \"opbreken\", \"demonteren\", \"afbreken\") belong to \"{}\".\n\n",
            demo.id
        ));
    }

    p.push_str("Available categories:\n");
    for c in taxonomy.iter() {
        if c.keywords.is_empty() {
            p.push_str(&format!("{}\n", c.id));
        } else {
            p.push_str(&format!("{}: {}\n", c.id, c.keywords.join(", ")));
        }
    }

    p.push_str("\nItems to categorize:\n");
    for u in batch {
        p.push_str(&format!("\nTitle: {}\n", u.title.trim()));
        if !u.code.trim().is_empty() {
            p.push_str(&format!("Code: {}\n", u.code.trim()));
        }
        let level = match u.level {
            TocLevel::Chapter => "chapter",
            TocLevel::Section => "section",
        };
        p.push_str(&format!("Type: {level}\n"));
    }

    p.push_str(
        "\nRespond with a Python dictionary keyed by the exact item title. Each value holds:\n\
         - 'category_id': the category id exactly as listed above\n\
         - 'confidence': a score from 0.0 to 1.0\n\
         - 'explanation': one short sentence\n\n\
         ```python\n\
         results = {\n    \
             \"Item title\": {\"category_id\": \"05. Buitenschrijnwerk\", \"confidence\": 0.9, \"explanation\": \"...\"},\n\
         }\n\
         ```\n",
    );
    p
}

/// Validates the model's entry for one unit against the taxonomy.
fn assignment_from_response(
    unit: &TocUnit,
    map: &Map<String, Value>,
    taxonomy: &Taxonomy,
) -> CategoryAssignment {
    let key = unit.key();
    let entry = map
        .get(&unit.title)
        .or_else(|| map.get(unit.title.trim()))
        .or_else(|| {
            let code = unit.code.trim();
            (!code.is_empty()).then(|| map.get(code)).flatten()
        });
    let Some(entry) = entry else {
        tracing::debug!(key, "unit missing from model response");
        return CategoryAssignment::uncategorized(key, AssignmentSource::Semantic)
            .with_explanation("missing from model response");
    };
    let Some((raw_id, confidence, explanation)) = parse_entry(entry) else {
        return CategoryAssignment::uncategorized(key, AssignmentSource::Semantic)
            .with_explanation("malformed entry in model response");
    };
    match taxonomy.canonical_id(&raw_id) {
        Some(id) => CategoryAssignment::semantic(
            key,
            id,
            confidence.unwrap_or(DEFAULT_CONFIDENCE),
            explanation,
        ),
        None => {
            tracing::debug!(key, category = %raw_id, "model returned unknown category");
            CategoryAssignment::uncategorized(key, AssignmentSource::Semantic)
                .with_explanation(format!("unknown category {raw_id:?}"))
        }
    }
}

fn parse_entry(v: &Value) -> Option<(String, Option<f64>, Option<String>)> {
    match v {
        Value::String(s) => Some((s.clone(), None, None)),
        Value::Object(o) => {
            let id = o
                .get("category_id")
                .or_else(|| o.get("category"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| {
                    o.get("categories")
                        .and_then(|v| v.as_array())
                        .and_then(|a| a.first())
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })?;
            let confidence = o.get("confidence").and_then(|c| match c {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });
            let explanation = o
                .get("explanation")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Some((id, confidence, explanation))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rate_limited, FnModel};
    use specsplit_core::{CategoryDefinition, UNCATEGORIZED};
    use std::sync::Mutex;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            CategoryDefinition::new(DEMOLITION_CATEGORY, vec!["sloop".into()]),
            CategoryDefinition::new("04. Dakwerken", vec!["dak".into(), "goot".into()]),
            CategoryDefinition::new("12. Sanitair", vec!["toilet".into()]),
        ])
        .unwrap()
    }

    fn unit(title: &str) -> TocUnit {
        TocUnit::new("", title, TocLevel::Chapter, 1, 1).unwrap()
    }

    fn matcher(model: FnModel) -> SemanticMatcher<FnModel> {
        SemanticMatcher::with_config(
            AiClient::new(model),
            SemanticConfig {
                inter_batch_delay: Duration::ZERO,
                ..SemanticConfig::default()
            },
        )
    }

    /// Answers every title in the prompt with a category picked from the title.
    fn echo_response(prompt: &str) -> Result<String> {
        let entries: Vec<String> = prompt
            .lines()
            .filter_map(|l| l.strip_prefix("Title: "))
            .map(|t| {
                let id = if t.contains("dak") {
                    "4. dakwerken"
                } else {
                    "12. Sanitair"
                };
                format!("{t:?}: {{'category_id': '{id}', 'confidence': 0.9}},")
            })
            .collect();
        Ok(format!(
            "Here you go:\n```python\nresults = {{\n{}\n}}\n```",
            entries.join("\n")
        ))
    }

    fn echo_model() -> FnModel {
        FnModel::new(|prompt, _| echo_response(prompt))
    }

    #[tokio::test(start_paused = true)]
    async fn failing_batch_does_not_affect_the_next() {
        let m = matcher(FnModel::new(|prompt, _| {
            if prompt.contains("Title: eerste") {
                Err(rate_limited())
            } else {
                echo_response(prompt)
            }
        }));
        let units = vec![unit("eerste dak"), unit("eerste toilet"), unit("tweede dak")];
        let out = m
            .match_batch(&units, &taxonomy(), 2, RunControl::new())
            .await
            .unwrap();

        assert_eq!(out.batches_total, 2);
        assert_eq!(out.batches_failed, 1);
        assert_eq!(out.batches_rate_limited, 1);
        let ids: Vec<&str> = out.assignments.iter().map(|a| a.category_id.as_str()).collect();
        assert_eq!(ids, vec![UNCATEGORIZED, UNCATEGORIZED, "04. Dakwerken"]);
        assert!(out.assignments.iter().all(|a| a.source == AssignmentSource::Semantic));
        assert_eq!(out.assignments[2].confidence, 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_missing_entries_are_downgraded_individually() {
        let m = matcher(FnModel::new(|_, _| {
            Ok(r#"```python
results = {
    "Dakgoten": {"category_id": "04. Dakwerken", "explanation": "roof drainage"},
    "Toiletten": {"category_id": "77. Ruimtevaart", "confidence": 0.99},
}
```"#
                .to_string())
        }));
        let units = vec![unit("Dakgoten"), unit("Toiletten"), unit("Trappen")];
        let out = m
            .match_batch(&units, &taxonomy(), 5, RunControl::new())
            .await
            .unwrap();

        assert_eq!(out.batches_failed, 0);
        let a = &out.assignments;
        assert_eq!(a[0].category_id, "04. Dakwerken");
        assert_eq!(a[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(a[0].explanation.as_deref(), Some("roof drainage"));
        assert_eq!(a[1].category_id, UNCATEGORIZED);
        assert_eq!(a[1].confidence, 0.0);
        assert_eq!(a[2].category_id, UNCATEGORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_category_lists_bare_ids_and_code_keys() {
        let m = matcher(FnModel::new(|_, _| {
            Ok(r#"{"A": {"categories": ["12. Sanitair", "04. Dakwerken"], "confidence": "0.7"},
                   "B": "1. afbraak en grondwerken",
                   "07.10": {"category": "04. Dakwerken"}}"#
                .to_string())
        }));
        let units = vec![
            unit("A"),
            unit("B"),
            TocUnit::new("07.10", "Iets anders", TocLevel::Section, 1, 1).unwrap(),
        ];
        let out = m
            .match_batch(&units, &taxonomy(), 5, RunControl::new())
            .await
            .unwrap();
        let a = &out.assignments;
        assert_eq!(a[0].category_id, "12. Sanitair");
        assert_eq!(a[0].confidence, 0.7);
        assert_eq!(a[1].category_id, DEMOLITION_CATEGORY);
        assert_eq!(a[2].category_id, "04. Dakwerken");
        assert_eq!(a[2].key, "07.10");
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_response_degrades_without_counting_as_rate_limit() {
        let m = matcher(FnModel::new(|_, _| Ok("I cannot help with that".to_string())));
        let out = m
            .match_batch(&[unit("x")], &taxonomy(), 5, RunControl::new())
            .await
            .unwrap();
        assert_eq!(out.batches_failed, 1);
        assert_eq!(out.batches_rate_limited, 0);
        assert!(out.assignments[0].is_uncategorized());
    }

    #[tokio::test(start_paused = true)]
    async fn backend_configuration_errors_propagate() {
        let m = matcher(FnModel::new(|_, _| {
            Err(Error::NotConfigured("no api key".to_string()))
        }));
        let err = m
            .match_batch(&[unit("x")], &taxonomy(), 5, RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_events_bracket_each_batch() {
        let m = matcher(echo_model());
        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let units: Vec<TocUnit> = (0..3).map(|i| unit(&format!("dak {i}"))).collect();
        m.match_batch(&units, &taxonomy(), 2, RunControl::new().with_progress(&sink))
            .await
            .unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ProgressEvent::BatchStarted { index: 0, total: 2 },
                ProgressEvent::BatchFinished { index: 0, total: 2, degraded: false },
                ProgressEvent::BatchStarted { index: 1, total: 2 },
                ProgressEvent::BatchFinished { index: 1, total: 2, degraded: false },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_batches_returns_the_resolved_prefix() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let m = matcher(FnModel::new(move |prompt, idx| {
            if idx == 0 {
                trigger.cancel();
            }
            echo_response(prompt)
        }));
        let units: Vec<TocUnit> = (0..4).map(|i| unit(&format!("dak {i}"))).collect();
        let out = m
            .match_batch(&units, &taxonomy(), 2, RunControl::new().with_cancel(&cancel))
            .await
            .unwrap();
        assert!(out.cancelled);
        assert_eq!(out.assignments.len(), 2);
        assert_eq!(m.client().model().call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_retry_sleep_stops_the_run() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let m = matcher(FnModel::new(move |_, _| {
            trigger.cancel();
            Err(rate_limited())
        }));
        let out = m
            .match_batch(
                &[unit("a"), unit("b")],
                &taxonomy(),
                1,
                RunControl::new().with_cancel(&cancel),
            )
            .await
            .unwrap();
        assert!(out.cancelled);
        assert!(out.assignments.is_empty());
        assert_eq!(out.batches_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_spaced_by_the_configured_delay() {
        let m = SemanticMatcher::new(AiClient::new(echo_model()));
        let units: Vec<TocUnit> = (0..3).map(|i| unit(&format!("dak {i}"))).collect();
        m.match_batch(&units, &taxonomy(), 1, RunControl::new())
            .await
            .unwrap();
        let times = m.client().model().call_times();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_secs(2));
        assert!(times[2] - times[1] >= Duration::from_secs(2));
    }

    #[test]
    fn prompt_lists_items_categories_and_demolition_rule() {
        let units = vec![
            TocUnit::new("A.1", "Sloopwerken", TocLevel::Section, 1, 2).unwrap(),
            unit("Dakgoten"),
        ];
        let p = build_prompt(&units, &taxonomy());
        assert!(p.contains("Title: Sloopwerken\nCode: A.1\nType: section"));
        assert!(p.contains("Title: Dakgoten\nType: chapter"));
        assert!(p.contains("04. Dakwerken: dak, goot"));
        assert!(p.contains("DEMOLITION/REMOVAL RULE"));
        assert!(p.contains("results = {"));

        let plain = Taxonomy::new(vec![CategoryDefinition::new("A", vec![])]).unwrap();
        assert!(!build_prompt(&units, &plain).contains("DEMOLITION"));
    }
}
