//! Per-document choice between numeric and semantic resolution.

use crate::semantic::{RunControl, SemanticMatcher};
use crate::vmsw::{is_vmsw_code, NumericResolver};
use specsplit_core::{
    AssignmentSource, CategoryAssignment, DocumentKind, Error, GenerativeModel, Resolution,
    ResolutionMode, Result, Taxonomy, TocUnit,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Share of VMSW-style codes a document needs (strictly more than this) to be
/// resolved numerically in auto mode.
pub const VMSW_MAJORITY: f64 = 0.5;

/// Classifies a document by how many of its unit codes look like VMSW numbering.
pub fn detect_kind(units: &[TocUnit]) -> DocumentKind {
    if units.is_empty() {
        return DocumentKind::NonVmsw;
    }
    let matching = units.iter().filter(|u| is_vmsw_code(&u.code)).count();
    let share = matching as f64 / units.len() as f64;
    tracing::debug!(matching, units = units.len(), share, "detected numbering share");
    if share > VMSW_MAJORITY {
        DocumentKind::Vmsw
    } else {
        DocumentKind::NonVmsw
    }
}

pub struct HybridDispatcher<M = Arc<dyn GenerativeModel>> {
    numeric: NumericResolver,
    semantic: Option<SemanticMatcher<M>>,
}

impl<M: GenerativeModel> HybridDispatcher<M> {
    pub fn new(numeric: NumericResolver, semantic: Option<SemanticMatcher<M>>) -> Self {
        Self { numeric, semantic }
    }

    /// A dispatcher that can only take the numeric path.
    pub fn numeric_only() -> Self {
        Self::new(NumericResolver::vmsw(), None)
    }

    pub fn with_semantic(semantic: SemanticMatcher<M>) -> Self {
        Self::new(NumericResolver::vmsw(), Some(semantic))
    }

    pub fn numeric(&self) -> &NumericResolver {
        &self.numeric
    }

    pub fn semantic(&self) -> Option<&SemanticMatcher<M>> {
        self.semantic.as_ref()
    }

    /// Resolves every unit of one document.
    ///
    /// Configuration problems (no units, semantic path without a taxonomy or a
    /// model) and inverted page ranges fail before any model call. Model failures never fail the run;
    /// they show up as uncategorized units plus a warning.
    pub async fn resolve_document(
        &self,
        units: &[TocUnit],
        mode: ResolutionMode,
        categories: Option<&Taxonomy>,
        control: RunControl<'_>,
    ) -> Result<Resolution> {
        if units.is_empty() {
            return Err(Error::Configuration(
                "no table-of-contents units to resolve".to_string(),
            ));
        }
        if let Some(bad) = units.iter().find(|u| u.page_start > u.page_end) {
            return Err(Error::InvalidInput(format!(
                "unit {:?}: page_start {} > page_end {}",
                bad.key(),
                bad.page_start,
                bad.page_end
            )));
        }
        let kind = match mode {
            ResolutionMode::Vmsw => DocumentKind::Vmsw,
            ResolutionMode::NonVmsw => DocumentKind::NonVmsw,
            ResolutionMode::Auto => detect_kind(units),
        };
        tracing::info!(?mode, ?kind, units = units.len(), "resolving document");

        match kind {
            DocumentKind::Vmsw => Ok(self.resolve_numeric(units, categories)),
            DocumentKind::NonVmsw => self.resolve_semantic(units, categories, control).await,
        }
    }

    fn resolve_numeric(&self, units: &[TocUnit], categories: Option<&Taxonomy>) -> Resolution {
        let mut assignments: Vec<CategoryAssignment> =
            units.iter().map(|u| self.numeric.resolve_unit(u)).collect();
        let mut warnings = Vec::new();

        if let Some(taxonomy) = categories.filter(|t| !t.is_empty()) {
            let mut missing: BTreeMap<String, usize> = BTreeMap::new();
            for a in assignments.iter_mut() {
                if a.is_uncategorized() || taxonomy.contains(&a.category_id) {
                    continue;
                }
                *missing.entry(a.category_id.clone()).or_default() += 1;
                *a = CategoryAssignment::uncategorized(a.key.clone(), AssignmentSource::Numeric)
                    .with_explanation(format!(
                        "VMSW category {:?} is not in the supplied taxonomy",
                        a.category_id
                    ));
            }
            for (id, n) in missing {
                tracing::warn!(category = %id, units = n, "numeric category missing from taxonomy");
                warnings.push(format!(
                    "category {id:?} is not in the supplied taxonomy; {n} unit(s) left uncategorized"
                ));
            }
        }

        Resolution {
            kind: DocumentKind::Vmsw,
            assignments,
            batches_total: 0,
            batches_failed: 0,
            batches_rate_limited: 0,
            cancelled: false,
            warnings,
        }
    }

    async fn resolve_semantic(
        &self,
        units: &[TocUnit],
        categories: Option<&Taxonomy>,
        control: RunControl<'_>,
    ) -> Result<Resolution> {
        let taxonomy = categories.filter(|t| !t.is_empty()).ok_or_else(|| {
            Error::Configuration(
                "non-VMSW resolution requires a non-empty category taxonomy".to_string(),
            )
        })?;
        let matcher = self.semantic.as_ref().ok_or_else(|| {
            Error::Configuration("non-VMSW resolution requires a configured AI model".to_string())
        })?;

        let outcome = matcher
            .match_batch(units, taxonomy, matcher.config().batch_size, control)
            .await?;

        let mut warnings = Vec::new();
        let total = outcome.batches_total;
        if outcome.batches_rate_limited > 0 {
            warnings.push(format!(
                "{} of {total} batches failed due to rate limiting",
                outcome.batches_rate_limited
            ));
        }
        let other = outcome.batches_failed - outcome.batches_rate_limited;
        if other > 0 {
            warnings.push(format!(
                "{other} of {total} batches failed (model error or unparseable response)"
            ));
        }
        if outcome.cancelled {
            warnings.push(format!(
                "cancelled after {} of {} units",
                outcome.assignments.len(),
                units.len()
            ));
        }
        for w in &warnings {
            tracing::warn!("{w}");
        }

        Ok(Resolution {
            kind: DocumentKind::NonVmsw,
            assignments: outcome.assignments,
            batches_total: total,
            batches_failed: outcome.batches_failed,
            batches_rate_limited: outcome.batches_rate_limited,
            cancelled: outcome.cancelled,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::AiClient;
    use crate::semantic::SemanticConfig;
    use crate::testutil::{rate_limited, FnModel};
    use crate::vmsw::DEMOLITION_CATEGORY;
    use specsplit_core::{CategoryDefinition, TocLevel, UNCATEGORIZED};
    use std::time::Duration;

    fn unit(code: &str, title: &str) -> TocUnit {
        TocUnit::new(code, title, TocLevel::Section, 1, 1).unwrap()
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            CategoryDefinition::new(DEMOLITION_CATEGORY, vec![]),
            CategoryDefinition::new("12. Sanitair", vec![]),
        ])
        .unwrap()
    }

    fn dispatcher(model: FnModel) -> HybridDispatcher<FnModel> {
        HybridDispatcher::with_semantic(SemanticMatcher::with_config(
            AiClient::new(model),
            SemanticConfig {
                inter_batch_delay: Duration::ZERO,
                ..SemanticConfig::default()
            },
        ))
    }

    /// Sends every unit in the prompt to sanitary.
    fn sanitary_response(prompt: &str) -> specsplit_core::Result<String> {
        let body: Vec<String> = prompt
            .lines()
            .filter_map(|l| l.strip_prefix("Title: "))
            .map(|t| format!("{t:?}: {{\"category_id\": \"12. Sanitair\", \"confidence\": 0.8}}"))
            .collect();
        Ok(format!("```json\n{{{}}}\n```", body.join(", ")))
    }

    fn sanitary_model() -> FnModel {
        FnModel::new(|prompt, _| sanitary_response(prompt))
    }

    /// 10 units, the first `vmsw` of which carry VMSW-style codes.
    fn mixed_units(vmsw: usize) -> Vec<TocUnit> {
        (0..10)
            .map(|i| {
                if i < vmsw {
                    unit(&format!("{:02}.10", i + 1), &format!("Hoofdstuk {i}"))
                } else {
                    unit(&format!("H{i}"), &format!("Deel {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn detection_needs_a_strict_majority() {
        assert_eq!(detect_kind(&mixed_units(6)), DocumentKind::Vmsw);
        assert_eq!(detect_kind(&mixed_units(5)), DocumentKind::NonVmsw);
        assert_eq!(detect_kind(&mixed_units(4)), DocumentKind::NonVmsw);
        assert_eq!(detect_kind(&[]), DocumentKind::NonVmsw);
    }

    #[test]
    fn article_level_codes_count_as_vmsw() {
        let mut units = vec![unit("02", "Funderingen")];
        units.extend((1..10).map(|i| unit(&format!("02.40.{i:02}"), &format!("Artikel {i}"))));
        assert_eq!(detect_kind(&units), DocumentKind::Vmsw);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_with_vmsw_majority_resolves_numerically() {
        let d = dispatcher(sanitary_model());
        let units = mixed_units(6);
        let r = d
            .resolve_document(&units, ResolutionMode::Auto, None, RunControl::new())
            .await
            .unwrap();
        assert_eq!(r.kind, DocumentKind::Vmsw);
        assert_eq!(r.assignments.len(), 10);
        assert!(r.assignments.iter().all(|a| a.source == AssignmentSource::Numeric));
        assert_eq!(r.assignments[1].category_id, "02. Funderingen en Kelders");
        assert_eq!(r.assignments[9].category_id, UNCATEGORIZED);
        assert_eq!(d.semantic().unwrap().client().model().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_with_vmsw_minority_resolves_semantically() {
        let d = dispatcher(sanitary_model());
        let units = mixed_units(4);
        let r = d
            .resolve_document(&units, ResolutionMode::Auto, Some(&taxonomy()), RunControl::new())
            .await
            .unwrap();
        assert_eq!(r.kind, DocumentKind::NonVmsw);
        assert_eq!(r.batches_total, 2);
        let keys: Vec<&str> = r.assignments.iter().map(|a| a.key.as_str()).collect();
        let expected: Vec<&str> = units.iter().map(|u| u.key()).collect();
        assert_eq!(keys, expected);
        assert!(r
            .assignments
            .iter()
            .all(|a| a.category_id == "12. Sanitair" && a.source == AssignmentSource::Semantic));
        assert!(r.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_errors_surface_before_any_call() {
        let d = dispatcher(sanitary_model());
        let units = mixed_units(0);

        let err = d
            .resolve_document(&[], ResolutionMode::Vmsw, None, RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = d
            .resolve_document(&units, ResolutionMode::NonVmsw, None, RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let empty = Taxonomy::new(vec![]).unwrap();
        let err = d
            .resolve_document(&units, ResolutionMode::Auto, Some(&empty), RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let numeric: HybridDispatcher = HybridDispatcher::numeric_only();
        let err = numeric
            .resolve_document(&units, ResolutionMode::NonVmsw, Some(&taxonomy()), RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        assert_eq!(d.semantic().unwrap().client().model().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inverted_page_ranges_are_rejected_before_any_call() {
        let d = dispatcher(sanitary_model());
        let mut units = mixed_units(0);
        units[3].page_start = 9;
        units[3].page_end = 3;
        let err = d
            .resolve_document(&units, ResolutionMode::NonVmsw, Some(&taxonomy()), RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
        assert_eq!(d.semantic().unwrap().client().model().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_vmsw_downgrades_ids_missing_from_taxonomy() {
        let d: HybridDispatcher = HybridDispatcher::numeric_only();
        let units = vec![unit("12.10", "Toiletten"), unit("04.20", "Dakgoten"), unit("04.30", "Goten")];
        let r = d
            .resolve_document(&units, ResolutionMode::Vmsw, Some(&taxonomy()), RunControl::new())
            .await
            .unwrap();
        assert_eq!(r.assignments[0].category_id, "12. Sanitair");
        assert_eq!(r.assignments[1].category_id, UNCATEGORIZED);
        assert_eq!(r.assignments[1].confidence, 0.0);
        assert_eq!(r.assignments[2].category_id, UNCATEGORIZED);
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("2 unit(s)"), "{:?}", r.warnings);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_batches_are_summarised_in_warnings() {
        let d = dispatcher(FnModel::new(|prompt, _| {
            if prompt.contains("Title: Deel 0") {
                Err(rate_limited())
            } else {
                sanitary_response(prompt)
            }
        }));
        let units = mixed_units(0);
        let r = d
            .resolve_document(&units, ResolutionMode::NonVmsw, Some(&taxonomy()), RunControl::new())
            .await
            .unwrap();
        assert_eq!(r.assignments.len(), 10);
        assert_eq!(r.batches_rate_limited, 1);
        assert_eq!(r.uncategorized_count(), 5);
        assert_eq!(r.warnings, vec!["1 of 2 batches failed due to rate limiting".to_string()]);
    }
}
