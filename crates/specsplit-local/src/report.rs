//! Run statistics for a resolved document.

use serde::Serialize;
use specsplit_core::{AssignmentSource, DocumentKind, Resolution, Taxonomy, TocLevel, TocUnit};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryUsage {
    pub count: usize,
    pub chapters: usize,
    pub sections: usize,
    /// Share of all resolved units, 0..=100.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub kind: DocumentKind,
    pub total_units: usize,
    pub total_chapters: usize,
    pub total_sections: usize,
    pub numeric: usize,
    pub semantic: usize,
    pub uncategorized: usize,
    pub categories_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories_available: Option<usize>,
    pub average_confidence: f64,
    /// Categorized share of resolved units, 0..=1.
    pub success_rate: f64,
    pub batches_total: usize,
    pub batches_failed: usize,
    pub batches_rate_limited: usize,
    pub cancelled: bool,
    pub category_usage: BTreeMap<String, CategoryUsage>,
}

impl RunStats {
    /// `units` are the resolution's input units; assignments are matched to
    /// them by position.
    pub fn compute(units: &[TocUnit], r: &Resolution, taxonomy: Option<&Taxonomy>) -> Self {
        let resolved = r.assignments.len();
        let mut usage: BTreeMap<String, CategoryUsage> = BTreeMap::new();
        let (mut chapters, mut sections, mut numeric, mut semantic) = (0, 0, 0, 0);
        let mut confidence_sum = 0.0;

        for (a, u) in r.assignments.iter().zip(units) {
            let entry = usage.entry(a.category_id.clone()).or_default();
            entry.count += 1;
            match u.level {
                TocLevel::Chapter => {
                    chapters += 1;
                    entry.chapters += 1;
                }
                TocLevel::Section => {
                    sections += 1;
                    entry.sections += 1;
                }
            }
            match a.source {
                AssignmentSource::Numeric => numeric += 1,
                AssignmentSource::Semantic => semantic += 1,
            }
            confidence_sum += a.confidence;
        }
        for u in usage.values_mut() {
            u.percentage = ratio(u.count, resolved) * 100.0;
        }

        let uncategorized = r.uncategorized_count();
        let categories_used = usage
            .keys()
            .filter(|k| k.as_str() != specsplit_core::UNCATEGORIZED)
            .count();

        Self {
            kind: r.kind,
            total_units: resolved,
            total_chapters: chapters,
            total_sections: sections,
            numeric,
            semantic,
            uncategorized,
            categories_used,
            categories_available: taxonomy.map(Taxonomy::len),
            average_confidence: if resolved == 0 {
                0.0
            } else {
                confidence_sum / resolved as f64
            },
            success_rate: ratio(resolved - uncategorized, resolved),
            batches_total: r.batches_total,
            batches_failed: r.batches_failed,
            batches_rate_limited: r.batches_rate_limited,
            cancelled: r.cancelled,
            category_usage: usage,
        }
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}
