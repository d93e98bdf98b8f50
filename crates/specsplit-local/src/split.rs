//! Page ranges per category, ready for a PDF writer.

use serde::Serialize;
use specsplit_core::{category_number, CategoryAssignment, Error, Result, TocUnit, UNCATEGORIZED};
use std::collections::BTreeMap;

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Zero for an inverted range.
    pub fn pages(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPart {
    pub category_id: String,
    /// Sorted, non-overlapping, non-adjacent.
    pub ranges: Vec<PageRange>,
    /// Keys of the units that contributed pages, in document order.
    pub units: Vec<String>,
}

impl SplitPart {
    pub fn page_count(&self) -> u32 {
        self.ranges.iter().map(PageRange::pages).sum()
    }

    /// File name for this part's output: `<category>.pdf` with characters that
    /// are invalid on common filesystems replaced by `_`.
    pub fn file_name(&self) -> String {
        let cleaned: String = self
            .category_id
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let cleaned = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
        if cleaned.is_empty() {
            "unnamed.pdf".to_string()
        } else {
            format!("{cleaned}.pdf")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SplitPlan {
    pub parts: Vec<SplitPart>,
    /// Distinct pages covered by any part.
    pub total_pages: u32,
}

impl SplitPlan {
    /// Groups unit page ranges by assigned category.
    ///
    /// `assignments` must line up with `units` by position (a shorter list is
    /// accepted, as produced by a cancelled run); a key mismatch is an error.
    pub fn build(units: &[TocUnit], assignments: &[CategoryAssignment]) -> Result<Self> {
        if assignments.len() > units.len() {
            return Err(Error::InvalidInput(format!(
                "{} assignments for {} units",
                assignments.len(),
                units.len()
            )));
        }
        let mut grouped: BTreeMap<&str, (Vec<PageRange>, Vec<String>)> = BTreeMap::new();
        let mut all = Vec::with_capacity(assignments.len());
        for (i, (u, a)) in units.iter().zip(assignments).enumerate() {
            if u.key() != a.key {
                return Err(Error::InvalidInput(format!(
                    "assignment {i} is for {:?} but unit {i} is {:?}",
                    a.key,
                    u.key()
                )));
            }
            if u.page_start > u.page_end {
                return Err(Error::InvalidInput(format!(
                    "unit {:?}: page_start {} > page_end {}",
                    u.key(),
                    u.page_start,
                    u.page_end
                )));
            }
            let r = PageRange {
                start: u.page_start,
                end: u.page_end,
            };
            let entry = grouped.entry(a.category_id.as_str()).or_default();
            entry.0.push(r);
            entry.1.push(a.key.clone());
            all.push(r);
        }

        let mut parts: Vec<SplitPart> = grouped
            .into_iter()
            .map(|(id, (ranges, units))| SplitPart {
                category_id: id.to_string(),
                ranges: merge_ranges(ranges),
                units,
            })
            .collect();
        parts.sort_by(|a, b| part_order(&a.category_id).cmp(&part_order(&b.category_id)));

        let total_pages = merge_ranges(all).iter().map(PageRange::pages).sum();
        Ok(Self { parts, total_pages })
    }

    pub fn part(&self, category_id: &str) -> Option<&SplitPart> {
        self.parts.iter().find(|p| p.category_id == category_id)
    }

    /// Drops pages past `page_count` (TOC ranges can overshoot the real PDF).
    /// Returns how many pages were removed across all parts.
    pub fn clip_to(&mut self, page_count: u32) -> u32 {
        let mut removed = 0;
        for part in &mut self.parts {
            let before = part.page_count();
            part.ranges = part
                .ranges
                .iter()
                .filter(|r| r.start <= page_count)
                .map(|r| PageRange {
                    start: r.start,
                    end: r.end.min(page_count),
                })
                .collect();
            removed += before - part.page_count();
        }
        if removed > 0 {
            tracing::warn!(page_count, removed, "split plan referenced pages past the end of the document");
        }
        self.parts.retain(|p| !p.ranges.is_empty());
        let all: Vec<PageRange> = self.parts.iter().flat_map(|p| p.ranges.iter().copied()).collect();
        self.total_pages = merge_ranges(all).iter().map(PageRange::pages).sum();
        removed
    }
}

/// Numbered categories first by number, unnumbered after them by id,
/// `UNCATEGORIZED` last.
fn part_order(id: &str) -> (u8, u32, &str) {
    if id == UNCATEGORIZED {
        return (2, 0, id);
    }
    match category_number(id) {
        Some(n) => (0, n, id),
        None => (1, 0, id),
    }
}

/// Sorts and coalesces overlapping or adjacent ranges.
pub fn merge_ranges(mut ranges: Vec<PageRange>) -> Vec<PageRange> {
    ranges.sort();
    let mut out: Vec<PageRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if r.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(r.end);
            }
            _ => out.push(r),
        }
    }
    out
}
