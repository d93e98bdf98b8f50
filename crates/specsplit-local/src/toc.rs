//! Loading table-of-contents units from the chapters document.
//!
//! Shape: `{"02": {"title": "...", "start": 3, "end": 9, "sections": {"02.40": {...}}}}`,
//! optionally wrapped as `{"chapters": {...}}`. Page numbers may be integers or
//! numeric strings.

use serde_json::{Map, Value};
use specsplit_core::{Error, Result, TocLevel, TocUnit};
use std::collections::BTreeMap;
use std::path::Path;

pub fn load_toc_json(path: &Path) -> Result<Vec<TocUnit>> {
    let bytes =
        std::fs::read(path).map_err(|e| Error::Toc(format!("{}: {e}", path.display())))?;
    let v: Value =
        serde_json::from_slice(&bytes).map_err(|e| Error::Toc(format!("invalid json: {e}")))?;
    let units = parse_toc_json(&v)?;
    tracing::info!(path = %path.display(), units = units.len(), "loaded toc");
    Ok(units)
}

/// Flattens the chapters document into units ordered by starting page.
///
/// Each chapter precedes its own sections; the sort is stable so units that
/// start on the same page keep document order.
pub fn parse_toc_json(v: &Value) -> Result<Vec<TocUnit>> {
    let chapters = chapters_map(v)?;
    let mut units = Vec::new();
    for (code, entry) in chapters {
        units.push(unit_from_entry(code, entry, TocLevel::Chapter)?);
        if let Some(sections) = entry.get("sections") {
            let sections = sections.as_object().ok_or_else(|| {
                Error::Toc(format!("chapter {code}: sections must be an object"))
            })?;
            for (scode, sentry) in sections {
                units.push(unit_from_entry(scode, sentry, TocLevel::Section)?);
            }
        }
    }
    units.sort_by_key(|u| u.page_start);
    Ok(units)
}

fn chapters_map(v: &Value) -> Result<&Map<String, Value>> {
    let m = v
        .as_object()
        .ok_or_else(|| Error::Toc("expected a JSON object of chapters".to_string()))?;
    if m.len() == 1 {
        if let Some(Value::Object(inner)) = m.get("chapters") {
            return Ok(inner);
        }
    }
    Ok(m)
}

fn unit_from_entry(code: &str, entry: &Value, level: TocLevel) -> Result<TocUnit> {
    let obj = entry
        .as_object()
        .ok_or_else(|| Error::Toc(format!("{code}: entry must be an object")))?;
    let title = obj
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let start = match page(obj, "start") {
        Some(r) => r.map_err(|e| Error::Toc(format!("{code}: {e}")))?,
        None => return Err(Error::Toc(format!("{code}: missing start page"))),
    };
    let end = match page(obj, "end") {
        Some(r) => r.map_err(|e| Error::Toc(format!("{code}: {e}")))?,
        None => start,
    };
    if start > end {
        return Err(Error::Toc(format!(
            "{code}: start page {start} is after end page {end}"
        )));
    }
    TocUnit::new(code.trim(), title, level, start, end)
}

fn page(obj: &Map<String, Value>, key: &str) -> Option<std::result::Result<u32, String>> {
    let v = obj.get(key).filter(|v| !v.is_null())?;
    let n = match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Some(
        n.and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("{key} is not a page number: {v}")),
    )
}

/// Merges TOC fragments extracted from overlapping page windows.
///
/// Units with the same key and level are combined: widest page range,
/// longest title.
/// The result is ordered by starting page.
pub fn merge_units(fragments: impl IntoIterator<Item = Vec<TocUnit>>) -> Vec<TocUnit> {
    let mut order: Vec<(String, TocLevel)> = Vec::new();
    let mut by_key: BTreeMap<(String, TocLevel), TocUnit> = BTreeMap::new();
    for unit in fragments.into_iter().flatten() {
        let key = (unit.key().to_string(), unit.level);
        match by_key.get_mut(&key) {
            Some(existing) => {
                existing.page_start = existing.page_start.min(unit.page_start);
                existing.page_end = existing.page_end.max(unit.page_end);
                if unit.title.chars().count() > existing.title.chars().count() {
                    existing.title = unit.title;
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, unit);
            }
        }
    }
    let mut out: Vec<TocUnit> = order
        .into_iter()
        .filter_map(|k| by_key.remove(&k))
        .collect();
    out.sort_by_key(|u| u.page_start);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_chapters_and_sections_in_page_order() {
        let v = json!({
            "02": {"title": "Funderingen", "start": 5, "end": 9, "sections": {
                "02.40": {"title": "Paalfunderingen", "start": 7, "end": 9},
                "02.10": {"title": "Grondwerk", "start": 5, "end": 6}
            }},
            "01": {"title": "Afbraak", "start": "1", "end": 4}
        });
        let units = parse_toc_json(&v).unwrap();
        let keys: Vec<&str> = units.iter().map(|u| u.key()).collect();
        assert_eq!(keys, vec!["01", "02", "02.10", "02.40"]);
        assert_eq!(units[1].level, TocLevel::Chapter);
        assert_eq!(units[2].level, TocLevel::Section);
        assert_eq!((units[0].page_start, units[0].page_end), (1, 4));
    }

    #[test]
    fn missing_end_takes_start_and_wrapper_is_accepted() {
        let v = json!({"chapters": {"07": {"title": "Wanden", "start": 12}}});
        let units = parse_toc_json(&v).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!((units[0].page_start, units[0].page_end), (12, 12));
    }

    #[test]
    fn bad_ranges_and_shapes_are_errors() {
        let inverted = json!({"01": {"title": "x", "start": 9, "end": 3}});
        assert!(matches!(parse_toc_json(&inverted), Err(Error::Toc(_))));

        let no_start = json!({"01": {"title": "x", "end": 3}});
        assert!(parse_toc_json(&no_start).is_err());

        let negative = json!({"01": {"title": "x", "start": -1}});
        assert!(parse_toc_json(&negative).is_err());

        assert!(parse_toc_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn merge_widens_ranges_and_keeps_longest_title() {
        let a = vec![
            TocUnit::new("01", "Afbraak", TocLevel::Chapter, 1, 3).unwrap(),
            TocUnit::new("02", "Fund", TocLevel::Chapter, 4, 6).unwrap(),
        ];
        let b = vec![
            TocUnit::new("02", "Funderingen", TocLevel::Chapter, 5, 8).unwrap(),
            TocUnit::new("03", "Ruwbouw", TocLevel::Chapter, 9, 10).unwrap(),
        ];
        let merged = merge_units([a, b]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].title, "Funderingen");
        assert_eq!((merged[1].page_start, merged[1].page_end), (4, 8));
    }

    #[test]
    fn merge_keeps_same_titled_chapter_and_section_apart() {
        let a = vec![TocUnit::new("", "Ramen", TocLevel::Chapter, 1, 4).unwrap()];
        let b = vec![
            TocUnit::new("", "Ramen", TocLevel::Section, 2, 3).unwrap(),
            TocUnit::new("", "Ramen", TocLevel::Chapter, 4, 6).unwrap(),
        ];
        let merged = merge_units([a, b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].level, TocLevel::Chapter);
        assert_eq!((merged[0].page_start, merged[0].page_end), (1, 6));
        assert_eq!(merged[1].level, TocLevel::Section);
        assert_eq!((merged[1].page_start, merged[1].page_end), (2, 3));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("chapters.json");
        std::fs::write(&p, r#"{"00": {"title": "Algemeen", "start": 1, "end": 2}}"#).unwrap();
        let units = load_toc_json(&p).unwrap();
        assert_eq!(units[0].title, "Algemeen");
        assert!(load_toc_json(&dir.path().join("nope.json")).is_err());
    }
}
