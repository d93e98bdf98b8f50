//! Deterministic category mapping for VMSW-numbered documents.
//!
//! VMSW specifications number chapters `00`..`42` and sections `02.40`,
//! `15.210`, ... The chapter number alone decides the category, except that
//! removal/demolition work is always routed to the demolition category so it can
//! be split out regardless of which chapter it sits under.

use regex::Regex;
use specsplit_core::{CategoryAssignment, TocUnit, UNCATEGORIZED};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const DEMOLITION_CATEGORY: &str = "01. Afbraak en Grondwerken";

/// Case-insensitive title fragments that mark demolition/removal work.
pub const DEMOLITION_KEYWORDS: &[&str] = &[
    "afbraak",
    "afbreken",
    "sloop",
    "slopen",
    "demolition",
    "verwijderen",
    "uitbreken",
    "opbreken",
    "demonteren",
];

const VMSW_TABLE: &[(&str, &str)] = &[
    ("00", "33. Advies en Studies"),
    ("01", "01. Afbraak en Grondwerken"),
    ("02", "02. Funderingen en Kelders"),
    ("03", "03. Ruwbouw en Betonwerken"),
    ("04", "04. Dakwerken"),
    ("05", "05. Buitenschrijnwerk"),
    ("06", "06. Binnenschrijnwerk en Interieur"),
    ("07", "07. Binnenafwerking - Wanden en Plafonds"),
    ("08", "08. Pleister- en Bezettingswerken"),
    ("09", "09. Vloerbekleding"),
    ("10", "10. Schilder- en Decoratiewerken"),
    ("11", "11. Isolatiewerken"),
    ("12", "12. Sanitair"),
    ("13", "13. Verwarming"),
    ("14", "14. Ventilatie"),
    ("15", "15. HVAC"),
    ("16", "16. Elektriciteit"),
    ("17", "17. Brandbeveiliging"),
    ("18", "18. Toegangscontrole en Beveiliging"),
    ("19", "19. Liften en Verticale Circulatie"),
    ("20", "20. Trappen en Leuningen"),
    ("21", "21. Zonwering en Raamdecoratie"),
    ("22", "22. Buitenaanleg en Tuinaanleg"),
    ("23", "23. Riolering en Waterbeheer"),
    ("24", "24. Glas en Aluminiumconstructies"),
    ("25", "25. Reiniging en Oplevering"),
    ("26", "26. Keukens"),
    ("27", "27. Laboinrichting"),
    ("28", "28. Sportinfrastructuur"),
    ("29", "29. Signalisatie en Bewegwijzering"),
    ("30", "30. Waterdichting"),
    ("31", "31. Meubilair en Inrichting"),
    ("32", "32. Bliksembeveiliging"),
    ("33", "33. Advies en Studies"),
    ("34", "34. Steigerbouw en Schoringen"),
    ("35", "35. Panelen en Beplating"),
    ("36", "36. Asbestverwijdering en Milieuwerken"),
    ("38", "38. Advies en Studies"),
    ("39", "39. Steigerbouw en Schoringen"),
    ("42", "42. Asbestverwijdering en Milieuwerken"),
];

fn vmsw_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}($|\.\d{2,3}($|\.))").expect("vmsw regex is valid"))
}

/// True for codes shaped like a VMSW chapter (`02`) or section (`02.40`),
/// including deeper article codes under a section (`02.40.10`).
pub fn is_vmsw_code(code: &str) -> bool {
    vmsw_code_re().is_match(code.trim())
}

pub fn is_demolition(title: &str) -> bool {
    let t = title.to_lowercase();
    DEMOLITION_KEYWORDS.iter().any(|k| t.contains(k))
}

/// Chapter prefix of a code: everything before the first `.`, zero-padded to two
/// digits. `None` when the prefix is not numeric.
pub fn chapter_prefix(code: &str) -> Option<String> {
    let code = code.trim();
    let prefix = code.split_once('.').map_or(code, |(p, _)| p);
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{prefix:0>2}"))
}

#[derive(Debug, Clone)]
pub struct NumericResolver {
    table: BTreeMap<String, String>,
    demolition_category: String,
}

impl Default for NumericResolver {
    fn default() -> Self {
        Self::vmsw()
    }
}

impl NumericResolver {
    pub fn vmsw() -> Self {
        Self::with_table(
            VMSW_TABLE
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
            DEMOLITION_CATEGORY,
        )
    }

    pub fn with_table(
        table: impl IntoIterator<Item = (String, String)>,
        demolition_category: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into_iter().collect(),
            demolition_category: demolition_category.into(),
        }
    }

    pub fn demolition_category(&self) -> &str {
        &self.demolition_category
    }

    /// Category ids this resolver can emit (besides `UNCATEGORIZED`).
    pub fn category_ids(&self) -> impl Iterator<Item = &str> {
        self.table
            .values()
            .map(|s| s.as_str())
            .chain(std::iter::once(self.demolition_category.as_str()))
    }

    /// Category for a code, from the chapter prefix alone.
    pub fn resolve(&self, code: &str) -> &str {
        chapter_prefix(code)
            .and_then(|p| self.table.get(&p))
            .map_or(UNCATEGORIZED, |s| s.as_str())
    }

    pub fn resolve_unit(&self, unit: &TocUnit) -> CategoryAssignment {
        let key = unit.key().to_string();
        let prefix = chapter_prefix(&unit.code);
        let label = prefix.as_deref().unwrap_or("?");

        if is_demolition(&unit.title) {
            return CategoryAssignment::numeric(key, self.demolition_category.clone())
                .with_explanation(format!(
                    "removal work detected in title; VMSW chapter {label} routed to {}",
                    self.demolition_category
                ));
        }

        match self.resolve(&unit.code) {
            UNCATEGORIZED => {
                tracing::warn!(code = %unit.code, title = %unit.title, "no VMSW mapping for chapter");
                CategoryAssignment::uncategorized(key, specsplit_core::AssignmentSource::Numeric)
                    .with_explanation(format!("no VMSW mapping for chapter {label}"))
            }
            id => CategoryAssignment::numeric(key, id)
                .with_explanation(format!("VMSW chapter {label} mapped to {id}")),
        }
    }
}
