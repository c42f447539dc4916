//! Merged per-drug records and the typed payloads each upstream source produces.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One logical upstream fetch. Doubles as the cache-key component and as the
/// member type of [`DrugRecord::partial_failures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Identifiers,
    Label,
    Chemical,
    Interactions,
    AdverseEvents,
    Literature,
}

impl SourceName {
    pub const ALL: [SourceName; 6] = [
        SourceName::Identifiers,
        SourceName::Label,
        SourceName::Chemical,
        SourceName::Interactions,
        SourceName::AdverseEvents,
        SourceName::Literature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceName::Identifiers => "identifiers",
            SourceName::Label => "label",
            SourceName::Chemical => "chemical",
            SourceName::Interactions => "interactions",
            SourceName::AdverseEvents => "adverse_events",
            SourceName::Literature => "literature",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RxNorm concept identifiers for a drug name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugIdentifiers {
    pub rxcui: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
    /// RxNorm term type (IN, BN, SCD, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    pub source: String,
}

/// DailyMed structured-product-label metadata for the best-matching label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugLabelSummary {
    pub setid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub url: String,
    pub source: String,
}

/// PubChem compound properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalProperties {
    pub cid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub molecular_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub molecular_weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inchi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inchi_key: Option<String>,
    pub url: String,
    pub source: String,
}

/// One known drug-drug interaction reported by RxNorm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugInteraction {
    pub interacting_drug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub severity: String,
    pub source: String,
}

/// One adverse-event reaction term with its report count, from OpenFDA FAERS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdverseEventCount {
    pub reaction: String,
    pub count: u64,
    pub source: String,
}

/// One literature hit from PubMed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureReference {
    pub pmid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    pub url: String,
    pub source: String,
}

/// The merged result of querying every source for one drug name.
///
/// A record is always produced, even when every source call failed; callers
/// must treat six entries in `partial_failures` as "no data", not as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<DrugIdentifiers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<DrugLabelSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chemical: Option<ChemicalProperties>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<DrugInteraction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adverse_events: Vec<AdverseEventCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literature: Vec<LiteratureReference>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub partial_failures: BTreeSet<SourceName>,
}

impl DrugRecord {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.trim().to_ascii_lowercase(),
            identifiers: None,
            label: None,
            chemical: None,
            interactions: Vec::new(),
            adverse_events: Vec::new(),
            literature: Vec::new(),
            fetched_at: OffsetDateTime::now_utc(),
            partial_failures: BTreeSet::new(),
        }
    }

    /// Record for a drug whose whole aggregation failed or timed out: every
    /// source is marked failed, all fields stay at their defaults.
    pub fn unavailable(name: &str) -> Self {
        let mut record = Self::empty(name);
        record.partial_failures = SourceName::ALL.into_iter().collect();
        record
    }

    /// True when no source produced data.
    pub fn is_empty(&self) -> bool {
        self.partial_failures.len() == SourceName::ALL.len()
    }
}
