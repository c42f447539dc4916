//! Curated drug/food interaction records and the naive text matcher.

use serde::{Deserialize, Serialize};

/// One citation attached to a curated interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionReference {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// A curated drug/food interaction. `drug_name` is stored lower-case and is
/// the sole match key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub drug_name: String,
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub food_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_actions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<InteractionReference>,
}

impl InteractionRecord {
    /// Best-available supporting text for display or model grounding: first
    /// reference excerpt, then the summary, then the title.
    pub fn best_excerpt(&self) -> &str {
        self.references
            .iter()
            .filter_map(|r| r.excerpt.as_deref())
            .find(|v| !v.trim().is_empty())
            .or_else(|| Some(self.summary.as_str()).filter(|v| !v.trim().is_empty()))
            .unwrap_or(self.title.as_str())
    }
}

/// Read-only store of curated interactions, seeded once at startup and then
/// shared freely across concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct InteractionStore {
    records: Vec<InteractionRecord>,
}

impl InteractionStore {
    pub fn new(records: Vec<InteractionRecord>) -> Self {
        Self { records }
    }

    /// Store seeded with the default curated set, used when no backing table
    /// is configured. Idempotent by construction.
    pub fn with_defaults() -> Self {
        Self::new(default_interactions())
    }

    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    /// Returns every record whose `drug_name` occurs, case-insensitively, as
    /// a substring of the question. Intentionally not token-boundary aware;
    /// a short drug name inside an unrelated word still matches. Results
    /// follow store order, so output is deterministic per snapshot.
    pub fn search_in_text(&self, question: &str) -> Vec<InteractionRecord> {
        let question = question.to_lowercase();
        self.records
            .iter()
            .filter(|record| {
                !record.drug_name.is_empty() && question.contains(&record.drug_name)
            })
            .cloned()
            .collect()
    }
}

fn reference(title: &str, url: &str) -> InteractionReference {
    InteractionReference {
        title: title.to_string(),
        url: url.to_string(),
        excerpt: None,
    }
}

/// The default curated seed set: six well-known drug/food interactions.
fn default_interactions() -> Vec<InteractionRecord> {
    vec![
        InteractionRecord {
            id: 1,
            drug_name: "warfarin".into(),
            title: "Warfarin — vitamin K and cranberry".into(),
            summary: "Vitamin K foods alter warfarin effect; cranberry products have been reported to affect INR in some patients.".into(),
            mechanism: Some("Vitamin K antagonizes warfarin's anticoagulant effect; cranberry may affect warfarin metabolism leading to INR changes.".into()),
            food_groups: vec!["leafy_greens".into(), "fruit_juices".into()],
            recommended_actions: Some("Keep vitamin K intake consistent. Tell your prescriber if you start/stop cranberry products; monitor INR.".into()),
            evidence_quality: Some("moderate".into()),
            references: vec![
                reference(
                    "Warfarin: drug information - MedlinePlus",
                    "https://medlineplus.gov/druginfo/meds/a682277.html",
                ),
                reference("Warfarin and diet - NHS", "https://www.nhs.uk/conditions/warfarin/"),
            ],
        },
        InteractionRecord {
            id: 2,
            drug_name: "simvastatin".into(),
            title: "Simvastatin — grapefruit interaction".into(),
            summary: "Grapefruit can increase statin blood levels and risk of muscle toxicity.".into(),
            mechanism: Some("Grapefruit inhibits intestinal CYP3A4, increasing systemic exposure of CYP3A4-metabolized statins.".into()),
            food_groups: vec!["grapefruit".into()],
            recommended_actions: Some("Avoid grapefruit and grapefruit juice while taking certain statins; ask your pharmacist which statin you have.".into()),
            evidence_quality: Some("high".into()),
            references: vec![reference(
                "Grapefruit juice and some common medications - FDA",
                "https://www.fda.gov/consumers/consumer-updates/grapefruit-juice-and-some-medications",
            )],
        },
        InteractionRecord {
            id: 3,
            drug_name: "levodopa".into(),
            title: "Levodopa — high-protein meals".into(),
            summary: "Large protein meals can reduce levodopa's effectiveness by competing for transport.".into(),
            mechanism: Some("Dietary amino acids compete with levodopa for absorption and brain transport.".into()),
            food_groups: vec!["proteins".into()],
            recommended_actions: Some("Take levodopa 30–60 minutes before meals if tolerated or redistribute protein throughout the day.".into()),
            evidence_quality: Some("moderate".into()),
            references: vec![reference(
                "Levodopa patient information - NHS",
                "https://www.nhs.uk/conditions/parkinsons-disease/treatment/levodopa/",
            )],
        },
        InteractionRecord {
            id: 4,
            drug_name: "doxycycline".into(),
            title: "Doxycycline — dairy and minerals".into(),
            summary: "Dairy, calcium, and iron reduce absorption if taken together with doxycycline.".into(),
            mechanism: Some("Divalent cations bind tetracyclines forming insoluble complexes and reduce absorption.".into()),
            food_groups: vec!["dairy".into(), "calcium".into(), "iron_supplements".into()],
            recommended_actions: Some("Separate doses by ~2 hours; follow product labeling.".into()),
            evidence_quality: Some("high".into()),
            references: vec![reference(
                "Doxycycline - MedlinePlus",
                "https://medlineplus.gov/druginfo/meds/a682063.html",
            )],
        },
        InteractionRecord {
            id: 5,
            drug_name: "metronidazole".into(),
            title: "Metronidazole — alcohol".into(),
            summary: "Avoid alcohol during and shortly after metronidazole to prevent disulfiram-like reactions.".into(),
            mechanism: Some("Metronidazole can cause disulfiram-like effects when combined with ethanol.".into()),
            food_groups: vec!["alcohol".into()],
            recommended_actions: Some("Avoid alcohol while on treatment and for 48–72 hours after finishing.".into()),
            evidence_quality: Some("moderate".into()),
            references: vec![reference(
                "Metronidazole - NHS",
                "https://www.nhs.uk/medicines/metronidazole/",
            )],
        },
        InteractionRecord {
            id: 6,
            drug_name: "maoi".into(),
            title: "MAOIs — tyramine-rich foods".into(),
            summary: "MAOIs interact with tyramine-containing foods, risking hypertensive crisis.".into(),
            mechanism: Some("MAO inhibition impairs tyramine metabolism leading to catecholamine release.".into()),
            food_groups: vec!["aged_cheeses".into(), "cured_meats".into(), "fermented_foods".into()],
            recommended_actions: Some("Follow low-tyramine diet while on MAOIs; check specific lists with your clinician.".into()),
            evidence_quality: Some("high".into()),
            references: vec![reference(
                "MAOI antidepressants - NHS",
                "https://www.nhs.uk/conditions/maoi-antidepressants/",
            )],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_six_records_with_lowercase_keys() {
        let store = InteractionStore::with_defaults();
        assert_eq!(store.records().len(), 6);
        assert!(
            store
                .records()
                .iter()
                .all(|r| r.drug_name == r.drug_name.to_lowercase())
        );
    }

    #[test]
    fn matcher_is_case_insensitive_substring_containment() {
        let store = InteractionStore::with_defaults();

        let hits = store.search_in_text("Can I take Warfarin with spinach?");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].drug_name, "warfarin");

        let hits = store.search_in_text("I eat a lot of fish");
        assert!(hits.is_empty());
    }

    #[test]
    fn matcher_returns_multiple_hits_in_store_order() {
        let store = InteractionStore::with_defaults();
        let hits = store.search_in_text("simvastatin or levodopa, which is worse with food?");
        let names: Vec<&str> = hits.iter().map(|r| r.drug_name.as_str()).collect();
        assert_eq!(names, vec!["simvastatin", "levodopa"]);
    }

    #[test]
    fn matcher_is_not_token_boundary_aware() {
        // "maoi" embedded inside a longer invented word still matches; this
        // imprecision is part of the contract.
        let store = InteractionStore::with_defaults();
        let hits = store.search_in_text("the maoist movement");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].drug_name, "maoi");
    }

    #[test]
    fn best_excerpt_prefers_reference_excerpt_then_summary() {
        let mut record = InteractionStore::with_defaults().records()[0].clone();
        assert_eq!(record.best_excerpt(), record.summary);

        record.references[0].excerpt = Some("an excerpt".into());
        assert_eq!(record.best_excerpt(), "an excerpt");
    }
}
