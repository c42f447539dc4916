//! Summary provenance: turn matched evidence plus a model answer into a
//! short summary whose origin (model vs. database vs. nothing) is always
//! recorded, and whose cited evidence ids are always ones that were
//! actually offered.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::evidence::{InteractionRecord, InteractionReference};
use crate::model::SummaryModel;

/// How many evidence items are offered to the model.
const EVIDENCE_BLOCK_LIMIT: usize = 6;
/// How many evidence items the deterministic fallback summarizes.
const DB_SUMMARY_ITEMS: usize = 2;
/// Word cap on the deterministic fallback summary.
const DB_SUMMARY_MAX_WORDS: usize = 60;
/// Reference titles longer than this are truncated, with the full text kept
/// as the excerpt.
const REFERENCE_TITLE_MAX: usize = 200;

const NO_INFORMATION_MESSAGE: &str =
    "No information is available for this question. Please consult your pharmacist or prescriber.";

const SUMMARIZE_SYSTEM_PROMPT: &str =
    "You are a helpful, concise medical summarization assistant.";

/// Where a summary ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// Text produced by the model (evidence-anchored or free-form).
    Model,
    /// Deterministic template over the curated evidence.
    Db,
    /// Nothing to say; `text` is a fixed message.
    None,
}

impl SummarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummarySource::Model => "model",
            SummarySource::Db => "db",
            SummarySource::None => "none",
        }
    }
}

/// A generated summary together with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub text: String,
    pub source: SummarySource,
    /// Ids of the evidence records the summary is grounded on. Empty for
    /// free-form model summaries and for the no-information fallback.
    pub evidence_ids: Vec<i64>,
}

/// Runs the ordered fallback cascade. Each step either yields a result or
/// passes to the next; model failures of any kind (transport, parse,
/// missing configuration) are logged and treated as "no result".
pub struct SummaryBuilder {
    model: Arc<dyn SummaryModel>,
}

impl SummaryBuilder {
    pub fn new(model: Arc<dyn SummaryModel>) -> Self {
        Self { model }
    }

    /// Builds a summary for `question`, optionally grounded on curated
    /// `evidence` and/or a prior model `answer`. When no curated evidence
    /// matched, references and links salvaged from the answer stand in as
    /// lower-quality evidence.
    pub async fn build(
        &self,
        question: &str,
        answer: &str,
        evidence: Vec<InteractionRecord>,
    ) -> SummaryResult {
        let evidence = supplement_evidence(evidence, answer);

        if let Some(result) = self.evidence_anchored_summary(question, &evidence).await {
            return result;
        }
        if let Some(text) = self.summarize_text(question, answer).await {
            return SummaryResult {
                text,
                source: SummarySource::Model,
                evidence_ids: Vec::new(),
            };
        }
        if let Some(text) = self.summarize_text(question, question).await {
            return SummaryResult {
                text,
                source: SummarySource::Model,
                evidence_ids: Vec::new(),
            };
        }
        if let Some(result) = database_summary(&evidence) {
            return result;
        }
        SummaryResult {
            text: NO_INFORMATION_MESSAGE.to_string(),
            source: SummarySource::None,
            evidence_ids: Vec::new(),
        }
    }

    /// Cascade step 1: offer a numbered evidence block and ask for a
    /// structured `{summary, evidence_indices}` reply. Returned indices are
    /// intersected with the offered ones before being mapped back to record
    /// ids, so the model can never cite evidence it was not shown.
    async fn evidence_anchored_summary(
        &self,
        question: &str,
        evidence: &[InteractionRecord],
    ) -> Option<SummaryResult> {
        if evidence.is_empty() {
            return None;
        }

        let offered = &evidence[..evidence.len().min(EVIDENCE_BLOCK_LIMIT)];
        let prompt = structured_summary_prompt(question, offered);

        let reply = match self.model.generate_structured_summary(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("structured summary call failed, falling back: {err}");
                return None;
            }
        };
        if reply.summary.trim().is_empty() {
            return None;
        }

        let mut evidence_ids: Vec<i64> = Vec::new();
        for index in reply.evidence_indices {
            if index == 0 || index > offered.len() {
                warn!(index, "dropping evidence index outside the offered range");
                continue;
            }
            let id = offered[index - 1].id;
            if !evidence_ids.contains(&id) {
                evidence_ids.push(id);
            }
        }
        if evidence_ids.is_empty() {
            return None;
        }

        Some(SummaryResult {
            text: reply.summary,
            source: SummarySource::Model,
            evidence_ids,
        })
    }

    /// Cascade steps 2 and 3: free-form summarization of whatever text is
    /// available, with no evidence anchoring.
    async fn summarize_text(&self, question: &str, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let user = format!(
            "User question: {question}\n\n\
             Produce a clear, 1-2 sentence plain-language summary of the following content \
             that a non-expert can understand. Do not add information that is not present.\n\n\
             {text}"
        );
        match self.model.generate_text(SUMMARIZE_SYSTEM_PROMPT, &user).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!("plain summary call failed, falling back: {err}");
                None
            }
        }
    }
}

fn structured_summary_prompt(question: &str, offered: &[InteractionRecord]) -> String {
    let mut block = String::new();
    for (i, record) in offered.iter().enumerate() {
        let line = format!("{}. {} — {}\n", i + 1, record.title, record.best_excerpt());
        block.push_str(&line);
    }

    format!(
        "User question: {question}\n\n\
         Given the numbered evidence items below, produce a concise 1-2 sentence \
         plain-language summary suitable for a non-expert.\n\
         Return a JSON object ONLY with two keys: `summary` (string) and \
         `evidence_indices` (array of integers referencing the numbered evidence items you used).\n\
         Do NOT invent facts that are not present in the evidence. If you cannot create a \
         factual short summary from the evidence, return {{\"summary\": \"\", \"evidence_indices\": []}}.\n\n\
         Evidence:\n{block}"
    )
}

/// Cascade step 4: deterministic template over the best-scoring evidence.
/// Score: excerpt present +2, evidence quality "high" +1; ties broken by
/// ascending id. Findings first, then a single Recommendation sentence,
/// then a "Sources:" id suffix, clamped to 60 words.
fn database_summary(evidence: &[InteractionRecord]) -> Option<SummaryResult> {
    if evidence.is_empty() {
        return None;
    }

    let mut ranked: Vec<&InteractionRecord> = evidence.iter().collect();
    ranked.sort_by_key(|record| (-evidence_score(record), record.id));

    let mut findings: Vec<String> = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();
    let mut evidence_ids: Vec<i64> = Vec::new();

    for record in ranked.into_iter().take(DB_SUMMARY_ITEMS) {
        evidence_ids.push(record.id);
        if let Some(rec) = record.recommended_actions.as_deref().filter(|v| !v.trim().is_empty()) {
            recommendations.push(flatten_whitespace(rec));
        } else if let Some(excerpt) = first_reference_excerpt(record) {
            findings.push(flatten_whitespace(excerpt));
        } else {
            let text = if record.summary.trim().is_empty() {
                record.title.as_str()
            } else {
                record.summary.as_str()
            };
            findings.push(flatten_whitespace(text));
        }
    }

    let mut sentences: Vec<String> = Vec::new();
    if !findings.is_empty() {
        sentences.push(findings.join(" "));
    }
    if !recommendations.is_empty() {
        sentences.push(format!("Recommendation: {}", recommendations.join("; ")));
    }
    sentences.push(format!(
        "Sources: {}",
        evidence_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));

    Some(SummaryResult {
        text: clamp_words(&sentences.join(" "), DB_SUMMARY_MAX_WORDS),
        source: SummarySource::Db,
        evidence_ids,
    })
}

fn evidence_score(record: &InteractionRecord) -> i32 {
    let mut score = 0;
    if first_reference_excerpt(record).is_some() {
        score += 2;
    }
    if record.evidence_quality.as_deref() == Some("high") {
        score += 1;
    }
    score
}

fn first_reference_excerpt(record: &InteractionRecord) -> Option<&str> {
    record
        .references
        .first()
        .and_then(|r| r.excerpt.as_deref())
        .filter(|v| !v.trim().is_empty())
}

fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        words.join(" ")
    }
}

/// When no curated evidence matched, salvage evidence from the model's own
/// answer: first a `## REFERENCES` section, then raw markdown links and
/// bare URLs. Curated evidence is always passed through untouched.
pub(crate) fn supplement_evidence(
    evidence: Vec<InteractionRecord>,
    answer: &str,
) -> Vec<InteractionRecord> {
    if !evidence.is_empty() || answer.trim().is_empty() {
        return evidence;
    }

    let references = parse_reference_section(answer);
    if !references.is_empty() {
        return vec![InteractionRecord {
            id: 1,
            drug_name: String::new(),
            title: "Evidence-based medical literature".into(),
            summary: "References cited by the model from medical literature and clinical guidelines."
                .into(),
            mechanism: None,
            food_groups: Vec::new(),
            recommended_actions: None,
            evidence_quality: Some("model-generated".into()),
            references,
        }];
    }

    let links = harvest_links(answer);
    if !links.is_empty() {
        return vec![InteractionRecord {
            id: 0,
            drug_name: String::new(),
            title: "Model-extracted links (unverified)".into(),
            summary: "Links extracted from the model answer. Not verified against curated data."
                .into(),
            mechanism: None,
            food_groups: Vec::new(),
            recommended_actions: None,
            evidence_quality: Some("unverified".into()),
            references: links,
        }];
    }

    Vec::new()
}

fn reference_heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)##\s*references?\s*\n").expect("valid regex"))
}

fn reference_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid regex"))
}

fn reference_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:https?://\S+|DOI:\s*\S+|PMID:\s*\d+)").expect("valid regex"))
}

fn pmid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PMID:\s*(\d+)").expect("valid regex"))
}

fn markdown_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("valid regex"))
}

fn bare_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s)]+").expect("valid regex"))
}

/// Parses `[n] text…` entries from a trailing `## REFERENCES` section of the
/// answer. A `PMID: nnn` citation is rewritten to its PubMed URL.
pub(crate) fn parse_reference_section(answer: &str) -> Vec<InteractionReference> {
    let Some(heading) = reference_heading_regex().find(answer) else {
        return Vec::new();
    };
    let rest = &answer[heading.end()..];
    // The section runs until the next markdown heading, if any.
    let section = match rest.find("\n##") {
        Some(end) => &rest[..end],
        None => rest,
    };

    let markers: Vec<_> = reference_entry_regex().find_iter(section).collect();
    let mut references = Vec::new();

    for (i, marker) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map_or(section.len(), |next| next.start());
        let text = section[marker.end()..end].trim();
        if text.is_empty() {
            continue;
        }

        let mut url = reference_url_regex()
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "#".to_string());
        if let Some(caps) = pmid_regex().captures(&url) {
            url = format!("https://pubmed.ncbi.nlm.nih.gov/{}/", &caps[1]);
        }

        let (title, excerpt) = if text.len() > REFERENCE_TITLE_MAX {
            let mut cut = REFERENCE_TITLE_MAX;
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            (text[..cut].to_string(), Some(text.to_string()))
        } else {
            (text.to_string(), None)
        };

        references.push(InteractionReference { title, url, excerpt });
    }

    references
}

/// Harvests markdown links and bare URLs from the answer, deduplicated by
/// URL with markdown links taking precedence (they carry a title).
pub(crate) fn harvest_links(answer: &str) -> Vec<InteractionReference> {
    let mut seen: Vec<String> = Vec::new();
    let mut links = Vec::new();

    for caps in markdown_link_regex().captures_iter(answer) {
        let title = caps[1].trim().to_string();
        let url = caps[2].trim().to_string();
        if seen.contains(&url) {
            continue;
        }
        seen.push(url.clone());
        links.push(InteractionReference {
            title: if title.is_empty() { url.clone() } else { title },
            url,
            excerpt: None,
        });
    }

    for m in bare_url_regex().find_iter(answer) {
        let url = m.as_str().trim_end_matches([')', '.', ',']).to_string();
        if seen.contains(&url) {
            continue;
        }
        seen.push(url.clone());
        links.push(InteractionReference {
            title: url.clone(),
            url,
            excerpt: None,
        });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DrugFactsError;
    use crate::evidence::InteractionStore;
    use crate::model::StructuredSummary;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model: replies are popped in call order; an exhausted queue
    /// behaves like a failing model.
    #[derive(Default)]
    struct ScriptedModel {
        text_replies: Mutex<VecDeque<String>>,
        structured_replies: Mutex<VecDeque<StructuredSummary>>,
    }

    impl ScriptedModel {
        fn failing() -> Self {
            Self::default()
        }

        fn with_structured(reply: StructuredSummary) -> Self {
            let stub = Self::default();
            stub.structured_replies
                .lock()
                .unwrap()
                .push_back(reply);
            stub
        }
    }

    #[async_trait]
    impl SummaryModel for ScriptedModel {
        async fn generate_text(&self, _system: &str, _user: &str) -> Result<String, DrugFactsError> {
            self.text_replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DrugFactsError::Api {
                    api: "stub".into(),
                    message: "no scripted reply".into(),
                })
        }

        async fn generate_structured_summary(
            &self,
            _prompt: &str,
        ) -> Result<StructuredSummary, DrugFactsError> {
            self.structured_replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DrugFactsError::Api {
                    api: "stub".into(),
                    message: "no scripted reply".into(),
                })
        }
    }

    fn curated(n: usize) -> Vec<InteractionRecord> {
        InteractionStore::with_defaults().records()[..n].to_vec()
    }

    #[tokio::test]
    async fn model_summary_maps_offered_indices_to_record_ids() {
        let model = Arc::new(ScriptedModel::with_structured(StructuredSummary {
            summary: "Keep vitamin K intake consistent; avoid grapefruit.".into(),
            evidence_indices: vec![2, 1, 2],
        }));
        let builder = SummaryBuilder::new(model);

        let result = builder
            .build("warfarin and simvastatin with food?", "", curated(2))
            .await;
        assert_eq!(result.source, SummarySource::Model);
        assert_eq!(result.evidence_ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn out_of_range_indices_are_filtered_and_cascade_falls_through() {
        // Two records offered, so only indices 1 and 2 are valid; 0 and 7
        // must never surface as evidence ids.
        let model = Arc::new(ScriptedModel::with_structured(StructuredSummary {
            summary: "A summary citing nothing that was offered.".into(),
            evidence_indices: vec![0, 7],
        }));
        let builder = SummaryBuilder::new(model);

        let result = builder.build("warfarin?", "", curated(2)).await;
        assert_ne!(result.source, SummarySource::Model);
        assert_eq!(result.source, SummarySource::Db);
        assert!(result.evidence_ids.iter().all(|id| [1, 2].contains(id)));
    }

    #[tokio::test]
    async fn failing_model_falls_back_to_database_summary() {
        let builder = SummaryBuilder::new(Arc::new(ScriptedModel::failing()));
        let result = builder
            .build("warfarin with spinach?", "some prior answer", curated(1))
            .await;
        assert_eq!(result.source, SummarySource::Db);
        assert_eq!(result.evidence_ids, vec![1]);
        assert!(result.text.contains("Sources: 1"));
        assert!(result.text.contains("Recommendation:"));
    }

    #[tokio::test]
    async fn no_evidence_and_failing_model_yields_fixed_message() {
        let builder = SummaryBuilder::new(Arc::new(ScriptedModel::failing()));
        let result = builder.build("anything?", "", Vec::new()).await;
        assert_eq!(result.source, SummarySource::None);
        assert!(result.evidence_ids.is_empty());
        assert_eq!(result.text, NO_INFORMATION_MESSAGE);
    }

    #[tokio::test]
    async fn answer_summary_is_tried_before_database_fallback() {
        let model = ScriptedModel::failing();
        model
            .text_replies
            .lock()
            .unwrap()
            .push_back("A short model rendering of the answer.".into());
        let builder = SummaryBuilder::new(Arc::new(model));

        // No evidence, so the cascade goes straight to the answer summary.
        let result = builder
            .build("question?", "a long technical answer", Vec::new())
            .await;
        assert_eq!(result.source, SummarySource::Model);
        assert!(result.evidence_ids.is_empty());
        assert_eq!(result.text, "A short model rendering of the answer.");
    }

    #[test]
    fn database_summary_scores_excerpts_and_quality() {
        let mut records = curated(3);
        // Record 3 (levodopa) gains an excerpt: score 2 beats the "high"
        // quality score 1 of record 2 (simvastatin).
        records[2].references[0].excerpt = Some("Protein competes with levodopa.".into());

        let result = database_summary(&records).unwrap();
        assert_eq!(result.evidence_ids, vec![3, 2]);
        assert!(result.text.ends_with(&format!("Sources: {}", "3, 2")));
    }

    #[test]
    fn database_summary_clamps_to_sixty_words() {
        let mut record = curated(1).remove(0);
        record.recommended_actions = Some("word ".repeat(100));
        let result = database_summary(&[record]).unwrap();
        assert!(result.text.ends_with("..."));
        assert_eq!(result.text.trim_end_matches("...").split_whitespace().count(), 60);
    }

    #[test]
    fn reference_section_is_parsed_with_pmid_rewrite() {
        let answer = "Main answer text.\n\n## REFERENCES\n\
            [1] Holbrook A, 2005. Systematic overview of warfarin. PMID: 15911722\n\
            [2] FDA guidance. https://www.fda.gov/grapefruit\n\n\
            ## NOTES\nignored";
        let refs = parse_reference_section(answer);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://pubmed.ncbi.nlm.nih.gov/15911722/");
        assert!(refs[0].title.starts_with("Holbrook A"));
        assert_eq!(refs[1].url, "https://www.fda.gov/grapefruit");
    }

    #[test]
    fn link_harvest_deduplicates_by_url() {
        let answer = "See [NHS warfarin page](https://www.nhs.uk/warfarin) and also \
            https://www.nhs.uk/warfarin plus https://medlineplus.gov/a682277.";
        let links = harvest_links(answer);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "NHS warfarin page");
        assert_eq!(links[1].url, "https://medlineplus.gov/a682277");
    }

    #[test]
    fn supplement_prefers_references_over_bare_links_and_keeps_curated() {
        let curated_set = curated(1);
        let untouched = supplement_evidence(curated_set.clone(), "## REFERENCES\n[1] x");
        assert_eq!(untouched.len(), 1);
        assert_eq!(untouched[0].id, curated_set[0].id);

        let synthesized = supplement_evidence(
            Vec::new(),
            "Answer.\n## REFERENCES\n[1] Study. PMID: 123\nAlso https://example.org",
        );
        assert_eq!(synthesized.len(), 1);
        assert_eq!(synthesized[0].evidence_quality.as_deref(), Some("model-generated"));

        let links_only = supplement_evidence(Vec::new(), "See https://example.org for details.");
        assert_eq!(links_only[0].id, 0);
        assert_eq!(links_only[0].evidence_quality.as_deref(), Some("unverified"));
    }
}
