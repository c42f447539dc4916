//! Command-line surface over the aggregation, matching, and summary engines.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::aggregate::Aggregator;
use crate::cache::MemoryCache;
use crate::evidence::InteractionStore;
use crate::extract::extract_drug_names;
use crate::model::ChatModelClient;
use crate::render;
use crate::summary::SummaryBuilder;

#[derive(Debug, Parser)]
#[command(
    name = "drugfacts",
    version,
    about = "Aggregate public drug data and curated interaction evidence"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch and merge drug data from RxNorm, DailyMed, PubChem, OpenFDA, and PubMed
    Fetch {
        /// Drug names to fetch
        #[arg(required = true)]
        drugs: Vec<String>,
        /// Emit records as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Extract drug-name candidates from free text
    Extract {
        /// Free text, e.g. a user question
        text: String,
    },
    /// Show curated interaction records matching a question
    Match {
        /// Question to match against the curated set
        question: String,
        /// Emit matches as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Build a summary with provenance for a question
    Summarize {
        /// Question to summarize evidence for
        question: String,
        /// Prior model answer to ground the summary on
        #[arg(long)]
        answer: Option<String>,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        Commands::Fetch { drugs, json } => {
            let cache = Arc::new(MemoryCache::new());
            let aggregator = Aggregator::new(cache)?;
            let records = aggregator.fetch_many(&drugs).await;

            if json {
                return Ok(serde_json::to_string_pretty(&records)?);
            }
            let rendered = records
                .iter()
                .map(render::drug_record_markdown)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rendered.join("\n"))
        }
        Commands::Extract { text } => {
            let candidates = extract_drug_names(&text);
            if candidates.is_empty() {
                Ok("No drug-name candidates found.".to_string())
            } else {
                Ok(candidates.join("\n"))
            }
        }
        Commands::Match { question, json } => {
            let store = InteractionStore::with_defaults();
            let matches = store.search_in_text(&question);

            if json {
                return Ok(serde_json::to_string_pretty(&matches)?);
            }
            Ok(render::interactions_markdown(&matches)?)
        }
        Commands::Summarize { question, answer } => {
            let store = InteractionStore::with_defaults();
            let evidence = store.search_in_text(&question);

            let builder = SummaryBuilder::new(Arc::new(ChatModelClient::from_env()?));
            let result = builder
                .build(&question, answer.as_deref().unwrap_or(""), evidence)
                .await;

            let mut out = format!("{}\n\nSource: {}", result.text, result.source.as_str());
            if !result.evidence_ids.is_empty() {
                let ids = result
                    .evidence_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("\nEvidence ids: {ids}"));
            }
            Ok(out)
        }
    }
}
