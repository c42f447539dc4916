use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{LiteratureReference, SourceName};

const PUBMED_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PUBMED_API: &str = "pubmed";
const PUBMED_BASE_ENV: &str = "DRUGFACTS_PUBMED_BASE";
const PUBMED_SOURCE: &str = "PubMed";

/// Literature hits are bounded to a small context-sized set.
pub(crate) const LITERATURE_LIMIT: usize = 5;
const AUTHOR_LIMIT: usize = 3;

/// Client for the NCBI E-utilities (esearch + esummary) PubMed endpoints.
pub struct PubMedClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
    cache: Arc<dyn ResponseCache>,
}

impl PubMedClient {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(PUBMED_BASE, PUBMED_BASE_ENV),
            api_key: crate::sources::ncbi_api_key(),
            cache,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        base: String,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: None,
            cache,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_api_key(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> reqwest_middleware::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => req.query(&[("api_key", key)]),
            None => req,
        }
    }

    /// Recent interaction-focused literature for a drug: relevance-sorted
    /// esearch, then esummary for the returned PMIDs.
    pub async fn literature(
        &self,
        drug_name: &str,
    ) -> Result<Vec<LiteratureReference>, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::Literature, drug_name)
        {
            return Ok(cached);
        }

        let term = format!("{drug_name} AND drug interactions");
        let url = self.endpoint("esearch.fcgi");
        let req = self.with_api_key(self.client.get(&url).query(&[
            ("db", "pubmed"),
            ("term", term.as_str()),
            ("retmode", "json"),
            ("retmax", &LITERATURE_LIMIT.to_string()),
            ("sort", "relevance"),
        ]));
        let search: ESearchResponse = crate::sources::get_json(PUBMED_API, req).await?;

        let pmids = search
            .esearchresult
            .map(|r| r.idlist)
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .take(LITERATURE_LIMIT)
            .collect::<Vec<_>>();

        // A zero-hit search is not cached, so a transient empty result is
        // retried on the next request.
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = pmids.join(",");
        let url = self.endpoint("esummary.fcgi");
        let req = self.with_api_key(self.client.get(&url).query(&[
            ("db", "pubmed"),
            ("id", ids.as_str()),
            ("retmode", "json"),
        ]));
        let summary: ESummaryResponse = crate::sources::get_json(PUBMED_API, req).await?;
        let result_map = summary.result.unwrap_or_default();

        // esummary order is not guaranteed; keep the search ranking.
        let articles: Vec<LiteratureReference> = pmids
            .iter()
            .filter_map(|pmid| {
                let doc: ESummaryDoc = serde_json::from_value(result_map.get(pmid)?.clone()).ok()?;
                Some(LiteratureReference {
                    pmid: pmid.clone(),
                    title: doc.title.clone().filter(|v| !v.trim().is_empty()),
                    authors: doc
                        .authors
                        .iter()
                        .filter_map(|a| a.name.clone())
                        .filter(|v| !v.trim().is_empty())
                        .take(AUTHOR_LIMIT)
                        .collect(),
                    journal: doc.source.clone().filter(|v| !v.trim().is_empty()),
                    publication_date: doc.pubdate.clone().filter(|v| !v.trim().is_empty()),
                    url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
                    source: PUBMED_SOURCE.to_string(),
                })
            })
            .collect();

        crate::sources::cache_store(
            self.cache.as_ref(),
            SourceName::Literature,
            drug_name,
            &articles,
        );
        Ok(articles)
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: Option<ESearchResult>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ESummaryResponse {
    /// Keyed by PMID, but also carries a `uids` array entry; documents are
    /// decoded per-key so that non-document entries are skipped.
    result: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct ESummaryDoc {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<ESummaryAuthor>,
    source: Option<String>,
    pubdate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ESummaryAuthor {
    name: Option<String>,
}
