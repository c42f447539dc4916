use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{AdverseEventCount, SourceName};

const OPENFDA_BASE: &str = "https://api.fda.gov";
const OPENFDA_API: &str = "openfda";
const OPENFDA_BASE_ENV: &str = "DRUGFACTS_OPENFDA_BASE";
const OPENFDA_SOURCE: &str = "OpenFDA";

/// Reaction terms are capped at the top 20 by report count.
const ADVERSE_EVENT_LIMIT: usize = 20;

/// Client for the OpenFDA drug adverse-event (FAERS) endpoint.
pub struct OpenFdaClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
    cache: Arc<dyn ResponseCache>,
}

impl OpenFdaClient {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(OPENFDA_BASE, OPENFDA_BASE_ENV),
            api_key: crate::sources::openfda_api_key(),
            cache,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        base: String,
        api_key: Option<String>,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key,
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

    /// Most-reported adverse reactions for a drug, as `(term, count)` buckets.
    pub async fn adverse_events(
        &self,
        drug_name: &str,
    ) -> Result<Vec<AdverseEventCount>, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::AdverseEvents, drug_name)
        {
            return Ok(cached);
        }

        let search = format!("patient.drug.openfda.generic_name:\"{drug_name}\"");
        let url = self.endpoint("drug/event.json");
        let mut req = self.client.get(&url).query(&[
            ("search", search.as_str()),
            ("count", "patient.reaction.reactionmeddrapt.exact"),
            ("limit", &ADVERSE_EVENT_LIMIT.to_string()),
        ]);
        if let Some(key) = self.api_key.as_deref() {
            req = req.query(&[("api_key", key)]);
        }

        let resp: CountResponse = crate::sources::get_json(OPENFDA_API, req).await?;

        let events: Vec<AdverseEventCount> = resp
            .results
            .into_iter()
            .filter(|bucket| !bucket.term.trim().is_empty())
            .take(ADVERSE_EVENT_LIMIT)
            .map(|bucket| AdverseEventCount {
                reaction: bucket.term.trim().to_string(),
                count: bucket.count,
                source: OPENFDA_SOURCE.to_string(),
            })
            .collect();

        crate::sources::cache_store(
            self.cache.as_ref(),
            SourceName::AdverseEvents,
            drug_name,
            &events,
        );
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    results: Vec<CountBucket>,
}

#[derive(Debug, Deserialize)]
struct CountBucket {
    term: String,
    count: u64,
}
