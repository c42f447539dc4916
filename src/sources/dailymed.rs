use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{DrugLabelSummary, SourceName};

const DAILYMED_BASE: &str = "https://dailymed.nlm.nih.gov/dailymed";
const DAILYMED_API: &str = "dailymed";
const DAILYMED_BASE_ENV: &str = "DRUGFACTS_DAILYMED_BASE";
const DAILYMED_SOURCE: &str = "FDA DailyMed";

/// Client for the FDA DailyMed structured-product-label service.
pub struct DailyMedClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    cache: Arc<dyn ResponseCache>,
}

impl DailyMedClient {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(DAILYMED_BASE, DAILYMED_BASE_ENV),
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

    /// Official-label metadata for the first matching SPL entry.
    pub async fn label(&self, drug_name: &str) -> Result<DrugLabelSummary, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::Label, drug_name)
        {
            return Ok(cached);
        }

        let url = self.endpoint("services/v2/spls.json");
        let resp: SplsResponse = crate::sources::get_json(
            DAILYMED_API,
            self.client.get(&url).query(&[("drug_name", drug_name)]),
        )
        .await?;

        let Some(first) = resp.data.into_iter().next() else {
            return Err(DrugFactsError::NotFound {
                entity: "drug label".into(),
                id: drug_name.to_string(),
            });
        };
        let Some(setid) = first
            .setid
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        else {
            return Err(DrugFactsError::NotFound {
                entity: "drug label".into(),
                id: drug_name.to_string(),
            });
        };

        let url = format!(
            "https://dailymed.nlm.nih.gov/dailymed/drugInfo.cfm?setid={setid}"
        );
        let result = DrugLabelSummary {
            setid,
            title: first.title.filter(|v| !v.trim().is_empty()),
            manufacturer: first.author.filter(|v| !v.trim().is_empty()),
            generic_name: first.generic_name.filter(|v| !v.trim().is_empty()),
            published_date: first.published_date.filter(|v| !v.trim().is_empty()),
            url,
            source: DAILYMED_SOURCE.to_string(),
        };

        crate::sources::cache_store(self.cache.as_ref(), SourceName::Label, drug_name, &result);
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct SplsResponse {
    #[serde(default)]
    data: Vec<SplEntry>,
}

#[derive(Debug, Deserialize)]
struct SplEntry {
    setid: Option<String>,
    title: Option<String>,
    /// DailyMed reports the labeler under `author`.
    author: Option<String>,
    generic_name: Option<String>,
    published_date: Option<String>,
}
