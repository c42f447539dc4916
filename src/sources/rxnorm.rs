use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{DrugIdentifiers, DrugInteraction, SourceName};

const RXNORM_BASE: &str = "https://rxnav.nlm.nih.gov";
const RXNORM_API: &str = "rxnorm";
const RXNORM_BASE_ENV: &str = "DRUGFACTS_RXNORM_BASE";
const RXNORM_SOURCE: &str = "RxNorm";

/// Client for the NLM RxNav REST API: concept identifiers and the
/// drug-drug interaction endpoint.
pub struct RxNormClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    cache: Arc<dyn ResponseCache>,
}

impl RxNormClient {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(RXNORM_BASE, RXNORM_BASE_ENV),
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

    /// Looks up the RxNorm concept id (rxcui) and term properties for a drug
    /// name. Cache-checked; a not-found drug is never cached.
    pub async fn identifiers(&self, drug_name: &str) -> Result<DrugIdentifiers, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::Identifiers, drug_name)
        {
            return Ok(cached);
        }

        let url = self.endpoint("REST/rxcui.json");
        let resp: RxCuiResponse = crate::sources::get_json(
            RXNORM_API,
            self.client.get(&url).query(&[("name", drug_name)]),
        )
        .await?;

        let Some(rxcui) = resp
            .id_group
            .and_then(|g| g.rxnorm_id.into_iter().next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        else {
            return Err(DrugFactsError::NotFound {
                entity: "drug".into(),
                id: drug_name.to_string(),
            });
        };

        let url = self.endpoint(&format!("REST/rxcui/{rxcui}/properties.json"));
        let props: RxPropertiesResponse =
            crate::sources::get_json(RXNORM_API, self.client.get(&url)).await?;
        let properties = props.properties.unwrap_or_default();

        let result = DrugIdentifiers {
            rxcui,
            name: properties
                .name
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| drug_name.to_string()),
            synonym: properties.synonym.filter(|v| !v.trim().is_empty()),
            tty: properties.tty.filter(|v| !v.trim().is_empty()),
            source: RXNORM_SOURCE.to_string(),
        };

        crate::sources::cache_store(
            self.cache.as_ref(),
            SourceName::Identifiers,
            drug_name,
            &result,
        );
        Ok(result)
    }

    /// Known drug-drug interactions for a name. Depends on a successful
    /// identifier lookup: an RxNorm failure fails both logical sources.
    pub async fn interactions(
        &self,
        drug_name: &str,
    ) -> Result<Vec<DrugInteraction>, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::Interactions, drug_name)
        {
            return Ok(cached);
        }

        let identifiers = self.identifiers(drug_name).await?;

        let url = self.endpoint("REST/interaction/interaction.json");
        let resp: InteractionResponse = crate::sources::get_json(
            RXNORM_API,
            self.client
                .get(&url)
                .query(&[("rxcui", identifiers.rxcui.as_str())]),
        )
        .await?;

        let mut interactions: Vec<DrugInteraction> = Vec::new();
        for group in resp.interaction_type_group {
            for interaction_type in group.interaction_type {
                for pair in interaction_type.interaction_pair {
                    // concept[0] is the queried drug; concept[1] the partner.
                    let Some(partner) = pair
                        .interaction_concept
                        .get(1)
                        .and_then(|c| c.min_concept_item.as_ref())
                        .map(|item| item.name.trim())
                        .filter(|v| !v.is_empty())
                    else {
                        continue;
                    };
                    interactions.push(DrugInteraction {
                        interacting_drug: partner.to_string(),
                        description: pair.description.filter(|v| !v.trim().is_empty()),
                        severity: pair
                            .severity
                            .map(|v| v.trim().to_string())
                            .filter(|v| !v.is_empty())
                            .unwrap_or_else(|| "unknown".to_string()),
                        source: RXNORM_SOURCE.to_string(),
                    });
                }
            }
        }

        crate::sources::cache_store(
            self.cache.as_ref(),
            SourceName::Interactions,
            drug_name,
            &interactions,
        );
        Ok(interactions)
    }
}

#[derive(Debug, Deserialize)]
struct RxCuiResponse {
    #[serde(rename = "idGroup")]
    id_group: Option<RxIdGroup>,
}

#[derive(Debug, Deserialize)]
struct RxIdGroup {
    #[serde(default, rename = "rxnormId")]
    rxnorm_id: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RxPropertiesResponse {
    properties: Option<RxProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct RxProperties {
    name: Option<String>,
    synonym: Option<String>,
    tty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionResponse {
    #[serde(default, rename = "interactionTypeGroup")]
    interaction_type_group: Vec<InteractionTypeGroup>,
}

#[derive(Debug, Deserialize)]
struct InteractionTypeGroup {
    #[serde(default, rename = "interactionType")]
    interaction_type: Vec<InteractionType>,
}

#[derive(Debug, Deserialize)]
struct InteractionType {
    #[serde(default, rename = "interactionPair")]
    interaction_pair: Vec<InteractionPair>,
}

#[derive(Debug, Deserialize)]
struct InteractionPair {
    #[serde(default, rename = "interactionConcept")]
    interaction_concept: Vec<InteractionConcept>,
    description: Option<String>,
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionConcept {
    #[serde(rename = "minConceptItem")]
    min_concept_item: Option<MinConceptItem>,
}

#[derive(Debug, Deserialize)]
struct MinConceptItem {
    name: String,
}
