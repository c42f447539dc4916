use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{ChemicalProperties, SourceName};

const PUBCHEM_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov";
const PUBCHEM_API: &str = "pubchem";
const PUBCHEM_BASE_ENV: &str = "DRUGFACTS_PUBCHEM_BASE";
const PUBCHEM_SOURCE: &str = "PubChem";

const PROPERTY_LIST: &str = "MolecularFormula,MolecularWeight,CanonicalSMILES,InChI,InChIKey";

/// Client for the PubChem PUG REST API.
pub struct PubChemClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    cache: Arc<dyn ResponseCache>,
}

impl PubChemClient {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(PUBCHEM_BASE, PUBCHEM_BASE_ENV),
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

    /// Chemical properties for a compound name: CID lookup, then the
    /// property table for that CID.
    pub async fn chemical(&self, drug_name: &str) -> Result<ChemicalProperties, DrugFactsError> {
        let drug_name = crate::sources::validate_drug_name(drug_name)?;

        if let Some(cached) =
            crate::sources::cache_lookup(self.cache.as_ref(), SourceName::Chemical, drug_name)
        {
            return Ok(cached);
        }

        let url = self.endpoint(&format!("rest/pug/compound/name/{drug_name}/cids/JSON"));
        let resp: CidResponse =
            crate::sources::get_json(PUBCHEM_API, self.client.get(&url)).await?;

        let Some(cid) = resp
            .identifier_list
            .and_then(|list| list.cid.into_iter().next())
        else {
            return Err(DrugFactsError::NotFound {
                entity: "compound".into(),
                id: drug_name.to_string(),
            });
        };

        let url = self.endpoint(&format!(
            "rest/pug/compound/cid/{cid}/property/{PROPERTY_LIST}/JSON"
        ));
        let props: PropertyResponse =
            crate::sources::get_json(PUBCHEM_API, self.client.get(&url)).await?;
        let row = props
            .property_table
            .and_then(|table| table.properties.into_iter().next())
            .unwrap_or_default();

        let result = ChemicalProperties {
            cid,
            molecular_formula: row.molecular_formula,
            molecular_weight: row.molecular_weight.map(|w| w.to_string()),
            smiles: row.canonical_smiles,
            inchi: row.inchi,
            inchi_key: row.inchi_key,
            url: format!("https://pubchem.ncbi.nlm.nih.gov/compound/{cid}"),
            source: PUBCHEM_SOURCE.to_string(),
        };

        crate::sources::cache_store(self.cache.as_ref(), SourceName::Chemical, drug_name, &result);
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct CidResponse {
    #[serde(rename = "IdentifierList")]
    identifier_list: Option<IdentifierList>,
}

#[derive(Debug, Deserialize)]
struct IdentifierList {
    #[serde(default, rename = "CID")]
    cid: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct PropertyResponse {
    #[serde(rename = "PropertyTable")]
    property_table: Option<PropertyTable>,
}

#[derive(Debug, Deserialize)]
struct PropertyTable {
    #[serde(default, rename = "Properties")]
    properties: Vec<PropertyRow>,
}

/// PubChem has shipped MolecularWeight as both a number and a string.
#[derive(Debug, Default, Deserialize)]
struct PropertyRow {
    #[serde(rename = "MolecularFormula")]
    molecular_formula: Option<String>,
    #[serde(rename = "MolecularWeight")]
    molecular_weight: Option<MolecularWeight>,
    #[serde(rename = "CanonicalSMILES")]
    canonical_smiles: Option<String>,
    #[serde(rename = "InChI")]
    inchi: Option<String>,
    #[serde(rename = "InChIKey")]
    inchi_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MolecularWeight {
    Text(String),
    Number(f64),
}

impl std::fmt::Display for MolecularWeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MolecularWeight::Text(v) => f.write_str(v.trim()),
            MolecularWeight::Number(v) => write!(f, "{v}"),
        }
    }
}
