//! Concurrent fan-out over the source clients and merge into [`DrugRecord`]s.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::cache::ResponseCache;
use crate::error::DrugFactsError;
use crate::record::{DrugRecord, SourceName};
use crate::sources::dailymed::DailyMedClient;
use crate::sources::openfda::OpenFdaClient;
use crate::sources::pubchem::PubChemClient;
use crate::sources::pubmed::PubMedClient;
use crate::sources::rxnorm::RxNormClient;

/// Budget for one logical source fetch; a slow provider loses its slot
/// instead of starving the other five.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for one drug's whole aggregation inside `fetch_many`.
const RECORD_TIMEOUT: Duration = Duration::from_secs(15);

/// Upstream backpressure: at most this many drugs aggregate at once, so a
/// worst-case request holds six times this many outbound calls.
const MAX_CONCURRENT_DRUGS: usize = 4;

/// Fans a drug name out to all six logical source fetches and merges the
/// results. Shares one response cache across all clients; construct once and
/// reuse across requests.
pub struct Aggregator {
    rxnorm: RxNormClient,
    dailymed: DailyMedClient,
    pubchem: PubChemClient,
    openfda: OpenFdaClient,
    pubmed: PubMedClient,
    permits: Arc<Semaphore>,
    record_timeout: Duration,
}

impl Aggregator {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self, DrugFactsError> {
        Ok(Self {
            rxnorm: RxNormClient::new(cache.clone())?,
            dailymed: DailyMedClient::new(cache.clone())?,
            pubchem: PubChemClient::new(cache.clone())?,
            openfda: OpenFdaClient::new(cache.clone())?,
            pubmed: PubMedClient::new(cache)?,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_DRUGS)),
            record_timeout: RECORD_TIMEOUT,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        base: String,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self, DrugFactsError> {
        Ok(Self {
            rxnorm: RxNormClient::new_for_test(base.clone(), cache.clone())?,
            dailymed: DailyMedClient::new_for_test(base.clone(), cache.clone())?,
            pubchem: PubChemClient::new_for_test(base.clone(), cache.clone())?,
            openfda: OpenFdaClient::new_for_test(base.clone(), None, cache.clone())?,
            pubmed: PubMedClient::new_for_test(base, cache)?,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_DRUGS)),
            record_timeout: RECORD_TIMEOUT,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_record_timeout(mut self, record_timeout: Duration) -> Self {
        self.record_timeout = record_timeout;
        self
    }

    /// Aggregates one drug. All six fetches run concurrently; none can abort
    /// the others. Failures land in `partial_failures` and the record is
    /// returned regardless — six failures mean "no data", not an error.
    pub async fn fetch_one(&self, drug_name: &str) -> DrugRecord {
        let mut record = DrugRecord::empty(drug_name);
        let name = record.name.clone();

        let (identifiers, label, chemical, interactions, adverse_events, literature) = tokio::join!(
            bounded(self.rxnorm.identifiers(&name)),
            bounded(self.dailymed.label(&name)),
            bounded(self.pubchem.chemical(&name)),
            bounded(self.rxnorm.interactions(&name)),
            bounded(self.openfda.adverse_events(&name)),
            bounded(self.pubmed.literature(&name)),
        );

        // Merge in fixed field order so the record shape never depends on
        // network completion order.
        match identifiers {
            Ok(v) => record.identifiers = Some(v),
            Err(err) => fail(&mut record, SourceName::Identifiers, &err),
        }
        match label {
            Ok(v) => record.label = Some(v),
            Err(err) => fail(&mut record, SourceName::Label, &err),
        }
        match chemical {
            Ok(v) => record.chemical = Some(v),
            Err(err) => fail(&mut record, SourceName::Chemical, &err),
        }
        match interactions {
            Ok(v) => record.interactions = v,
            Err(err) => fail(&mut record, SourceName::Interactions, &err),
        }
        match adverse_events {
            Ok(v) => record.adverse_events = v,
            Err(err) => fail(&mut record, SourceName::AdverseEvents, &err),
        }
        match literature {
            Ok(v) => record.literature = v,
            Err(err) => fail(&mut record, SourceName::Literature, &err),
        }

        record
    }

    /// Aggregates several drugs concurrently, preserving input order in the
    /// output. One drug timing out or failing never aborts the others; a
    /// timed-out drug yields an all-failed record.
    ///
    /// Each name's timeout budget starts when `fetch_many` is called, not
    /// when a concurrency permit frees up, so the whole call resolves within
    /// one timeout regardless of how many names are queued.
    pub async fn fetch_many(&self, drug_names: &[String]) -> Vec<DrugRecord> {
        let tasks = drug_names.iter().map(|name| {
            let permits = self.permits.clone();
            async move {
                let attempt = async {
                    // Closed-semaphore errors cannot happen; the semaphore
                    // lives as long as the aggregator.
                    let _permit = permits.acquire().await;
                    self.fetch_one(name).await
                };
                match tokio::time::timeout(self.record_timeout, attempt).await {
                    Ok(record) => record,
                    Err(_) => {
                        warn!(
                            drug = name.as_str(),
                            timeout_secs = self.record_timeout.as_secs(),
                            "drug aggregation timed out"
                        );
                        DrugRecord::unavailable(name)
                    }
                }
            }
        });

        futures::future::join_all(tasks).await
    }
}

async fn bounded<T>(
    fut: impl Future<Output = Result<T, DrugFactsError>>,
) -> Result<T, DrugFactsError> {
    match tokio::time::timeout(SOURCE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(DrugFactsError::Api {
            api: "source".into(),
            message: format!("timed out after {}s", SOURCE_TIMEOUT.as_secs()),
        }),
    }
}

fn fail(record: &mut DrugRecord, source: SourceName, err: &DrugFactsError) {
    warn!(drug = record.name.as_str(), source = %source, "source fetch failed: {err}");
    record.partial_failures.insert(source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;
    use time::OffsetDateTime;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBCHEM_PROPS: &str =
        "MolecularFormula,MolecularWeight,CanonicalSMILES,InChI,InChIKey";

    /// Mounts happy-path responses for every provider endpoint for `drug`.
    async fn mount_all_sources(server: &MockServer, drug: &str, rxcui: &str) {
        mount_all_sources_with_delay(server, drug, rxcui, Duration::ZERO).await;
    }

    async fn mount_all_sources_with_delay(
        server: &MockServer,
        drug: &str,
        rxcui: &str,
        delay: Duration,
    ) {
        Mock::given(method("GET"))
            .and(path("/REST/rxcui.json"))
            .and(query_param("name", drug))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(delay)
                    .set_body_json(json!({"idGroup": {"rxnormId": [rxcui]}})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/REST/rxcui/{rxcui}/properties.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"name": drug, "tty": "IN"}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/REST/interaction/interaction.json"))
            .and(query_param("rxcui", rxcui))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "interactionTypeGroup": [{
                    "interactionType": [{
                        "interactionPair": [{
                            "interactionConcept": [
                                {"minConceptItem": {"name": drug}},
                                {"minConceptItem": {"name": "ibuprofen"}}
                            ],
                            "description": "example interaction",
                            "severity": "high"
                        }]
                    }]
                }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/v2/spls.json"))
            .and(query_param("drug_name", drug))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"setid": format!("set-{drug}"), "title": drug}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/rest/pug/compound/name/{drug}/cids/JSON")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"IdentifierList": {"CID": [99]}})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/rest/pug/compound/cid/99/property/{PUBCHEM_PROPS}/JSON"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "PropertyTable": {"Properties": [{"MolecularFormula": "C9H8O4"}]}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param(
                "search",
                format!("patient.drug.openfda.generic_name:\"{drug}\""),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"term": "NAUSEA", "count": 10}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("term", format!("{drug} AND drug interactions")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"idlist": ["42"]}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/esummary.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"42": {"title": "A study", "source": "J Pharm"}}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_one_merges_all_sources_on_total_success() {
        let server = MockServer::start().await;
        mount_all_sources(&server, "warfarin", "11289").await;

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let record = aggregator.fetch_one("Warfarin").await;

        assert!(record.partial_failures.is_empty());
        assert_eq!(record.identifiers.as_ref().unwrap().rxcui, "11289");
        assert_eq!(record.label.as_ref().unwrap().setid, "set-warfarin");
        assert_eq!(record.chemical.as_ref().unwrap().cid, 99);
        assert_eq!(record.interactions[0].interacting_drug, "ibuprofen");
        assert_eq!(record.adverse_events[0].reaction, "NAUSEA");
        assert_eq!(record.literature[0].pmid, "42");
    }

    #[tokio::test]
    async fn fetch_one_isolates_a_single_source_failure() {
        let server = MockServer::start().await;
        mount_all_sources(&server, "warfarin", "11289").await;

        // Override the adverse-event endpoint with a hard failure. 404 is not
        // retried by the middleware, so this stays fast.
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .with_priority(1)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let record = aggregator.fetch_one("warfarin").await;

        assert_eq!(record.partial_failures.len(), 1);
        assert!(record.partial_failures.contains(&SourceName::AdverseEvents));
        assert!(record.adverse_events.is_empty());
        assert!(record.identifiers.is_some());
        assert!(record.label.is_some());
        assert!(record.chemical.is_some());
        assert!(!record.interactions.is_empty());
        assert!(!record.literature.is_empty());
    }

    #[tokio::test]
    async fn fetch_one_against_dead_upstreams_returns_all_failed_record() {
        let server = MockServer::start().await;
        // Nothing mounted: every request 404s.
        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let record = aggregator.fetch_one("warfarin").await;

        assert!(record.is_empty());
        assert_eq!(record.partial_failures.len(), 6);
        assert!(record.identifiers.is_none());
        assert!(record.interactions.is_empty());
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let server = MockServer::start().await;
        mount_all_sources(&server, "warfarin", "11289").await;

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache.clone()).unwrap();
        let first = aggregator.fetch_one("warfarin").await;
        assert!(first.partial_failures.is_empty());

        let requests_after_first = server.received_requests().await.unwrap().len();
        let second = aggregator.fetch_one("warfarin").await;
        let requests_after_second = server.received_requests().await.unwrap().len();

        assert!(second.partial_failures.is_empty());
        assert_eq!(
            requests_after_first, requests_after_second,
            "second aggregation must not issue new network calls"
        );
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_a_fresh_fetch() {
        let server = MockServer::start().await;
        mount_all_sources(&server, "warfarin", "11289").await;

        let cache = Arc::new(MemoryCache::new());
        let now = OffsetDateTime::now_utc();
        cache.insert_entry(
            SourceName::Chemical,
            "warfarin",
            json!({"cid": 1, "url": "stale", "source": "PubChem"}),
            now - time::Duration::days(31),
            now - time::Duration::days(1),
        );

        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let record = aggregator.fetch_one("warfarin").await;

        // The stale CID must not surface; the live fetch returns 99.
        assert_eq!(record.chemical.as_ref().unwrap().cid, 99);
    }

    #[tokio::test]
    async fn fetch_many_preserves_input_order_despite_delays() {
        let server = MockServer::start().await;
        // Make the first name slow so it finishes last.
        mount_all_sources_with_delay(&server, "aspirin", "1191", Duration::from_millis(400)).await;
        mount_all_sources(&server, "warfarin", "11289").await;
        mount_all_sources(&server, "ibuprofen", "5640").await;

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let names = vec![
            "aspirin".to_string(),
            "warfarin".to_string(),
            "ibuprofen".to_string(),
        ];
        let records = aggregator.fetch_many(&names).await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "aspirin");
        assert_eq!(records[1].name, "warfarin");
        assert_eq!(records[2].name, "ibuprofen");
        assert!(records.iter().all(|r| r.partial_failures.is_empty()));
    }

    #[tokio::test]
    async fn fetch_many_timeout_bounds_names_queued_behind_the_permit_cap() {
        let server = MockServer::start().await;
        // Every endpoint stalls longer than the record timeout, so no name
        // can complete; names beyond the concurrency cap spend their whole
        // budget queued. The call must still resolve within one timeout.
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(json!({})),
            )
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache)
            .unwrap()
            .with_record_timeout(Duration::from_millis(300));
        let names: Vec<String> = (0..MAX_CONCURRENT_DRUGS + 4)
            .map(|i| format!("slowdrug{i}"))
            .collect();

        let started = std::time::Instant::now();
        let records = aggregator.fetch_many(&names).await;
        let elapsed = started.elapsed();

        assert_eq!(records.len(), names.len());
        assert!(records.iter().all(|r| r.is_empty()));
        // One shared budget, not one budget per permit batch.
        assert!(
            elapsed < Duration::from_millis(1500),
            "fetch_many took {elapsed:?}, queued names did not share the timeout budget"
        );
    }

    #[tokio::test]
    async fn fetch_many_isolates_a_fully_failing_name() {
        let server = MockServer::start().await;
        mount_all_sources(&server, "warfarin", "11289").await;
        // "brokendrug" has no mounts at all.

        let cache = Arc::new(MemoryCache::new());
        let aggregator = Aggregator::new_for_test(server.uri(), cache).unwrap();
        let names = vec!["brokendrug".to_string(), "warfarin".to_string()];
        let records = aggregator.fetch_many(&names).await;

        assert_eq!(records.len(), 2);
        assert!(records[0].is_empty());
        assert!(records[1].partial_failures.is_empty());
    }
}
