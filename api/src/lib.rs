#![deny(clippy::all)]
mod error;
pub mod resources;
pub mod retry;

use log::debug;
use once_cell::sync::Lazy;
use reqwest::{
    blocking::{Client as HttpClient, Response as HttpResponse},
    header::{self, HeaderMap, HeaderValue},
    Proxy, Result as ReqwestResult,
};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::retry::{with_rate_limit, RateLimitConfig, Retrier, RetryConfig};

pub use crate::{
    error::{Error, Result},
    resources::{
        dataset::{Id as DatasetId, Name as DatasetName},
        datum::{Datum, Id as DatumId, SignedDownload},
        version::{
            DatasetVersion, Id as VersionId, Name as VersionName, VersionDetails, VersionFile,
            VersionsPage,
        },
    },
};

pub static DEFAULT_ENDPOINT: Lazy<Url> =
    Lazy::new(|| Url::parse("https://app.valohai.com").expect("Default URL is well-formed"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token(pub String);

pub struct Config {
    pub endpoint: Url,
    pub token: Token,
    pub accept_invalid_certificates: bool,
    pub proxy: Option<Url>,
    /// Retry settings for the signed-url byte fetch, if any. The registry
    /// endpoints themselves are covered by `rate_limit_config` instead.
    pub retry_config: Option<RetryConfig>,
    /// Fixed-delay handling of rate-limited registry requests.
    pub rate_limit_config: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.clone(),
            token: Token("".to_owned()),
            accept_invalid_certificates: false,
            proxy: None,
            retry_config: None,
            rate_limit_config: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct Client {
    endpoints: Endpoints,
    http_client: HttpClient,
    headers: HeaderMap,
    retrier: Option<Retrier>,
    rate_limit: RateLimitConfig,
}

impl Client {
    /// Create a new registry client.
    pub fn new(config: Config) -> Result<Client> {
        let http_client = build_http_client(&config)?;
        let headers = build_headers(&config)?;
        let endpoints = Endpoints::new(config.endpoint)?;
        let retrier = config.retry_config.map(Retrier::new);
        Ok(Client {
            endpoints,
            http_client,
            headers,
            retrier,
            rate_limit: config.rate_limit_config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.endpoints.base
    }

    /// Fetch one page of the dataset-versions listing. Without a continuation
    /// this is the first page for `dataset_id`; otherwise the server-supplied
    /// `next` URL is fetched verbatim.
    pub fn get_dataset_versions_page(
        &self,
        dataset_id: &DatasetId,
        continuation: Option<&Url>,
    ) -> Result<VersionsPage> {
        let url = match continuation {
            Some(next) => next.clone(),
            None => {
                let mut url = self.endpoints.dataset_versions.clone();
                url.query_pairs_mut().append_pair("dataset", &dataset_id.0);
                url
            }
        };
        self.get(url)
    }

    /// Iterate over the pages of the dataset-versions listing in server order.
    pub fn dataset_versions<'a>(&'a self, dataset_id: &'a DatasetId) -> DatasetVersionsIter<'a> {
        DatasetVersionsIter::new(self, dataset_id)
    }

    /// Resolve the file manifest of one dataset version.
    pub fn get_version_details(&self, version_id: &VersionId) -> Result<VersionDetails> {
        self.get(self.endpoints.dataset_version(version_id)?)
    }

    /// Resolve the short-lived download URL for a datum.
    pub fn get_datum_download_url(&self, datum_id: &DatumId) -> Result<Url> {
        let response: SignedDownload = self.get(self.endpoints.datum_download(datum_id)?)?;
        Ok(response.url)
    }

    /// Download raw bytes from a previously resolved signed URL. The signed
    /// URL embeds its own credentials, so no auth header is attached.
    pub fn fetch_datum(&self, url: &Url) -> Result<Vec<u8>> {
        debug!("Attempting GET `{}`", url);
        let http_response = self
            .with_retries(|| self.http_client.get(url.clone()).send())
            .map_err(|source| Error::ReqwestError {
                source,
                message: "GET operation failed.".to_owned(),
            })?;

        let status = http_response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status_code: status,
                message: http_response.text().unwrap_or_default(),
            });
        }
        let bytes = http_response
            .bytes()
            .map_err(|source| Error::ReqwestError {
                source,
                message: "Failed to read download body.".to_owned(),
            })?;
        Ok(bytes.to_vec())
    }

    fn get<SuccessT>(&self, url: Url) -> Result<SuccessT>
    where
        for<'de> SuccessT: Deserialize<'de>,
    {
        debug!("Attempting GET `{}`", url);
        let http_response = with_rate_limit(&self.rate_limit, || {
            self.http_client
                .get(url.clone())
                .headers(self.headers.clone())
                .send()
        })
        .map_err(|source| Error::ReqwestError {
            source,
            message: "GET operation failed.".to_owned(),
        })?;

        let status = http_response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status_code: status,
                message: http_response.text().unwrap_or_default(),
            });
        }
        http_response
            .json::<SuccessT>()
            .map_err(Error::BadJsonResponse)
    }

    fn with_retries(
        &self,
        send_request: impl Fn() -> ReqwestResult<HttpResponse>,
    ) -> ReqwestResult<HttpResponse> {
        match &self.retrier {
            Some(retrier) => retrier.with_retries(send_request),
            None => send_request(),
        }
    }
}

/// Iterates over the pages of the dataset-versions listing, following the
/// server-supplied continuation URL until it is exhausted.
pub struct DatasetVersionsIter<'a> {
    client: &'a Client,
    dataset_id: &'a DatasetId,
    continuation: Option<Url>,
    done: bool,
}

impl<'a> DatasetVersionsIter<'a> {
    fn new(client: &'a Client, dataset_id: &'a DatasetId) -> Self {
        Self {
            client,
            dataset_id,
            continuation: None,
            done: false,
        }
    }
}

impl<'a> Iterator for DatasetVersionsIter<'a> {
    type Item = Result<Vec<DatasetVersion>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let response = self
            .client
            .get_dataset_versions_page(self.dataset_id, self.continuation.as_ref());
        Some(response.map(|page| {
            self.continuation = page.next;
            self.done = self.continuation.is_none();
            page.results
        }))
    }
}

#[derive(Debug)]
struct Endpoints {
    base: Url,
    dataset_versions: Url,
}

fn construct_endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut endpoint = base.clone();

    let mut endpoint_segments = endpoint
        .path_segments_mut()
        .map_err(|_| Error::BadEndpoint {
            endpoint: base.clone(),
        })?;

    for segment in segments {
        endpoint_segments.push(segment);
    }

    drop(endpoint_segments);

    Ok(endpoint)
}

impl Endpoints {
    pub fn new(base: Url) -> Result<Self> {
        // The registry redirects requests without the trailing slash, hence
        // the empty final segment.
        let dataset_versions = construct_endpoint(&base, &["api", "v0", "dataset-versions", ""])?;

        Ok(Endpoints {
            base,
            dataset_versions,
        })
    }

    fn dataset_version(&self, version_id: &VersionId) -> Result<Url> {
        construct_endpoint(
            &self.base,
            &["api", "v0", "dataset-versions", &version_id.0, ""],
        )
    }

    fn datum_download(&self, datum_id: &DatumId) -> Result<Url> {
        construct_endpoint(&self.base, &["api", "v0", "data", &datum_id.0, "download", ""])
    }
}

fn build_http_client(config: &Config) -> Result<HttpClient> {
    let mut builder = HttpClient::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certificates)
        .timeout(Duration::from_secs(240));

    if let Some(proxy) = config.proxy.clone() {
        builder = builder.proxy(Proxy::all(proxy).map_err(Error::BuildHttpClient)?);
    }

    builder.build().map_err(Error::BuildHttpClient)
}

fn build_headers(config: &Config) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut auth =
        HeaderValue::from_str(&format!("Token {}", config.token.0)).map_err(|_| Error::BadToken {
            token: config.token.0.clone(),
        })?;
    auth.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, auth);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryStrategy;
    use mockito::{mock, server_url, Matcher};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_client() -> Client {
        Client::new(Config {
            endpoint: server_url().parse().expect("mock server URL is well-formed"),
            token: Token("test-token".to_owned()),
            retry_config: Some(RetryConfig {
                strategy: RetryStrategy::Always,
                max_retry_count: 2,
                base_wait: Duration::from_secs(0),
                backoff_factor: 0.0,
            }),
            rate_limit_config: RateLimitConfig {
                wait: Duration::from_secs(0),
                max_retries: Some(2),
            },
            ..Default::default()
        })
        .expect("client construction should not fail")
    }

    #[test]
    fn test_get_dataset_versions_page_sends_token_and_parses() {
        let client = test_client();
        let page_mock = mock("GET", "/api/v0/dataset-versions/")
            .match_query(Matcher::UrlEncoded("dataset".into(), "ds-123".into()))
            .match_header("authorization", "Token test-token")
            .with_body(
                json!({
                    "results": [
                        {"id": "ver-1", "name": "2024-09-05-09-05"},
                        {"id": "ver-2", "name": "2024-09-06-09-05"}
                    ],
                    "next": null
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let page = client
            .get_dataset_versions_page(&DatasetId("ds-123".to_owned()), None)
            .unwrap();
        assert_eq!(
            page.results,
            vec![
                DatasetVersion {
                    id: VersionId("ver-1".to_owned()),
                    name: VersionName("2024-09-05-09-05".to_owned()),
                },
                DatasetVersion {
                    id: VersionId("ver-2".to_owned()),
                    name: VersionName("2024-09-06-09-05".to_owned()),
                },
            ]
        );
        assert!(page.next.is_none());
        page_mock.assert();
    }

    #[test]
    fn test_dataset_versions_iter_follows_continuation() {
        let client = test_client();
        let first_page = mock("GET", "/api/v0/dataset-versions/")
            .match_query(Matcher::UrlEncoded("dataset".into(), "ds-iter".into()))
            .with_body(
                json!({
                    "results": [{"id": "ver-a", "name": "a"}],
                    "next": format!("{}/api/v0/dataset-versions/iter-page-2/", server_url())
                })
                .to_string(),
            )
            .expect(1)
            .create();
        let second_page = mock("GET", "/api/v0/dataset-versions/iter-page-2/")
            .with_body(
                json!({
                    "results": [{"id": "ver-b", "name": "b"}],
                    "next": null
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let dataset_id = DatasetId("ds-iter".to_owned());
        let versions: Vec<_> = client
            .dataset_versions(&dataset_id)
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .into_iter()
            .flatten()
            .map(|version| version.name.0)
            .collect();
        assert_eq!(versions, vec!["a".to_owned(), "b".to_owned()]);
        first_page.assert();
        second_page.assert();
    }

    #[test]
    fn test_api_error_carries_status_and_body() {
        let client = test_client();
        let not_found = mock("GET", "/api/v0/dataset-versions/ver-missing/")
            .with_status(404)
            .with_body("no such version")
            .expect(1)
            .create();

        let error = client
            .get_version_details(&VersionId("ver-missing".to_owned()))
            .unwrap_err();
        match error {
            Error::Api {
                status_code,
                message,
            } => {
                assert_eq!(status_code.as_u16(), 404);
                assert_eq!(message, "no such version");
            }
            other => panic!("expected API error, got {:?}", other),
        }
        not_found.assert();
    }

    #[test]
    fn test_get_version_details_parses_manifest() {
        let client = test_client();
        let details_mock = mock("GET", "/api/v0/dataset-versions/ver-9/")
            .match_header("authorization", "Token test-token")
            .with_body(
                json!({
                    "files": [
                        {"datum": {"id": "datum-1", "name": "train.csv"}},
                        {"datum": {"id": "datum-2", "name": "eval.csv"}}
                    ]
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let details = client
            .get_version_details(&VersionId("ver-9".to_owned()))
            .unwrap();
        let names: Vec<_> = details
            .files
            .iter()
            .map(|file| file.datum.name.as_str())
            .collect();
        assert_eq!(names, vec!["train.csv", "eval.csv"]);
        details_mock.assert();
    }

    #[test]
    fn test_get_datum_download_url() {
        let client = test_client();
        let resolve_mock = mock("GET", "/api/v0/data/datum-7/download/")
            .with_body(json!({"url": "https://blob.example.com/signed/abc"}).to_string())
            .expect(1)
            .create();

        let url = client
            .get_datum_download_url(&DatumId("datum-7".to_owned()))
            .unwrap();
        assert_eq!(url.as_str(), "https://blob.example.com/signed/abc");
        resolve_mock.assert();
    }

    #[test]
    fn test_fetch_datum_does_not_send_auth_header() {
        let client = test_client();
        let signed_mock = mock("GET", "/signed/no-auth")
            .match_header("authorization", Matcher::Missing)
            .with_body("file contents")
            .expect(1)
            .create();

        let url: Url = format!("{}/signed/no-auth", server_url()).parse().unwrap();
        let bytes = client.fetch_datum(&url).unwrap();
        assert_eq!(bytes, b"file contents");
        signed_mock.assert();
    }

    #[test]
    fn test_fetch_datum_retries_transient_statuses_then_fails() {
        let client = test_client();
        // max_retry_count = 2: initial attempt, two retries.
        let unavailable = mock("GET", "/signed/unavailable")
            .with_status(503)
            .expect(3)
            .create();

        let url: Url = format!("{}/signed/unavailable", server_url())
            .parse()
            .unwrap();
        let error = client.fetch_datum(&url).unwrap_err();
        match error {
            Error::Api { status_code, .. } => assert_eq!(status_code.as_u16(), 503),
            other => panic!("expected API error, got {:?}", other),
        }
        unavailable.assert();
    }

    #[test]
    fn test_rate_limited_request_retries_and_surfaces_last_status() {
        let client = test_client();
        // Capped at two retries in the test client, so three identical requests.
        let limited = mock("GET", "/api/v0/dataset-versions/ver-limited/")
            .with_status(429)
            .expect(3)
            .create();

        let error = client
            .get_version_details(&VersionId("ver-limited".to_owned()))
            .unwrap_err();
        match error {
            Error::Api { status_code, .. } => assert_eq!(status_code.as_u16(), 429),
            other => panic!("expected API error, got {:?}", other),
        }
        limited.assert();
    }
}
