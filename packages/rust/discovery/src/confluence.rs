//! Confluence Cloud REST client: content search and export-view bodies.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docharvest_shared::{
    ChangeRecord, ConfluenceConfig, HarvestError, Result, SourceKind, read_secret,
};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{ChangeSource, check_status};

/// Confluence caps one search page at this many results.
const MAX_PAGE_SIZE: usize = 250;

/// Basic-auth credentials for Atlassian Cloud.
#[derive(Clone)]
pub struct ConfluenceCredentials {
    pub user_email: String,
    pub api_token: String,
}

impl std::fmt::Debug for ConfluenceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfluenceCredentials")
            .field("user_email", &self.user_email)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Rendered body of one page.
#[derive(Debug, Clone)]
pub struct ExportView {
    pub title: String,
    pub html: String,
}

/// Client for one Confluence site and space.
#[derive(Debug, Clone)]
pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    space: String,
    content_types: Vec<String>,
    credentials: ConfluenceCredentials,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    version: Option<Version>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct Version {
    when: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    webui: Option<String>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    title: String,
    body: Option<ContentBody>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    export_view: Option<ExportViewBody>,
}

#[derive(Debug, Deserialize)]
struct ExportViewBody {
    #[serde(default)]
    value: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl ConfluenceClient {
    pub fn new(
        client: Client,
        base_url: &str,
        space: impl Into<String>,
        content_types: Vec<String>,
        credentials: ConfluenceCredentials,
    ) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| HarvestError::config(format!("invalid Confluence base_url {base_url}: {e}")))?;
        let space = space.into();
        if space.trim().is_empty() {
            return Err(HarvestError::config("Confluence space is not set"));
        }
        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            space,
            content_types,
            credentials,
        })
    }

    /// Build from the `[confluence]` config section, reading credentials
    /// from the environment variables it names.
    pub fn from_config(client: Client, config: &ConfluenceConfig) -> Result<Self> {
        let credentials = ConfluenceCredentials {
            user_email: read_secret(&config.user_email_env)?,
            api_token: read_secret(&config.api_token_env)?,
        };
        Self::new(
            client,
            &config.base_url,
            config.space.clone(),
            config.content_types.clone(),
            credentials,
        )
    }

    fn wiki_url(&self, path: &str) -> String {
        format!("{}/wiki{path}", self.base_url)
    }

    /// CQL for items of the configured types in the space, modified in the
    /// last `window_days` days, newest first.
    pub fn cql(&self, window_days: u32) -> String {
        let types = if self.content_types.is_empty() {
            "page,blogpost".to_string()
        } else {
            self.content_types.join(",")
        };
        format!(
            "type in ({types}) AND space = \"{}\" AND lastmodified > now(\"-{window_days}d\") order by lastmodified desc",
            self.space.replace('"', "\\\"")
        )
    }

    /// Run the content search, following `_links.next` until `limit` results.
    #[instrument(skip(self), fields(space = %self.space))]
    pub async fn search(&self, window_days: u32, limit: usize) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        let first_url = self.wiki_url("/rest/api/content/search");
        let page_size = limit.min(MAX_PAGE_SIZE).to_string();
        let cql = self.cql(window_days);

        let mut request = self.client.get(&first_url).query(&[
            ("cql", cql.as_str()),
            ("limit", page_size.as_str()),
            ("expand", "version"),
        ]);
        let mut current_url = first_url.clone();

        loop {
            let response = request
                .basic_auth(&self.credentials.user_email, Some(&self.credentials.api_token))
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| HarvestError::Network(format!("{current_url}: {e}")))?;
            let response = check_status(response, &current_url).await?;
            let page: SearchResponse = response
                .json()
                .await
                .map_err(|e| HarvestError::parse(format!("{current_url}: bad search response: {e}")))?;

            debug!(results = page.results.len(), "search page received");
            for result in page.results {
                if records.len() >= limit {
                    break;
                }
                if let Some(record) = self.to_change_record(result) {
                    records.push(record);
                }
            }

            match page.links.next {
                Some(next) if records.len() < limit => {
                    current_url = self.wiki_url(&next);
                    request = self.client.get(&current_url);
                }
                _ => break,
            }
        }

        Ok(records)
    }

    fn to_change_record(&self, result: SearchResult) -> Option<ChangeRecord> {
        let when = result.version.and_then(|v| v.when);
        let last_modified = match when.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => ts.with_timezone(&Utc),
            _ => {
                warn!(id = %result.id, ?when, "search result without usable version.when, skipping");
                return None;
            }
        };
        let webui = result.links.webui.map(|webui| self.wiki_url(&webui));

        // Some results carry the page id only inside their web link.
        let id = if result.id.trim().is_empty() {
            match webui.as_deref().and_then(extract_page_id) {
                Some(id) => id,
                None => {
                    warn!(?webui, "search result without a page id, skipping");
                    return None;
                }
            }
        } else {
            result.id
        };

        let url = webui
            .unwrap_or_else(|| self.wiki_url(&format!("/pages/viewpage.action?pageId={id}")));
        Some(ChangeRecord {
            id,
            title: result.title,
            url,
            last_modified,
            source: SourceKind::Confluence,
        })
    }

    /// Fetch the rendered (export view) body of one page.
    #[instrument(skip(self))]
    pub async fn fetch_export_view(&self, page_id: &str) -> Result<ExportView> {
        let url = self.wiki_url(&format!("/rest/api/content/{page_id}"));
        let response = self
            .client
            .get(&url)
            .query(&[("expand", "body.export_view")])
            .basic_auth(&self.credentials.user_email, Some(&self.credentials.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;
        let response = check_status(response, &url).await?;
        let content: ContentResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::parse(format!("{url}: bad content response: {e}")))?;

        let html = content
            .body
            .and_then(|b| b.export_view)
            .map(|v| v.value)
            .ok_or_else(|| HarvestError::parse(format!("{url}: response has no body.export_view")))?;

        Ok(ExportView {
            title: content.title,
            html,
        })
    }
}

#[async_trait]
impl ChangeSource for ConfluenceClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Confluence
    }

    async fn query(&self, window_days: u32, limit: usize) -> Result<Vec<ChangeRecord>> {
        self.search(window_days, limit).await
    }
}

/// Page id from a Confluence URL, in either the
/// `/wiki/spaces/SPACE/pages/<id>/Title` or the
/// `/wiki/pages/viewpage.action?pageId=<id>` form.
pub fn extract_page_id(url: &str) -> Option<String> {
    static PAGES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"/pages/(\d+)").expect("valid regex"));

    let parsed = Url::parse(url).ok()?;
    if let Some(caps) = PAGES_RE.captures(parsed.path()) {
        return Some(caps[1].to_string());
    }
    if parsed.path().ends_with("viewpage.action") {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "pageId")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_client, detect_changes};
    use std::time::Duration;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ConfluenceClient {
        ConfluenceClient::new(
            build_client(Duration::from_secs(5)).unwrap(),
            &server.uri(),
            "OES",
            vec!["page".into(), "blogpost".into()],
            ConfluenceCredentials {
                user_email: "me@example.com".into(),
                api_token: "secret".into(),
            },
        )
        .unwrap()
    }

    fn result(id: &str, when: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "type": "page",
            "title": format!("Page {id}"),
            "version": { "when": when },
            "_links": { "webui": format!("/spaces/OES/pages/{id}/Page+{id}") }
        })
    }

    fn recent(hours_ago: i64) -> String {
        (Utc::now() - chrono::TimeDelta::hours(hours_ago)).to_rfc3339()
    }

    #[test]
    fn cql_matches_space_window_and_order() {
        let client = ConfluenceClient::new(
            Client::new(),
            "https://example.atlassian.net/",
            "OES",
            vec!["page".into(), "blogpost".into()],
            ConfluenceCredentials {
                user_email: "u".into(),
                api_token: "t".into(),
            },
        )
        .unwrap();
        assert_eq!(
            client.cql(10),
            r#"type in (page,blogpost) AND space = "OES" AND lastmodified > now("-10d") order by lastmodified desc"#
        );
        assert_eq!(
            client.wiki_url("/x"),
            "https://example.atlassian.net/wiki/x"
        );
    }

    #[test]
    fn blank_space_is_config_error() {
        let err = ConfluenceClient::new(
            Client::new(),
            "https://example.atlassian.net",
            " ",
            vec![],
            ConfluenceCredentials {
                user_email: "u".into(),
                api_token: "t".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, HarvestError::Config { .. }));
    }

    #[test]
    fn extract_page_id_forms() {
        assert_eq!(
            extract_page_id("https://x.atlassian.net/wiki/spaces/OES/pages/12345/Install+Guide"),
            Some("12345".into())
        );
        assert_eq!(
            extract_page_id("https://x.atlassian.net/wiki/pages/viewpage.action?pageId=678"),
            Some("678".into())
        );
        assert_eq!(extract_page_id("https://x.atlassian.net/wiki/spaces/OES"), None);
        assert_eq!(extract_page_id("not a url"), None);
    }

    #[tokio::test]
    async fn search_follows_next_links() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .and(query_param("expand", "version"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [result("1", &recent(1)), result("2", &recent(2))],
                "_links": { "next": "/rest/api/content/search/next-page" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search/next-page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [result("3", &recent(3))],
                "_links": {}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let records = client.search(10, 500).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "1");
        assert_eq!(
            records[0].url,
            format!("{}/wiki/spaces/OES/pages/1/Page+1", server.uri())
        );
        assert_eq!(records[2].title, "Page 3");
    }

    #[tokio::test]
    async fn search_stops_at_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [result("1", &recent(1)), result("2", &recent(2)), result("3", &recent(3))],
                "_links": { "next": "/rest/api/content/search/never" }
            })))
            .mount(&server)
            .await;

        let records = client_for(&server).search(10, 2).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn results_without_timestamp_are_skipped() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    result("1", &recent(1)),
                    { "id": "2", "title": "No version" }
                ]
            })))
            .mount(&server)
            .await;

        let records = client_for(&server).search(10, 10).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn missing_id_is_taken_from_web_link() {
        let server = MockServer::start().await;
        let when = recent(1);

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {
                        "title": "Linked only",
                        "version": { "when": when },
                        "_links": { "webui": "/spaces/OES/pages/4242/Linked+only" }
                    },
                    {
                        "title": "Legacy link",
                        "version": { "when": when },
                        "_links": { "webui": "/pages/viewpage.action?pageId=77" }
                    },
                    {
                        "title": "No id anywhere",
                        "version": { "when": when },
                        "_links": { "webui": "/spaces/OES/overview" }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let records = client_for(&server).search(10, 10).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["4242", "77"]);
        assert_eq!(
            records[0].url,
            format!("{}/wiki/spaces/OES/pages/4242/Linked+only", server.uri())
        );
    }

    #[tokio::test]
    async fn auth_failure_is_source_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = detect_changes(&client, 10, 10).await.unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn fetch_export_view_returns_html() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/42"))
            .and(query_param("expand", "body.export_view"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "42",
                "title": "SDK Guide",
                "body": { "export_view": { "value": "<h1>Hi</h1>" } }
            })))
            .mount(&server)
            .await;

        let view = client_for(&server).fetch_export_view("42").await.unwrap();
        assert_eq!(view.title, "SDK Guide");
        assert_eq!(view.html, "<h1>Hi</h1>");
    }

    #[tokio::test]
    async fn fetch_export_view_without_body_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/43"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "title": "x" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_export_view("43").await.unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
    }

    #[tokio::test]
    async fn fetch_export_view_http_error_is_network() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/44"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_export_view("44").await.unwrap_err();
        assert!(matches!(err, HarvestError::Network(_)));
    }
}
