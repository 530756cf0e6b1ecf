//! Google Drive source: recently-modified Google Docs, and their bodies.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use docharvest_shared::{ChangeRecord, GdocsConfig, HarvestError, Result, SourceKind, read_secret};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::{ChangeSource, check_status, window_cutoff};

const DOC_MIME_TYPE: &str = "application/vnd.google-apps.document";

/// Drive caps one `files.list` page at this many files.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    modified_time: Option<String>,
    web_view_link: Option<String>,
}

/// Client for Drive `files.list` and Docs `documents.get`.
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    drive_api_url: String,
    docs_api_url: String,
    folder_id: Option<String>,
    query: Option<String>,
    access_token: String,
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("drive_api_url", &self.drive_api_url)
            .field("docs_api_url", &self.docs_api_url)
            .field("folder_id", &self.folder_id)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn new(
        client: Client,
        drive_api_url: &str,
        docs_api_url: &str,
        folder_id: Option<String>,
        query: Option<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            drive_api_url: drive_api_url.trim_end_matches('/').to_string(),
            docs_api_url: docs_api_url.trim_end_matches('/').to_string(),
            folder_id: folder_id.filter(|f| !f.trim().is_empty()),
            query: query.filter(|q| !q.trim().is_empty()),
            access_token: access_token.into(),
        }
    }

    /// Build from the `[gdocs]` config section, reading the bearer token
    /// from the environment variable it names.
    pub fn from_config(client: Client, config: &GdocsConfig) -> Result<Self> {
        let token = read_secret(&config.access_token_env)?;
        Ok(Self::new(
            client,
            &config.drive_api_url,
            &config.docs_api_url,
            config.folder_id.clone(),
            config.query.clone(),
            token,
        ))
    }

    /// Drive search expression for Docs modified after `since`.
    pub fn files_query(&self, since: DateTime<Utc>) -> String {
        let mut q = format!(
            "mimeType='{DOC_MIME_TYPE}' and trashed=false and modifiedTime > '{}'",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        if let Some(folder) = &self.folder_id {
            q.push_str(&format!(" and '{}' in parents", folder.replace('\'', "\\'")));
        }
        if let Some(extra) = &self.query {
            q.push_str(&format!(" and ({extra})"));
        }
        q
    }

    /// List Docs modified after `since`, newest first, following page tokens.
    #[instrument(skip(self))]
    pub async fn list_changed(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ChangeRecord>> {
        let url = format!("{}/drive/v3/files", self.drive_api_url);
        let q = self.files_query(since);
        let page_size = limit.min(MAX_PAGE_SIZE).to_string();
        let mut page_token: Option<String> = None;
        let mut records = Vec::new();

        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("orderBy", "modifiedTime desc"),
                ("fields", "nextPageToken, files(id, name, modifiedTime, webViewLink)"),
                ("pageSize", page_size.as_str()),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let response = self
                .client
                .get(&url)
                .query(&params)
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;
            let response = check_status(response, &url).await?;
            let page: FileList = response
                .json()
                .await
                .map_err(|e| HarvestError::parse(format!("{url}: bad files.list response: {e}")))?;

            debug!(files = page.files.len(), "files page received");
            for file in page.files {
                if records.len() >= limit {
                    break;
                }
                if let Some(record) = to_change_record(file) {
                    records.push(record);
                }
            }

            match page.next_page_token {
                Some(token) if records.len() < limit => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    /// Raw `documents.get` JSON for one document.
    #[instrument(skip(self))]
    pub async fn fetch_document(&self, document_id: &str) -> Result<String> {
        let url = format!("{}/v1/documents/{document_id}", self.docs_api_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;
        let response = check_status(response, &url).await?;
        response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: failed to read body: {e}")))
    }
}

fn to_change_record(file: DriveFile) -> Option<ChangeRecord> {
    let last_modified = match file.modified_time.as_deref().map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        _ => {
            warn!(id = %file.id, "Drive file without usable modifiedTime, skipping");
            return None;
        }
    };
    let url = file
        .web_view_link
        .unwrap_or_else(|| format!("https://docs.google.com/document/d/{}/edit", file.id));
    Some(ChangeRecord {
        id: file.id,
        title: file.name,
        url,
        last_modified,
        source: SourceKind::Gdocs,
    })
}

#[async_trait]
impl ChangeSource for DriveClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Gdocs
    }

    async fn query(&self, window_days: u32, limit: usize) -> Result<Vec<ChangeRecord>> {
        let since = window_cutoff(Utc::now(), window_days)?;
        self.list_changed(since, limit).await
    }
}
