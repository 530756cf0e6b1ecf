//! Builds the change source and item processor for a configured source kind.

use std::sync::Arc;

use docharvest_crawler::{ConfluenceProcessor, DocumentWriter, GdocsProcessor, ItemProcessor};
use docharvest_discovery::{ChangeSource, ConfluenceClient, DriveClient, build_client};
use docharvest_shared::{AppConfig, Result, RunConfig, SourceKind};
use docharvest_storage::BlobStore;

/// The two collaborators a run needs, sharing one HTTP client.
#[derive(Clone)]
pub struct Backend {
    pub source: Arc<dyn ChangeSource>,
    pub processor: Arc<dyn ItemProcessor>,
}

impl Backend {
    pub fn new(source: Arc<dyn ChangeSource>, processor: Arc<dyn ItemProcessor>) -> Self {
        Self { source, processor }
    }
}

/// Build the backend for `kind`, reading credentials from the environment.
pub fn build_backend(
    kind: SourceKind,
    app: &AppConfig,
    run: &RunConfig,
    store: Arc<dyn BlobStore>,
) -> Result<Backend> {
    let client = build_client(run.item_timeout)?;
    let writer = DocumentWriter::new(store);

    match kind {
        SourceKind::Confluence => {
            let confluence = ConfluenceClient::from_config(client, &app.confluence)?;
            let processor = ConfluenceProcessor::new(confluence.clone(), writer, run.emit_markdown);
            Ok(Backend::new(Arc::new(confluence), Arc::new(processor)))
        }
        SourceKind::Gdocs => {
            let drive = DriveClient::from_config(client, &app.gdocs)?;
            let processor = GdocsProcessor::new(drive.clone(), writer);
            Ok(Backend::new(Arc::new(drive), Arc::new(processor)))
        }
    }
}
