//! Persisted deployment records
//!
//! One JSON file per deployment under the layout's deployments directory,
//! fronted by an in-memory map.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::ids::validate_slug;
use crate::models::deployment::Deployment;

/// Deployment record registry
pub struct DeploymentRecords {
    dir: Dir,
    records: RwLock<HashMap<String, Deployment>>,
}

impl DeploymentRecords {
    /// Create a registry persisting into `dir`
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Record file of an id; ids that are not DNS labels never touch the disk
    fn record_file(&self, id: &str) -> Result<File, PipelineError> {
        validate_slug(id)?;
        Ok(self.dir.file(&format!("{}.json", id)))
    }

    /// Create a queued record, or re-queue an existing one on redeploy
    pub async fn upsert_queued(
        &self,
        id: &str,
        source_repo_url: &str,
    ) -> Result<Deployment, PipelineError> {
        let mut records = self.records.write().await;

        let existing = match records.get(id) {
            Some(record) => Some(record.clone()),
            None => self.load(id).await?,
        };

        let record = match existing {
            Some(mut record) => {
                record.source_repo_url = source_repo_url.to_string();
                record
                    .apply(DeploymentEvent::Redeploy)
                    .map_err(PipelineError::Internal)?;
                record
            }
            None => Deployment::queued(id, source_repo_url),
        };

        self.record_file(id)?.write_json(&record).await?;
        records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Get a record by id
    pub async fn get(&self, id: &str) -> Result<Option<Deployment>, PipelineError> {
        validate_slug(id)?;
        if let Some(record) = self.records.read().await.get(id) {
            return Ok(Some(record.clone()));
        }

        let loaded = self.load(id).await?;
        if let Some(record) = &loaded {
            self.records
                .write()
                .await
                .insert(id.to_string(), record.clone());
        }
        Ok(loaded)
    }

    /// Apply a status event to a record and persist it.
    ///
    /// Unknown ids are ignored: builds dispatched by another instance have
    /// no local record.
    pub async fn apply(
        &self,
        id: &str,
        event: DeploymentEvent,
    ) -> Result<Option<Deployment>, PipelineError> {
        validate_slug(id)?;
        let mut records = self.records.write().await;

        let mut record = match records.get(id) {
            Some(record) => record.clone(),
            None => match self.load(id).await? {
                Some(record) => record,
                None => {
                    debug!("No deployment record for {}, ignoring {:?}", id, event);
                    return Ok(None);
                }
            },
        };

        match record.apply(event) {
            Ok(true) => {
                self.record_file(id)?.write_json(&record).await?;
                debug!("Deployment {} is now {}", id, record.status);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Ignoring status event for {}: {}", id, e);
            }
        }

        records.insert(id.to_string(), record.clone());
        Ok(Some(record))
    }

    /// Restore the state a record had before `upsert_queued`.
    ///
    /// `None` removes the record entirely.
    pub async fn rollback(
        &self,
        id: &str,
        previous: Option<Deployment>,
    ) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        match previous {
            Some(record) => {
                self.record_file(id)?.write_json(&record).await?;
                records.insert(id.to_string(), record);
            }
            None => {
                self.record_file(id)?.delete().await?;
                records.remove(id);
            }
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Deployment>, PipelineError> {
        let file = self.record_file(id)?;
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }
}
