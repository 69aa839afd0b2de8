//! Artifact storage on top of `object_store`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::storage::settings::{BlobBackend, BlobStoreSettings};

/// Key-addressed artifact writes
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write one artifact of a deployment under `<deploymentId>/<relativePath>`
    async fn put_artifact(
        &self,
        deployment_id: &str,
        relative_path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, PipelineError>;
}

/// Build the object key for an artifact, relative to the store namespace
pub fn artifact_key(deployment_id: &str, relative_path: &str) -> String {
    format!("{}/{}", deployment_id, relative_path.trim_start_matches('/'))
}

/// Infer a content type from a file extension
pub fn content_type_for(relative_path: &str) -> String {
    mime_guess::from_path(relative_path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Blob store backed by any `object_store` implementation
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectBlobStore {
    /// Wrap an object store, namespacing every key under `prefix`
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Create the store described by the settings
    pub fn from_settings(settings: &BlobStoreSettings) -> Result<Self, PipelineError> {
        let store: Arc<dyn ObjectStore> = match settings.backend {
            BlobBackend::S3 => {
                use object_store::aws::AmazonS3Builder;

                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&settings.bucket)
                    .with_region(&settings.region);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let (Some(key_id), Some(secret)) =
                    (&settings.access_key_id, &settings.secret_access_key)
                {
                    builder = builder
                        .with_access_key_id(key_id)
                        .with_secret_access_key(secret.expose_secret());
                }
                Arc::new(builder.build()?)
            }
            BlobBackend::Local => {
                std::fs::create_dir_all(&settings.local_path)?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(
                    &settings.local_path,
                )?)
            }
            BlobBackend::Memory => Arc::new(object_store::memory::InMemory::new()),
        };

        info!(
            "Blob store ready: backend={:?} bucket={} prefix={}",
            settings.backend, settings.bucket, settings.prefix
        );

        Ok(Self::new(store, &settings.prefix))
    }

    /// Full object path including the namespace prefix
    pub fn object_path(&self, key: &str) -> Result<ObjectPath, PipelineError> {
        let full = if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        };
        ObjectPath::parse(&full)
            .map_err(|e| PipelineError::ValidationError(format!("invalid object key '{}': {}", full, e)))
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn put_artifact(
        &self,
        deployment_id: &str,
        relative_path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let key = artifact_key(deployment_id, relative_path);
        let path = self.object_path(&key)?;
        let size = bytes.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(bytes), options)
            .await
            .map_err(|e| PipelineError::UploadError {
                key: key.clone(),
                message: e.to_string(),
            })?;

        debug!("Stored {} ({} bytes, {})", path, size, content_type);
        Ok(key)
    }
}
