// # Artifact Store Trait
//
// Defines the interface for publishing the selection result.
//
// ## Implementations
//
// - GitHub Gist: `multinet-source-gist` crate (`GistClient`)

use async_trait::async_trait;

use crate::publish::PublishableArtifact;

/// Trait for result publication backends
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create or update the published artifact
    ///
    /// With `existing_id == None` a new artifact is created. The returned ID
    /// identifies the artifact in both cases; a newly created ID must be
    /// persisted by the caller so later runs update instead of re-create.
    async fn create_or_update(
        &self,
        existing_id: Option<&str>,
        artifact: &PublishableArtifact,
    ) -> Result<String, crate::Error>;
}
