pub mod remote;

use async_trait::async_trait;

use crate::model::{DiscoveryRecord, Source};

/// Something that can produce the current discovery records for a source.
#[async_trait]
pub trait DiscoveryEngine: std::fmt::Debug + Send + Sync {
    type Error: Send + Sync + std::fmt::Debug + std::error::Error + 'static;

    async fn fetch(&self, source: &Source) -> Result<Vec<DiscoveryRecord>, Self::Error>;
}
