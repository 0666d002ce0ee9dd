//! Resolve → decode → convert, off the control context.

use std::sync::Arc;

use tokio::runtime::Handle;

use super::decode::{DecodedTrack, MixTrack, TrackDecoder};
use super::source::{MusicSource, SourceResolver};
use crate::error::ResolutionError;

pub(crate) struct TrackLoader {
    resolver: SourceResolver,
    decoder: Arc<dyn TrackDecoder>,
    runtime: Handle,
}

impl TrackLoader {
    pub fn new(resolver: SourceResolver, decoder: Arc<dyn TrackDecoder>, runtime: Handle) -> Self {
        Self {
            resolver,
            decoder,
            runtime,
        }
    }

    /// Produces a mix-format track for `source`. Decoding and conversion run
    /// on a blocking worker.
    pub async fn load(
        &self,
        source: &MusicSource,
        mix_rate: u32,
    ) -> Result<MixTrack, ResolutionError> {
        let path = self.resolver.resolve(source).await?;
        let decoder = Arc::clone(&self.decoder);
        let worker_path = path.clone();

        let joined = self
            .runtime
            .spawn_blocking(move || -> Result<MixTrack, ResolutionError> {
                let decoded = decoder.decode(&worker_path)?;
                Ok(MixTrack::from_decoded(Arc::new(decoded), mix_rate)?)
            })
            .await;

        match joined {
            Ok(result) => result,
            Err(e) => Err(ResolutionError::Decode {
                path,
                reason: format!("decode worker failed: {e}"),
            }),
        }
    }

    /// Re-converts an already decoded track for a new mix rate.
    pub async fn reconvert(
        &self,
        source: Arc<DecodedTrack>,
        mix_rate: u32,
    ) -> Result<MixTrack, ResolutionError> {
        self.runtime
            .spawn_blocking(move || MixTrack::from_decoded(source, mix_rate))
            .await
            .map_err(|e| ResolutionError::Decode {
                path: Default::default(),
                reason: format!("conversion worker failed: {e}"),
            })?
            .map_err(ResolutionError::from)
    }
}
