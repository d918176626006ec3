//! Deduplicating sector fetch pipeline
//!
//! Per wanted sector the repository fetches raw bytes, parses them, merges
//! peripheral files and transforms the result into a renderer-consumable
//! group. Results are cached as shared futures keyed by
//! `(model_base_url, sector_id, level_of_detail)`: a placeholder is
//! force-inserted before the fetch resolves, so concurrent requests for the
//! same key observe a hit instead of racing duplicate fetches.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, try_join, try_join_all};
use tokio::sync::{Semaphore, watch};

use crate::cache::MemoryRequestCache;
use crate::counter::LoadingCounter;
use crate::error::{HttpError, LoadError};
use crate::network::{BinaryFileProvider, retried};
use crate::sector::geometry::PeripheralInput;
use crate::sector::parser::SectorParser;
use crate::sector::transform::{ParsedSector, SectorTransformer};
use crate::sector::{ConsumedSector, LevelOfDetail, WantedSector};

/// Shared future resolving to one sector's load result
pub type SectorLoadFuture = Shared<BoxFuture<'static, Result<ConsumedSector, LoadError>>>;

type PeripheralFuture = Shared<BoxFuture<'static, Result<Arc<Vec<u8>>, LoadError>>>;

/// Tuning knobs for the fetch pipeline
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    /// Concurrent sector pipelines allowed to touch the network
    pub concurrent_network_operations: usize,
    /// Concurrent peripheral-file fetches, bounded separately
    pub concurrent_peripheral_requests: usize,
    pub sector_cache_capacity: usize,
    pub peripheral_cache_capacity: usize,
    /// Fixed attempt count for index and peripheral fetches
    pub fetch_attempts: usize,
    /// Per-fetch timeout; off by default, so a stalled connection holds
    /// its concurrency slot until the transport gives up
    pub fetch_timeout: Option<Duration>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            concurrent_network_operations: 50,
            concurrent_peripheral_requests: 10,
            sector_cache_capacity: 50,
            peripheral_cache_capacity: 300,
            fetch_attempts: 3,
            fetch_timeout: None,
        }
    }
}

/// Caching repository of consumed sectors
///
/// Cheap to clone; clones share the caches, permits and loading counter.
#[derive(Clone)]
pub struct CachedSectorRepository {
    provider: Arc<dyn BinaryFileProvider>,
    parser: Arc<dyn SectorParser>,
    transformer: Arc<dyn SectorTransformer>,
    sector_cache: Arc<Mutex<MemoryRequestCache<String, SectorLoadFuture>>>,
    peripheral_cache: Arc<Mutex<MemoryRequestCache<String, PeripheralFuture>>>,
    network_permits: Arc<Semaphore>,
    peripheral_permits: Arc<Semaphore>,
    loading: LoadingCounter,
    fetch_attempts: usize,
    fetch_timeout: Option<Duration>,
}

impl CachedSectorRepository {
    pub fn new(
        provider: Arc<dyn BinaryFileProvider>,
        parser: Arc<dyn SectorParser>,
        transformer: Arc<dyn SectorTransformer>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            provider,
            parser,
            transformer,
            sector_cache: Arc::new(Mutex::new(MemoryRequestCache::new(
                config.sector_cache_capacity,
            ))),
            peripheral_cache: Arc::new(Mutex::new(MemoryRequestCache::new(
                config.peripheral_cache_capacity,
            ))),
            network_permits: Arc::new(Semaphore::new(config.concurrent_network_operations)),
            peripheral_permits: Arc::new(Semaphore::new(config.concurrent_peripheral_requests)),
            loading: LoadingCounter::new(),
            fetch_attempts: config.fetch_attempts,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Load one Simple or Detailed sector, deduplicated by cache key
    ///
    /// On a hit the cached future is returned directly without re-fetching
    /// or re-parsing. On a miss the pipeline future is force-inserted
    /// before it runs, then driven by a spawned task so an issued fetch
    /// completes and populates the cache even if the requesting pass is
    /// dropped. Failures purge the key so a later pass can retry.
    ///
    /// Discarded sectors bypass this pipeline entirely.
    pub fn load_sector(&self, wanted: &WantedSector) -> SectorLoadFuture {
        assert!(
            wanted.level_of_detail != LevelOfDetail::Discarded,
            "discarded sectors are not loadable"
        );

        let key = wanted.cache_key();
        // has/get under one lock so the entry cannot vanish in between
        let mut cache = self.sector_cache.lock().unwrap();
        if cache.has(&key) {
            if let Ok(hit) = cache.get(&key) {
                return hit;
            }
        }

        let inner: BoxFuture<'static, Result<ConsumedSector, LoadError>> =
            match wanted.level_of_detail {
                LevelOfDetail::Simple => self.clone().load_simple(wanted.clone()).boxed(),
                LevelOfDetail::Detailed => self.clone().load_detailed(wanted.clone()).boxed(),
                LevelOfDetail::Discarded => unreachable!(),
            };

        self.loading.increment();
        let loading = self.loading.clone();
        let sector_cache = Arc::clone(&self.sector_cache);
        let purge_key = key.clone();
        let pipeline = async move {
            let result = inner.await;
            if let Err(err) = &result {
                log::error!("sector load failed for {purge_key}: {err}");
                sector_cache.lock().unwrap().remove(&purge_key);
            }
            loading.decrement();
            result
        }
        .boxed()
        .shared();

        cache.force_insert(key, pipeline.clone());
        drop(cache);

        tokio::spawn(pipeline.clone());
        pipeline
    }

    /// Subscribe to the boolean "is loading" signal (in-flight count > 0)
    pub fn loading_state(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Number of loads currently in flight
    pub fn loading_count(&self) -> usize {
        self.loading.count()
    }

    /// Force the loading counter back to zero (stream completion/disposal)
    pub fn reset_loading(&self) {
        self.loading.reset();
    }

    /// Drop all cached sectors and peripheral files
    pub fn clear(&self) {
        self.sector_cache.lock().unwrap().clear();
        self.peripheral_cache.lock().unwrap().clear();
    }

    /// Whether a result (or in-flight load) exists for this cache key
    pub fn has_sector(&self, cache_key: &str) -> bool {
        self.sector_cache.lock().unwrap().has(&cache_key.to_string())
    }

    async fn load_simple(self, wanted: WantedSector) -> Result<ConsumedSector, LoadError> {
        let _permit = self
            .network_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Disposed)?;

        let file_name = wanted
            .metadata
            .faces_file
            .file_name
            .clone()
            .ok_or(LoadError::NoSimpleRepresentation(wanted.metadata.id))?;

        // The simple path is not retried; the next pass re-requests it
        let bytes = fetch_binary(
            Arc::clone(&self.provider),
            wanted.model_base_url.clone(),
            file_name,
            self.fetch_timeout,
        )
        .await?;

        let quads = self.parser.parse_simple(&bytes)?;
        let mut group = self
            .transformer
            .transform(&wanted, ParsedSector::Simple(quads));
        group.name = format!("Quads {}", wanted.metadata.id);

        Ok(ConsumedSector {
            model_base_url: wanted.model_base_url,
            model_transform: wanted.model_transform,
            metadata: wanted.metadata,
            level_of_detail: LevelOfDetail::Simple,
            group: Some(Arc::new(group)),
        })
    }

    async fn load_detailed(self, wanted: WantedSector) -> Result<ConsumedSector, LoadError> {
        let _permit = self
            .network_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Disposed)?;

        let index_name = wanted.metadata.index_file.file_name.clone();
        let index_fut = retried(self.fetch_attempts, &index_name, || {
            fetch_binary(
                Arc::clone(&self.provider),
                wanted.model_base_url.clone(),
                index_name.clone(),
                self.fetch_timeout,
            )
        });

        let peripheral_names = wanted.metadata.index_file.peripheral_files.clone();
        let peripheral_futs: Vec<PeripheralFuture> = peripheral_names
            .iter()
            .map(|name| self.peripheral_file(&wanted.model_base_url, name))
            .collect();

        let (index_bytes, peripheral_data) =
            try_join(index_fut, try_join_all(peripheral_futs)).await?;

        let merged = PeripheralInput::merge(
            peripheral_names.into_iter().zip(peripheral_data).collect(),
        )?;
        let geometry = self.parser.parse_detailed(&index_bytes, &merged)?;
        let mut group = self
            .transformer
            .transform(&wanted, ParsedSector::Detailed(geometry));
        group.name = format!("Sector {}", wanted.metadata.id);

        Ok(ConsumedSector {
            model_base_url: wanted.model_base_url,
            model_transform: wanted.model_transform,
            metadata: wanted.metadata,
            level_of_detail: LevelOfDetail::Detailed,
            group: Some(Arc::new(group)),
        })
    }

    /// Fetch one peripheral compressed-mesh file, deduplicated by
    /// `(model_base_url, file_name)` and retried independently
    fn peripheral_file(&self, base_url: &str, file_name: &str) -> PeripheralFuture {
        let key = format!("{base_url}.{file_name}");
        let mut cache = self.peripheral_cache.lock().unwrap();
        if cache.has(&key) {
            if let Ok(hit) = cache.get(&key) {
                return hit;
            }
        }

        let repo = self.clone();
        let base_url = base_url.to_string();
        let file_name = file_name.to_string();
        let purge_key = key.clone();
        let fut = async move {
            let fetched: Result<Arc<Vec<u8>>, LoadError> = async {
                let _permit = repo
                    .peripheral_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| LoadError::Disposed)?;
                let bytes = retried(repo.fetch_attempts, &file_name, || {
                    fetch_binary(
                        Arc::clone(&repo.provider),
                        base_url.clone(),
                        file_name.clone(),
                        repo.fetch_timeout,
                    )
                })
                .await?;
                Ok(Arc::new(bytes))
            }
            .await;

            if let Err(err) = &fetched {
                log::error!("peripheral file load failed for {purge_key}: {err}");
                repo.peripheral_cache.lock().unwrap().remove(&purge_key);
            }
            fetched
        }
        .boxed()
        .shared();

        cache.force_insert(key, fut.clone());
        fut
    }
}

async fn fetch_binary(
    provider: Arc<dyn BinaryFileProvider>,
    base_url: String,
    file_name: String,
    fetch_timeout: Option<Duration>,
) -> Result<Vec<u8>, LoadError> {
    let request = provider.get_binary_file(&base_url, &file_name);
    let response: Result<Vec<u8>, HttpError> = match fetch_timeout {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| LoadError::Timeout(limit))?,
        None => request.await,
    };
    Ok(response?)
}
