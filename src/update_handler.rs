//! Load orchestration
//!
//! `CadModelUpdateHandler` turns camera, clip-volume, loading-hint and
//! model-set changes into scheduling passes. Each pass asks the culler for
//! the wanted-set, emits Discarded results directly, routes the rest
//! through the caching repository and merges everything onto one
//! long-lived output channel. The reactive pipeline of the problem is
//! expressed as explicit tasks and channels: one scheduler task owns the
//! culler and per-sector LOD state, short-lived forwarder tasks await the
//! shared load futures.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::culling::{DetermineSectorsInput, SectorCuller};
use crate::error::LoadError;
use crate::metadata::{CadModelMetadata, ModelIdentifier};
use crate::sector::repository::CachedSectorRepository;
use crate::sector::{CameraPose, ClipVolume, ConsumedSector, LevelOfDetail, LoadingHints, WantedSector};

/// A failure on one sector's pipeline, surfaced without halting siblings
#[derive(Debug, Clone)]
pub struct SectorLoadFailure {
    pub model_base_url: String,
    pub sector_id: u64,
    pub level_of_detail: LevelOfDetail,
    pub error: LoadError,
}

enum UpdateEvent {
    Camera(CameraPose),
    ClipVolume(Option<Arc<ClipVolume>>),
    Hints(LoadingHints),
    AddModel(Arc<CadModelMetadata>),
    RemoveModel(ModelIdentifier),
    /// Internal: a forwarded load failed; forget its LOD state so the
    /// next pass can re-request it from scratch
    LoadFailed((String, u64)),
}

/// Top-level coordinator between culler, repository and renderer
pub struct CadModelUpdateHandler {
    event_tx: mpsc::UnboundedSender<UpdateEvent>,
    consumed_rx: Option<mpsc::UnboundedReceiver<ConsumedSector>>,
    failure_rx: Option<mpsc::UnboundedReceiver<SectorLoadFailure>>,
    repository: CachedSectorRepository,
    scheduler: Option<JoinHandle<()>>,
}

impl CadModelUpdateHandler {
    pub fn new(repository: CachedSectorRepository, culler: Box<dyn SectorCuller>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (consumed_tx, consumed_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler {
            culler,
            repository: repository.clone(),
            consumed_tx,
            failure_tx,
            event_tx: event_tx.clone(),
            camera: None,
            clip_volume: None,
            hints: LoadingHints::default(),
            models: Vec::new(),
            last_lod: HashMap::new(),
            forwarders: JoinSet::new(),
        };
        let handle = tokio::spawn(scheduler.run(event_rx));

        Self {
            event_tx,
            consumed_rx: Some(consumed_rx),
            failure_rx: Some(failure_rx),
            repository,
            scheduler: Some(handle),
        }
    }

    /// Take the long-lived stream of consumed sectors
    ///
    /// The stream never terminates during normal operation; it completes
    /// only when the handler is disposed. Results surface in completion
    /// order; consumers key their sector-to-geometry mapping by sector id
    /// and apply the most recently delivered result.
    pub fn consumed_sectors(&mut self) -> mpsc::UnboundedReceiver<ConsumedSector> {
        self.consumed_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    /// Take the per-sector failure stream
    pub fn load_failures(&mut self) -> mpsc::UnboundedReceiver<SectorLoadFailure> {
        self.failure_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    /// Observable "is loading" signal (true while any load is in flight)
    pub fn loading_state(&self) -> watch::Receiver<bool> {
        self.repository.loading_state()
    }

    pub fn update_camera(&self, camera: CameraPose) {
        let _ = self.event_tx.send(UpdateEvent::Camera(camera));
    }

    pub fn set_clip_volume(&self, clip_volume: Option<Arc<ClipVolume>>) {
        let _ = self.event_tx.send(UpdateEvent::ClipVolume(clip_volume));
    }

    pub fn set_loading_hints(&self, hints: LoadingHints) {
        let _ = self.event_tx.send(UpdateEvent::Hints(hints));
    }

    pub fn add_model(&self, model: Arc<CadModelMetadata>) {
        let _ = self.event_tx.send(UpdateEvent::AddModel(model));
    }

    pub fn remove_model(&self, identifier: ModelIdentifier) {
        let _ = self.event_tx.send(UpdateEvent::RemoveModel(identifier));
    }

    /// Stop scheduling, abandon in-flight forwarding and close the output
    /// stream; fetches already issued may still complete into the cache
    pub fn dispose(&mut self) {
        if let Some(handle) = self.scheduler.take() {
            handle.abort();
        }
        self.repository.reset_loading();
    }
}

impl Drop for CadModelUpdateHandler {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Scheduler {
    culler: Box<dyn SectorCuller>,
    repository: CachedSectorRepository,
    consumed_tx: mpsc::UnboundedSender<ConsumedSector>,
    failure_tx: mpsc::UnboundedSender<SectorLoadFailure>,
    event_tx: mpsc::UnboundedSender<UpdateEvent>,
    camera: Option<CameraPose>,
    clip_volume: Option<Arc<ClipVolume>>,
    hints: LoadingHints,
    models: Vec<Arc<CadModelMetadata>>,
    /// Last scheduled LOD per sector, Discarded when never shown
    last_lod: HashMap<(String, u64), LevelOfDetail>,
    forwarders: JoinSet<()>,
}

impl Scheduler {
    async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<UpdateEvent>) {
        while let Some(event) = event_rx.recv().await {
            // Reap finished forwarders
            while self.forwarders.try_join_next().is_some() {}
            if self.apply(event) {
                self.run_pass();
            }
        }
    }

    /// Apply one event; returns whether a scheduling pass is due
    fn apply(&mut self, event: UpdateEvent) -> bool {
        match event {
            UpdateEvent::Camera(camera) => {
                self.camera = Some(camera);
                true
            }
            UpdateEvent::ClipVolume(clip_volume) => {
                self.clip_volume = clip_volume;
                true
            }
            UpdateEvent::Hints(hints) => {
                self.hints = hints;
                true
            }
            UpdateEvent::AddModel(model) => {
                self.models.push(model);
                true
            }
            UpdateEvent::RemoveModel(identifier) => {
                self.remove_model(&identifier);
                true
            }
            UpdateEvent::LoadFailed(key) => {
                self.last_lod.remove(&key);
                false
            }
        }
    }

    fn remove_model(&mut self, identifier: &ModelIdentifier) {
        let Some(position) = self
            .models
            .iter()
            .position(|m| m.model_identifier == *identifier)
        else {
            return;
        };
        let model = self.models.remove(position);

        // Tell the renderer to drop everything the model had on screen
        for metadata in model.scene.all_sectors() {
            let key = (model.model_base_url.clone(), metadata.id);
            if let Some(lod) = self.last_lod.remove(&key) {
                if lod != LevelOfDetail::Discarded {
                    let _ = self.consumed_tx.send(ConsumedSector {
                        model_base_url: model.model_base_url.clone(),
                        model_transform: model.model_matrix,
                        metadata: metadata.clone(),
                        level_of_detail: LevelOfDetail::Discarded,
                        group: None,
                    });
                }
            }
        }
    }

    fn run_pass(&mut self) {
        if self.hints.suspend_loading {
            log::debug!("loading suspended, skipping scheduling pass");
            return;
        }
        let Some(camera) = self.camera else {
            return;
        };
        if self.models.is_empty() {
            return;
        }

        let input = DetermineSectorsInput {
            camera,
            clip_volume: self.clip_volume.clone(),
            models: self.models.clone(),
            loading_hints: self.hints,
        };
        let wanted = self.culler.determine_sectors(&input);
        log::debug!("scheduling pass over {} wanted sectors", wanted.len());

        for sector in wanted {
            let key = sector.state_key();
            let previous = self
                .last_lod
                .get(&key)
                .copied()
                .unwrap_or(LevelOfDetail::Discarded);
            if previous == sector.level_of_detail {
                // Unchanged since the last delivery; Discarded is emitted
                // at most once per shown sector
                continue;
            }
            self.last_lod.insert(key.clone(), sector.level_of_detail);

            if sector.level_of_detail == LevelOfDetail::Discarded {
                let _ = self.consumed_tx.send(ConsumedSector::discarded(&sector));
            } else {
                self.forward(sector, key);
            }
        }
    }

    /// Route one Simple/Detailed sector through the repository and forward
    /// its result; a failure surfaces only on this sector's channel entry
    fn forward(&mut self, sector: WantedSector, key: (String, u64)) {
        let load = self.repository.load_sector(&sector);
        let consumed_tx = self.consumed_tx.clone();
        let failure_tx = self.failure_tx.clone();
        let event_tx = self.event_tx.clone();
        let level_of_detail = sector.level_of_detail;
        self.forwarders.spawn(async move {
            match load.await {
                Ok(consumed) => {
                    let _ = consumed_tx.send(consumed);
                }
                Err(error) => {
                    let _ = failure_tx.send(SectorLoadFailure {
                        model_base_url: key.0.clone(),
                        sector_id: key.1,
                        level_of_detail,
                        error,
                    });
                    let _ = event_tx.send(UpdateEvent::LoadFailed(key));
                }
            }
        });
    }
}
