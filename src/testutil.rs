//! Shared fakes and scene builders for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use glam::{Mat4, Vec3};

use crate::culling::{CoverageOracle, DetermineSectorsInput, PrioritizedSector};
use crate::error::{HttpError, ParseError};
use crate::math::Aabb;
use crate::metadata::{CadModelMetadata, ModelIdentifier};
use crate::network::BinaryFileProvider;
use crate::sector::geometry::{PeripheralInput, SectorGeometry, SectorQuads};
use crate::sector::parser::SectorParser;
use crate::sector::{
    CameraPose, FacesFile, IndexFile, LevelOfDetail, SectorMetadata, SectorScene, WantedSector,
};

/// In-memory binary provider with scripted failures and latency
#[derive(Default)]
pub struct FakeBinaryProvider {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Remaining 503 responses per file
    failures: Mutex<HashMap<String, usize>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

fn file_key(base_url: &str, file_name: &str) -> String {
    format!("{base_url}/{file_name}")
}

impl FakeBinaryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, base_url: &str, file_name: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(file_key(base_url, file_name), data);
    }

    /// Respond 503 to the next `count` fetches of this file
    pub fn fail_times(&self, base_url: &str, file_name: &str, count: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(file_key(base_url, file_name), count);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self, base_url: &str, file_name: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&file_key(base_url, file_name))
            .copied()
            .unwrap_or(0)
    }
}

impl BinaryFileProvider for FakeBinaryProvider {
    fn get_binary_file(
        &self,
        base_url: &str,
        file_name: &str,
    ) -> BoxFuture<'static, Result<Vec<u8>, HttpError>> {
        let key = file_key(base_url, file_name);
        *self.fetches.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();

        let mut failures = self.failures.lock().unwrap();
        let result = match failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(HttpError::new(503, format!("scripted failure for {key}")))
            }
            _ => self
                .files
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| HttpError::new(404, format!("no such file {key}"))),
        };

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

/// Parser that accepts anything except the literal payload `corrupt`
/// and remembers the last merged peripheral input it saw
#[derive(Default)]
pub struct FakeParser {
    last_peripherals: Mutex<Option<PeripheralInput>>,
}

impl FakeParser {
    pub fn last_peripherals(&self) -> Option<PeripheralInput> {
        self.last_peripherals.lock().unwrap().clone()
    }
}

impl SectorParser for FakeParser {
    fn parse_simple(&self, bytes: &[u8]) -> Result<SectorQuads, ParseError> {
        if bytes == b"corrupt" {
            return Err(ParseError::MalformedSector("corrupt quads blob".into()));
        }
        Ok(SectorQuads {
            quad_size: 1.0,
            buffer: vec![0.0; bytes.len()],
        })
    }

    fn parse_detailed(
        &self,
        index_bytes: &[u8],
        peripherals: &PeripheralInput,
    ) -> Result<SectorGeometry, ParseError> {
        if index_bytes == b"corrupt" {
            return Err(ParseError::MalformedSector("corrupt index blob".into()));
        }
        *self.last_peripherals.lock().unwrap() = Some(peripherals.clone());
        Ok(SectorGeometry::default())
    }
}

fn sector_metadata(id: u64, parent_id: Option<u64>, depth: u32) -> SectorMetadata {
    SectorMetadata {
        id,
        parent_id,
        depth,
        path: format!("0/{id}/"),
        bounds: Aabb::new(Vec3::ZERO, Vec3::splat(1.0)),
        faces_file: FacesFile {
            file_name: Some(format!("fct_{id}.f3d")),
            download_size: 100,
        },
        index_file: IndexFile {
            file_name: format!("sector_{id}.i3d"),
            peripheral_files: vec![format!("mesh_{id}.ctm")],
            download_size: 1000,
        },
        estimated_draw_call_count: 10,
    }
}

/// Build a uniform sector tree: `depth` levels, each non-leaf node having
/// `children_per_node` children, ids assigned breadth-first from 0
pub fn generate_sector_tree(depth: u32, children_per_node: usize) -> SectorScene {
    let mut sectors = vec![sector_metadata(0, None, 0)];
    let mut frontier = vec![0u64];
    let mut next_id = 1u64;
    for level in 1..depth {
        let mut next_frontier = Vec::new();
        for &parent in &frontier {
            for _ in 0..children_per_node {
                sectors.push(sector_metadata(next_id, Some(parent), level));
                next_frontier.push(next_id);
                next_id += 1;
            }
        }
        frontier = next_frontier;
    }
    let max_tree_index = sectors.len() as u64 * 100;
    SectorScene::new(0, max_tree_index, "Meters".to_string(), sectors)
}

/// Root plus one child, both referencing the same peripheral file
pub fn tree_with_shared_peripheral(file_name: &str) -> SectorScene {
    let mut root = sector_metadata(0, None, 0);
    root.index_file.peripheral_files = vec![file_name.to_string()];
    let mut child = sector_metadata(1, Some(0), 1);
    child.index_file.peripheral_files = vec![file_name.to_string()];
    SectorScene::new(0, 100, "Meters".to_string(), vec![root, child])
}

/// Single root sector with no simple representation
pub fn tree_without_faces_file() -> SectorScene {
    let mut root = sector_metadata(0, None, 0);
    root.faces_file = FacesFile {
        file_name: None,
        download_size: 0,
    };
    SectorScene::new(0, 100, "Meters".to_string(), vec![root])
}

pub fn wanted_sector(
    scene: &Arc<SectorScene>,
    id: u64,
    level_of_detail: LevelOfDetail,
    base_url: &str,
) -> WantedSector {
    WantedSector {
        model_base_url: base_url.to_string(),
        model_transform: Mat4::IDENTITY,
        scene: scene.clone(),
        metadata: scene.sector(id).unwrap().clone(),
        level_of_detail,
        clip_volume: None,
    }
}

pub fn camera_at_origin() -> CameraPose {
    CameraPose {
        position: Vec3::ZERO,
        view_projection: Mat4::IDENTITY,
    }
}

/// Model metadata over a flat scene of `sectors` sectors, with a base URL
/// unique to this call
pub fn test_model(sectors: usize) -> Arc<CadModelMetadata> {
    build_test_model(sectors, None)
}

/// Like [`test_model`], with a geometry clip box applied
pub fn test_model_with_clip_box(sectors: usize, clip_box: Aabb) -> Arc<CadModelMetadata> {
    build_test_model(sectors, Some(clip_box))
}

fn build_test_model(sectors: usize, geometry_clip_box: Option<Aabb>) -> Arc<CadModelMetadata> {
    static NEXT_MODEL: AtomicU64 = AtomicU64::new(0);
    let n = NEXT_MODEL.fetch_add(1, Ordering::SeqCst);

    let metadata = (0..sectors as u64)
        .map(|id| sector_metadata(id, (id > 0).then_some(0), u32::from(id > 0)))
        .collect();
    let scene = Arc::new(SectorScene::new(
        0,
        sectors as u64 * 100,
        "Meters".to_string(),
        metadata,
    ));
    Arc::new(CadModelMetadata {
        model_identifier: ModelIdentifier(format!("model-{n}")),
        model_base_url: format!("https://models/model-{n}"),
        format: "cad-sector".to_string(),
        format_version: 8,
        model_matrix: Mat4::IDENTITY,
        inverse_model_matrix: Mat4::IDENTITY,
        camera_configuration: None,
        scene,
        geometry_clip_box,
    })
}

/// Oracle returning a fixed ranking and counting how often it is asked
pub struct StubOracle {
    ranking: Vec<(Arc<CadModelMetadata>, u64, f32)>,
    calls: Arc<AtomicUsize>,
}

impl StubOracle {
    pub fn ranking(ranking: Vec<(Arc<CadModelMetadata>, u64, f32)>) -> Self {
        Self {
            ranking,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl CoverageOracle for StubOracle {
    fn set_models(&mut self, _models: &[Arc<CadModelMetadata>]) {}

    fn order_sectors_by_visibility(
        &mut self,
        _input: &DetermineSectorsInput,
    ) -> Vec<PrioritizedSector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ranking
            .iter()
            .map(|(model, sector_id, priority)| PrioritizedSector {
                model: model.clone(),
                sector_id: *sector_id,
                priority: *priority,
            })
            .collect()
    }
}
