//! Model metadata loading
//!
//! Resolves a model identifier to its scene hierarchy, transform and
//! default camera before any sector streaming can start. Output-format
//! selection is a fixed preference list; a model offering none of the
//! supported formats aborts the load entirely.

use std::sync::Arc;

use futures::future::BoxFuture;
use glam::{Mat4, Vec3};
use serde::Deserialize;

use crate::error::{HttpError, ModelError};
use crate::math::Aabb;
use crate::network::ModelDataProvider;
use crate::sector::{FacesFile, IndexFile, SectorMetadata, SectorScene};

/// Opaque model identifier understood by the metadata provider
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelIdentifier(pub String);

impl std::fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One output format/version a model is available in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobOutputMetadata {
    pub blob_id: i64,
    pub format: String,
    pub version: u32,
}

/// Default camera stored with a model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraConfiguration {
    pub position: Vec3,
    pub target: Vec3,
}

/// Resolves model identifiers to outputs, transforms and cameras
pub trait ModelMetadataProvider: Send + Sync {
    fn get_model_outputs(
        &self,
        model: &ModelIdentifier,
    ) -> BoxFuture<'static, Result<Vec<BlobOutputMetadata>, HttpError>>;

    fn get_model_uri(
        &self,
        model: &ModelIdentifier,
        output: &BlobOutputMetadata,
    ) -> BoxFuture<'static, Result<String, HttpError>>;

    fn get_model_matrix(
        &self,
        model: &ModelIdentifier,
        format: &str,
    ) -> BoxFuture<'static, Result<Mat4, HttpError>>;

    fn get_model_camera(
        &self,
        model: &ModelIdentifier,
    ) -> BoxFuture<'static, Result<Option<CameraConfiguration>, HttpError>>;
}

/// Supported output formats in order of preference (first is preferred)
pub const SUPPORTED_OUTPUTS: &[(&str, u32)] = &[("cad-gltf", 9), ("cad-sector", 8)];

/// Pick the most preferred supported output, or fail the model load
pub fn select_supported_output(
    outputs: &[BlobOutputMetadata],
) -> Result<BlobOutputMetadata, ModelError> {
    for (format, version) in SUPPORTED_OUTPUTS {
        if let Some(found) = outputs
            .iter()
            .find(|o| o.format == *format && o.version == *version)
        {
            return Ok(found.clone());
        }
    }
    Err(ModelError::UnsupportedModelOutput {
        available: outputs
            .iter()
            .map(|o| format!("{} v{}", o.format, o.version))
            .collect::<Vec<_>>()
            .join(", "),
        supported: SUPPORTED_OUTPUTS
            .iter()
            .map(|(f, v)| format!("{f} v{v}"))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Everything known about one loaded model
pub struct CadModelMetadata {
    pub model_identifier: ModelIdentifier,
    pub model_base_url: String,
    pub format: String,
    pub format_version: u32,
    /// Includes the unit-to-meters scale
    pub model_matrix: Mat4,
    pub inverse_model_matrix: Mat4,
    pub camera_configuration: Option<CameraConfiguration>,
    pub scene: Arc<SectorScene>,
    /// Not part of the stored metadata, set by the embedding application
    pub geometry_clip_box: Option<Aabb>,
}

/// Loads model metadata through the consumed provider interfaces
pub struct CadModelMetadataRepository {
    metadata_provider: Arc<dyn ModelMetadataProvider>,
    data_provider: Arc<dyn ModelDataProvider>,
    scene_file_name: String,
}

impl CadModelMetadataRepository {
    pub fn new(
        metadata_provider: Arc<dyn ModelMetadataProvider>,
        data_provider: Arc<dyn ModelDataProvider>,
    ) -> Self {
        Self {
            metadata_provider,
            data_provider,
            scene_file_name: "scene.json".to_string(),
        }
    }

    pub async fn load_model(
        &self,
        identifier: &ModelIdentifier,
    ) -> Result<Arc<CadModelMetadata>, ModelError> {
        let outputs = self.metadata_provider.get_model_outputs(identifier).await?;
        let output = select_supported_output(&outputs)?;

        let base_url = self
            .metadata_provider
            .get_model_uri(identifier, &output)
            .await?;
        let json = self
            .data_provider
            .get_json_file(&base_url, &self.scene_file_name)
            .await?;
        let scene_json: SceneJson = serde_json::from_value(json)?;
        let unit = scene_json.unit.clone().unwrap_or_else(|| "Meters".to_string());
        let scene = Arc::new(build_scene(scene_json)?);

        let stored_matrix = self
            .metadata_provider
            .get_model_matrix(identifier, &output.format)
            .await?;
        let model_matrix = scale_to_meters_matrix(&unit)? * stored_matrix;
        let camera = self
            .metadata_provider
            .get_model_camera(identifier)
            .await?
            .map(|c| transform_camera_configuration(c, &model_matrix));

        log::debug!(
            "loaded model {identifier}: {} sectors, format {} v{}",
            scene.sector_count(),
            output.format,
            output.version
        );

        Ok(Arc::new(CadModelMetadata {
            model_identifier: identifier.clone(),
            model_base_url: base_url,
            format: output.format,
            format_version: output.version,
            model_matrix,
            inverse_model_matrix: model_matrix.inverse(),
            camera_configuration: camera,
            scene,
            geometry_clip_box: None,
        }))
    }
}

/// Scale matrix converting the scene's unit to meters
fn scale_to_meters_matrix(unit: &str) -> Result<Mat4, ModelError> {
    let factor = match unit {
        "Meters" => 1.0,
        "Centimeters" => 0.01,
        "Millimeters" => 0.001,
        "Micrometers" => 1e-6,
        "Kilometers" => 1000.0,
        "Feet" => 0.3048,
        "Inches" => 0.0254,
        other => return Err(ModelError::UnknownUnit(other.to_string())),
    };
    Ok(Mat4::from_scale(Vec3::splat(factor)))
}

fn transform_camera_configuration(
    camera: CameraConfiguration,
    model_matrix: &Mat4,
) -> CameraConfiguration {
    CameraConfiguration {
        position: model_matrix.transform_point3(camera.position),
        target: model_matrix.transform_point3(camera.target),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneJson {
    #[allow(dead_code)]
    version: u32,
    max_tree_index: u64,
    unit: Option<String>,
    sectors: Vec<SectorJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectorJson {
    id: u64,
    parent_id: Option<u64>,
    #[serde(default)]
    path: String,
    #[serde(default)]
    depth: u32,
    bounding_box: BoundingBoxJson,
    faces_file: Option<FacesFileJson>,
    index_file: Option<IndexFileJson>,
    #[serde(default)]
    estimated_draw_call_count: u64,
}

#[derive(Deserialize)]
struct BoundingBoxJson {
    min: PointJson,
    max: PointJson,
}

#[derive(Deserialize)]
struct PointJson {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FacesFileJson {
    file_name: Option<String>,
    #[serde(default)]
    download_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFileJson {
    file_name: String,
    #[serde(default)]
    peripheral_files: Vec<String>,
    #[serde(default)]
    download_size: u64,
}

fn build_scene(json: SceneJson) -> Result<SectorScene, ModelError> {
    let root_id = json
        .sectors
        .iter()
        .find(|s| s.parent_id.is_none())
        .map(|s| s.id)
        .ok_or(ModelError::MissingRootSector)?;
    let unit = json.unit.unwrap_or_else(|| "Meters".to_string());

    let sectors = json
        .sectors
        .into_iter()
        .map(|s| SectorMetadata {
            id: s.id,
            parent_id: s.parent_id,
            depth: s.depth,
            path: s.path,
            bounds: Aabb::new(
                Vec3::new(s.bounding_box.min.x, s.bounding_box.min.y, s.bounding_box.min.z),
                Vec3::new(s.bounding_box.max.x, s.bounding_box.max.y, s.bounding_box.max.z),
            ),
            faces_file: s
                .faces_file
                .map(|f| FacesFile {
                    file_name: f.file_name,
                    download_size: f.download_size,
                })
                .unwrap_or_default(),
            index_file: s
                .index_file
                .map(|f| IndexFile {
                    file_name: f.file_name,
                    peripheral_files: f.peripheral_files,
                    download_size: f.download_size,
                })
                .unwrap_or_default(),
            estimated_draw_call_count: s.estimated_draw_call_count,
        })
        .collect();

    Ok(SectorScene::new(root_id, json.max_tree_index, unit, sectors))
}
