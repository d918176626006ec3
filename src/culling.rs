//! Sector culling: visibility-ranked candidates filtered by a cost budget
//!
//! The GPU coverage estimator is an external collaborator; this module
//! consumes its ranked output and decides, per scheduling pass, which
//! sectors are wanted at which level of detail under a total cost ceiling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::metadata::CadModelMetadata;
use crate::sector::{
    CameraPose, ClipVolume, LevelOfDetail, LoadingHints, SectorMetadata, WantedSector,
};

/// Everything a scheduling pass needs to decide the wanted-set
#[derive(Clone)]
pub struct DetermineSectorsInput {
    pub camera: CameraPose,
    pub clip_volume: Option<Arc<ClipVolume>>,
    pub models: Vec<Arc<CadModelMetadata>>,
    pub loading_hints: LoadingHints,
}

/// One ranked candidate produced by the visibility oracle
///
/// Priority is a non-negative score with no fixed upper bound; higher
/// means more important.
#[derive(Clone)]
pub struct PrioritizedSector {
    pub model: Arc<CadModelMetadata>,
    pub sector_id: u64,
    pub priority: f32,
}

/// External visibility oracle ranking sectors by estimated screen coverage
pub trait CoverageOracle: Send {
    /// Inform the oracle about the currently loaded models
    fn set_models(&mut self, models: &[Arc<CadModelMetadata>]);

    /// Rank sectors of all models, most important first
    ///
    /// Called once per scheduling pass for all models together, so the
    /// expensive visibility estimate is not repeated per model.
    fn order_sectors_by_visibility(&mut self, input: &DetermineSectorsInput)
    -> Vec<PrioritizedSector>;
}

/// Decides the wanted-set for a scheduling pass
pub trait SectorCuller: Send {
    fn determine_sectors(&mut self, input: &DetermineSectorsInput) -> Vec<WantedSector>;
}

/// Cost of loading one sector at one level of detail
///
/// Costs are opaque non-negative quantities; no normalization between
/// Simple and Detailed is assumed.
pub type SectorCost = Box<dyn Fn(&SectorMetadata, LevelOfDetail) -> f32 + Send>;

/// Culler that walks the oracle's ranking and accepts the highest LOD
/// fitting a per-pass cost ceiling
pub struct ByVisibilityCuller {
    oracle: Box<dyn CoverageOracle>,
    cost: SectorCost,
    cost_limit: f32,
}

impl ByVisibilityCuller {
    pub fn new(oracle: Box<dyn CoverageOracle>, cost: SectorCost, cost_limit: f32) -> Self {
        Self {
            oracle,
            cost,
            cost_limit,
        }
    }

    fn cost_of(&self, metadata: &SectorMetadata, lod: LevelOfDetail) -> f32 {
        let cost = (self.cost)(metadata, lod);
        assert!(
            cost >= 0.0 && cost.is_finite(),
            "sector cost must be a non-negative finite number, got {cost} for sector {} at {lod}",
            metadata.id
        );
        cost
    }
}

impl SectorCuller for ByVisibilityCuller {
    /// Walk candidates in the oracle's order (never re-sorted; ties keep
    /// input order), taking at most one LOD decision per sector. Detailed
    /// is preferred; when it would overflow the budget Simple is tried;
    /// when neither fits the sector is omitted from the output entirely so
    /// the renderer keeps its prior displayed state. Only sectors without
    /// a surviving candidate are emitted as Discarded. Candidates whose
    /// bounds fall outside the model's geometry clip box do not survive.
    fn determine_sectors(&mut self, input: &DetermineSectorsInput) -> Vec<WantedSector> {
        self.oracle.set_models(&input.models);
        let ranked = self.oracle.order_sectors_by_visibility(input);

        // The spent accumulator resets every pass
        let mut spent = 0.0f32;
        let mut taken: HashMap<(usize, u64), LevelOfDetail> = HashMap::new();
        let mut budget_skipped: HashSet<(usize, u64)> = HashSet::new();
        let model_index: HashMap<*const CadModelMetadata, usize> = input
            .models
            .iter()
            .enumerate()
            .map(|(i, m)| (Arc::as_ptr(m), i))
            .collect();

        for candidate in &ranked {
            let Some(&model_idx) = model_index.get(&Arc::as_ptr(&candidate.model)) else {
                // Stale candidate for a model no longer loaded
                continue;
            };
            let slot = (model_idx, candidate.sector_id);
            if taken.contains_key(&slot) || budget_skipped.contains(&slot) {
                continue;
            }
            let Some(metadata) = candidate.model.scene.sector(candidate.sector_id) else {
                log::debug!(
                    "oracle ranked unknown sector {} for {}",
                    candidate.sector_id,
                    candidate.model.model_base_url
                );
                continue;
            };
            if let Some(clip_box) = &candidate.model.geometry_clip_box {
                let world_bounds = metadata.bounds.transformed(&candidate.model.model_matrix);
                if !world_bounds.intersects(clip_box) {
                    continue;
                }
            }

            let detailed = self.cost_of(metadata, LevelOfDetail::Detailed);
            if spent + detailed <= self.cost_limit {
                spent += detailed;
                taken.insert(slot, LevelOfDetail::Detailed);
                continue;
            }
            let simple = self.cost_of(metadata, LevelOfDetail::Simple);
            if metadata.faces_file.file_name.is_some() && spent + simple <= self.cost_limit {
                spent += simple;
                taken.insert(slot, LevelOfDetail::Simple);
            } else {
                // Neither fits under the remaining budget: no downgrade,
                // the sector stays at whatever is displayed now
                budget_skipped.insert(slot);
            }
        }

        log::debug!(
            "culling pass accepted {} sectors at cost {spent}/{}",
            taken.len(),
            self.cost_limit
        );

        let mut wanted = Vec::new();
        for (model_idx, model) in input.models.iter().enumerate() {
            for metadata in model.scene.all_sectors() {
                let slot = (model_idx, metadata.id);
                let level_of_detail = match taken.get(&slot) {
                    Some(&lod) => lod,
                    None if budget_skipped.contains(&slot) => continue,
                    None => LevelOfDetail::Discarded,
                };
                wanted.push(WantedSector {
                    model_base_url: model.model_base_url.clone(),
                    model_transform: model.model_matrix,
                    scene: model.scene.clone(),
                    metadata: metadata.clone(),
                    level_of_detail,
                    clip_volume: input.clip_volume.clone(),
                });
            }
        }
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use crate::testutil::{StubOracle, camera_at_origin, test_model, test_model_with_clip_box};
    use glam::Vec3;

    fn lod_of(wanted: &[WantedSector], sector_id: u64) -> LevelOfDetail {
        wanted
            .iter()
            .find(|w| w.metadata.id == sector_id)
            .unwrap()
            .level_of_detail
    }

    fn input_for(models: Vec<Arc<CadModelMetadata>>) -> DetermineSectorsInput {
        DetermineSectorsInput {
            camera: camera_at_origin(),
            clip_volume: None,
            models,
            loading_hints: LoadingHints::default(),
        }
    }

    fn flat_cost(detailed: &'static [f32]) -> SectorCost {
        Box::new(move |metadata, lod| match lod {
            LevelOfDetail::Detailed => detailed[metadata.id as usize],
            LevelOfDetail::Simple => 1.0,
            LevelOfDetail::Discarded => 0.0,
        })
    }

    #[test]
    fn test_budget_respected_with_simple_fallback() {
        // Detailed costs 10/10/100; ceiling 20: first two fit Detailed,
        // the third falls back to Simple
        let model = test_model(3);
        let oracle = StubOracle::ranking(vec![
            (model.clone(), 0, 1000.0),
            (model.clone(), 1, 100.0),
            (model.clone(), 2, 10.0),
        ]);
        let mut culler =
            ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[10.0, 10.0, 100.0]), 20.0);

        let wanted = culler.determine_sectors(&input_for(vec![model]));

        assert_eq!(lod_of(&wanted, 0), LevelOfDetail::Detailed);
        assert_eq!(lod_of(&wanted, 1), LevelOfDetail::Detailed);
        assert_eq!(lod_of(&wanted, 2), LevelOfDetail::Simple);
    }

    #[test]
    fn test_budget_skipped_sector_keeps_prior_state() {
        let model = test_model(2);
        let oracle = StubOracle::ranking(vec![(model.clone(), 0, 10.0), (model.clone(), 1, 5.0)]);
        let cost: SectorCost = Box::new(|metadata, lod| match (metadata.id, lod) {
            (0, LevelOfDetail::Detailed) => 10.0,
            (1, LevelOfDetail::Detailed) => 100.0,
            (_, LevelOfDetail::Simple) => 5.0,
            _ => 0.0,
        });
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), cost, 12.0);

        let wanted = culler.determine_sectors(&input_for(vec![model]));

        assert_eq!(lod_of(&wanted, 0), LevelOfDetail::Detailed);
        // Sector 1 survived ranking but neither Detailed (100) nor Simple
        // (5, over the remaining 2) fits: it must not be downgraded, so no
        // entry is emitted and the renderer keeps what it shows
        assert!(wanted.iter().all(|w| w.metadata.id != 1));
    }

    #[test]
    fn test_clip_box_discards_outside_sectors() {
        // All sector bounds sit in the unit cube at the origin
        let clipped = test_model_with_clip_box(
            2,
            Aabb::new(Vec3::splat(10.0), Vec3::splat(11.0)),
        );
        let oracle = StubOracle::ranking(vec![
            (clipped.clone(), 0, 10.0),
            (clipped.clone(), 1, 5.0),
        ]);
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[1.0, 1.0]), 100.0);
        let wanted = culler.determine_sectors(&input_for(vec![clipped]));
        assert_eq!(lod_of(&wanted, 0), LevelOfDetail::Discarded);
        assert_eq!(lod_of(&wanted, 1), LevelOfDetail::Discarded);

        let covered = test_model_with_clip_box(
            1,
            Aabb::new(Vec3::splat(-1.0), Vec3::splat(2.0)),
        );
        let oracle = StubOracle::ranking(vec![(covered.clone(), 0, 10.0)]);
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[1.0]), 100.0);
        let wanted = culler.determine_sectors(&input_for(vec![covered]));
        assert_eq!(lod_of(&wanted, 0), LevelOfDetail::Detailed);
    }

    #[test]
    fn test_priority_monotonicity() {
        // Raising a candidate's rank never lowers its selected LOD
        let model = test_model(3);
        let costs: &[f32] = &[10.0, 10.0, 10.0];

        let low_rank = StubOracle::ranking(vec![
            (model.clone(), 0, 1000.0),
            (model.clone(), 1, 100.0),
            (model.clone(), 2, 10.0),
        ]);
        let mut culler = ByVisibilityCuller::new(Box::new(low_rank), flat_cost(costs), 21.0);
        let before = culler.determine_sectors(&input_for(vec![model.clone()]));
        assert_eq!(lod_of(&before, 2), LevelOfDetail::Simple);

        let high_rank = StubOracle::ranking(vec![
            (model.clone(), 2, 2000.0),
            (model.clone(), 0, 1000.0),
            (model.clone(), 1, 100.0),
        ]);
        let mut culler = ByVisibilityCuller::new(Box::new(high_rank), flat_cost(costs), 21.0);
        let after = culler.determine_sectors(&input_for(vec![model]));
        assert_eq!(lod_of(&after, 2), LevelOfDetail::Detailed);
    }

    #[test]
    fn test_zero_candidates_discards_everything() {
        let model = test_model(3);
        let oracle = StubOracle::ranking(Vec::new());
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[1.0; 3]), 100.0);

        let wanted = culler.determine_sectors(&input_for(vec![model]));

        assert_eq!(wanted.len(), 3);
        assert!(
            wanted
                .iter()
                .all(|w| w.level_of_detail == LevelOfDetail::Discarded)
        );
    }

    #[test]
    fn test_one_decision_per_sector() {
        // Duplicate candidates for the same sector only count once
        let model = test_model(1);
        let oracle = StubOracle::ranking(vec![
            (model.clone(), 0, 1000.0),
            (model.clone(), 0, 900.0),
        ]);
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[10.0]), 100.0);

        let wanted = culler.determine_sectors(&input_for(vec![model]));
        let decisions: Vec<_> = wanted.iter().filter(|w| w.metadata.id == 0).collect();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].level_of_detail, LevelOfDetail::Detailed);
    }

    #[test]
    fn test_all_models_covered_in_one_pass() {
        let model1 = test_model(2);
        let model2 = test_model(2);
        let oracle = StubOracle::ranking(vec![(model1.clone(), 0, 50.0)]);
        let oracle_calls = oracle.call_counter();
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), flat_cost(&[1.0, 1.0]), 100.0);

        let wanted = culler.determine_sectors(&input_for(vec![model1.clone(), model2.clone()]));

        // One oracle call for the whole pass, wanted entries for all
        // sectors of both models
        assert_eq!(oracle_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let of_model1 = wanted
            .iter()
            .filter(|w| w.model_base_url == model1.model_base_url)
            .count();
        let of_model2 = wanted
            .iter()
            .filter(|w| w.model_base_url == model2.model_base_url)
            .count();
        assert_eq!(of_model1, model1.scene.sector_count());
        assert_eq!(of_model2, model2.scene.sector_count());
    }

    #[test]
    #[should_panic(expected = "non-negative finite")]
    fn test_negative_cost_fails_fast() {
        let model = test_model(1);
        let oracle = StubOracle::ranking(vec![(model.clone(), 0, 10.0)]);
        let cost: SectorCost = Box::new(|_, _| -1.0);
        let mut culler = ByVisibilityCuller::new(Box::new(oracle), cost, 100.0);
        culler.determine_sectors(&input_for(vec![model]));
    }
}
