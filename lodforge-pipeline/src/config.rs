//! LOD job configuration
//!
//! A job is described by one flat settings table, loadable from TOML:
//!
//! ```toml
//! target_triangle_ratio = 0.25
//! atlas_resolution = 512
//! super_sampling_rate = 4
//! cage_distance = 0.05
//! output_channels = ["albedo", "tangent_normal"]
//!
//! [threads]
//! num_threads = 4
//! ```

use crate::parallel::ThreadPoolConfig;
use lodforge_bake::{BakeChannel, BakeOptions};
use lodforge_core::{Error, Result, TextureFilter};
use lodforge_simplification::{SimplifyOptions, SimplifyTarget};
use lodforge_unwrap::AtlasOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything a LOD job needs besides the input mesh.
///
/// Exactly one of the three simplification targets must be set; the
/// default leaves all of them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LodJobConfig {
    /// Stop simplifying at this many triangles
    pub target_triangle_count: Option<usize>,
    /// Stop simplifying before the geometric error exceeds this distance
    pub target_error_budget: Option<f64>,
    /// Keep this fraction of the input triangles
    pub target_triangle_ratio: Option<f32>,

    pub preserve_uv_seams: bool,
    pub preserve_material_boundaries: bool,
    pub preserve_skin_discontinuities: bool,
    /// Triangle index sets of the input mesh that must not change
    pub locked_regions: Vec<Vec<usize>>,
    /// Pin vertices on open mesh boundaries
    pub lock_boundaries: bool,
    /// Weight of the boundary constraint planes
    pub boundary_weight: f64,
    /// Influences kept per vertex after blending (0 = unlimited)
    pub max_bone_influences: usize,
    /// Place merged vertices at the quadric optimum instead of an endpoint or midpoint
    pub optimal_placement: bool,
    /// Weld vertices closer than this before simplifying (0 disables)
    pub welding_threshold: f32,
    /// Recompute normals of the simplified mesh
    pub recalculate_normals: bool,
    /// Edges sharper than this stay hard (normals) and split charts (atlas)
    pub hard_angle_degrees: f32,

    /// Atlas and bake resolution in pixels, a power of two
    pub atlas_resolution: u32,
    pub gutter_pixels: u32,
    pub min_chart_pixels: u32,
    pub max_chart_angle_degrees: f32,
    /// UV channel of the output mesh receiving the atlas
    pub output_uv_channel: usize,

    /// UV channel of the input mesh used for its textures
    pub source_uv_channel: usize,
    pub super_sampling_rate: u32,
    /// Search distance from the simplified surface to the input surface
    pub cage_distance: f32,
    pub texture_filter: TextureFilter,
    pub output_channels: Vec<BakeChannel>,
    /// Seed for jittered supersampling
    pub deterministic_seed: u64,

    pub threads: ThreadPoolConfig,
}

impl Default for LodJobConfig {
    fn default() -> Self {
        let atlas = AtlasOptions::default();
        let bake = BakeOptions::default();
        Self {
            target_triangle_count: None,
            target_error_budget: None,
            target_triangle_ratio: None,
            preserve_uv_seams: true,
            preserve_material_boundaries: true,
            preserve_skin_discontinuities: true,
            locked_regions: Vec::new(),
            lock_boundaries: false,
            boundary_weight: 10.0,
            max_bone_influences: 0,
            optimal_placement: true,
            welding_threshold: 0.0,
            recalculate_normals: false,
            hard_angle_degrees: atlas.hard_angle_degrees,
            atlas_resolution: atlas.resolution,
            gutter_pixels: atlas.gutter_pixels,
            min_chart_pixels: atlas.min_chart_pixels,
            max_chart_angle_degrees: atlas.max_chart_angle_degrees,
            output_uv_channel: atlas.output_uv_channel,
            source_uv_channel: bake.source_uv_channel,
            super_sampling_rate: bake.super_sampling_rate,
            cage_distance: bake.cage_distance,
            texture_filter: bake.filter,
            output_channels: bake.channels,
            deterministic_seed: bake.seed,
            threads: ThreadPoolConfig::default(),
        }
    }
}

impl LodJobConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LodJobConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Target a triangle count, replacing any other target
    pub fn with_target_triangle_count(mut self, count: usize) -> Self {
        self.clear_targets();
        self.target_triangle_count = Some(count);
        self
    }

    /// Target a fraction of the input triangles, replacing any other target
    pub fn with_target_triangle_ratio(mut self, ratio: f32) -> Self {
        self.clear_targets();
        self.target_triangle_ratio = Some(ratio);
        self
    }

    /// Target a geometric error, replacing any other target
    pub fn with_target_error_budget(mut self, budget: f64) -> Self {
        self.clear_targets();
        self.target_error_budget = Some(budget);
        self
    }

    fn clear_targets(&mut self) {
        self.target_triangle_count = None;
        self.target_triangle_ratio = None;
        self.target_error_budget = None;
    }

    pub fn with_atlas_resolution(mut self, resolution: u32) -> Self {
        self.atlas_resolution = resolution;
        self
    }

    pub fn with_super_sampling_rate(mut self, rate: u32) -> Self {
        self.super_sampling_rate = rate;
        self
    }

    pub fn with_cage_distance(mut self, distance: f32) -> Self {
        self.cage_distance = distance;
        self
    }

    pub fn with_output_channels(mut self, channels: impl IntoIterator<Item = BakeChannel>) -> Self {
        self.output_channels = channels.into_iter().collect();
        self
    }

    pub fn with_locked_regions(mut self, regions: Vec<Vec<usize>>) -> Self {
        self.locked_regions = regions;
        self
    }

    pub fn with_welding_threshold(mut self, threshold: f32) -> Self {
        self.welding_threshold = threshold;
        self
    }

    pub fn with_recalculate_normals(mut self, recalculate: bool) -> Self {
        self.recalculate_normals = recalculate;
        self
    }

    pub fn with_output_uv_channel(mut self, channel: usize) -> Self {
        self.output_uv_channel = channel;
        self
    }

    pub fn with_threads(mut self, threads: ThreadPoolConfig) -> Self {
        self.threads = threads;
        self
    }

    /// The single simplification target
    pub fn target(&self) -> Result<SimplifyTarget> {
        match (
            self.target_triangle_count,
            self.target_error_budget,
            self.target_triangle_ratio,
        ) {
            (Some(count), None, None) => Ok(SimplifyTarget::TriangleCount(count)),
            (None, Some(budget), None) => Ok(SimplifyTarget::ErrorBudget(budget)),
            (None, None, Some(ratio)) => Ok(SimplifyTarget::Ratio(ratio)),
            (None, None, None) => Err(Error::InvalidConfig(
                "one of target_triangle_count, target_error_budget or target_triangle_ratio is required"
                    .to_string(),
            )),
            _ => Err(Error::InvalidConfig(
                "only one simplification target may be set".to_string(),
            )),
        }
    }

    pub fn simplify_options(&self) -> Result<SimplifyOptions> {
        Ok(SimplifyOptions::new(self.target()?)
            .with_preserve_uv_seams(self.preserve_uv_seams)
            .with_preserve_material_boundaries(self.preserve_material_boundaries)
            .with_preserve_skin_discontinuities(self.preserve_skin_discontinuities)
            .with_lock_boundaries(self.lock_boundaries)
            .with_boundary_weight(self.boundary_weight)
            .with_locked_regions(self.locked_regions.clone())
            .with_max_bone_influences(self.max_bone_influences)
            .with_optimal_placement(self.optimal_placement))
    }

    pub fn atlas_options(&self) -> AtlasOptions {
        AtlasOptions::new(self.atlas_resolution)
            .with_gutter_pixels(self.gutter_pixels)
            .with_min_chart_pixels(self.min_chart_pixels)
            .with_hard_angle(self.hard_angle_degrees)
            .with_max_chart_angle(self.max_chart_angle_degrees)
            .with_output_uv_channel(self.output_uv_channel)
    }

    pub fn bake_options(&self) -> BakeOptions {
        BakeOptions::new(self.atlas_resolution)
            .with_super_sampling_rate(self.super_sampling_rate)
            .with_cage_distance(self.cage_distance)
            .with_source_uv_channel(self.source_uv_channel)
            .with_target_uv_channel(self.output_uv_channel)
            .with_filter(self.texture_filter)
            .with_channels(self.output_channels.iter().copied())
            .with_seed(self.deterministic_seed)
            .with_band_rows(self.threads.band_rows)
    }

    /// Check every setting; the input mesh is checked when the job runs
    pub fn validate(&self) -> Result<()> {
        self.simplify_options()?.validate()?;
        self.atlas_options().validate()?;
        self.bake_options().validate()?;
        self.threads.validate()?;

        if !(self.welding_threshold >= 0.0 && self.welding_threshold.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "welding_threshold must be non-negative, got {}",
                self.welding_threshold
            )));
        }
        for (i, channel) in self.output_channels.iter().enumerate() {
            if self.output_channels[..i].contains(channel) {
                return Err(Error::InvalidConfig(format!(
                    "output channel {channel:?} is listed twice"
                )));
            }
        }
        Ok(())
    }
}
