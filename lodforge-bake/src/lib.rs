//! Material re-baking for lodforge
//!
//! Transfers the appearance of a detailed source mesh onto the atlas of a
//! simplified target mesh. Every texel is supersampled, mapped through the
//! atlas onto the target surface and projected along the target normal onto
//! the source, where the requested channels are evaluated.

pub mod channels;
pub mod dilate;
pub mod lookup;
pub mod supersample;

pub use channels::{decode_normal, encode_normal, BakeChannel, SampleContext};
pub use dilate::dilate;
pub use lookup::UvLookupGrid;
pub use supersample::sample_offsets;

use lodforge_core::{
    Aabb, Bounded, CancelToken, Error, Mesh, Point2f, Result, Texture, TextureFilter,
};
use lodforge_spatial::{interpolate_surface, TriangleBvh};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Baker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeOptions {
    /// Output edge length in pixels, a power of two
    pub resolution: u32,
    /// Samples per texel
    pub super_sampling_rate: u32,
    /// Largest distance searched along the target normal, in both directions
    pub cage_distance: f32,
    /// UV channel of the source mesh used for texture lookups
    pub source_uv_channel: usize,
    /// Atlas UV channel of the target mesh
    pub target_uv_channel: usize,
    pub filter: TextureFilter,
    pub channels: Vec<BakeChannel>,
    /// Seed for jittered supersampling
    pub seed: u64,
    /// Texel rows handed to one worker at a time
    pub band_rows: usize,
    /// Fill texels without a source sample from their neighbours
    pub dilate: bool,
}

impl Default for BakeOptions {
    fn default() -> Self {
        Self {
            resolution: 1024,
            super_sampling_rate: 4,
            cage_distance: 0.1,
            source_uv_channel: 0,
            target_uv_channel: 0,
            filter: TextureFilter::Bilinear,
            channels: vec![BakeChannel::Albedo],
            seed: 0,
            band_rows: 16,
            dilate: true,
        }
    }
}

impl BakeOptions {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn with_super_sampling_rate(mut self, rate: u32) -> Self {
        self.super_sampling_rate = rate;
        self
    }

    pub fn with_cage_distance(mut self, distance: f32) -> Self {
        self.cage_distance = distance;
        self
    }

    pub fn with_source_uv_channel(mut self, channel: usize) -> Self {
        self.source_uv_channel = channel;
        self
    }

    pub fn with_target_uv_channel(mut self, channel: usize) -> Self {
        self.target_uv_channel = channel;
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = BakeChannel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_band_rows(mut self, rows: usize) -> Self {
        self.band_rows = rows;
        self
    }

    pub fn with_dilation(mut self, dilate: bool) -> Self {
        self.dilate = dilate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "bake resolution {} is not a power of two",
                self.resolution
            )));
        }
        if self.super_sampling_rate == 0 {
            return Err(Error::InvalidConfig(
                "super_sampling_rate must be at least 1".to_string(),
            ));
        }
        if !(self.cage_distance > 0.0 && self.cage_distance.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "cage_distance must be positive, got {}",
                self.cage_distance
            )));
        }
        if self.channels.is_empty() {
            return Err(Error::InvalidConfig("no bake channels requested".to_string()));
        }
        if self.band_rows == 0 {
            return Err(Error::InvalidConfig("band_rows must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Coverage statistics of a bake
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BakeStats {
    /// Texels with at least one source hit
    pub covered: usize,
    /// Texels inside the atlas charts where no sample hit the source
    pub missed: usize,
    /// Share of all texels without a source sample, before dilation
    pub invalid_fraction_before_dilation: f32,
    /// Share of chart texels where every sample missed
    pub miss_fraction: f32,
    /// Texels left unfilled after dilation
    pub invalid_after_dilation: usize,
    pub rays_cast: u64,
}

/// Baked textures plus the texel validity mask
#[derive(Debug, Clone)]
pub struct BakeResult {
    pub channels: BTreeMap<BakeChannel, Texture>,
    /// `height x width`; true where the texel holds a real source sample
    pub validity: Array2<bool>,
    pub stats: BakeStats,
}

impl BakeResult {
    pub fn channel(&self, channel: BakeChannel) -> Option<&Texture> {
        self.channels.get(&channel)
    }
}

/// Samples gathered by one band of texel rows
struct Band {
    start_row: usize,
    values: Vec<Vec<[f32; 4]>>,
    valid: Vec<bool>,
    covered: usize,
    missed: usize,
    rays: u64,
}

/// Bakes target meshes against one indexed source mesh
pub struct MaterialBaker<'m> {
    bvh: TriangleBvh<'m>,
    bounds: Aabb,
}

impl<'m> MaterialBaker<'m> {
    /// Index `source` for baking
    pub fn new(source: &'m Mesh) -> Result<Self> {
        if source.is_empty() {
            return Err(Error::InvalidInput("source mesh has no triangles".to_string()));
        }
        let bvh = TriangleBvh::build(source);
        let bounds = source.bounding_box();
        Ok(Self { bvh, bounds })
    }

    pub fn source(&self) -> &'m Mesh {
        self.bvh.mesh()
    }

    /// Bake every requested channel into the atlas of `target`
    pub fn bake(&self, target: &Mesh, options: &BakeOptions, cancel: &CancelToken) -> Result<BakeResult> {
        options.validate()?;
        let source = self.source();
        if options.target_uv_channel >= target.uv_channel_count() {
            return Err(Error::InvalidConfig(format!(
                "target mesh has no UV channel {}",
                options.target_uv_channel
            )));
        }
        let textured = source.material_slots.iter().any(|slot| slot.has_textures());
        if textured && options.source_uv_channel >= source.uv_channel_count() {
            return Err(Error::InvalidConfig(format!(
                "source mesh is textured but has no UV channel {}",
                options.source_uv_channel
            )));
        }
        cancel.check()?;

        let size = options.resolution as usize;
        let grid = UvLookupGrid::build(target, options.target_uv_channel);
        let offsets = sample_offsets(options.super_sampling_rate, options.seed);
        let context = SampleContext {
            source,
            source_bounds: &self.bounds,
            filter: options.filter,
            cage_distance: options.cage_distance,
        };
        debug!(
            resolution = size,
            samples = offsets.len(),
            channels = options.channels.len(),
            "baking"
        );

        let band_starts: Vec<usize> = (0..size).step_by(options.band_rows).collect();
        let bands: Vec<Band> = band_starts
            .into_par_iter()
            .map(|start_row| {
                cancel.check()?;
                let rows = options.band_rows.min(size - start_row);
                Ok(self.bake_band(target, &grid, &offsets, &context, options, start_row, rows))
            })
            .collect::<Result<_>>()?;
        cancel.check()?;

        let texel_count = size * size;
        let mut buffers = vec![vec![[0.0f32; 4]; texel_count]; options.channels.len()];
        let mut valid = vec![false; texel_count];
        let mut stats = BakeStats::default();
        for band in bands {
            let offset = band.start_row * size;
            let len = band.valid.len();
            valid[offset..offset + len].copy_from_slice(&band.valid);
            for (buffer, values) in buffers.iter_mut().zip(&band.values) {
                buffer[offset..offset + len].copy_from_slice(values);
            }
            stats.covered += band.covered;
            stats.missed += band.missed;
            stats.rays_cast += band.rays;
        }

        stats.invalid_fraction_before_dilation = (texel_count - stats.covered) as f32 / texel_count as f32;
        let chart_texels = stats.covered + stats.missed;
        if chart_texels > 0 {
            stats.miss_fraction = stats.missed as f32 / chart_texels as f32;
        }
        stats.invalid_after_dilation = if options.dilate {
            dilate(&mut buffers, &valid, size, size)
        } else {
            texel_count - stats.covered
        };

        if stats.covered == 0 {
            warn!(
                cage_distance = options.cage_distance,
                "no texel reached the source surface"
            );
        } else if stats.miss_fraction > 0.25 {
            warn!(
                miss_fraction = stats.miss_fraction,
                cage_distance = options.cage_distance,
                "many texels missed the source, consider a larger cage"
            );
        }

        let mut channels = BTreeMap::new();
        for (channel, buffer) in options.channels.iter().zip(buffers) {
            channels.insert(*channel, Texture::from_texels(size, size, buffer)?);
        }
        let validity = Array2::from_shape_vec((size, size), valid)
            .map_err(|e| Error::Algorithm(e.to_string()))?;

        info!(
            covered = stats.covered,
            missed = stats.missed,
            invalid_after_dilation = stats.invalid_after_dilation,
            rays = stats.rays_cast,
            "bake finished"
        );
        Ok(BakeResult {
            channels,
            validity,
            stats,
        })
    }

    /// Sample `rows` texel rows starting at `start_row`.
    ///
    /// Each sample casts a two-sided line through the target surface point
    /// itself rather than from a point pushed outward along the normal, so
    /// sources lying inside or outside the target are both found.
    #[allow(clippy::too_many_arguments)]
    fn bake_band(
        &self,
        target: &Mesh,
        grid: &UvLookupGrid,
        offsets: &[(f32, f32)],
        context: &SampleContext<'_>,
        options: &BakeOptions,
        start_row: usize,
        rows: usize,
    ) -> Band {
        let size = options.resolution as usize;
        let inv_size = 1.0 / size as f32;
        let channel_count = options.channels.len();
        let mut band = Band {
            start_row,
            values: vec![Vec::with_capacity(rows * size); channel_count],
            valid: Vec::with_capacity(rows * size),
            covered: 0,
            missed: 0,
            rays: 0,
        };
        let mut sums = vec![[0.0f32; 4]; channel_count];

        for y in start_row..start_row + rows {
            for x in 0..size {
                sums.iter_mut().for_each(|s| *s = [0.0; 4]);
                let mut inside = 0usize;
                let mut hits = 0usize;

                for &(ox, oy) in offsets {
                    let uv = Point2f::new((x as f32 + ox) * inv_size, (y as f32 + oy) * inv_size);
                    let Some((triangle, bary)) = grid.locate(uv) else {
                        continue;
                    };
                    inside += 1;
                    let surface = interpolate_surface(target, triangle, bary, options.target_uv_channel);
                    if surface.normal.norm_squared() == 0.0 {
                        continue;
                    }

                    band.rays += 1;
                    let mut ray = self
                        .bvh
                        .intersect_line(&surface.position, &surface.normal, options.cage_distance);
                    if ray.is_none() {
                        band.rays += 1;
                        ray = self.bvh.intersect_line(
                            &surface.position,
                            &surface.normal,
                            options.cage_distance * 2.0,
                        );
                    }
                    let Some(ray) = ray else { continue };

                    let hit = self.bvh.sample(ray.triangle, ray.barycentric, options.source_uv_channel);
                    for (sum, &channel) in sums.iter_mut().zip(&options.channels) {
                        if !channel.is_averaged() && hits > 0 {
                            continue;
                        }
                        let value = context.evaluate(channel, &surface, &ray, &hit);
                        for c in 0..4 {
                            sum[c] += value[c];
                        }
                    }
                    hits += 1;
                }

                let valid = hits > 0;
                if valid {
                    band.covered += 1;
                } else if inside > 0 {
                    band.missed += 1;
                }
                for ((values, sum), channel) in band.values.iter_mut().zip(&sums).zip(&options.channels) {
                    let value = if !valid {
                        [0.0; 4]
                    } else if channel.is_averaged() {
                        sum.map(|v| v / hits as f32)
                    } else {
                        *sum
                    };
                    values.push(value);
                }
                band.valid.push(valid);
            }
        }

        band
    }
}

/// Bake `target`'s atlas from `source` in one call
pub fn bake(source: &Mesh, target: &Mesh, options: &BakeOptions, cancel: &CancelToken) -> Result<BakeResult> {
    MaterialBaker::new(source)?.bake(target, options, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodforge_core::{MaterialChannel, MaterialSlot, Point3f, Triangle, Vertex};
    use std::sync::Arc;
    use std::time::Duration;

    fn make_gradient_texture(size: usize) -> Texture {
        Texture::from_fn(size, size, |x, y| {
            [x as f32 / size as f32, y as f32 / size as f32, 0.5, 1.0]
        })
    }

    /// Unit quad in the XY plane at height `z`, UVs equal to XY
    fn make_quad(z: f32, slots: Vec<MaterialSlot>, materials: [usize; 2]) -> Mesh {
        let vertices = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .iter()
            .map(|&(x, y)| Vertex::new(Point3f::new(x, y, z)).with_uv(Point2f::new(x, y)))
            .collect();
        Mesh::from_parts(
            vertices,
            vec![
                Triangle::new([0, 1, 2], materials[0]),
                Triangle::new([0, 2, 3], materials[1]),
            ],
            slots,
        )
    }

    /// Quad tilted so its height grows with x
    fn make_tilted_quad(slope: f32) -> Mesh {
        let mut mesh = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        for v in &mut mesh.vertices {
            v.position.z = slope * v.position.x;
        }
        lodforge_core::recalculate_normals(&mut mesh, 180.0);
        mesh
    }

    fn textured_source() -> Mesh {
        let slot = MaterialSlot::new("source")
            .with_texture(MaterialChannel::Albedo, Arc::new(make_gradient_texture(8)));
        make_quad(0.0, vec![slot], [0, 0])
    }

    #[test]
    fn test_albedo_round_trip() {
        let source = textured_source();
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(8)
            .with_super_sampling_rate(1)
            .with_filter(TextureFilter::Nearest);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();

        let albedo = result.channel(BakeChannel::Albedo).unwrap();
        let expected = make_gradient_texture(8);
        for y in 0..8 {
            for x in 0..8 {
                let got = albedo.get(x, y);
                let want = expected.get(x, y);
                for c in 0..4 {
                    assert_relative_eq!(got[c], want[c], epsilon = 1e-5);
                }
            }
        }
        assert_eq!(result.stats.covered, 64);
        assert_eq!(result.stats.invalid_after_dilation, 0);
        assert!(result.validity.iter().all(|&v| v));
    }

    #[test]
    fn test_offset_target_and_displacement() {
        let source = textured_source();
        let target = make_quad(0.05, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(4)
            .with_super_sampling_rate(1)
            .with_cage_distance(0.1)
            .with_channels([BakeChannel::Displacement, BakeChannel::ObjectNormal]);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();
        assert_eq!(result.stats.covered, 16);

        // source lies 0.05 below, half the cage
        let displacement = result.channel(BakeChannel::Displacement).unwrap().get(1, 1);
        assert_relative_eq!(displacement[0], 0.25, epsilon = 1e-4);
        let normal = result.channel(BakeChannel::ObjectNormal).unwrap().get(2, 2);
        assert_relative_eq!(normal[2], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_widened_cage_still_hits() {
        let source = textured_source();
        let target = make_quad(0.15, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(4).with_super_sampling_rate(1).with_cage_distance(0.1);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();
        assert_eq!(result.stats.covered, 16);
        // every texel needed the second, widened query
        assert_eq!(result.stats.rays_cast, 32);
    }

    #[test]
    fn test_out_of_cage_is_invalid() {
        let source = textured_source();
        let target = make_quad(1.0, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(4).with_super_sampling_rate(1).with_cage_distance(0.1);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();
        assert_eq!(result.stats.covered, 0);
        assert_eq!(result.stats.missed, 16);
        assert_relative_eq!(result.stats.invalid_fraction_before_dilation, 1.0);
        assert_relative_eq!(result.stats.miss_fraction, 1.0);
        assert_eq!(result.stats.invalid_after_dilation, 16);
    }

    #[test]
    fn test_invalid_fraction_monotone_in_cage() {
        let source = textured_source();
        let target = make_tilted_quad(0.5);
        let mut previous = f32::INFINITY;
        let mut fractions = Vec::new();
        for cage in [0.02, 0.05, 0.1, 0.2, 0.4] {
            let options = BakeOptions::new(16)
                .with_super_sampling_rate(1)
                .with_cage_distance(cage);
            let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();
            let fraction = result.stats.invalid_fraction_before_dilation;
            assert!(fraction <= previous);
            previous = fraction;
            fractions.push(fraction);
        }
        assert!(fractions[0] > fractions[fractions.len() - 1]);
    }

    #[test]
    fn test_dilation_fills_background() {
        let slot = MaterialSlot::new("flat").with_constant(MaterialChannel::Albedo, [0.2, 0.4, 0.6, 1.0]);
        let source = make_quad(0.0, vec![slot], [0, 0]);
        // atlas covers only the lower-right half of the unit square
        let mut target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        target.triangles.truncate(1);
        let options = BakeOptions::new(8).with_super_sampling_rate(1);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();

        assert!(result.stats.covered > 0 && result.stats.covered < 64);
        assert_eq!(result.stats.missed, 0);
        assert_eq!(result.stats.invalid_after_dilation, 0);
        assert!(result.validity.iter().any(|&v| !v));
        let albedo = result.channel(BakeChannel::Albedo).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_relative_eq!(albedo.get(x, y)[1], 0.4, epsilon = 1e-6);
            }
        }

        let undilated = bake(
            &source,
            &target,
            &options.clone().with_dilation(false),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(undilated.stats.invalid_after_dilation, 64 - undilated.stats.covered);
    }

    #[test]
    fn test_geometry_channels() {
        let source = textured_source();
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(4)
            .with_super_sampling_rate(1)
            .with_channels([BakeChannel::TangentNormal, BakeChannel::Position]);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();

        let normal = result.channel(BakeChannel::TangentNormal).unwrap().get(1, 2);
        assert_relative_eq!(normal[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(normal[1], 0.5, epsilon = 1e-5);
        assert_relative_eq!(normal[2], 1.0, epsilon = 1e-5);

        let position = result.channel(BakeChannel::Position).unwrap().get(1, 2);
        assert_relative_eq!(position[0], 0.375, epsilon = 1e-5);
        assert_relative_eq!(position[1], 0.625, epsilon = 1e-5);
        assert_relative_eq!(position[2], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_material_id_and_constants() {
        let slots = vec![
            MaterialSlot::new("a").with_constant(MaterialChannel::Roughness, [0.9; 4]),
            MaterialSlot::new("b").with_constant(MaterialChannel::Roughness, [0.1; 4]),
        ];
        let source = make_quad(0.0, slots, [1, 0]);
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(4)
            .with_super_sampling_rate(4)
            .with_channels([BakeChannel::MaterialId, BakeChannel::Roughness]);
        let result = bake(&source, &target, &options, &CancelToken::new()).unwrap();

        // texel (3, 0) lies inside the lower-right triangle, which uses slot 1
        let ids = result.channel(BakeChannel::MaterialId).unwrap();
        assert_eq!(ids.get(3, 0)[0], 1.0);
        assert_eq!(ids.get(0, 3)[0], 0.0);
        let roughness = result.channel(BakeChannel::Roughness).unwrap();
        assert_relative_eq!(roughness.get(3, 0)[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(roughness.get(0, 3)[0], 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_cancelled_bake() {
        let source = textured_source();
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = bake(&source, &target, &BakeOptions::new(16), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancel_while_bands_run() {
        let source = textured_source();
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let options = BakeOptions::new(1024)
            .with_super_sampling_rate(4)
            .with_band_rows(1);
        let baker = MaterialBaker::new(&source).unwrap();
        let cancel = CancelToken::new();

        let result = std::thread::scope(|scope| {
            let trigger = cancel.clone();
            scope.spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                trigger.cancel();
            });
            baker.bake(&target, &options, &cancel)
        });
        assert!(cancel.is_cancelled());
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_rejects_bad_options() {
        let source = textured_source();
        let target = make_quad(0.0, vec![MaterialSlot::default()], [0, 0]);
        let cancel = CancelToken::new();
        let bad_cage = BakeOptions::new(8).with_cage_distance(0.0);
        assert!(matches!(bake(&source, &target, &bad_cage, &cancel), Err(Error::InvalidConfig(_))));
        let bad_channel = BakeOptions::new(8).with_target_uv_channel(2);
        assert!(matches!(bake(&source, &target, &bad_channel, &cancel), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            MaterialBaker::new(&Mesh::new()),
            Err(Error::InvalidInput(_))
        ));
    }
}
