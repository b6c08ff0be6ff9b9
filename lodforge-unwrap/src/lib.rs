//! UV atlas construction for lodforge
//!
//! This crate cuts a mesh into charts, flattens every chart with least
//! squares conformal maps and packs the charts into a single square atlas.
//! The result is a copy of the mesh carrying the atlas in one UV channel.

pub mod charts;
pub mod lscm;
pub mod packing;

pub use charts::{build_charts, face_adjacency, Chart, EdgeNeighbor, FaceAdjacency};
pub use lscm::{lscm, planar_projection};
pub use packing::{convex_hull, min_area_rotation, pack_rects, PackedRect};

use lodforge_core::{position_key, CancelToken, Error, Mesh, Point2f, Result, Triangle, Vertex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Largest atlas the overflow search will suggest
const MAX_SUGGESTED_RESOLUTION: u32 = 1 << 15;

/// Density reduction applied after every failed packing attempt
const DENSITY_STEP: f32 = 0.95;

/// How a chart was flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flattening {
    /// Least squares conformal map
    Lscm,
    /// Orthographic projection onto the chart's average normal plane
    Planar,
    /// Fixed right triangle for a zero-area face
    Degenerate,
}

/// Atlas builder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasOptions {
    /// Atlas edge length in pixels, a power of two
    pub resolution: u32,
    /// Empty pixels kept between charts and around the border
    pub gutter_pixels: u32,
    /// Smallest chart edge in pixels
    pub min_chart_pixels: u32,
    /// Dihedral angle above which an edge always splits charts
    pub hard_angle_degrees: f32,
    /// Largest deviation of a triangle normal from its chart's average normal
    pub max_chart_angle_degrees: f32,
    /// UV channel receiving the atlas coordinates
    pub output_uv_channel: usize,
}

impl Default for AtlasOptions {
    fn default() -> Self {
        Self {
            resolution: 1024,
            gutter_pixels: 4,
            min_chart_pixels: 2,
            hard_angle_degrees: 70.0,
            max_chart_angle_degrees: 60.0,
            output_uv_channel: 0,
        }
    }
}

impl AtlasOptions {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn with_gutter_pixels(mut self, gutter: u32) -> Self {
        self.gutter_pixels = gutter;
        self
    }

    pub fn with_min_chart_pixels(mut self, pixels: u32) -> Self {
        self.min_chart_pixels = pixels;
        self
    }

    pub fn with_hard_angle(mut self, degrees: f32) -> Self {
        self.hard_angle_degrees = degrees;
        self
    }

    pub fn with_max_chart_angle(mut self, degrees: f32) -> Self {
        self.max_chart_angle_degrees = degrees;
        self
    }

    pub fn with_output_uv_channel(mut self, channel: usize) -> Self {
        self.output_uv_channel = channel;
        self
    }

    /// Check the settings against each other
    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "atlas resolution {} is not a power of two",
                self.resolution
            )));
        }
        if self.min_chart_pixels == 0 {
            return Err(Error::InvalidConfig(
                "min_chart_pixels must be at least 1".to_string(),
            ));
        }
        if 2 * self.gutter_pixels + self.min_chart_pixels > self.resolution {
            return Err(Error::InvalidConfig(format!(
                "gutter of {}px leaves no room in a {}px atlas",
                self.gutter_pixels, self.resolution
            )));
        }
        for (name, value) in [
            ("hard_angle_degrees", self.hard_angle_degrees),
            ("max_chart_angle_degrees", self.max_chart_angle_degrees),
        ] {
            if !(value > 0.0 && value <= 180.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be in (0, 180], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Placement of one chart in the atlas
#[derive(Debug, Clone, PartialEq)]
pub struct ChartInfo {
    /// Triangle indices, valid for both the input and the output mesh
    pub triangles: Vec<usize>,
    pub flattening: Flattening,
    pub rect: PackedRect,
    /// Sum of the chart's 3D triangle areas
    pub surface_area: f32,
}

/// Mesh carrying the new atlas plus packing statistics
#[derive(Debug, Clone)]
pub struct AtlasResult {
    pub mesh: Mesh,
    pub charts: Vec<ChartInfo>,
    /// Fraction of the unit square covered by UV triangles
    pub utilization: f32,
    /// Pixels per world unit used for the final layout, zero when every
    /// chart was fitted into a minimum-size rectangle
    pub texel_density: f32,
    pub resolution: u32,
    pub uv_channel: usize,
}

/// Atlas description without the mesh it was written into
#[derive(Debug, Clone)]
pub struct AtlasLayout {
    pub charts: Vec<ChartInfo>,
    pub utilization: f32,
    pub texel_density: f32,
    pub resolution: u32,
    pub uv_channel: usize,
}

impl AtlasResult {
    /// Split off the mesh from the layout description
    pub fn into_parts(self) -> (Mesh, AtlasLayout) {
        let layout = AtlasLayout {
            charts: self.charts,
            utilization: self.utilization,
            texel_density: self.texel_density,
            resolution: self.resolution,
            uv_channel: self.uv_channel,
        };
        (self.mesh, layout)
    }
}

/// A flattened chart before packing, in world units with bounds at the origin
struct FlatChart {
    chart: Chart,
    flattening: Flattening,
    /// Local vertex per triangle corner
    corners: Vec<[usize; 3]>,
    uvs: Vec<Point2f>,
    extent: (f32, f32),
    surface_area: f32,
}

/// Build a packed UV atlas for `mesh`.
///
/// Triangle order is preserved; vertices are duplicated wherever a vertex is
/// shared by several charts.
pub fn build_atlas(mesh: &Mesh, options: &AtlasOptions, cancel: &CancelToken) -> Result<AtlasResult> {
    options.validate()?;
    let channel_count = mesh.uv_channel_count();
    if options.output_uv_channel > channel_count {
        return Err(Error::InvalidConfig(format!(
            "output UV channel {} would leave a gap after {} existing channels",
            options.output_uv_channel, channel_count
        )));
    }
    cancel.check()?;

    let charts = build_charts(mesh, options.hard_angle_degrees, options.max_chart_angle_degrees);
    debug!(charts = charts.len(), triangles = mesh.triangle_count(), "segmented mesh into charts");

    let flat: Vec<FlatChart> = charts
        .into_par_iter()
        .map(|chart| {
            cancel.check()?;
            Ok(flatten_chart(mesh, chart))
        })
        .collect::<Result<_>>()?;

    let planar = flat.iter().filter(|c| c.flattening == Flattening::Planar).count();
    if planar > 0 {
        warn!(planar, "LSCM failed for some charts, used planar projection");
    }

    let total_area: f32 = flat
        .iter()
        .filter(|c| c.flattening != Flattening::Degenerate)
        .map(|c| c.extent.0 * c.extent.1)
        .sum();
    let (density, rects) = pack_charts(&flat, total_area, options)?;
    cancel.check()?;

    let (out_mesh, utilization) = write_atlas(mesh, &flat, &rects, density, options);
    info!(
        charts = flat.len(),
        resolution = options.resolution,
        utilization,
        "built UV atlas"
    );

    let charts = flat
        .into_iter()
        .zip(rects)
        .map(|(c, rect)| ChartInfo {
            triangles: c.chart.triangles,
            flattening: c.flattening,
            rect,
            surface_area: c.surface_area,
        })
        .collect();

    Ok(AtlasResult {
        mesh: out_mesh,
        charts,
        utilization,
        texel_density: density,
        resolution: options.resolution,
        uv_channel: options.output_uv_channel,
    })
}

fn flatten_chart(mesh: &Mesh, chart: Chart) -> FlatChart {
    let surface_area: f32 = chart.triangles.iter().map(|&t| mesh.triangle_area(t)).sum();

    if chart.degenerate {
        return FlatChart {
            corners: vec![[0, 1, 2]],
            uvs: vec![Point2f::new(0.0, 0.0), Point2f::new(1.0, 0.0), Point2f::new(0.0, 1.0)],
            extent: (1.0, 1.0),
            flattening: Flattening::Degenerate,
            chart,
            surface_area,
        };
    }

    // local vertices are welded by position so split attributes share a UV
    let mut local_ids: HashMap<[u32; 3], usize> = HashMap::new();
    let mut positions = Vec::new();
    let corners: Vec<[usize; 3]> = chart
        .triangles
        .iter()
        .map(|&t| {
            mesh.triangles[t].indices.map(|v| {
                let p = mesh.vertices[v].position;
                *local_ids.entry(position_key(&p)).or_insert_with(|| {
                    positions.push(p);
                    positions.len() - 1
                })
            })
        })
        .collect();

    let (mut uvs, flattening) = match lscm(&positions, &corners) {
        Some(uvs) => (uvs, Flattening::Lscm),
        None => (planar_projection(&positions, &chart.normal), Flattening::Planar),
    };

    // equalise texel density across charts
    let uv_area: f32 = corners
        .iter()
        .map(|c| lscm::uv_signed_area2(&uvs, c).abs() * 0.5)
        .sum();
    if uv_area > 0.0 && surface_area > 0.0 {
        let scale = (surface_area / uv_area).sqrt();
        for uv in &mut uvs {
            uv.coords *= scale;
        }
    }

    let angle = min_area_rotation(&uvs);
    let extent = packing::orient_to_origin(&mut uvs, angle);

    FlatChart {
        chart,
        flattening,
        corners,
        uvs,
        extent,
        surface_area,
    }
}

/// Pixel size of every chart at `density`
fn chart_sizes(flat: &[FlatChart], density: f32, min_pixels: u32) -> Vec<(u32, u32)> {
    flat.iter()
        .map(|c| match c.flattening {
            Flattening::Degenerate => (min_pixels, min_pixels),
            _ => (
                ((c.extent.0 * density).ceil() as u32).max(min_pixels),
                ((c.extent.1 * density).ceil() as u32).max(min_pixels),
            ),
        })
        .collect()
}

/// Find the largest density, starting from a perfect fit, at which every chart packs
fn pack_charts(flat: &[FlatChart], total_area: f32, options: &AtlasOptions) -> Result<(f32, Vec<PackedRect>)> {
    let resolution = options.resolution;
    let gutter = options.gutter_pixels;
    let min = options.min_chart_pixels;
    let usable = (resolution - 2 * gutter) as f32;

    let mut density = if total_area > 0.0 {
        usable / total_area.sqrt()
    } else {
        0.0
    };
    let mut attempts = 0usize;
    loop {
        let sizes = chart_sizes(flat, density, min);
        if let Some(rects) = pack_rects(&sizes, resolution, gutter) {
            debug!(density, attempts, "packed charts");
            return Ok((density, rects));
        }
        attempts += 1;
        let at_minimum = sizes.iter().all(|&(w, h)| w == min && h == min);
        if at_minimum || density <= 0.0 {
            break;
        }
        density *= DENSITY_STEP;
        // once every extent rounds below the minimum size, try the minimum directly
        let largest = flat
            .iter()
            .filter(|c| c.flattening != Flattening::Degenerate)
            .map(|c| c.extent.0.max(c.extent.1))
            .fold(0.0f32, f32::max);
        if largest * density < min as f32 {
            density = 0.0;
        }
    }

    let min_sizes = chart_sizes(flat, 0.0, min);
    let mut suggested = resolution.saturating_mul(2);
    while suggested < MAX_SUGGESTED_RESOLUTION && pack_rects(&min_sizes, suggested, gutter).is_none() {
        suggested *= 2;
    }
    warn!(
        resolution,
        suggested,
        charts = flat.len(),
        "charts do not fit at the minimum chart size"
    );
    Err(Error::AtlasOverflow {
        resolution,
        suggested_resolution: suggested,
        charts: flat.len(),
    })
}

/// Pixels per chart unit along each axis.
///
/// A density of zero means the charts were packed at the minimum chart size,
/// so each chart is fitted into its own rectangle keeping its aspect ratio.
fn chart_scale(chart: &FlatChart, rect: &PackedRect, density: f32) -> (f32, f32) {
    let (w, h) = (rect.width as f32, rect.height as f32);
    match chart.flattening {
        Flattening::Degenerate => (w, h),
        _ if density > 0.0 => (density, density),
        _ => {
            let (ex, ey) = chart.extent;
            let fit = match (ex > 0.0, ey > 0.0) {
                (true, true) => (w / ex).min(h / ey),
                (true, false) => w / ex,
                (false, true) => h / ey,
                (false, false) => w.min(h),
            };
            (fit, fit)
        }
    }
}

/// Emit the output mesh with atlas UVs; returns it with the covered UV area
fn write_atlas(
    mesh: &Mesh,
    flat: &[FlatChart],
    rects: &[PackedRect],
    density: f32,
    options: &AtlasOptions,
) -> (Mesh, f32) {
    let resolution = options.resolution as f32;
    let channel = options.output_uv_channel;

    // triangle -> (chart, position within the chart)
    let mut owner = vec![(0usize, 0usize); mesh.triangle_count()];
    for (ci, c) in flat.iter().enumerate() {
        for (k, &t) in c.chart.triangles.iter().enumerate() {
            owner[t] = (ci, k);
        }
    }

    let to_atlas = |ci: usize, local: usize| -> Point2f {
        let c = &flat[ci];
        let rect = rects[ci];
        let uv = c.uvs[local];
        let (sx, sy) = chart_scale(c, &rect, density);
        let (px, py) = (uv.x * sx, uv.y * sy);
        Point2f::new(
            (rect.x as f32 + px) / resolution,
            (rect.y as f32 + py) / resolution,
        )
    };

    let mut vertices: Vec<Vertex> = Vec::with_capacity(mesh.vertex_count());
    let mut triangles: Vec<Triangle> = Vec::with_capacity(mesh.triangle_count());
    let mut remap: HashMap<(usize, usize), usize> = HashMap::new();
    let mut covered = 0.0f32;

    for (t, tri) in mesh.triangles.iter().enumerate() {
        let (ci, k) = owner[t];
        let degenerate = flat[ci].flattening == Flattening::Degenerate;
        let local = flat[ci].corners[k];
        let mut indices = [0usize; 3];
        let mut uvs = [Point2f::origin(); 3];
        for corner in 0..3 {
            let source = tri.indices[corner];
            let uv = to_atlas(ci, local[corner]);
            uvs[corner] = uv;
            let mut emit = || {
                let mut vertex = mesh.vertices[source].clone();
                if channel < vertex.uvs.len() {
                    vertex.uvs[channel] = uv;
                } else {
                    vertex.uvs.resize(channel, Point2f::origin());
                    vertex.uvs.push(uv);
                }
                vertices.push(vertex);
                vertices.len() - 1
            };
            indices[corner] = if degenerate {
                emit()
            } else {
                *remap.entry((ci, source)).or_insert_with(emit)
            };
        }
        let area2 = (uvs[1].x - uvs[0].x) * (uvs[2].y - uvs[0].y)
            - (uvs[2].x - uvs[0].x) * (uvs[1].y - uvs[0].y);
        covered += area2.abs() * 0.5;
        triangles.push(Triangle::new(indices, tri.material));
    }

    let out = Mesh::from_parts(vertices, triangles, mesh.material_slots.clone());
    (out, covered)
}
