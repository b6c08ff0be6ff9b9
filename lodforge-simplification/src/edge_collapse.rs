//! Edge collapse simplification
//!
//! Implements iterative edge collapse driven by quadric error metrics (QEM).
//! Topology is kept in index arenas: per-vertex incident triangle lists with
//! tombstoned vertices and triangles, compacted once the loop finishes.
//! Candidates live in a binary heap with lazy invalidation; every entry
//! remembers the version counters of its endpoints and is dropped on pop when
//! either endpoint changed since it was pushed.

use crate::constraints::{classify_vertices, open_boundary_edges};
use crate::quadric::{boundary_plane, Quadric};
use crate::{MeshSimplifier, Simplified};
use itertools::Itertools;
use lodforge_core::{
    blend_skin_weights, normalize_skin_weights, Aabb, CancelToken, Error, Mesh, Point2f, Point3f,
    Result, Triangle, Vector3f, Vector4f, Vertex,
};
use nalgebra::Vector3;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, info};

/// Heap pops between cancellation polls
const COLLAPSE_BATCH: usize = 256;

/// Neighbourhoods wider than this are re-evaluated on the rayon pool
const PARALLEL_REEVALUATION: usize = 64;

/// Minimum cosine between a face normal before and after a collapse
const FLIP_THRESHOLD: f32 = 0.0;

// ============================================================
// Options and report
// ============================================================

/// When the collapse loop stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimplifyTarget {
    /// Stop at or below this many triangles
    TriangleCount(usize),
    /// Keep this fraction of the input triangles, in `(0, 1]`
    Ratio(f32),
    /// Stop before the first collapse whose error exceeds this distance
    ErrorBudget(f64),
}

/// Simplification target and preservation constraints
#[derive(Debug, Clone, PartialEq)]
pub struct SimplifyOptions {
    pub target: SimplifyTarget,
    pub preserve_uv_seams: bool,
    pub preserve_material_boundaries: bool,
    pub preserve_skin_discontinuities: bool,
    /// Never move vertices on open boundaries
    pub lock_boundaries: bool,
    /// Weight of the boundary constraint planes, 0 disables them
    pub boundary_weight: f64,
    /// Triangle index sets that must survive untouched
    pub locked_regions: Vec<Vec<usize>>,
    /// Cap on bone influences per vertex, 0 = unlimited
    pub max_bone_influences: usize,
    /// Solve for the optimal merged position instead of using endpoints
    pub optimal_placement: bool,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            target: SimplifyTarget::Ratio(0.5),
            preserve_uv_seams: true,
            preserve_material_boundaries: true,
            preserve_skin_discontinuities: true,
            lock_boundaries: false,
            boundary_weight: 10.0,
            locked_regions: Vec::new(),
            max_bone_influences: 0,
            optimal_placement: true,
        }
    }
}

impl SimplifyOptions {
    pub fn new(target: SimplifyTarget) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: SimplifyTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_preserve_uv_seams(mut self, preserve: bool) -> Self {
        self.preserve_uv_seams = preserve;
        self
    }

    pub fn with_preserve_material_boundaries(mut self, preserve: bool) -> Self {
        self.preserve_material_boundaries = preserve;
        self
    }

    pub fn with_preserve_skin_discontinuities(mut self, preserve: bool) -> Self {
        self.preserve_skin_discontinuities = preserve;
        self
    }

    pub fn with_lock_boundaries(mut self, lock: bool) -> Self {
        self.lock_boundaries = lock;
        self
    }

    pub fn with_boundary_weight(mut self, weight: f64) -> Self {
        self.boundary_weight = weight;
        self
    }

    pub fn with_locked_regions(mut self, regions: Vec<Vec<usize>>) -> Self {
        self.locked_regions = regions;
        self
    }

    pub fn with_max_bone_influences(mut self, max: usize) -> Self {
        self.max_bone_influences = max;
        self
    }

    pub fn with_optimal_placement(mut self, optimal: bool) -> Self {
        self.optimal_placement = optimal;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.target {
            SimplifyTarget::Ratio(r) if !(r > 0.0 && r <= 1.0) => {
                return Err(Error::InvalidConfig(format!(
                    "triangle ratio must be in (0, 1], got {}",
                    r
                )));
            }
            SimplifyTarget::ErrorBudget(e) if !(e >= 0.0 && e.is_finite()) => {
                return Err(Error::InvalidConfig(format!(
                    "error budget must be a finite non-negative distance, got {}",
                    e
                )));
            }
            _ => {}
        }
        if !(self.boundary_weight >= 0.0 && self.boundary_weight.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "boundary weight must be non-negative, got {}",
                self.boundary_weight
            )));
        }
        Ok(())
    }
}

/// Summary of a simplification run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimplifyReport {
    pub original_triangles: usize,
    pub final_triangles: usize,
    pub collapses: usize,
    /// Candidates discarded by the topology and flip checks
    pub rejected: usize,
    /// Largest error, as the square root of the quadric cost, of any collapse
    pub max_error: f64,
}

// ============================================================
// Working mesh
// ============================================================

/// A planned collapse of `remove` into `keep`
#[derive(Debug, Clone, Copy, PartialEq)]
struct CollapsePlan {
    keep: usize,
    remove: usize,
    position: Point3f,
    /// Blend factor from `keep` towards `remove` for attributes
    t: f32,
    cost: f64,
}

struct CollapseMesh {
    vertices: Vec<Vertex>,
    triangles: Vec<[usize; 3]>,
    materials: Vec<usize>,
    triangle_removed: Vec<bool>,
    vertex_removed: Vec<bool>,
    /// Incident triangles per vertex; may hold tombstoned entries
    vertex_triangles: Vec<Vec<usize>>,
    quadrics: Vec<Quadric>,
    constrained: Vec<bool>,
    versions: Vec<u32>,
    active_triangles: usize,
}

impl CollapseMesh {
    /// Build the working mesh, dropping zero-area and duplicate triangles
    fn new(mesh: &Mesh, constrained: Vec<bool>, options: &SimplifyOptions) -> Self {
        let mut seen: HashSet<[usize; 3]> = HashSet::new();
        let mut triangles = Vec::with_capacity(mesh.triangle_count());
        let mut materials = Vec::with_capacity(mesh.triangle_count());
        for (t, tri) in mesh.triangles.iter().enumerate() {
            if tri.is_degenerate() || mesh.triangle_normal(t).is_none() {
                continue;
            }
            let mut key = tri.indices;
            key.sort_unstable();
            if !seen.insert(key) {
                continue;
            }
            triangles.push(tri.indices);
            materials.push(tri.material);
        }
        let filtered = mesh.triangle_count() - triangles.len();
        if filtered > 0 {
            debug!(filtered, "dropped zero-area and duplicate triangles");
        }

        let nv = mesh.vertex_count();
        let mut vertex_triangles = vec![Vec::new(); nv];
        let mut quadrics = vec![Quadric::zero(); nv];
        for (t, idx) in triangles.iter().enumerate() {
            let [a, b, c] = *idx;
            for &v in idx {
                vertex_triangles[v].push(t);
            }
            let (pa, pb, pc) = (
                &mesh.vertices[a].position,
                &mesh.vertices[b].position,
                &mesh.vertices[c].position,
            );
            if let Some(q) = Quadric::from_triangle(pa, pb, pc) {
                quadrics[a] += q;
                quadrics[b] += q;
                quadrics[c] += q;
            }
        }

        let mut work = Self {
            vertices: mesh.vertices.clone(),
            active_triangles: triangles.len(),
            triangle_removed: vec![false; triangles.len()],
            triangles,
            materials,
            vertex_removed: vec![false; nv],
            vertex_triangles,
            quadrics,
            constrained,
            versions: vec![0; nv],
        };
        if options.boundary_weight > 0.0 {
            work.add_boundary_planes(options.boundary_weight);
        }
        work
    }

    /// Add perpendicular constraint planes along open boundary edges
    fn add_boundary_planes(&mut self, weight: f64) {
        let view = self.to_mesh_view();
        for (t, a, b) in open_boundary_edges(&view) {
            let Some(n) = view.triangle_normal(t) else {
                continue;
            };
            let n = Vector3::new(n.x as f64, n.y as f64, n.z as f64);
            let (pa, pb) = (self.vertices[a].position, self.vertices[b].position);
            if let Some(plane) = boundary_plane(&pa, &pb, &n) {
                let q = Quadric::from_plane(&plane) * weight;
                self.quadrics[a] += q;
                self.quadrics[b] += q;
            }
        }
    }

    /// Live triangles as a plain mesh, sharing the working vertices
    fn to_mesh_view(&self) -> Mesh {
        let triangles = self
            .triangles
            .iter()
            .zip(&self.materials)
            .zip(&self.triangle_removed)
            .filter(|(_, removed)| !**removed)
            .map(|((&idx, &material), _)| Triangle::new(idx, material))
            .collect();
        Mesh::from_parts(self.vertices.clone(), triangles, Vec::new())
    }

    fn live_triangles(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.vertex_triangles[v]
            .iter()
            .copied()
            .filter(move |&t| !self.triangle_removed[t] && self.triangles[t].contains(&v))
    }

    fn neighbors(&self, v: usize) -> Vec<usize> {
        self.live_triangles(v)
            .flat_map(|t| self.triangles[t])
            .filter(|&u| u != v)
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Unique undirected edges of the live triangles
    fn edges(&self) -> Vec<(usize, usize)> {
        self.triangles
            .iter()
            .zip(&self.triangle_removed)
            .filter(|(_, removed)| !**removed)
            .flat_map(|(&[a, b, c], _)| [(a, b), (b, c), (c, a)])
            .map(|(a, b)| (a.min(b), a.max(b)))
            .sorted_unstable()
            .dedup()
            .collect()
    }

    fn face_normal(&self, idx: [usize; 3], moved: Option<(usize, Point3f)>) -> Option<Vector3f> {
        let p = idx.map(|i| match moved {
            Some((m, pos)) if m == i => pos,
            _ => self.vertices[i].position,
        });
        (p[1] - p[0]).cross(&(p[2] - p[0])).try_normalize(1e-12)
    }

    /// Cheapest collapse of edge `(a, b)`, `None` when both ends are constrained
    fn plan(&self, a: usize, b: usize, options: &SimplifyOptions) -> Option<CollapsePlan> {
        let q = self.quadrics[a] + self.quadrics[b];
        let pa = self.vertices[a].position;
        let pb = self.vertices[b].position;

        match (self.constrained[a], self.constrained[b]) {
            (true, true) => None,
            (true, false) => Some(CollapsePlan {
                keep: a,
                remove: b,
                position: pa,
                t: 0.0,
                cost: q.evaluate(&pa),
            }),
            (false, true) => Some(CollapsePlan {
                keep: b,
                remove: a,
                position: pb,
                t: 0.0,
                cost: q.evaluate(&pb),
            }),
            (false, false) => {
                let mid = Point3f::from((pa.coords + pb.coords) * 0.5);
                let mut best = [pa, pb, mid]
                    .into_iter()
                    .map(|p| (p, q.evaluate(&p)))
                    .min_by(|x, y| x.1.total_cmp(&y.1))
                    .unwrap_or((pa, 0.0));

                if options.optimal_placement {
                    let reach = Aabb::from_points([pa, pb].iter()).expanded((pb - pa).norm());
                    if let Some(p) = q.optimal_point().filter(|p| reach.contains(p)) {
                        let cost = q.evaluate(&p);
                        if cost <= best.1 {
                            best = (p, cost);
                        }
                    }
                }

                let edge = pb - pa;
                let len_sq = edge.norm_squared();
                let t = if len_sq > 0.0 {
                    ((best.0 - pa).dot(&edge) / len_sq).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                Some(CollapsePlan {
                    keep: a,
                    remove: b,
                    position: best.0,
                    t,
                    cost: best.1,
                })
            }
        }
    }

    /// Link condition, flip and duplicate-face checks
    fn is_collapse_valid(&self, plan: &CollapsePlan) -> bool {
        let (keep, remove) = (plan.keep, plan.remove);
        let shared: Vec<usize> = self
            .live_triangles(keep)
            .filter(|&t| self.triangles[t].contains(&remove))
            .collect();
        if shared.is_empty() || shared.len() > 2 {
            return false;
        }

        let nk = self.neighbors(keep);
        let nr = self.neighbors(remove);
        let common = nk.iter().filter(|v| nr.binary_search(v).is_ok()).count();
        if common != shared.len() {
            return false;
        }

        // the apex of a removed face must keep at least one other face
        for &t in &shared {
            for c in self.triangles[t] {
                if c != keep && c != remove && self.live_triangles(c).all(|u| shared.contains(&u)) {
                    return false;
                }
            }
        }

        let keep_faces: HashSet<[usize; 3]> = self
            .live_triangles(keep)
            .filter(|t| !shared.contains(t))
            .map(|t| {
                let mut key = self.triangles[t];
                key.sort_unstable();
                key
            })
            .collect();

        for v in [keep, remove] {
            for t in self.live_triangles(v) {
                if shared.contains(&t) {
                    continue;
                }
                let idx = self.triangles[t];
                let before = self.face_normal(idx, None);
                let after = match self.face_normal(idx, Some((v, plan.position))) {
                    Some(n) => n,
                    None => return false,
                };
                if let Some(before) = before {
                    if before.dot(&after) < FLIP_THRESHOLD {
                        return false;
                    }
                }
                if v == remove {
                    let mut key = idx.map(|i| if i == remove { keep } else { i });
                    key.sort_unstable();
                    if keep_faces.contains(&key) {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn merged_vertex(&self, plan: &CollapsePlan, options: &SimplifyOptions) -> Vertex {
        let a = &self.vertices[plan.keep];
        if self.constrained[plan.keep] {
            return a.clone();
        }
        let b = &self.vertices[plan.remove];
        let t = plan.t;
        let normal = (a.normal * (1.0 - t) + b.normal * t)
            .try_normalize(f32::EPSILON)
            .unwrap_or(a.normal);
        let tangent_dir = (a.tangent.xyz() * (1.0 - t) + b.tangent.xyz() * t)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| a.tangent.xyz());
        let uvs = a
            .uvs
            .iter()
            .zip_longest(b.uvs.iter())
            .map(|pair| match pair {
                itertools::EitherOrBoth::Both(ua, ub) => {
                    Point2f::from(ua.coords * (1.0 - t) + ub.coords * t)
                }
                itertools::EitherOrBoth::Left(u) | itertools::EitherOrBoth::Right(u) => *u,
            })
            .collect();
        let skin = if a.skin.is_empty() && b.skin.is_empty() {
            Vec::new()
        } else {
            blend_skin_weights(&a.skin, &b.skin, t, options.max_bone_influences)
        };

        Vertex {
            position: plan.position,
            normal,
            tangent: Vector4f::new(tangent_dir.x, tangent_dir.y, tangent_dir.z, a.tangent.w),
            uvs,
            skin,
        }
    }

    fn collapse(&mut self, plan: &CollapsePlan, options: &SimplifyOptions) {
        let merged = self.merged_vertex(plan, options);
        let (keep, remove) = (plan.keep, plan.remove);

        let incident: Vec<usize> = self.live_triangles(remove).collect();
        for t in incident {
            if self.triangles[t].contains(&keep) {
                self.triangle_removed[t] = true;
                self.active_triangles -= 1;
            } else {
                for i in self.triangles[t].iter_mut() {
                    if *i == remove {
                        *i = keep;
                    }
                }
                self.vertex_triangles[keep].push(t);
            }
        }

        self.vertex_triangles[remove].clear();
        self.vertex_removed[remove] = true;
        self.versions[remove] += 1;

        self.vertices[keep] = merged;
        let q = self.quadrics[remove];
        self.quadrics[keep] += q;
        self.versions[keep] += 1;

        let removed = &self.triangle_removed;
        self.vertex_triangles[keep].retain(|&t| !removed[t]);
    }

    fn into_mesh(self, source: &Mesh, max_bone_influences: usize) -> Mesh {
        let triangles = self
            .triangles
            .iter()
            .zip(&self.materials)
            .zip(&self.triangle_removed)
            .filter(|(_, removed)| !**removed)
            .map(|((&idx, &material), _)| Triangle::new(idx, material))
            .collect();
        let mut mesh = Mesh::from_parts(self.vertices, triangles, source.material_slots.clone());
        mesh.compact();
        for v in &mut mesh.vertices {
            if !v.skin.is_empty() {
                v.skin = normalize_skin_weights(std::mem::take(&mut v.skin), max_bone_influences);
            }
        }
        mesh
    }
}

// ============================================================
// Candidate heap entries
// ============================================================

#[derive(Debug, Clone)]
struct Candidate {
    plan: CollapsePlan,
    keep_version: u32,
    remove_version: u32,
}

impl Candidate {
    fn new(plan: CollapsePlan, versions: &[u32]) -> Self {
        Self {
            keep_version: versions[plan.keep],
            remove_version: versions[plan.remove],
            plan,
        }
    }

    fn is_current(&self, work: &CollapseMesh) -> bool {
        !work.vertex_removed[self.plan.keep]
            && !work.vertex_removed[self.plan.remove]
            && work.versions[self.plan.keep] == self.keep_version
            && work.versions[self.plan.remove] == self.remove_version
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first, ties broken by vertex index
        other
            .plan
            .cost
            .total_cmp(&self.plan.cost)
            .then_with(|| other.plan.keep.cmp(&self.plan.keep))
            .then_with(|| other.plan.remove.cmp(&self.plan.remove))
    }
}

// ============================================================
// Edge Collapse Simplifier
// ============================================================

/// Quadric edge collapse simplifier honouring seam, material, skin and
/// region constraints.
#[derive(Debug, Clone, Default)]
pub struct EdgeCollapseSimplifier {
    pub options: SimplifyOptions,
}

impl EdgeCollapseSimplifier {
    pub fn new(options: SimplifyOptions) -> Self {
        Self { options }
    }

    fn plan_edges(&self, work: &CollapseMesh, edges: &[(usize, usize)]) -> Vec<Candidate> {
        let plan = |&(a, b): &(usize, usize)| {
            work.plan(a, b, &self.options)
                .map(|p| Candidate::new(p, &work.versions))
        };
        if edges.len() > PARALLEL_REEVALUATION {
            edges.par_iter().filter_map(plan).collect()
        } else {
            edges.iter().filter_map(plan).collect()
        }
    }

    fn run(&self, mesh: &Mesh, cancel: &CancelToken) -> Result<Simplified> {
        self.options.validate()?;
        let original = mesh.triangle_count();
        let mut report = SimplifyReport {
            original_triangles: original,
            final_triangles: original,
            ..Default::default()
        };
        if original == 0 {
            return Ok(Simplified {
                mesh: mesh.clone(),
                report,
            });
        }

        let (target, budget) = match self.options.target {
            SimplifyTarget::TriangleCount(n) => (n, None),
            SimplifyTarget::Ratio(r) => (((original as f64) * r as f64).ceil() as usize, None),
            SimplifyTarget::ErrorBudget(e) => (0, Some(e)),
        };
        if budget.is_none() && target >= original {
            debug!(target, original, "target not below triangle count, nothing to do");
            return Ok(Simplified {
                mesh: mesh.clone(),
                report,
            });
        }

        let constraints = classify_vertices(mesh, &self.options)?;
        debug!(
            constrained = constraints.constrained_count(),
            uv_seam = constraints.uv_seam,
            material_boundary = constraints.material_boundary,
            skin = constraints.skin_discontinuity,
            locked = constraints.locked,
            boundary = constraints.open_boundary,
            split = constraints.attribute_split,
            "classified vertices"
        );

        let mut work = CollapseMesh::new(mesh, constraints.constrained, &self.options);
        let mut heap: BinaryHeap<Candidate> = self.plan_edges(&work, &work.edges()).into();

        cancel.check()?;
        let mut pops = 0usize;
        while work.active_triangles > target {
            pops += 1;
            if pops % COLLAPSE_BATCH == 0 {
                cancel.check()?;
            }
            let Some(candidate) = heap.pop() else {
                break;
            };
            if !candidate.is_current(&work) {
                continue;
            }
            let plan = candidate.plan;
            let error = plan.cost.sqrt();
            if budget.is_some_and(|b| error > b) {
                break;
            }
            if !work.is_collapse_valid(&plan) {
                report.rejected += 1;
                continue;
            }

            work.collapse(&plan, &self.options);
            report.collapses += 1;
            report.max_error = report.max_error.max(error);

            let keep = plan.keep;
            let edges: Vec<(usize, usize)> = work.neighbors(keep).into_iter().map(|n| (keep, n)).collect();
            heap.extend(self.plan_edges(&work, &edges));
        }

        let out = work.into_mesh(mesh, self.options.max_bone_influences);
        report.final_triangles = out.triangle_count();
        info!(
            original = report.original_triangles,
            simplified = report.final_triangles,
            collapses = report.collapses,
            rejected = report.rejected,
            max_error = report.max_error,
            "edge collapse finished"
        );
        Ok(Simplified { mesh: out, report })
    }
}

impl MeshSimplifier for EdgeCollapseSimplifier {
    fn simplify(&self, mesh: &Mesh, cancel: &CancelToken) -> Result<Simplified> {
        self.run(mesh, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodforge_core::{skin_weight_sum, BoneInfluence, MaterialSlot};
    use std::collections::HashSet;

    fn quantize(p: &Point3f) -> (i32, i32, i32) {
        (
            (p.x * 1000.0).round() as i32,
            (p.y * 1000.0).round() as i32,
            (p.z * 1000.0).round() as i32,
        )
    }

    fn make_tetrahedron() -> Mesh {
        Mesh::from_positions(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.5, 1.0, 0.0),
                Point3f::new(0.5, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    /// `size x size` vertex grid in the xy plane with planar UVs
    fn make_plane_grid(size: usize) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let s = (size - 1) as f32;
                vertices.push(
                    Vertex::new(Point3f::new(x as f32, y as f32, 0.0))
                        .with_uv(Point2f::new(x as f32 / s, y as f32 / s)),
                );
            }
        }
        let mut triangles = Vec::new();
        for y in 0..(size - 1) {
            for x in 0..(size - 1) {
                let bl = y * size + x;
                let br = bl + 1;
                let tl = (y + 1) * size + x;
                let tr = tl + 1;
                triangles.push(Triangle::new([bl, br, tr], 0));
                triangles.push(Triangle::new([bl, tr, tl], 0));
            }
        }
        Mesh::from_parts(vertices, triangles, vec![MaterialSlot::default()])
    }

    fn make_curved_surface(size: usize) -> Mesh {
        let mut mesh = make_plane_grid(size);
        for v in &mut mesh.vertices {
            let fx = v.position.x / (size - 1) as f32 * std::f32::consts::PI;
            let fy = v.position.y / (size - 1) as f32 * std::f32::consts::PI;
            v.position.z = fx.sin() * fy.sin() * 2.0;
        }
        mesh
    }

    /// Duplicate column `split_x` of a plane grid; `edit` changes the copies
    /// used by the triangles right of the column
    fn split_column(mesh: &mut Mesh, size: usize, split_x: usize, edit: impl Fn(Vertex) -> Vertex) {
        let mut dup = vec![usize::MAX; size];
        for y in 0..size {
            let src = mesh.vertices[y * size + split_x].clone();
            dup[y] = mesh.vertices.len();
            mesh.vertices.push(edit(src));
        }
        for tri in &mut mesh.triangles {
            let min_x = tri.indices.iter().map(|&i| i % size).min().unwrap_or(0);
            if min_x >= split_x {
                for i in tri.indices.iter_mut() {
                    if *i < size * size && *i % size == split_x {
                        *i = dup[*i / size];
                    }
                }
            }
        }
    }

    /// Plane grid whose column `seam_x` is split, with shifted UVs on the right
    fn make_seamed_grid(size: usize, seam_x: usize) -> Mesh {
        let mut mesh = make_plane_grid(size);
        split_column(&mut mesh, size, seam_x, |v| {
            let uv = v.uvs[0];
            v.with_uvs(vec![Point2f::new(uv.x + 0.5, uv.y)])
        });
        // right-hand vertices shift their UVs too so the seam is the only break
        for (i, v) in mesh.vertices.iter_mut().enumerate().take(size * size) {
            if i % size > seam_x {
                v.uvs[0].x += 0.5;
            }
        }
        mesh
    }

    fn simplify(mesh: &Mesh, options: SimplifyOptions) -> Simplified {
        EdgeCollapseSimplifier::new(options)
            .simplify(mesh, &CancelToken::new())
            .unwrap()
    }

    // ---- Options ----

    #[test]
    fn test_options_builder() {
        let o = SimplifyOptions::new(SimplifyTarget::TriangleCount(10))
            .with_lock_boundaries(true)
            .with_boundary_weight(2.0)
            .with_max_bone_influences(4);
        assert_eq!(o.target, SimplifyTarget::TriangleCount(10));
        assert!(o.lock_boundaries);
        assert!(o.preserve_uv_seams);
        assert_eq!(o.max_bone_influences, 4);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn test_invalid_options() {
        assert!(SimplifyOptions::new(SimplifyTarget::Ratio(0.0)).validate().is_err());
        assert!(SimplifyOptions::new(SimplifyTarget::Ratio(1.5)).validate().is_err());
        assert!(SimplifyOptions::new(SimplifyTarget::ErrorBudget(-1.0)).validate().is_err());
        let s = EdgeCollapseSimplifier::new(SimplifyOptions::new(SimplifyTarget::Ratio(2.0)));
        assert!(matches!(
            s.simplify(&make_plane_grid(3), &CancelToken::new()),
            Err(Error::InvalidConfig(_))
        ));
    }

    // ---- Working mesh ----

    #[test]
    fn test_working_mesh_topology() {
        let mesh = make_tetrahedron();
        let work = CollapseMesh::new(&mesh, vec![false; 4], &SimplifyOptions::default());
        assert_eq!(work.active_triangles, 4);
        assert_eq!(work.edges().len(), 6);
        for v in 0..4 {
            assert_eq!(work.neighbors(v).len(), 3);
        }
    }

    #[test]
    fn test_plan_respects_constraints() {
        let mesh = make_plane_grid(3);
        let mut constrained = vec![false; 9];
        constrained[4] = true;
        constrained[5] = true;
        let options = SimplifyOptions::default();
        let work = CollapseMesh::new(&mesh, constrained, &options);

        assert!(work.plan(4, 5, &options).is_none());
        let plan = work.plan(1, 4, &options).unwrap();
        assert_eq!(plan.keep, 4);
        assert_eq!(plan.remove, 1);
        assert_eq!(plan.position, mesh.vertices[4].position);
        assert!(plan.cost >= 0.0);
    }

    // ---- Simplification ----

    #[test]
    fn test_empty_mesh() {
        let result = simplify(&Mesh::new(), SimplifyOptions::default());
        assert!(result.mesh.is_empty());
        assert_eq!(result.report.final_triangles, 0);
    }

    #[test]
    fn test_target_at_count_is_noop() {
        let mesh = make_curved_surface(6);
        let result = simplify(
            &mesh,
            SimplifyOptions::new(SimplifyTarget::TriangleCount(mesh.triangle_count())),
        );
        assert_eq!(result.mesh.triangle_count(), mesh.triangle_count());
        assert_eq!(result.mesh.vertices, mesh.vertices);
        assert_eq!(result.report.collapses, 0);
    }

    #[test]
    fn test_planar_grid_reaches_target() {
        let mesh = make_plane_grid(10);
        assert_eq!(mesh.triangle_count(), 162);
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::TriangleCount(40)));
        assert!(result.mesh.triangle_count() <= 40);
        assert!(result.mesh.triangle_count() > 0);
        assert!(result.mesh.validate().is_ok());
        for v in &result.mesh.vertices {
            assert_relative_eq!(v.position.z, 0.0, epsilon = 1e-5);
        }
        assert_relative_eq!(result.mesh.surface_area(), mesh.surface_area(), epsilon = 1e-3);
    }

    #[test]
    fn test_ratio_target() {
        let mesh = make_curved_surface(8);
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::Ratio(0.5)));
        assert!(result.mesh.triangle_count() <= mesh.triangle_count().div_ceil(2));
        assert_eq!(result.report.original_triangles, mesh.triangle_count());
        assert!(result.report.collapses > 0);
    }

    #[test]
    fn test_error_budget_stops_early() {
        let mesh = make_curved_surface(8);
        let tight = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::ErrorBudget(1e-4)));
        let loose = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::ErrorBudget(1.0)));
        assert!(tight.report.max_error <= 1e-4);
        assert!(loose.report.max_error <= 1.0);
        assert!(loose.mesh.triangle_count() <= tight.mesh.triangle_count());
        assert!(loose.mesh.triangle_count() < mesh.triangle_count());
    }

    #[test]
    fn test_tetrahedron_stays_manifold() {
        let mesh = make_tetrahedron();
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::TriangleCount(1)));
        assert!(result.mesh.triangle_count() <= 4);
        assert!(result.mesh.validate().is_ok());
        let faces: HashSet<[usize; 3]> = result
            .mesh
            .triangles
            .iter()
            .map(|t| {
                let mut k = t.indices;
                k.sort_unstable();
                k
            })
            .collect();
        assert_eq!(faces.len(), result.mesh.triangle_count());
    }

    #[test]
    fn test_prefilter_drops_degenerate_triangles() {
        let mut mesh = make_plane_grid(5);
        let first = mesh.triangles[0];
        mesh.triangles.push(first);
        // collinear corners along the bottom row
        mesh.triangles.push(Triangle::new([0, 1, 2], 0));
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::TriangleCount(10)));
        assert_eq!(result.report.original_triangles, 34);
        assert!(result.mesh.triangle_count() <= 10);
        for t in 0..result.mesh.triangle_count() {
            assert!(result.mesh.triangle_area(t) > 0.0);
        }
    }

    #[test]
    fn test_uv_seam_preserved() {
        let mesh = make_seamed_grid(7, 3);
        assert!(mesh.validate().is_ok());
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::Ratio(0.3)));
        assert!(result.mesh.triangle_count() < mesh.triangle_count());

        let out: HashSet<_> = result.mesh.vertices.iter().map(|v| quantize(&v.position)).collect();
        for y in 0..7 {
            let p = Point3f::new(3.0, y as f32, 0.0);
            assert!(out.contains(&quantize(&p)), "seam vertex at y = {} moved", y);
        }
        // both UV islands still meet the seam
        let seam_uvs: HashSet<i32> = result
            .mesh
            .vertices
            .iter()
            .filter(|v| (v.position.x - 3.0).abs() < 1e-5)
            .map(|v| (v.uvs[0].x * 1000.0).round() as i32)
            .collect();
        assert_eq!(seam_uvs.len(), 2);
    }

    #[test]
    fn test_hard_edge_split_stays_closed() {
        // column 4 is split by normal only, as along a hard edge
        let size = 9;
        let mut mesh = make_plane_grid(size);
        split_column(&mut mesh, size, 4, |v| v.with_normal(Vector3f::new(0.6, 0.0, 0.8)));
        assert!(mesh.validate().is_ok());
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::Ratio(0.3)));
        assert!(result.mesh.triangle_count() < mesh.triangle_count());

        let on_split = |p: &Point3f| (p.x - 4.0).abs() < 1e-5;
        for (_, a, b) in open_boundary_edges(&result.mesh) {
            let (pa, pb) = (result.mesh.vertices[a].position, result.mesh.vertices[b].position);
            assert!(
                !(on_split(&pa) && on_split(&pb)),
                "surface opened along the split between {:?} and {:?}",
                pa,
                pb
            );
        }
        let out: HashSet<_> = result.mesh.vertices.iter().map(|v| quantize(&v.position)).collect();
        for y in 0..size {
            assert!(out.contains(&quantize(&Point3f::new(4.0, y as f32, 0.0))));
        }
    }

    #[test]
    fn test_locked_region_untouched() {
        let mesh = make_curved_surface(8);
        let locked: Vec<usize> = (0..12).collect();
        let options = SimplifyOptions::new(SimplifyTarget::Ratio(0.25)).with_locked_regions(vec![locked.clone()]);
        let result = simplify(&mesh, options);

        let faces: HashSet<Vec<(i32, i32, i32)>> = (0..result.mesh.triangle_count())
            .map(|t| {
                let mut f: Vec<_> = result.mesh.triangle_positions(t).iter().map(quantize).collect();
                f.sort_unstable();
                f
            })
            .collect();
        for t in locked {
            let mut f: Vec<_> = mesh.triangle_positions(t).iter().map(quantize).collect();
            f.sort_unstable();
            assert!(faces.contains(&f), "locked triangle {} changed", t);
        }
    }

    #[test]
    fn test_material_boundary_preserved() {
        let mut mesh = make_plane_grid(7);
        mesh.material_slots.push(MaterialSlot::new("right"));
        for t in 0..mesh.triangle_count() {
            let cx: f32 = mesh.triangle_positions(t).iter().map(|p| p.x).sum::<f32>() / 3.0;
            if cx > 3.0 {
                mesh.triangles[t].material = 1;
            }
        }
        let result = simplify(&mesh, SimplifyOptions::new(SimplifyTarget::Ratio(0.3)));
        let out = &result.mesh;
        assert!(out.triangles.iter().any(|t| t.material == 0));
        assert!(out.triangles.iter().any(|t| t.material == 1));
        for t in 0..out.triangle_count() {
            let xs = out.triangle_positions(t).map(|p| p.x);
            if out.triangles[t].material == 0 {
                assert!(xs.iter().all(|&x| x <= 3.0 + 1e-4));
            } else {
                assert!(xs.iter().all(|&x| x >= 3.0 - 1e-4));
            }
        }
    }

    #[test]
    fn test_boundary_lock() {
        let mesh = make_curved_surface(7);
        let options = SimplifyOptions::new(SimplifyTarget::Ratio(0.3)).with_lock_boundaries(true);
        let result = simplify(&mesh, options);
        let out: HashSet<_> = result.mesh.vertices.iter().map(|v| quantize(&v.position)).collect();
        for v in &mesh.vertices {
            let p = v.position;
            if p.x == 0.0 || p.y == 0.0 || p.x == 6.0 || p.y == 6.0 {
                assert!(out.contains(&quantize(&p)));
            }
        }
    }

    #[test]
    fn test_skin_weights_renormalised() {
        let mut mesh = make_curved_surface(8);
        for v in &mut mesh.vertices {
            let w = v.position.x / 7.0;
            let mut skin = Vec::new();
            if w > 0.0 {
                skin.push(BoneInfluence::new(0, w));
            }
            if w < 1.0 {
                skin.push(BoneInfluence::new(1, 1.0 - w));
            }
            v.skin = skin;
        }
        assert!(mesh.validate().is_ok());
        let options = SimplifyOptions::new(SimplifyTarget::Ratio(0.3)).with_max_bone_influences(1);
        let result = simplify(&mesh, options);
        assert!(result.mesh.is_skinned());
        for v in &result.mesh.vertices {
            assert_eq!(v.skin.len(), 1);
            assert_relative_eq!(skin_weight_sum(&v.skin), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let mesh = make_curved_surface(8);
        let cancel = CancelToken::new();
        cancel.cancel();
        let s = EdgeCollapseSimplifier::new(SimplifyOptions::new(SimplifyTarget::Ratio(0.2)));
        let err = s.simplify(&mesh, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_without_optimal_placement_uses_existing_points() {
        let mesh = make_curved_surface(6);
        let options = SimplifyOptions::new(SimplifyTarget::Ratio(0.5))
            .with_optimal_placement(false)
            .with_preserve_uv_seams(false);
        let result = simplify(&mesh, options);
        let allowed: HashSet<_> = mesh
            .vertices
            .iter()
            .map(|v| quantize(&v.position))
            .collect();
        // every output position is an input vertex or a midpoint chain of them
        let originals = result
            .mesh
            .vertices
            .iter()
            .filter(|v| allowed.contains(&quantize(&v.position)))
            .count();
        assert!(originals > 0);
        assert!(result.mesh.triangle_count() <= mesh.triangle_count().div_ceil(2));
    }
}
