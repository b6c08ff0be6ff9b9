//! Bounding volume hierarchy over mesh triangles
//!
//! The hierarchy is built top-down with a binned surface area heuristic and
//! stored as a flat node arena. Large subtrees are built concurrently with
//! `rayon::join` and spliced into the parent arena afterwards. Once built the
//! tree is immutable; a changed mesh needs a new tree.

use crate::intersect::{closest_point_on_triangle, ray_triangle};
use crate::sample::{interpolate_surface, SurfaceSample};
use lodforge_core::{Aabb, Bounded, Mesh, Point3f, Vector3f};
use tracing::debug;

/// Number of SAH bins per split
const SAH_BINS: usize = 12;

/// Leaves never hold more primitives than this
const MAX_LEAF_SIZE: usize = 8;

/// Below this many primitives a node always becomes a leaf
const MIN_LEAF_SIZE: usize = 2;

/// Subtrees with more primitives than this are built in parallel
const PARALLEL_BUILD_THRESHOLD: usize = 4096;

/// Relative cost of a traversal step against a triangle test
const TRAVERSAL_COST: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    Interior { left: u32, right: u32 },
    Leaf { start: u32, count: u32 },
}

/// A BVH node: bounds plus either two children or a run of triangles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    kind: NodeKind,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// A ray or line hit on a mesh triangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub triangle: usize,
    /// Signed distance along the query direction
    pub t: f32,
    pub barycentric: [f32; 3],
    pub point: Point3f,
}

/// Closest surface point to a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    pub triangle: usize,
    pub point: Point3f,
    pub barycentric: [f32; 3],
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct PrimRef {
    triangle: usize,
    bounds: Aabb,
    centroid: Point3f,
}

/// Local node arena of a subtree, root at index 0
struct Subtree {
    nodes: Vec<BvhNode>,
    order: Vec<usize>,
}

impl Subtree {
    fn leaf(bounds: Aabb, prims: &[PrimRef]) -> Self {
        Self {
            nodes: vec![BvhNode {
                bounds,
                kind: NodeKind::Leaf {
                    start: 0,
                    count: prims.len() as u32,
                },
            }],
            order: prims.iter().map(|p| p.triangle).collect(),
        }
    }

    /// Splice two subtrees under a new root
    fn merge(bounds: Aabb, left: Subtree, right: Subtree) -> Self {
        let left_base = 1u32;
        let right_base = 1 + left.nodes.len() as u32;
        let right_order_base = left.order.len() as u32;

        let mut nodes = Vec::with_capacity(1 + left.nodes.len() + right.nodes.len());
        nodes.push(BvhNode {
            bounds,
            kind: NodeKind::Interior {
                left: left_base,
                right: right_base,
            },
        });
        let shift = |node: BvhNode, node_base: u32, order_base: u32| BvhNode {
            bounds: node.bounds,
            kind: match node.kind {
                NodeKind::Interior { left, right } => NodeKind::Interior {
                    left: left + node_base,
                    right: right + node_base,
                },
                NodeKind::Leaf { start, count } => NodeKind::Leaf {
                    start: start + order_base,
                    count,
                },
            },
        };
        nodes.extend(left.nodes.into_iter().map(|n| shift(n, left_base, 0)));
        nodes.extend(right.nodes.into_iter().map(|n| shift(n, right_base, right_order_base)));

        let mut order = left.order;
        order.extend(right.order);
        Self { nodes, order }
    }
}

fn bounds_of(prims: &[PrimRef]) -> (Aabb, Aabb) {
    let mut bounds = Aabb::empty();
    let mut centroids = Aabb::empty();
    for p in prims {
        bounds = bounds.union(&p.bounds);
        centroids.grow(&p.centroid);
    }
    (bounds, centroids)
}

/// Find the cheapest binned SAH split. Returns `(axis, bin, cost)`.
fn best_sah_split(prims: &[PrimRef], centroids: &Aabb) -> Option<(usize, usize, f32)> {
    let extent = centroids.extent();
    let mut best: Option<(usize, usize, f32)> = None;

    for axis in 0..3 {
        if extent[axis] <= f32::EPSILON {
            continue;
        }
        let mut bin_bounds = [Aabb::empty(); SAH_BINS];
        let mut bin_counts = [0usize; SAH_BINS];
        for p in prims {
            let b = bin_index(&p.centroid, centroids, axis);
            bin_bounds[b] = bin_bounds[b].union(&p.bounds);
            bin_counts[b] += 1;
        }

        // sweep from the right to get suffix areas
        let mut right_area = [0.0f32; SAH_BINS];
        let mut right_count = [0usize; SAH_BINS];
        let mut acc = Aabb::empty();
        let mut count = 0;
        for i in (1..SAH_BINS).rev() {
            acc = acc.union(&bin_bounds[i]);
            count += bin_counts[i];
            right_area[i] = acc.surface_area();
            right_count[i] = count;
        }

        let mut acc = Aabb::empty();
        let mut count = 0;
        for split in 1..SAH_BINS {
            acc = acc.union(&bin_bounds[split - 1]);
            count += bin_counts[split - 1];
            if count == 0 || right_count[split] == 0 {
                continue;
            }
            let cost = acc.surface_area() * count as f32 + right_area[split] * right_count[split] as f32;
            if best.map_or(true, |(_, _, c)| cost < c) {
                best = Some((axis, split, cost));
            }
        }
    }
    best
}

fn bin_index(centroid: &Point3f, centroids: &Aabb, axis: usize) -> usize {
    let extent = centroids.max[axis] - centroids.min[axis];
    let rel = (centroid[axis] - centroids.min[axis]) / extent;
    ((rel * SAH_BINS as f32) as usize).min(SAH_BINS - 1)
}

/// In-place partition, returns the number of elements satisfying `pred`
fn partition<T>(items: &mut [T], mut pred: impl FnMut(&T) -> bool) -> usize {
    let mut split = 0;
    for i in 0..items.len() {
        if pred(&items[i]) {
            items.swap(i, split);
            split += 1;
        }
    }
    split
}

fn build_subtree(prims: &mut [PrimRef]) -> Subtree {
    let (bounds, centroids) = bounds_of(prims);
    if prims.len() <= MIN_LEAF_SIZE {
        return Subtree::leaf(bounds, prims);
    }

    let leaf_cost = prims.len() as f32 * bounds.surface_area();
    let mut mid = match best_sah_split(prims, &centroids) {
        Some((axis, split, cost)) => {
            let split_cost = TRAVERSAL_COST * bounds.surface_area() + cost;
            if split_cost >= leaf_cost && prims.len() <= MAX_LEAF_SIZE {
                return Subtree::leaf(bounds, prims);
            }
            partition(prims, |p| bin_index(&p.centroid, &centroids, axis) < split)
        }
        None => 0,
    };

    if mid == 0 || mid == prims.len() {
        // coincident centroids: median split along the longest axis
        if prims.len() <= MAX_LEAF_SIZE {
            return Subtree::leaf(bounds, prims);
        }
        let axis = centroids.longest_axis();
        mid = prims.len() / 2;
        prims.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
    }

    let (left, right) = prims.split_at_mut(mid);
    let (left, right) = if left.len() + right.len() > PARALLEL_BUILD_THRESHOLD {
        rayon::join(|| build_subtree(left), || build_subtree(right))
    } else {
        (build_subtree(left), build_subtree(right))
    };
    Subtree::merge(bounds, left, right)
}

/// Bounding volume hierarchy borrowing the triangles of a mesh
#[derive(Debug, Clone)]
pub struct TriangleBvh<'m> {
    mesh: &'m Mesh,
    nodes: Vec<BvhNode>,
    /// Triangle indices in leaf order
    order: Vec<usize>,
}

impl<'m> TriangleBvh<'m> {
    /// Build a hierarchy over all triangles of `mesh`
    pub fn build(mesh: &'m Mesh) -> Self {
        let mut prims: Vec<PrimRef> = (0..mesh.triangle_count())
            .map(|t| {
                let corners = mesh.triangle_positions(t);
                let bounds = Aabb::from_points(corners.iter());
                PrimRef {
                    triangle: t,
                    bounds,
                    centroid: bounds.center(),
                }
            })
            .collect();

        if prims.is_empty() {
            return Self {
                mesh,
                nodes: Vec::new(),
                order: Vec::new(),
            };
        }

        let tree = build_subtree(&mut prims);
        debug!(
            triangles = mesh.triangle_count(),
            nodes = tree.nodes.len(),
            "built triangle BVH"
        );
        Self {
            mesh,
            nodes: tree.nodes,
            order: tree.order,
        }
    }

    pub fn mesh(&self) -> &'m Mesh {
        self.mesh
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&BvhNode> {
        self.nodes.first()
    }

    /// Depth of the deepest leaf
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let NodeKind::Interior { left, right } = self.nodes[node].kind {
                stack.push((left as usize, depth + 1));
                stack.push((right as usize, depth + 1));
            }
        }
        max_depth
    }

    fn leaf_triangles(&self, start: u32, count: u32) -> &[usize] {
        &self.order[start as usize..(start + count) as usize]
    }

    /// Nearest hit along the line `origin + t * dir` with `t` in
    /// `[t_min, t_max]`, measured by `|t|`.
    fn closest_hit_in(&self, origin: &Point3f, dir: &Vector3f, t_min: f32, t_max: f32) -> Option<RayHit> {
        if self.nodes.is_empty() || dir.norm_squared() == 0.0 {
            return None;
        }
        let inv_dir = dir.map(|d| 1.0 / d);
        // smallest |t| a node interval can contain
        let reach = |(t0, t1): (f32, f32)| {
            if t0 <= 0.0 && t1 >= 0.0 {
                0.0
            } else {
                t0.abs().min(t1.abs())
            }
        };

        let mut best: Option<RayHit> = None;
        let mut best_abs = f32::INFINITY;
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            match node.bounds.ray_interval(origin, &inv_dir, t_min, t_max) {
                Some(interval) if reach(interval) <= best_abs => {}
                _ => continue,
            }
            match node.kind {
                NodeKind::Leaf { start, count } => {
                    for &t in self.leaf_triangles(start, count) {
                        let corners = self.mesh.triangle_positions(t);
                        if let Some((dist, u, v)) = ray_triangle(origin, dir, &corners) {
                            if dist < t_min || dist > t_max || dist.abs() >= best_abs {
                                continue;
                            }
                            best_abs = dist.abs();
                            best = Some(RayHit {
                                triangle: t,
                                t: dist,
                                barycentric: [1.0 - u - v, u, v],
                                point: origin + dir * dist,
                            });
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    stack.push(right as usize);
                    stack.push(left as usize);
                }
            }
        }
        best
    }

    /// First hit of the ray `origin + t * dir` with `0 <= t <= max_distance`
    pub fn intersect_ray(&self, origin: &Point3f, dir: &Vector3f, max_distance: f32) -> Option<RayHit> {
        self.closest_hit_in(origin, dir, 0.0, max_distance)
    }

    /// Hit nearest to `origin` along the line through `origin` in both
    /// directions, within `max_distance` (in units of `dir`).
    pub fn intersect_line(&self, origin: &Point3f, dir: &Vector3f, max_distance: f32) -> Option<RayHit> {
        self.closest_hit_in(origin, dir, -max_distance, max_distance)
    }

    /// Closest point on the surface to `query`
    pub fn closest_point(&self, query: &Point3f) -> Option<ClosestPoint> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<ClosestPoint> = None;
        let mut best_sq = f32::INFINITY;
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.bounds.distance_squared(query) > best_sq {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, count } => {
                    for &t in self.leaf_triangles(start, count) {
                        let corners = self.mesh.triangle_positions(t);
                        let (point, barycentric) = closest_point_on_triangle(query, &corners);
                        let d = (point - query).norm_squared();
                        if d < best_sq {
                            best_sq = d;
                            best = Some(ClosestPoint {
                                triangle: t,
                                point,
                                barycentric,
                                distance: d.sqrt(),
                            });
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    // visit the nearer child first
                    let dl = self.nodes[left as usize].bounds.distance_squared(query);
                    let dr = self.nodes[right as usize].bounds.distance_squared(query);
                    if dl <= dr {
                        stack.push(right as usize);
                        stack.push(left as usize);
                    } else {
                        stack.push(left as usize);
                        stack.push(right as usize);
                    }
                }
            }
        }
        best
    }

    /// Triangles whose bounds overlap `region`
    pub fn query_aabb(&self, region: &Aabb) -> Vec<usize> {
        let mut out = Vec::new();
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds.intersects(region) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, count } => {
                    for &t in self.leaf_triangles(start, count) {
                        let corners = self.mesh.triangle_positions(t);
                        if Aabb::from_points(corners.iter()).intersects(region) {
                            out.push(t);
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    stack.push(left as usize);
                    stack.push(right as usize);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Interpolate the mesh attributes at a hit
    pub fn sample(&self, triangle: usize, barycentric: [f32; 3], uv_channel: usize) -> SurfaceSample {
        interpolate_surface(self.mesh, triangle, barycentric, uv_channel)
    }
}

impl Bounded for TriangleBvh<'_> {
    fn bounding_box(&self) -> Aabb {
        self.root().map_or_else(Aabb::empty, |n| n.bounds)
    }
}
