//! Flat BVH over scene primitives.
//!
//! Nodes live in one append-only array (index 0 = root) and are uploaded to
//! the GPU as-is, so the traversal shader never chases pointers:
//! - internal nodes carry their two child indices and the split axis
//! - leaves carry up to `SLOTS` original primitive indices inline
//!
//! Splits pick the longest axis of the node's box and cut at the spatial
//! median of that axis; leaves hold at most `threshold + 1` primitives.

use crate::bounds::Aabb;
use crate::error::{Error, Result};
use crate::objects::Primitive;
use bytemuck::{Pod, Zeroable};
use na::Matrix4;

/// Leaf slots per node in the default GPU layout.
pub const DEFAULT_LEAF_SLOTS: usize = 2;

/// Leaf threshold matching [`DEFAULT_LEAF_SLOTS`].
pub const DEFAULT_THRESHOLD: usize = DEFAULT_LEAF_SLOTS - 1;

/// Depth after which the spatial-median scan gives way to an object median.
/// Coincident midpoints can otherwise peel one primitive off per level.
pub const MAX_SPATIAL_DEPTH: usize = 64;

/// GPU BVH node (matches the shader struct).
///
/// Internal node: `is_leaf = 0`, `left`/`right` index into the node array,
/// `split_axis` is 1, 2 or 3 for x, y, z.
/// Leaf node: `is_leaf = 1`, `leaves` holds original primitive indices,
/// unused slots are -1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode<const SLOTS: usize = DEFAULT_LEAF_SLOTS> {
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
    pub is_leaf: i32,
    pub left: i32,
    pub right: i32,
    pub split_axis: i32,
    pub leaves: [i32; SLOTS],
}

// SAFETY: repr(C), every field is a 4-byte scalar or an array of them, so
// there is no padding for any SLOTS and every bit pattern is valid.
unsafe impl<const SLOTS: usize> Zeroable for BvhNode<SLOTS> {}
unsafe impl<const SLOTS: usize> Pod for BvhNode<SLOTS> {}

/// Decoded view of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Internal {
        left: usize,
        right: usize,
        axis: usize,
    },
    Leaf {
        primitives: Vec<usize>,
    },
}

impl<const SLOTS: usize> BvhNode<SLOTS> {
    fn new(aabb: &Aabb) -> Self {
        Self {
            aabb_min: aabb.min.coords.into(),
            aabb_max: aabb.max.coords.into(),
            is_leaf: 0,
            left: -1,
            right: -1,
            split_axis: -1,
            leaves: [-1; SLOTS],
        }
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: self.aabb_min.into(),
            max: self.aabb_max.into(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf != 0
    }

    /// Original indices of the primitives held by a leaf (empty for internal nodes).
    pub fn leaf_primitives(&self) -> impl Iterator<Item = usize> + '_ {
        let held = if self.is_leaf() { SLOTS } else { 0 };
        self.leaves[..held]
            .iter()
            .filter(|&&i| i >= 0)
            .map(|&i| i as usize)
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_leaf() {
            NodeKind::Leaf {
                primitives: self.leaf_primitives().collect(),
            }
        } else {
            NodeKind::Internal {
                left: self.left as usize,
                right: self.right as usize,
                axis: (self.split_axis - 1) as usize,
            }
        }
    }
}

/// Built BVH result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh<const SLOTS: usize = DEFAULT_LEAF_SLOTS> {
    /// Flat node array (index 0 = root). Empty for an empty scene.
    pub nodes: Vec<BvhNode<SLOTS>>,
    /// Original scene index of each primitive in final build order.
    pub order: Vec<usize>,
}

impl<const SLOTS: usize> Bvh<SLOTS> {
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Per-node debug transforms: a unit cube scaled to the node extent and
    /// moved to its centre.
    pub fn node_transforms(&self) -> Vec<Matrix4<f32>> {
        self.nodes
            .iter()
            .map(|node| {
                let aabb = node.aabb();
                Matrix4::new_translation(&aabb.centroid().coords)
                    * Matrix4::new_nonuniform_scaling(&aabb.extent())
            })
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        let mut depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, d)) = stack.pop() {
            depth = depth.max(d);
            if let NodeKind::Internal { left, right, .. } = self.nodes[idx].kind() {
                stack.push((left, d + 1));
                stack.push((right, d + 1));
            }
        }

        depth
    }
}

/// Merge of all primitive bounds. The sentinel for an empty slice.
pub fn compute_world_bounds(primitives: &[Primitive]) -> Aabb {
    primitives
        .iter()
        .fold(Aabb::empty(), |acc, p| acc.merge(&p.aabb()))
}

/// Builds a BVH with the default leaf layout.
pub fn build_bvh(primitives: &[Primitive], world_bounds: Aabb, threshold: usize) -> Result<Bvh> {
    Ok(BvhBuilder::<DEFAULT_LEAF_SLOTS>::new(primitives, world_bounds, threshold)?.build())
}

/// Primitive paired with its index in the scene array.
struct BuildEntry<'a> {
    primitive: &'a Primitive,
    original_index: usize,
}

impl BuildEntry<'_> {
    fn midpoint(&self, axis: usize) -> f32 {
        self.primitive.aabb().centroid()[axis]
    }
}

/// Pending node: primitive range `[lo, hi]` (inclusive) assigned to `node`.
struct Task {
    node: usize,
    lo: usize,
    hi: usize,
    depth: usize,
}

/// One-shot builder. Owns the permutation buffer for the duration of the
/// build; the caller's primitive slice is never reordered.
pub struct BvhBuilder<'a, const SLOTS: usize = DEFAULT_LEAF_SLOTS> {
    world_bounds: Aabb,
    threshold: usize,
    entries: Vec<BuildEntry<'a>>,
    nodes: Vec<BvhNode<SLOTS>>,
}

impl<'a, const SLOTS: usize> BvhBuilder<'a, SLOTS> {
    pub fn new(primitives: &'a [Primitive], world_bounds: Aabb, threshold: usize) -> Result<Self> {
        if threshold >= SLOTS {
            return Err(Error::config(format!(
                "leaf threshold {} does not fit {} slots per node",
                threshold, SLOTS
            )));
        }
        if primitives.len() > i32::MAX as usize {
            return Err(Error::config("too many primitives for 32-bit node indices"));
        }

        let entries = primitives
            .iter()
            .enumerate()
            .map(|(original_index, primitive)| BuildEntry {
                primitive,
                original_index,
            })
            .collect();

        Ok(Self {
            world_bounds,
            threshold,
            entries,
            nodes: Vec::new(),
        })
    }

    #[must_use]
    pub fn build(mut self) -> Bvh<SLOTS> {
        if self.entries.is_empty() || self.world_bounds.is_empty() {
            log::debug!("Nothing to build ({} primitives)", self.entries.len());
            return Bvh::empty();
        }

        let n = self.entries.len();
        self.nodes.reserve(2 * n);
        self.nodes.push(BvhNode::new(&self.world_bounds));

        // Left is pushed last so it is expanded first: same node order as a
        // recursive left-then-right build.
        let mut stack = vec![Task {
            node: 0,
            lo: 0,
            hi: n - 1,
            depth: 0,
        }];
        let mut guarded = 0usize;
        while let Some(task) = stack.pop() {
            if let Some((left, right)) = self.process(&task, &mut guarded) {
                stack.push(right);
                stack.push(left);
            }
        }

        if guarded > 0 {
            log::warn!(
                "{} nodes below depth {} used object-median splits",
                guarded,
                MAX_SPATIAL_DEPTH
            );
        }

        let bvh = Bvh {
            nodes: self.nodes,
            order: self.entries.iter().map(|e| e.original_index).collect(),
        };
        log::info!(
            "Built BVH: {} primitives, {} nodes, {} leaves, depth {}",
            n,
            bvh.nodes.len(),
            bvh.leaf_count(),
            bvh.depth()
        );

        bvh
    }

    fn process(&mut self, task: &Task, guarded: &mut usize) -> Option<(Task, Task)> {
        let Task { node, lo, hi, depth } = *task;
        let span = hi - lo;

        if span <= self.threshold {
            let leaf = &mut self.nodes[node];
            leaf.is_leaf = 1;
            for (slot, entry) in leaf.leaves.iter_mut().zip(&self.entries[lo..=hi]) {
                *slot = entry.original_index as i32;
            }
            return None;
        }

        let node_aabb = self.nodes[node].aabb();
        let axis = node_aabb.longest_axis();
        self.nodes[node].split_axis = axis as i32 + 1;

        // sort_by is stable, equal midpoints keep their scene order
        self.entries[lo..=hi].sort_by(|a, b| a.midpoint(axis).total_cmp(&b.midpoint(axis)));

        let mid = if span <= 2 * self.threshold {
            lo + self.threshold
        } else if span == 2 {
            lo + 1
        } else if span > 1 {
            if depth >= MAX_SPATIAL_DEPTH {
                *guarded += 1;
                lo + (span - 1) / 2
            } else {
                self.spatial_median(lo, hi, axis, node_aabb.centroid()[axis])
            }
        } else {
            lo
        };

        let left_aabb = self.merge_range(lo, mid);
        let right_aabb = self.merge_range(mid + 1, hi);

        let left = self.nodes.len();
        let right = left + 1;
        self.nodes.push(BvhNode::new(&left_aabb));
        self.nodes.push(BvhNode::new(&right_aabb));
        self.nodes[node].left = left as i32;
        self.nodes[node].right = right as i32;

        Some((
            Task {
                node: left,
                lo,
                hi: mid,
                depth: depth + 1,
            },
            Task {
                node: right,
                lo: mid + 1,
                hi,
                depth: depth + 1,
            },
        ))
    }

    // First primitive whose midpoint lies past the node midpoint, capped at hi - 1.
    fn spatial_median(&self, lo: usize, hi: usize, axis: usize, node_mid: f32) -> usize {
        let mut mid = lo;
        while mid < hi - 1 {
            if self.entries[mid].midpoint(axis) > node_mid {
                break;
            }
            mid += 1;
        }
        mid
    }

    fn merge_range(&self, lo: usize, hi: usize) -> Aabb {
        self.entries[lo + 1..=hi]
            .iter()
            .fold(self.entries[lo].primitive.aabb(), |acc, e| {
                acc.merge(&e.primitive.aabb())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{PrimitiveKind, TriangleIndices};
    use na::{Matrix4, Point3, Translation3, Vector3, Vector4};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit_box(x: f32, y: f32, z: f32) -> Primitive {
        let t = Translation3::new(x, y, z).to_homogeneous();
        Primitive::new(PrimitiveKind::Box, 0, Vector4::new(1.0, 1.0, 1.0, 0.0), &t).unwrap()
    }

    fn random_scene(rng: &mut StdRng, n: usize) -> Vec<Primitive> {
        (0..n)
            .map(|_| {
                let t = Translation3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-30.0..30.0),
                )
                .to_homogeneous();
                if rng.gen_bool(0.5) {
                    let r = rng.gen_range(0.1..2.0);
                    Primitive::new(PrimitiveKind::Sphere, 0, Vector4::new(r, 0.0, 0.0, 0.0), &t)
                        .unwrap()
                } else {
                    let e = Vector4::new(
                        rng.gen_range(0.1..4.0),
                        rng.gen_range(0.1..4.0),
                        rng.gen_range(0.1..4.0),
                        0.0,
                    );
                    Primitive::new(PrimitiveKind::Box, 0, e, &t).unwrap()
                }
            })
            .collect()
    }

    fn build<const SLOTS: usize>(prims: &[Primitive], threshold: usize) -> Bvh<SLOTS> {
        BvhBuilder::<SLOTS>::new(prims, compute_world_bounds(prims), threshold)
            .unwrap()
            .build()
    }

    // Collects the original indices below `idx`, checking containment on the way down.
    fn assert_subtree<const SLOTS: usize>(
        bvh: &Bvh<SLOTS>,
        prims: &[Primitive],
        idx: usize,
    ) -> Vec<usize> {
        let node = &bvh.nodes[idx];
        let held = match node.kind() {
            NodeKind::Leaf { primitives } => primitives,
            NodeKind::Internal { left, right, axis } => {
                assert!(left > idx && right > idx, "child before parent at {}", idx);
                assert_ne!(left, right);
                assert!(axis < 3);
                let mut held = assert_subtree(bvh, prims, left);
                held.extend(assert_subtree(bvh, prims, right));
                held
            }
        };
        for &p in &held {
            assert!(
                node.aabb().contains(&prims[p].aabb()),
                "node {} does not contain primitive {}",
                idx,
                p
            );
        }
        held
    }

    fn assert_consistent<const SLOTS: usize>(bvh: &Bvh<SLOTS>, prims: &[Primitive], threshold: usize) {
        let mut held = assert_subtree(bvh, prims, 0);
        held.sort_unstable();
        assert_eq!(held, (0..prims.len()).collect::<Vec<_>>());

        let mut children: Vec<usize> = bvh
            .nodes
            .iter()
            .filter_map(|n| match n.kind() {
                NodeKind::Internal { left, right, .. } => Some([left, right]),
                NodeKind::Leaf { .. } => None,
            })
            .flatten()
            .collect();
        let count = children.len();
        children.sort_unstable();
        children.dedup();
        assert_eq!(children.len(), count, "child index shared between nodes");
        assert_eq!(count + 1, bvh.nodes.len());

        for node in bvh.nodes.iter().filter(|n| n.is_leaf()) {
            let n = node.leaf_primitives().count();
            assert!(n >= 1 && n <= threshold + 1);
        }
    }

    #[test]
    fn empty_scene_builds_nothing() {
        let bvh = build_bvh(&[], Aabb::empty(), 1).unwrap();
        assert!(bvh.is_empty());
        assert!(bvh.order.is_empty());
    }

    #[test]
    fn sentinel_world_bounds_builds_nothing() {
        let prims = vec![unit_box(1.0, 0.0, 0.0)];
        let bvh = build_bvh(&prims, Aabb::empty(), 1).unwrap();
        assert!(bvh.is_empty());
    }

    #[test]
    fn single_primitive_is_a_leaf_root() {
        let prims = vec![unit_box(1.0, 2.0, 3.0)];
        let bvh = build_bvh(&prims, compute_world_bounds(&prims), 1).unwrap();
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].kind(), NodeKind::Leaf { primitives: vec![0] });
        assert_eq!(bvh.nodes[0].leaves, [0, -1]);
    }

    #[test]
    fn threshold_plus_one_fits_in_root() {
        let prims: Vec<_> = (0..4).map(|i| unit_box(i as f32 * 3.0, 0.0, 0.0)).collect();
        let bvh = build::<4>(&prims, 3);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(
            bvh.nodes[0].kind(),
            NodeKind::Leaf { primitives: vec![0, 1, 2, 3] }
        );
    }

    #[test]
    fn threshold_plus_two_splits_into_two_leaves() {
        let prims: Vec<_> = (0..5).map(|i| unit_box(i as f32 * 3.0, 0.0, 0.0)).collect();
        let bvh = build::<4>(&prims, 3);
        assert_eq!(bvh.nodes.len(), 3);
        assert!(!bvh.nodes[0].is_leaf());
        assert!(bvh.nodes[1].is_leaf() && bvh.nodes[2].is_leaf());
        assert_consistent(&bvh, &prims, 3);
    }

    #[test]
    fn three_boxes_on_x() {
        let prims = vec![
            unit_box(-2.0, 0.0, 0.0),
            unit_box(0.0, 0.0, 0.0),
            unit_box(2.0, 0.0, 0.0),
        ];
        let bvh = build_bvh(&prims, compute_world_bounds(&prims), 1).unwrap();

        assert_eq!(bvh.nodes.len(), 3);
        assert_eq!(
            bvh.nodes[0].kind(),
            NodeKind::Internal { left: 1, right: 2, axis: 0 }
        );
        assert_eq!(bvh.nodes[0].split_axis, 1);
        assert_eq!(bvh.nodes[1].kind(), NodeKind::Leaf { primitives: vec![0, 1] });
        assert_eq!(bvh.nodes[2].kind(), NodeKind::Leaf { primitives: vec![2] });

        let left = bvh.nodes[1].aabb();
        assert_eq!(left.min, Point3::new(-2.5, -0.5, -0.5));
        assert_eq!(left.max, Point3::new(0.5, 0.5, 0.5));
        assert_eq!(bvh.order, vec![0, 1, 2]);
    }

    #[test]
    fn root_keeps_supplied_world_bounds() {
        let prims = vec![unit_box(0.0, 0.0, 0.0), unit_box(1.0, 0.0, 0.0)];
        let world = Aabb::new(Point3::new(-10.0, -10.0, -10.0), Point3::new(10.0, 10.0, 10.0));
        let bvh = build_bvh(&prims, world, 1).unwrap();
        assert_eq!(bvh.nodes[0].aabb(), world);
    }

    #[test]
    fn zero_threshold_gives_single_primitive_leaves() {
        let mut rng = StdRng::seed_from_u64(7);
        let prims = random_scene(&mut rng, 37);
        let bvh = build::<1>(&prims, 0);
        assert_consistent(&bvh, &prims, 0);
        assert_eq!(bvh.leaf_count(), 37);
        assert_eq!(bvh.nodes.len(), 2 * 37 - 1);
    }

    #[test]
    fn random_scenes_are_consistent() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [2, 3, 5, 16, 100, 513] {
            let prims = random_scene(&mut rng, n);
            assert_consistent(&build::<2>(&prims, 1), &prims, 1);
            assert_consistent(&build::<4>(&prims, 3), &prims, 3);
        }
    }

    #[test]
    fn rebuild_is_identical() {
        let mut rng = StdRng::seed_from_u64(3);
        let prims = random_scene(&mut rng, 200);
        let a = build::<2>(&prims, 1);
        let b = build::<2>(&prims, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn coincident_primitives_stay_shallow() {
        let prims: Vec<_> = (0..1000).map(|_| unit_box(0.0, 0.0, 0.0)).collect();
        let bvh = build::<2>(&prims, 1);
        assert_consistent(&bvh, &prims, 1);
        assert!(bvh.depth() <= MAX_SPATIAL_DEPTH + 16, "depth {}", bvh.depth());
    }

    #[test]
    fn threshold_above_capacity_is_rejected() {
        let prims = vec![unit_box(0.0, 0.0, 0.0)];
        let err = build_bvh(&prims, compute_world_bounds(&prims), 2).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn default_bvh_is_empty() {
        let bvh = Bvh::<DEFAULT_LEAF_SLOTS>::default();
        assert_eq!(bvh, Bvh::empty());
        assert!(bvh.is_empty());
        assert_eq!(bvh.depth(), 0);
    }

    #[test]
    fn origin_point_primitive_is_still_placed() {
        // a triangle collapsed onto the origin has the sentinel box, so merges
        // skip it and the root only covers the other primitive
        let indices = TriangleIndices {
            vertices: [0, 1, 2],
            uvs: None,
            normals: None,
        };
        let point = Primitive::triangle(indices, [Point3::origin(); 3], 0, &Matrix4::identity()).unwrap();
        let prims = vec![point, unit_box(5.0, 0.0, 0.0)];

        let bvh = build::<2>(&prims, 0);
        assert_eq!(bvh.nodes.len(), 3);
        assert_eq!(bvh.nodes[0].aabb().min.x, 4.5);
        assert!(!bvh.nodes[0].aabb().contains(&prims[0].aabb()));
        assert_eq!(bvh.nodes[1].kind(), NodeKind::Leaf { primitives: vec![0] });
        assert_eq!(bvh.nodes[2].kind(), NodeKind::Leaf { primitives: vec![1] });
    }

    #[test]
    fn huge_threshold_is_rejected() {
        let prims = vec![unit_box(0.0, 0.0, 0.0), unit_box(2.0, 0.0, 0.0)];
        let err = build_bvh(&prims, compute_world_bounds(&prims), usize::MAX).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(BvhBuilder::<4>::new(&prims, compute_world_bounds(&prims), 4).is_err());
        assert!(BvhBuilder::<4>::new(&prims, compute_world_bounds(&prims), 3).is_ok());
    }

    #[test]
    fn node_layout_and_transforms() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 48);
        assert_eq!(std::mem::size_of::<BvhNode<4>>(), 56);

        let prims = vec![unit_box(-2.0, 0.0, 0.0), unit_box(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&prims, compute_world_bounds(&prims), 1).unwrap();
        let m = bvh.node_transforms()[0];
        let p = m.transform_point(&Point3::new(0.5, 0.5, 0.5));
        assert_eq!(p, Point3::new(2.5, 0.5, 0.5));
        assert_eq!(bvh.nodes[0].aabb().extent(), Vector3::new(5.0, 1.0, 1.0));
        assert_eq!(bytemuck::cast_slice::<_, u8>(&bvh.nodes).len(), 48);
    }
}
