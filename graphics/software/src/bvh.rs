use bytemuck::{
    Pod,
    Zeroable,
};
use raycts_core::gpu::BuildAccelerationStructureFlags;
use raycts_core::{
    Affine3A,
    Vec3,
};
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub(crate) const EMPTY: Aabb = Aabb {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    pub(crate) fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Self::EMPTY;
        for point in points {
            aabb.grow(*point);
        }
        aabb
    }

    pub(crate) fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub(crate) fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub(crate) fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5f32
    }

    pub(crate) fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub(crate) fn transformed(&self, transform: &Affine3A) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut aabb = Self::EMPTY;
        for corner in 0..8 {
            let point = Vec3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            aabb.grow(transform.transform_point3(point));
        }
        aabb
    }

    /// Slab test. Returns the entry distance clamped to `tmin`; boundaries count as inside.
    pub(crate) fn intersect(&self, origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Option<f32> {
        let mut near = tmin;
        let mut far = tmax;
        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];
            if d == 0f32 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let t0 = (lo - o) / d;
            let t1 = (hi - o) / d;
            let (t0, t1) = if t0 > t1 { (t1, t0) } else { (t0, t1) };
            near = near.max(t0);
            far = far.min(t1);
            if !(near <= far) {
                return None;
            }
        }
        Some(near)
    }
}

/// Interior nodes have `count == 0` and their children at `first` and `first + 1`.
/// Leaves reference `count` entries of the ref list starting at `first`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct BvhNode {
    pub min: [f32; 3],
    pub first: u32,
    pub max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    fn leaf(bounds: &Aabb, first: u32, count: u32) -> Self {
        Self {
            min: bounds.min.to_array(),
            first,
            max: bounds.max.to_array(),
            count,
        }
    }

    fn interior(bounds: &Aabb, first_child: u32) -> Self {
        Self {
            min: bounds.min.to_array(),
            first: first_child,
            max: bounds.max.to_array(),
            count: 0,
        }
    }

    pub(crate) fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::from_array(self.min),
            max: Vec3::from_array(self.max),
        }
    }

    #[inline(always)]
    pub(crate) fn is_leaf(&self) -> bool {
        self.count != 0
    }
}

pub(crate) fn max_leaf_size(flags: BuildAccelerationStructureFlags) -> usize {
    if flags.contains(BuildAccelerationStructureFlags::PREFER_FAST_TRACE) {
        1
    } else if flags.contains(BuildAccelerationStructureFlags::PREFER_FAST_BUILD) {
        4
    } else {
        2
    }
}

/// Median split over the largest centroid extent. The returned refs index into `bounds`.
pub(crate) fn build_bvh(bounds: &[Aabb], max_leaf_size: usize) -> (Vec<BvhNode>, Vec<u32>) {
    let max_leaf_size = max_leaf_size.max(1);
    let mut refs: Vec<u32> = (0..bounds.len() as u32).collect();
    let mut nodes = Vec::<BvhNode>::new();
    if refs.is_empty() {
        return (nodes, refs);
    }

    nodes.push(BvhNode::zeroed());
    let mut stack = vec![(0usize, 0usize, refs.len())];
    while let Some((node_index, start, end)) = stack.pop() {
        let mut node_bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for item in &refs[start..end] {
            let item_bounds = &bounds[*item as usize];
            node_bounds = node_bounds.union(item_bounds);
            centroid_bounds.grow(item_bounds.centroid());
        }

        let count = end - start;
        if count <= max_leaf_size {
            nodes[node_index] = BvhNode::leaf(&node_bounds, start as u32, count as u32);
            continue;
        }

        let extent = centroid_bounds.extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        refs[start..end].sort_by(|a, b| {
            let a = bounds[*a as usize].centroid()[axis];
            let b = bounds[*b as usize].centroid()[axis];
            a.total_cmp(&b)
        });

        let middle = start + count / 2;
        let first_child = nodes.len();
        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        nodes[node_index] = BvhNode::interior(&node_bounds, first_child as u32);
        stack.push((first_child + 1, middle, end));
        stack.push((first_child, start, middle));
    }
    (nodes, refs)
}

pub(crate) enum Visit {
    Continue,
    /// Shrinks the search interval to the given distance.
    Hit(f32),
    Stop,
}

/// Calls `visit` for every ref whose leaf overlaps the ray interval. Returns true if the
/// visitor stopped the traversal.
pub(crate) fn traverse(
    nodes: &[BvhNode],
    refs: &[u32],
    origin: Vec3,
    direction: Vec3,
    tmin: f32,
    tmax: f32,
    visit: &mut dyn FnMut(u32, f32) -> Visit,
) -> bool {
    if nodes.is_empty() {
        return false;
    }
    let mut limit = tmax;
    let mut stack = SmallVec::<[u32; 64]>::new();
    stack.push(0);
    while let Some(node_index) = stack.pop() {
        let node = &nodes[node_index as usize];
        if node.bounds().intersect(origin, direction, tmin, limit).is_none() {
            continue;
        }
        if node.is_leaf() {
            let start = node.first as usize;
            for item in &refs[start..start + node.count as usize] {
                match visit(*item, limit) {
                    Visit::Continue => {}
                    Visit::Hit(t) => limit = limit.min(t),
                    Visit::Stop => return true,
                }
            }
        } else {
            stack.push(node.first + 1);
            stack.push(node.first);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32) -> Aabb {
        Aabb {
            min: Vec3::new(x, 0f32, 0f32),
            max: Vec3::new(x + 1f32, 1f32, 0f32),
        }
    }

    #[test]
    fn every_item_lands_in_exactly_one_leaf() {
        let bounds: Vec<Aabb> = (0..13).map(|i| unit_box(i as f32 * 2f32)).collect();
        for leaf_size in [1usize, 2, 4] {
            let (nodes, refs) = build_bvh(&bounds, leaf_size);
            let mut seen = vec![0u32; bounds.len()];
            for node in nodes.iter().filter(|node| node.is_leaf()) {
                assert!(node.count as usize <= leaf_size);
                for item in &refs[node.first as usize..(node.first + node.count) as usize] {
                    seen[*item as usize] += 1;
                }
            }
            assert!(seen.iter().all(|count| *count == 1));
            assert!(nodes.len() < 2 * bounds.len());
        }
    }

    #[test]
    fn traversal_finds_only_overlapping_items() {
        let bounds: Vec<Aabb> = (0..8).map(|i| unit_box(i as f32 * 2f32)).collect();
        let (nodes, refs) = build_bvh(&bounds, 1);
        let mut visited = Vec::new();
        traverse(&nodes, &refs, Vec3::new(6.5f32, 0.5f32, 1f32), Vec3::new(0f32, 0f32, -1f32), 0f32, 2f32, &mut |item, _| {
            visited.push(item);
            Visit::Continue
        });
        assert_eq!(visited, vec![3]);
    }

    #[test]
    fn slab_test_handles_axis_aligned_rays() {
        let aabb = Aabb {
            min: Vec3::new(0f32, 0f32, -0.1f32),
            max: Vec3::new(1f32, 1f32, 0.1f32),
        };
        let t = aabb.intersect(Vec3::new(0.5f32, 0.5f32, 0.5f32), Vec3::new(0f32, 0f32, -1f32), 0f32, 1f32);
        assert!((t.unwrap() - 0.4f32).abs() < 1e-6);
        assert_eq!(aabb.intersect(Vec3::new(1.5f32, 0.5f32, 0.5f32), Vec3::new(0f32, 0f32, -1f32), 0f32, 1f32), None);
        assert_eq!(aabb.intersect(Vec3::new(0.5f32, 0.5f32, 0.5f32), Vec3::new(0f32, 0f32, -1f32), 0f32, 0.3f32), None);
    }
}
