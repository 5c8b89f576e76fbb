//! Quadtree spatial index over the nodes of a single zoom level
//!
//! The tree is rooted at the whole world in normalized Web Mercator space and splits
//! leaves into four quadrants once they exceed their capacity. Entries are indices
//! into the owning level's node array, so the tree never copies node data.

use geo::{Coord, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion on stacked points
const MAX_DEPTH: u32 = 20;

/// A single indexed position
#[derive(Clone, Copy, Debug)]
struct Entry {
    position: Coord<f64>,
    index: u32,
}

/// Root container for a level's spatial index
#[derive(Debug, Clone)]
pub(crate) struct Quadtree {
    /// Root node covering the entire world
    root: QuadtreeNode,
    /// Leaf capacity before subdivision
    capacity: usize,
    /// Number of indexed entries
    len: usize,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounds in normalized Mercator coordinates
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entries stored at this node (only leaves hold entries)
    entries: Vec<Entry>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Quadtree {
    /// Create an empty quadtree covering the world
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            root: QuadtreeNode::new(
                Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }),
                0,
            ),
            capacity: capacity.max(1),
            len: 0,
        }
    }

    /// Build a quadtree from `(position, index)` pairs
    pub(crate) fn from_entries(
        entries: impl IntoIterator<Item = (Coord<f64>, u32)>,
        capacity: usize,
    ) -> Self {
        let mut tree = Self::new(capacity);
        for (position, index) in entries {
            tree.insert(position, index);
        }
        tree
    }

    /// Insert a position. Positions outside the unit square are clamped onto it.
    pub(crate) fn insert(&mut self, position: Coord<f64>, index: u32) {
        let position = Coord {
            x: position.x.clamp(0.0, 1.0),
            y: position.y.clamp(0.0, 1.0),
        };
        self.root.insert(Entry { position, index }, self.capacity);
        self.len += 1;
    }

    /// Collect the indices of all entries inside `range` (inclusive bounds),
    /// sorted ascending
    pub(crate) fn query(&self, range: Rect<f64>) -> Vec<u32> {
        let mut results = Vec::new();
        self.root.query(range, &mut results);
        results.sort_unstable();
        results
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl QuadtreeNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    /// Index of the child quadrant a position falls into
    #[inline]
    fn quadrant(&self, position: Coord<f64>) -> usize {
        let center = self.bounding_box.center();
        let is_east = position.x >= center.x;
        let is_south = position.y >= center.y;
        match (is_east, is_south) {
            (false, false) => 0, // NW
            (true, false) => 1,  // NE
            (false, true) => 2,  // SW
            (true, true) => 3,   // SE
        }
    }

    fn insert(&mut self, entry: Entry, capacity: usize) {
        if self.children.is_some() {
            let quadrant = self.quadrant(entry.position);
            if let Some(children) = &mut self.children {
                children[quadrant].insert(entry, capacity);
            }
            return;
        }

        self.entries.push(entry);

        if self.entries.len() > capacity && self.level < MAX_DEPTH {
            self.subdivide(capacity);
        }
    }

    /// Split this leaf into four children and push its entries down
    fn subdivide(&mut self, capacity: usize) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid = self.bounding_box.center();
        let child_level = self.level + 1;

        let nw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid.x, y: mid.y }),
            child_level,
        );
        let ne = QuadtreeNode::new(
            Rect::new(Coord { x: mid.x, y: min.y }, Coord { x: max.x, y: mid.y }),
            child_level,
        );
        let sw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid.y }, Coord { x: mid.x, y: max.y }),
            child_level,
        );
        let se = QuadtreeNode::new(
            Rect::new(Coord { x: mid.x, y: mid.y }, Coord { x: max.x, y: max.y }),
            child_level,
        );

        let mut children = Box::new([nw, ne, sw, se]);
        for entry in std::mem::take(&mut self.entries) {
            let quadrant = self.quadrant(entry.position);
            children[quadrant].insert(entry, capacity);
        }
        self.children = Some(children);
    }

    fn query(&self, range: Rect<f64>, results: &mut Vec<u32>) {
        // Frustum culling - check if this node intersects the range
        if !self.intersects(range) {
            return;
        }

        let min = range.min();
        let max = range.max();
        for entry in &self.entries {
            let p = entry.position;
            if p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y {
                results.push(entry.index);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(range, results);
            }
        }
    }

    /// Check if this node intersects the range (not disjoint)
    #[inline]
    fn intersects(&self, range: Rect<f64>) -> bool {
        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let rmin = range.min();
        let rmax = range.max();

        !(max.x < rmin.x || min.x > rmax.x || max.y < rmin.y || min.y > rmax.y)
    }

    #[cfg(test)]
    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(|c| c.depth()).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    #[test]
    fn test_quadtree_creation() {
        let tree = Quadtree::new(8);
        assert_eq!(tree.len(), 0);
        assert!(tree.root.entries.is_empty());
        assert!(tree.root.children.is_none());
        assert!(tree.query(rect(0.0, 0.0, 1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_insert_and_query() {
        let tree = Quadtree::from_entries(
            [
                (Coord { x: 0.1, y: 0.1 }, 0),
                (Coord { x: 0.9, y: 0.1 }, 1),
                (Coord { x: 0.1, y: 0.9 }, 2),
                (Coord { x: 0.9, y: 0.9 }, 3),
            ],
            2,
        );

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.query(rect(0.0, 0.0, 1.0, 1.0)), vec![0, 1, 2, 3]);
        assert_eq!(tree.query(rect(0.5, 0.0, 1.0, 0.5)), vec![1]);
        assert_eq!(tree.query(rect(0.0, 0.5, 0.5, 1.0)), vec![2]);
        assert!(tree.query(rect(0.4, 0.4, 0.6, 0.6)).is_empty());
    }

    #[test]
    fn test_query_bounds_are_inclusive() {
        let tree = Quadtree::from_entries([(Coord { x: 0.25, y: 0.75 }, 7)], 4);
        assert_eq!(tree.query(rect(0.25, 0.75, 0.25, 0.75)), vec![7]);
        assert_eq!(tree.query(rect(0.0, 0.0, 0.25, 0.75)), vec![7]);
    }

    #[test]
    fn test_node_subdivide() {
        let mut tree = Quadtree::new(4);
        for i in 0..5 {
            tree.insert(Coord { x: 0.1 * i as f64 + 0.05, y: 0.5 }, i);
        }

        let children = tree.root.children.as_ref().unwrap();
        assert_eq!(children.len(), 4);
        for child in children.iter() {
            assert_eq!(child.level, 1);
        }
        assert!(tree.root.entries.is_empty());
        assert_eq!(tree.query(rect(0.0, 0.0, 1.0, 1.0)).len(), 5);
    }

    #[test]
    fn test_stacked_points_stop_at_max_depth() {
        let mut tree = Quadtree::new(1);
        for i in 0..10 {
            tree.insert(Coord { x: 0.3, y: 0.3 }, i);
        }
        assert!(tree.root.depth() <= MAX_DEPTH);
        assert_eq!(tree.query(rect(0.3, 0.3, 0.3, 0.3)).len(), 10);
    }

    #[test]
    fn test_out_of_range_positions_are_clamped() {
        let tree = Quadtree::from_entries([(Coord { x: 1.2, y: -0.1 }, 0)], 4);
        assert_eq!(tree.query(rect(0.9, 0.0, 1.0, 0.1)), vec![0]);
    }

    #[test]
    fn test_small_query_matches_linear_scan() {
        let positions: Vec<Coord<f64>> = (0..500)
            .map(|i| {
                let t = i as f64;
                Coord {
                    x: (t * 0.618_033_988_7).fract(),
                    y: (t * 0.414_213_562_3).fract(),
                }
            })
            .collect();
        let tree = Quadtree::from_entries(
            positions.iter().enumerate().map(|(i, p)| (*p, i as u32)),
            8,
        );

        let range = rect(0.2, 0.3, 0.35, 0.5);
        let expected: Vec<u32> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.x >= 0.2 && p.x <= 0.35 && p.y >= 0.3 && p.y <= 0.5)
            .map(|(i, _)| i as u32)
            .collect();

        assert_eq!(tree.query(range), expected);
    }
}
