//! PointIndexBuilder - validates listings and builds every zoom level of a ClusterTree
//!
//! Levels are built from the finest zoom down to zoom 0. The finest level holds one
//! node per valid point; each coarser level is produced by a greedy centroid merge of
//! the level below it, measured in that zoom's pixel space. Building level `z` from
//! level `z + 1` (instead of from the raw points) is what gives every node exactly one
//! parent per coarser zoom.

use crate::aggregate::Aggregate;
use crate::point::{self, ListingPoint, Point};
use crate::quadtree::Quadtree;
use crate::tree::{ClusterTree, Level, Node};
use crate::{ClusterError, Result, utils};

use geo::{Coord, Rect};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;

/// Construction parameters for the cluster index
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Clustering distance in screen pixels (default 60).
    /// A node exactly `radius` pixels away from a cluster centroid joins it.
    pub radius: f64,
    /// Finest zoom level (default 16). Level `max_zoom` only contains raw points;
    /// clustering happens on every zoom below it.
    pub max_zoom: u8,
    /// Minimum number of original points a cluster must merge (default 3)
    pub min_points: usize,
    /// Leaf capacity of the per-level quadtrees before subdivision (default 64)
    pub max_points_per_node: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            radius: 60.0,
            max_zoom: 16,
            min_points: 3,
            max_points_per_node: 64,
        }
    }
}

impl Config {
    /// Check the configuration for values the builder cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(ClusterError::InvalidConfig(format!(
                "radius must be a positive number of pixels, got {}",
                self.radius
            )));
        }
        if self.max_zoom > utils::MAX_SUPPORTED_ZOOM {
            return Err(ClusterError::InvalidConfig(format!(
                "max_zoom must be at most {}, got {}",
                utils::MAX_SUPPORTED_ZOOM,
                self.max_zoom
            )));
        }
        if self.min_points < 2 {
            return Err(ClusterError::InvalidConfig(format!(
                "min_points must be at least 2, got {}",
                self.min_points
            )));
        }
        if self.max_points_per_node == 0 {
            return Err(ClusterError::InvalidConfig(
                "max_points_per_node must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds immutable [`ClusterTree`]s from listing candidates
#[derive(Debug, Clone)]
pub struct PointIndexBuilder {
    config: Config,
}

/// A group being formed during the greedy merge of one level
struct Group {
    /// Count-weighted sums of member positions
    weighted_x: f64,
    weighted_y: f64,
    aggregate: Aggregate,
    /// Lon/lat bounds of everything merged so far
    bbox: Rect<f64>,
    /// Indices of the member nodes in the finer level
    members: SmallVec<[u32; 4]>,
}

impl Group {
    fn seed(node: &Node, index: u32) -> Self {
        let weight = node.aggregate.count() as f64;
        Self {
            weighted_x: node.position.x * weight,
            weighted_y: node.position.y * weight,
            aggregate: node.aggregate,
            bbox: node.bbox,
            members: smallvec![index],
        }
    }

    #[inline]
    fn centroid(&self) -> Coord<f64> {
        let weight = self.aggregate.count() as f64;
        Coord {
            x: self.weighted_x / weight,
            y: self.weighted_y / weight,
        }
    }

    fn absorb(&mut self, node: &Node, index: u32) {
        let weight = node.aggregate.count() as f64;
        self.weighted_x += node.position.x * weight;
        self.weighted_y += node.position.y * weight;
        self.aggregate.absorb(&node.aggregate);
        self.bbox = union(self.bbox, node.bbox);
        self.members.push(index);
    }
}

/// Uniform hash grid over group centroids, with cells as wide as the merge radius,
/// so every centroid within the radius of a position lies in its 3x3 neighborhood
struct CentroidGrid {
    cell_size: f64,
    cells: HashMap<(i64, i64), SmallVec<[u32; 4]>>,
}

impl CentroidGrid {
    fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    #[inline]
    fn cell_of(&self, position: Coord<f64>) -> (i64, i64) {
        (
            (position.x / self.cell_size).floor() as i64,
            (position.y / self.cell_size).floor() as i64,
        )
    }

    fn insert(&mut self, cell: (i64, i64), group: u32) {
        self.cells.entry(cell).or_default().push(group);
    }

    fn relocate(&mut self, from: (i64, i64), to: (i64, i64), group: u32) {
        if from == to {
            return;
        }
        if let Some(bucket) = self.cells.get_mut(&from) {
            bucket.retain(|g| *g != group);
            if bucket.is_empty() {
                self.cells.remove(&from);
            }
        }
        self.insert(to, group);
    }

    /// Groups whose cell is adjacent to (or equal to) `cell`
    fn neighbors(&self, cell: (i64, i64)) -> impl Iterator<Item = u32> + '_ {
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| {
                self.cells
                    .get(&(cell.0 + dx, cell.1 + dy))
                    .into_iter()
                    .flat_map(|bucket| bucket.iter().copied())
            })
        })
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PointIndexBuilder {
    /// Create a builder, rejecting unusable configurations
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a new cluster tree from listing candidates
    ///
    /// Malformed candidates are excluded and counted in the tree's validation report;
    /// they never abort the build. The result depends on the input order only through
    /// the greedy merge, so the same slice always produces the same tree.
    pub fn build(&self, candidates: &[ListingPoint]) -> ClusterTree {
        #[cfg(feature = "profiling")]
        profiling::scope!("builder::build");

        let started = instant::Instant::now();
        let (points, report) = point::validate_all(candidates);
        let max_zoom = self.config.max_zoom as usize;

        let mut node_levels: Vec<Vec<Node>> = vec![Vec::new(); max_zoom + 1];
        node_levels[max_zoom] = points
            .iter()
            .enumerate()
            .map(|(i, p)| Node::leaf(p, i as u32))
            .collect();

        for zoom in (0..max_zoom).rev() {
            let (coarser, finer) = node_levels.split_at_mut(zoom + 1);
            coarser[zoom] = self.merge_level(&mut finer[0], zoom as u8);
            tracing::debug!(
                "Zoom {}: {} nodes from {}",
                zoom,
                coarser[zoom].len(),
                finer[0].len()
            );
        }

        let capacity = self.config.max_points_per_node;
        let levels: Vec<Level> = node_levels
            .into_par_iter()
            .map(|nodes| {
                let index = Quadtree::from_entries(
                    nodes.iter().enumerate().map(|(i, n)| (n.position, i as u32)),
                    capacity,
                );
                Level::new(nodes, index)
            })
            .collect();

        let extent = extent_of(&points);

        tracing::info!(
            "Built cluster tree: {} points ({} skipped), {} top-level features, {:.1} ms",
            points.len(),
            report.skipped(),
            levels.first().map_or(0, |l| l.len()),
            started.elapsed().as_secs_f64() * 1000.0
        );

        ClusterTree::from_parts(self.config.clone(), points, levels, report, extent)
    }

    /// Greedily merge the nodes of level `zoom + 1` into the nodes of level `zoom`,
    /// recording each finer node's parent
    fn merge_level(&self, finer: &mut [Node], zoom: u8) -> Vec<Node> {
        let radius_sq = self.config.radius * self.config.radius;
        let mut grid = CentroidGrid::new(self.config.radius / utils::world_size(zoom));
        let mut groups: Vec<Group> = Vec::new();

        for (i, node) in finer.iter().enumerate() {
            let cell = grid.cell_of(node.position);

            // First existing group (lowest creation index) within the radius
            let target = grid
                .neighbors(cell)
                .filter(|&g| {
                    let centroid = groups[g as usize].centroid();
                    utils::pixel_distance_sq(centroid, node.position, zoom) <= radius_sq
                })
                .min();

            match target {
                Some(g) => {
                    let group = &mut groups[g as usize];
                    let from = grid.cell_of(group.centroid());
                    group.absorb(node, i as u32);
                    let to = grid.cell_of(group.centroid());
                    grid.relocate(from, to, g);
                }
                None => {
                    let g = groups.len() as u32;
                    groups.push(Group::seed(node, i as u32));
                    grid.insert(cell, g);
                }
            }
        }

        let mut nodes = Vec::with_capacity(groups.len());
        for group in groups {
            if group.members.len() > 1 && group.aggregate.count() >= self.config.min_points as u64
            {
                let index = nodes.len() as u32;
                for &member in &group.members {
                    finer[member as usize].parent = Some(index);
                }
                let position = group.centroid();
                nodes.push(Node::cluster(
                    position,
                    group.bbox,
                    group.aggregate,
                    group.members,
                ));
            } else {
                // Too few points to form a cluster: every member stays on its own
                for &member in &group.members {
                    let index = nodes.len() as u32;
                    finer[member as usize].parent = Some(index);
                    nodes.push(finer[member as usize].carried(member));
                }
            }
        }

        nodes
    }
}

#[inline]
fn union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

/// Lon/lat bounds of all valid points
fn extent_of(points: &[Point]) -> Option<Rect<f64>> {
    points
        .iter()
        .map(|p| Rect::new(p.location().0, p.location().0))
        .reduce(union)
}
