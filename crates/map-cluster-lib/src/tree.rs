//! ClusterTree - the immutable, per-zoom cluster hierarchy
//!
//! Each zoom level stores its nodes in build order plus a quadtree over their
//! Mercator positions. Nodes reference their children one level finer and their parent
//! one level coarser by index, so any cluster can be walked in either direction
//! without touching the rest of the dataset.

use crate::aggregate::Aggregate;
use crate::bbox::BoundingBox;
use crate::builder::Config;
use crate::point::{Point, ValidationReport};
use crate::quadtree::Quadtree;
use crate::{ClusterError, Result, utils};

use geo::{Coord, Rect};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::str::FromStr;

/// Bits of a [`ClusterId`] reserved for the zoom level
const ZOOM_BITS: u32 = 5;
const ZOOM_MASK: u64 = (1 << ZOOM_BITS) - 1;

/// Opaque identifier of a cluster, only meaningful for the tree that produced it
///
/// Renders as a decimal string and parses back with [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ClusterId(u64);

impl ClusterId {
    #[inline]
    pub(crate) fn new(zoom: u8, index: u32) -> Self {
        Self(((index as u64) << ZOOM_BITS) | zoom as u64)
    }

    /// Zoom level the cluster lives on
    #[inline]
    pub fn zoom(&self) -> u8 {
        (self.0 & ZOOM_MASK) as u8
    }

    #[inline]
    pub(crate) fn index(&self) -> u64 {
        self.0 >> ZOOM_BITS
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = ClusterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ClusterId)
            .map_err(|_| ClusterError::NotFound { id: s.to_string() })
    }
}

/// A cluster as returned by viewport queries
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ClusterFeature {
    pub id: ClusterId,
    /// Count-weighted centroid (x = longitude, y = latitude)
    pub centroid: geo::Point<f64>,
    /// Bounds of every point merged into the cluster
    pub bbox: BoundingBox,
    pub count: u64,
    pub aggregate: Aggregate,
    pub zoom: u8,
}

/// A single, unclustered point as returned by viewport queries
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PointFeature {
    pub point_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub payload: f64,
}

/// One renderable item at a zoom level
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize),
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum Feature {
    Cluster(ClusterFeature),
    Point(PointFeature),
}

impl Feature {
    #[inline]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Feature::Cluster(_))
    }

    /// Number of original points this feature stands for
    #[inline]
    pub fn count(&self) -> u64 {
        match self {
            Feature::Cluster(cluster) => cluster.count,
            Feature::Point(_) => 1,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterFeature> {
        match self {
            Feature::Cluster(cluster) => Some(cluster),
            Feature::Point(_) => None,
        }
    }

    pub fn as_point(&self) -> Option<&PointFeature> {
        match self {
            Feature::Point(point) => Some(point),
            Feature::Cluster(_) => None,
        }
    }
}

/// Summary of a built tree
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeInfo {
    /// Number of valid points in the index
    pub points: usize,
    /// Accepted/excluded candidate counts
    pub validation: ValidationReport,
    pub max_zoom: u8,
    /// Number of features covering the whole world, indexed by zoom
    pub features_per_zoom: Vec<usize>,
}

/// A node of one zoom level
#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Normalized Mercator position (the weighted centroid for clusters)
    pub(crate) position: Coord<f64>,
    /// Lon/lat bounds of the points under this node
    pub(crate) bbox: Rect<f64>,
    pub(crate) aggregate: Aggregate,
    /// Index into the tree's points when this node is a single original point
    pub(crate) point: Option<u32>,
    /// Indices of the nodes this one was built from, one level finer
    pub(crate) children: SmallVec<[u32; 4]>,
    /// Index of the node this one belongs to, one level coarser
    pub(crate) parent: Option<u32>,
}

impl Node {
    pub(crate) fn leaf(point: &Point, index: u32) -> Self {
        let location = point.location().0;
        Self {
            position: utils::project(point.longitude(), point.latitude()),
            bbox: Rect::new(location, location),
            aggregate: Aggregate::of_payload(point.payload()),
            point: Some(index),
            children: SmallVec::new(),
            parent: None,
        }
    }

    pub(crate) fn cluster(
        position: Coord<f64>,
        bbox: Rect<f64>,
        aggregate: Aggregate,
        children: SmallVec<[u32; 4]>,
    ) -> Self {
        Self {
            position,
            bbox,
            aggregate,
            point: None,
            children,
            parent: None,
        }
    }

    /// The same node one level coarser, with this node (at `index`) as its only child
    pub(crate) fn carried(&self, index: u32) -> Self {
        Self {
            position: self.position,
            bbox: self.bbox,
            aggregate: self.aggregate,
            point: self.point,
            children: smallvec![index],
            parent: None,
        }
    }

    #[inline]
    pub(crate) fn is_cluster(&self) -> bool {
        self.point.is_none()
    }
}

/// All nodes of a single zoom level plus their spatial index
#[derive(Debug, Clone)]
pub(crate) struct Level {
    nodes: Vec<Node>,
    index: Quadtree,
}

impl Level {
    pub(crate) fn new(nodes: Vec<Node>, index: Quadtree) -> Self {
        debug_assert_eq!(nodes.len(), index.len());
        Self { nodes, index }
    }

    #[inline]
    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Immutable cluster hierarchy for one dataset
///
/// Built by [`PointIndexBuilder::build`](crate::PointIndexBuilder::build); read-only
/// afterwards. Every query is a pure function of the tree and its arguments.
#[derive(Debug, Clone)]
pub struct ClusterTree {
    config: Config,
    points: Vec<Point>,
    /// One level per zoom, index = zoom
    levels: Vec<Level>,
    report: ValidationReport,
    /// Lon/lat bounds of all points (None if empty)
    extent: Option<Rect<f64>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ClusterTree {
    pub(crate) fn from_parts(
        config: Config,
        points: Vec<Point>,
        levels: Vec<Level>,
        report: ValidationReport,
        extent: Option<Rect<f64>>,
    ) -> Self {
        debug_assert_eq!(levels.len(), config.max_zoom as usize + 1);
        Self {
            config,
            points,
            levels,
            report,
            extent,
        }
    }

    /// A tree without points, answering every query with nothing
    pub fn empty(config: Config) -> Self {
        let capacity = config.max_points_per_node;
        let levels = (0..=config.max_zoom)
            .map(|_| Level::new(Vec::new(), Quadtree::new(capacity)))
            .collect();
        Self {
            config,
            points: Vec::new(),
            levels,
            report: ValidationReport::default(),
            extent: None,
        }
    }

    /// Get the features visible in `bbox` at `zoom`
    ///
    /// `zoom` is clamped to `[0, max_zoom]`. Features come back in level order, so the
    /// same query against the same tree always yields the same list. A degenerate box
    /// (edges out of order, including antimeridian-crossing boxes) yields nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use map_cluster_lib::{BoundingBox, Config, ListingPoint, PointIndexBuilder};
    ///
    /// let tree = PointIndexBuilder::new(Config::default())
    ///     .unwrap()
    ///     .build(&[ListingPoint::new("a", 2.35, 48.85, 100.0)]);
    ///
    /// let visible = tree.get_clusters(&BoundingBox::new(2.0, 48.0, 3.0, 49.0), 12);
    /// assert_eq!(visible.len(), 1);
    /// assert!(tree.get_clusters(&BoundingBox::new(3.0, 48.0, 2.0, 49.0), 12).is_empty());
    /// ```
    pub fn get_clusters(&self, bbox: &BoundingBox, zoom: i32) -> Vec<Feature> {
        #[cfg(feature = "profiling")]
        profiling::scope!("tree::get_clusters");

        let Some(range) = bbox.to_mercator() else {
            tracing::debug!("Ignoring degenerate bounding box {:?}", bbox.to_array());
            return Vec::new();
        };

        let zoom = self.clamp_zoom(zoom);
        let level = &self.levels[zoom as usize];
        level
            .index
            .query(range)
            .into_iter()
            .map(|i| self.feature(zoom, i))
            .collect()
    }

    /// Get up to `limit` original points under a cluster
    pub fn get_leaves(&self, id: ClusterId, limit: usize) -> Result<Vec<Point>> {
        self.get_leaves_paged(id, limit, 0)
    }

    /// Get up to `limit` original points under a cluster, skipping the first `offset`
    ///
    /// Points come back in a stable depth-first order; whole subtrees that fall
    /// before `offset` are skipped by their count without being visited.
    pub fn get_leaves_paged(
        &self,
        id: ClusterId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Point>> {
        let (zoom, index) = self.locate_cluster(id)?;
        let count = self.levels[zoom as usize].nodes[index as usize]
            .aggregate
            .count();
        let mut leaves = Vec::with_capacity(limit.min(count as usize));
        let mut skip = offset as u64;
        self.collect_leaves(zoom, index, limit, &mut skip, &mut leaves);
        Ok(leaves)
    }

    /// Get the features one zoom finer that a cluster was built from
    pub fn get_children(&self, id: ClusterId) -> Result<Vec<Feature>> {
        let (zoom, index) = self.locate_cluster(id)?;
        let node = &self.levels[zoom as usize].nodes[index as usize];
        Ok(node
            .children
            .iter()
            .map(|&child| self.feature(zoom + 1, child))
            .collect())
    }

    /// Get tree information
    pub fn info(&self) -> TreeInfo {
        TreeInfo {
            points: self.points.len(),
            validation: self.report,
            max_zoom: self.config.max_zoom,
            features_per_zoom: self.levels.iter().map(Level::len).collect(),
        }
    }

    /// Bounds of all valid points, `None` if the tree is empty
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.extent.map(BoundingBox::from)
    }

    /// Center of [`bounding_box`](Self::bounding_box) as `(lon, lat)`
    #[inline]
    pub fn center(&self) -> Option<(f64, f64)> {
        self.extent.map(|rect| {
            let center = rect.center();
            (center.x, center.y)
        })
    }

    /// Number of valid points
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Valid points in input order
    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    #[inline]
    pub fn max_zoom(&self) -> u8 {
        self.config.max_zoom
    }

    #[inline]
    pub(crate) fn level(&self, zoom: u8) -> &Level {
        &self.levels[zoom as usize]
    }

    #[inline]
    fn clamp_zoom(&self, zoom: i32) -> u8 {
        zoom.clamp(0, self.config.max_zoom as i32) as u8
    }

    /// Resolve an id to the `(zoom, index)` of a cluster node
    pub(crate) fn locate_cluster(&self, id: ClusterId) -> Result<(u8, u32)> {
        let not_found = || ClusterError::NotFound { id: id.to_string() };

        let zoom = id.zoom();
        let level = self.levels.get(zoom as usize).ok_or_else(not_found)?;
        let index = u32::try_from(id.index()).map_err(|_| not_found())?;
        match level.nodes.get(index as usize) {
            Some(node) if node.is_cluster() => Ok((zoom, index)),
            _ => Err(not_found()),
        }
    }

    fn feature(&self, zoom: u8, index: u32) -> Feature {
        let node = &self.levels[zoom as usize].nodes[index as usize];
        match node.point {
            Some(point) => {
                let point = &self.points[point as usize];
                Feature::Point(PointFeature {
                    point_id: point.id().to_string(),
                    longitude: point.longitude(),
                    latitude: point.latitude(),
                    payload: point.payload(),
                })
            }
            None => {
                let (lon, lat) = utils::unproject(node.position);
                Feature::Cluster(ClusterFeature {
                    id: ClusterId::new(zoom, index),
                    centroid: geo::Point::new(lon, lat),
                    bbox: BoundingBox::from(node.bbox),
                    count: node.aggregate.count(),
                    aggregate: node.aggregate,
                    zoom,
                })
            }
        }
    }

    fn collect_leaves(
        &self,
        zoom: u8,
        index: u32,
        limit: usize,
        skip: &mut u64,
        leaves: &mut Vec<Point>,
    ) {
        if leaves.len() >= limit {
            return;
        }

        let node = &self.levels[zoom as usize].nodes[index as usize];
        let count = node.aggregate.count();
        if *skip >= count {
            *skip -= count;
            return;
        }

        if let Some(point) = node.point {
            leaves.push(self.points[point as usize].clone());
            return;
        }

        for &child in &node.children {
            self.collect_leaves(zoom + 1, child, limit, skip, leaves);
        }
    }
}
