//! Map Cluster Library - Zoom-level clustering of geolocated listings
//!
//! This library turns a set of geolocated listings (a location plus a numeric payload
//! such as a price) into a multi-resolution cluster hierarchy that an interactive map
//! can query per viewport. Every zoom level is precomputed once per dataset, so panning
//! and zooming only ever run cheap range queries against an immutable snapshot.
//!
//! # Architecture
//!
//! - **[`PointIndexBuilder`]**: Validates listings and builds one clustered level per zoom
//! - **[`ClusterTree`]**: Immutable per-zoom levels answering range, leaves and
//!   expansion-zoom queries
//! - **[`Aggregate`]**: Exact running sum/count carried by every cluster
//! - **[`ViewportController`]**: Debounces viewport changes and owns the current snapshot,
//!   swapping it atomically when a new dataset is built
//!
//! # Example
//!
//! ```rust
//! use map_cluster_lib::{BoundingBox, Config, ListingPoint, PointIndexBuilder};
//!
//! # fn main() -> map_cluster_lib::Result<()> {
//! let builder = PointIndexBuilder::new(Config::default())?;
//! let tree = builder.build(&[
//!     ListingPoint::new("a", -0.1270, 51.5070, 120.0),
//!     ListingPoint::new("b", -0.1272, 51.5071, 80.0),
//!     ListingPoint::new("c", -0.1275, 51.5069, 100.0),
//! ]);
//!
//! let features = tree.get_clusters(&BoundingBox::world(), 3);
//! assert_eq!(features.len(), 1);
//! assert_eq!(features[0].count(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! # Performance Characteristics
//!
//! - **Build Time**: O(N · Z) with a hash grid per level (Z = number of zoom levels)
//! - **Query Time**: O(log N + K) per viewport where K = returned features
//! - **Expansion Zoom**: O(Z), following a single cluster's descendants

mod aggregate;
mod bbox;
mod builder;
mod controller;
mod expansion;
mod point;
mod quadtree;
mod tree;
pub mod utils;

// Public API exports
pub use aggregate::Aggregate;
pub use bbox::BoundingBox;
pub use builder::{Config, PointIndexBuilder};
pub use controller::{
    BuildTicket, ControllerConfig, DatasetId, MotionState, SnapshotSlot, Viewport,
    ViewportController, ViewportQuery,
};
pub use point::{ListingPoint, Point, Rejection, ValidationReport};
pub use tree::{ClusterFeature, ClusterId, ClusterTree, Feature, PointFeature, TreeInfo};

/// Error types for the clustering engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClusterError {
    #[error("Cluster not found: {id}")]
    NotFound { id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
