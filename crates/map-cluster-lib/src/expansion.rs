//! Expansion zoom: the zoom at which a cluster first splits apart
//!
//! Every node knows its children one level finer, so the walk only follows the
//! cluster's own descendants. While they remain a single node the frontier stays one
//! element wide, which keeps the whole lookup within `O(max_zoom)` steps.

use crate::tree::{ClusterId, ClusterTree};
use crate::Result;
use smallvec::SmallVec;

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ClusterTree {
    /// Get the smallest zoom greater than the cluster's own at which its points are
    /// shown as more than one feature, or `max_zoom` if they never separate
    ///
    /// Only the cluster's own descendants are counted. A viewport around the centroid
    /// may also hold unrelated features, for example points of a neighbouring group
    /// that was too small to become a cluster.
    ///
    /// # Errors
    ///
    /// [`ClusterError::NotFound`](crate::ClusterError::NotFound) if `id` does not name
    /// a cluster of this tree.
    pub fn get_cluster_expansion_zoom(&self, id: ClusterId) -> Result<u8> {
        let (zoom, index) = self.locate_cluster(id)?;
        let max_zoom = self.max_zoom();

        let mut frontier: SmallVec<[u32; 8]> = self.level(zoom).nodes()[index as usize]
            .children
            .iter()
            .copied()
            .collect();

        for current in zoom + 1..max_zoom {
            if frontier.len() > 1 {
                return Ok(current);
            }
            let level = self.level(current);
            frontier = frontier
                .iter()
                .flat_map(move |&node| level.nodes()[node as usize].children.iter().copied())
                .collect();
        }

        Ok(max_zoom)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BoundingBox, ClusterError, ClusterFeature, ClusterTree, Config, Feature, ListingPoint,
        PointIndexBuilder,
    };

    fn builder() -> PointIndexBuilder {
        PointIndexBuilder::new(Config::default()).unwrap()
    }

    /// Widen a box slightly so centroids rounded onto its edges stay inside
    fn padded(bbox: &BoundingBox) -> BoundingBox {
        const PAD: f64 = 1e-6;
        BoundingBox::new(
            bbox.west - PAD,
            bbox.south - PAD,
            bbox.east + PAD,
            bbox.north + PAD,
        )
    }

    #[test]
    fn test_expansion_zoom_separates_cluster() {
        // Two tight groups about 0.05 degrees apart, far from anything else
        let mut points = Vec::new();
        for i in 0..5 {
            let offset = i as f64 * 0.0001;
            points.push(ListingPoint::new(format!("a{i}"), 10.0 + offset, 20.0, 1.0));
            points.push(ListingPoint::new(format!("b{i}"), 10.05 + offset, 20.0, 1.0));
        }
        let tree = builder().build(&points);

        let top = tree.get_clusters(&BoundingBox::world(), 0);
        assert_eq!(top.len(), 1);
        let cluster = top[0].as_cluster().unwrap();
        assert_eq!(cluster.count, 10);

        let expansion = tree.get_cluster_expansion_zoom(cluster.id).unwrap();
        assert!(expansion > cluster.zoom);

        // Nothing else nearby, so one feature around the centroid at the cluster's zoom
        let (lon, lat) = (cluster.centroid.x(), cluster.centroid.y());
        let around = BoundingBox::around(lon, lat, cluster.zoom, tree.config().radius);
        assert_eq!(tree.get_clusters(&around, cluster.zoom as i32).len(), 1);

        // Its points are shown as several features at the expansion zoom
        let split = tree.get_clusters(&padded(&cluster.bbox), expansion as i32);
        assert!(split.len() > 1);
        assert_eq!(split.iter().map(Feature::count).sum::<u64>(), 10);

        // And as a single feature just before it
        let before = tree.get_clusters(&padded(&cluster.bbox), expansion as i32 - 1);
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_expansion_zoom_of_every_cluster() {
        let points: Vec<ListingPoint> = (0..400)
            .map(|i| {
                let lon = -3.0 + (i % 20) as f64 * 0.3;
                let lat = 40.0 + (i / 20) as f64 * 0.2;
                ListingPoint::new(format!("p{i}"), lon, lat, i as f64)
            })
            .collect();
        let tree = builder().build(&points);

        for zoom in 0..tree.max_zoom() {
            for feature in tree.get_clusters(&BoundingBox::world(), zoom as i32) {
                let Some(cluster) = feature.as_cluster() else {
                    continue;
                };
                let expansion = tree.get_cluster_expansion_zoom(cluster.id).unwrap();
                assert!(expansion > zoom && expansion <= tree.max_zoom());

                let split = tree.get_clusters(&padded(&cluster.bbox), expansion as i32);
                let inside: u64 = split
                    .iter()
                    .filter(|f| match f {
                        Feature::Cluster(c) => cluster.bbox.contains_box(&c.bbox),
                        Feature::Point(p) => cluster.bbox.contains(p.longitude, p.latitude),
                    })
                    .map(Feature::count)
                    .sum();
                assert!(inside >= cluster.count);
            }
        }
    }

    /// Features standing for a cluster's points at `zoom`, walking down from its own
    fn descendants(tree: &ClusterTree, cluster: &ClusterFeature, zoom: u8) -> Vec<Feature> {
        let mut features = vec![Feature::Cluster(cluster.clone())];
        for _ in cluster.zoom..zoom {
            features = features
                .into_iter()
                .flat_map(|feature| match feature {
                    Feature::Cluster(c) => tree.get_children(c.id).unwrap(),
                    point => vec![point],
                })
                .collect();
        }
        features
    }

    #[test]
    fn test_expansion_zoom_counts_only_descendants() {
        // splitmix64, so the layout is irregular but reproducible
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = move || {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            (z ^ (z >> 31)) as f64 / u64::MAX as f64
        };
        let points: Vec<ListingPoint> = (0..1500)
            .map(|i| {
                let lon = -5.0 + next() * 10.0;
                let lat = 40.0 + next() * 8.0;
                ListingPoint::new(format!("p{i}"), lon, lat, 1.0)
            })
            .collect();
        let tree = builder().build(&points);

        for zoom in [0, 3, 6, 9, 12] {
            for feature in tree.get_clusters(&BoundingBox::world(), zoom) {
                let Some(cluster) = feature.as_cluster() else {
                    continue;
                };
                let expansion = tree.get_cluster_expansion_zoom(cluster.id).unwrap();

                let before = descendants(&tree, cluster, expansion - 1);
                assert_eq!(before.len(), 1);

                let split = descendants(&tree, cluster, expansion);
                assert!(split.len() > 1);
                assert_eq!(split.iter().map(Feature::count).sum::<u64>(), cluster.count);
            }
        }
    }

    #[test]
    fn test_stacked_points_expand_at_max_zoom() {
        let points: Vec<ListingPoint> = (0..4)
            .map(|i| ListingPoint::new(format!("s{i}"), 5.0, 5.0, 1.0))
            .collect();
        let tree = builder().build(&points);

        let cluster = tree.get_clusters(&BoundingBox::world(), 3)[0]
            .as_cluster()
            .unwrap()
            .clone();
        assert_eq!(tree.get_cluster_expansion_zoom(cluster.id).unwrap(), 16);
    }

    #[test]
    fn test_expansion_zoom_unknown_id() {
        let tree = builder().build(&[ListingPoint::new("a", 1.0, 1.0, 1.0)]);
        let err = tree
            .get_cluster_expansion_zoom("12345".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound { .. }));
    }
}
