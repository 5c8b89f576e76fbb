use clap::{Parser, Subcommand};
use map_cluster_lib::{BoundingBox, ClusterId, Config, ControllerConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Map Cluster - Zoom-level clustering of geolocated listings
pub struct Settings {
    /// JSON array of listings (`{"id", "longitude", "latitude", "payload"}`), `-` for stdin
    #[arg(short, long)]
    pub input: PathBuf,

    /// Clustering radius in screen pixels
    #[arg(long, default_value_t = 60.0)]
    pub radius: f64,

    /// Finest zoom level; points are never clustered at or above it
    #[arg(long, default_value_t = 16)]
    pub max_zoom: u8,

    /// Minimum number of points that form a cluster
    #[arg(long, default_value_t = 3)]
    pub min_points: usize,

    /// Quadtree leaf capacity
    #[arg(long, default_value_t = 64)]
    pub node_capacity: usize,

    /// How long a viewport must stay still before it is queried
    #[arg(long, default_value_t = 300)]
    pub debounce_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Features visible in a bounding box at a zoom level
    Clusters {
        /// `west,south,east,north` in degrees
        #[arg(long, allow_hyphen_values = true, default_value = "-180,-85.05112878,180,85.05112878")]
        bbox: BoundingBox,

        #[arg(long, allow_hyphen_values = true)]
        zoom: i32,
    },
    /// Original listings under a cluster
    Leaves {
        #[arg(long)]
        id: ClusterId,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Zoom level at which a cluster splits apart
    Expand {
        #[arg(long)]
        id: ClusterId,
    },
    /// Summary of the built index
    Info,
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            index: Config {
                radius: self.radius,
                max_zoom: self.max_zoom,
                min_points: self.min_points,
                max_points_per_node: self.node_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library() {
        let settings = Settings::try_parse_from(["map-cluster", "--input", "x.json", "info"]).unwrap();
        assert_eq!(settings.command, Command::Info);
        assert_eq!(settings.controller_config(), ControllerConfig::default());
    }

    #[test]
    fn test_parse_clusters() {
        let settings = Settings::try_parse_from([
            "map-cluster",
            "-i",
            "x.json",
            "--radius",
            "40",
            "clusters",
            "--bbox",
            "-0.5,51.2,0.3,51.7",
            "--zoom",
            "11",
        ])
        .unwrap();

        assert_eq!(settings.radius, 40.0);
        assert_eq!(
            settings.command,
            Command::Clusters {
                bbox: BoundingBox::new(-0.5, 51.2, 0.3, 51.7),
                zoom: 11,
            }
        );
    }

    #[test]
    fn test_parse_clusters_default_bbox() {
        let settings =
            Settings::try_parse_from(["map-cluster", "-i", "x.json", "clusters", "--zoom", "-2"])
                .unwrap();
        assert_eq!(
            settings.command,
            Command::Clusters {
                bbox: BoundingBox::world(),
                zoom: -2,
            }
        );
    }

    #[test]
    fn test_parse_leaves() {
        let settings = Settings::try_parse_from([
            "map-cluster", "-i", "x.json", "leaves", "--id", "97", "--limit", "5",
        ])
        .unwrap();
        assert_eq!(
            settings.command,
            Command::Leaves {
                id: "97".parse().unwrap(),
                limit: 5,
                offset: 0,
            }
        );
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Settings::try_parse_from(["map-cluster", "info"]).is_err());
        assert!(
            Settings::try_parse_from(["map-cluster", "-i", "x", "clusters", "--bbox", "1,2,3", "--zoom", "1"])
                .is_err()
        );
        assert!(Settings::try_parse_from(["map-cluster", "-i", "x", "expand", "--id", "abc"]).is_err());
    }
}
