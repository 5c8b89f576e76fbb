//! Subcommand execution against a viewport controller

use crate::error::CliError;
use crate::loader::Dataset;
use crate::settings::{Command, Settings};
use instant::Instant;
use map_cluster_lib::{BoundingBox, TreeInfo, Viewport, ViewportController, ViewportQuery};
use serde::Serialize;
use serde_json::Value;

/// Output of the `info` subcommand
#[derive(Debug, Serialize)]
struct InfoReport {
    #[serde(flatten)]
    info: TreeInfo,
    bounding_box: Option<BoundingBox>,
    center: Option<(f64, f64)>,
}

/// Load the input, build the index in the background and run the subcommand
pub async fn run(settings: Settings) -> Result<Value, CliError> {
    profiling::scope!("cli::run");

    let dataset = Dataset::load(&settings.input)?;
    let mut controller = ViewportController::new(settings.controller_config())?;

    if let Some(build) = controller.spawn_rebuild(dataset.id, dataset.listings) {
        build.await?;
    }

    execute(&mut controller, &settings.command).await
}

/// Run one subcommand against the controller's current snapshot
pub async fn execute(
    controller: &mut ViewportController,
    command: &Command,
) -> Result<Value, CliError> {
    let output = match command {
        Command::Clusters { bbox, zoom } => {
            let query = settle(controller, Viewport::new(*bbox, *zoom)).await;
            tracing::info!(
                "{} features at zoom {}",
                query.features.len(),
                query.viewport.zoom
            );
            serde_json::to_value(query)?
        }
        Command::Leaves { id, limit, offset } => {
            let leaves = controller
                .snapshot()
                .get_leaves_paged(*id, *limit, *offset)?;
            serde_json::to_value(leaves)?
        }
        Command::Expand { id } => {
            let zoom = controller.expansion_zoom(*id)?;
            serde_json::json!({ "id": id, "expansion_zoom": zoom })
        }
        Command::Info => {
            let tree = controller.snapshot();
            serde_json::to_value(InfoReport {
                info: tree.info(),
                bounding_box: tree.bounding_box(),
                center: tree.center(),
            })?
        }
    };
    Ok(output)
}

/// Feed a viewport to the controller and wait for it to settle
async fn settle(controller: &mut ViewportController, viewport: Viewport) -> ViewportQuery {
    controller.viewport_changed(viewport, Instant::now());
    loop {
        let now = Instant::now();
        if let Some(query) = controller.poll(now) {
            return query;
        }
        // Moving until polled successfully, so the deadline is always set here
        let deadline = controller.next_deadline().unwrap_or(now);
        tokio::time::sleep(deadline.saturating_duration_since(now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_cluster_lib::{ControllerConfig, DatasetId, ListingPoint};
    use std::time::Duration;

    fn controller() -> ViewportController {
        let mut controller = ViewportController::new(ControllerConfig {
            debounce: Duration::from_millis(5),
            ..ControllerConfig::default()
        })
        .unwrap();
        let listings: Vec<ListingPoint> = (0..12)
            .map(|i| ListingPoint::new(format!("l{i}"), 4.9 + i as f64 * 0.001, 52.37, 80.0))
            .collect();
        controller.load_dataset(DatasetId(1), &listings);
        controller
    }

    fn first_cluster_id(output: &Value) -> String {
        output["features"][0]["id"].to_string()
    }

    #[tokio::test]
    async fn test_clusters_command() {
        let mut controller = controller();
        let command = Command::Clusters {
            bbox: BoundingBox::world(),
            zoom: 2,
        };

        let output = execute(&mut controller, &command).await.unwrap();
        assert_eq!(output["generation"], 1);
        assert_eq!(output["features"].as_array().unwrap().len(), 1);
        assert_eq!(output["features"][0]["type"], "cluster");
        assert_eq!(output["features"][0]["count"], 12);
        assert_eq!(output["features"][0]["aggregate"]["avg"], 80.0);
    }

    #[tokio::test]
    async fn test_cluster_aggregate_output() {
        let mut controller = ViewportController::new(ControllerConfig {
            debounce: Duration::ZERO,
            ..ControllerConfig::default()
        })
        .unwrap();
        controller.load_dataset(
            DatasetId(2),
            &[
                ListingPoint::new("a", 0.0, 0.0, 100.0),
                ListingPoint::new("b", 0.005, 0.0, 200.0),
                ListingPoint::new("c", 0.01, 0.0, 300.0),
            ],
        );
        let command = Command::Clusters {
            bbox: BoundingBox::world(),
            zoom: 5,
        };

        let output = execute(&mut controller, &command).await.unwrap();
        let aggregate = &output["features"][0]["aggregate"];
        assert_eq!(aggregate["count"], 3);
        assert_eq!(aggregate["sum"], 600.0);
        assert_eq!(aggregate["avg"], 200.0);
    }

    #[tokio::test]
    async fn test_leaves_and_expand_commands() {
        let mut controller = controller();
        let clusters = Command::Clusters {
            bbox: BoundingBox::world(),
            zoom: 0,
        };
        let output = execute(&mut controller, &clusters).await.unwrap();
        let id = first_cluster_id(&output).parse().unwrap();

        let leaves = Command::Leaves {
            id,
            limit: 5,
            offset: 10,
        };
        let output = execute(&mut controller, &leaves).await.unwrap();
        assert_eq!(output.as_array().unwrap().len(), 2);

        let expand = Command::Expand { id };
        let output = execute(&mut controller, &expand).await.unwrap();
        assert!(output["expansion_zoom"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        let mut controller = controller();
        let command = Command::Expand {
            id: "99999".parse().unwrap(),
        };
        let err = execute(&mut controller, &command).await.unwrap_err();
        assert!(matches!(err, CliError::Cluster(_)));
    }

    #[tokio::test]
    async fn test_info_command() {
        let mut controller = controller();
        let output = execute(&mut controller, &Command::Info).await.unwrap();
        assert_eq!(output["points"], 12);
        assert_eq!(output["max_zoom"], 16);
        assert_eq!(output["validation"]["accepted"], 12);
        assert!(output["bounding_box"]["west"].as_f64().unwrap() < 4.91);
    }

    #[tokio::test]
    async fn test_run_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "a", "longitude": 1.0, "latitude": 1.0, "payload": 3.0}},
               {{"id": "b", "longitude": 1.0, "latitude": 95.0, "payload": 3.0}}]"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let settings =
            <Settings as clap::Parser>::try_parse_from(["map-cluster", "--input", path, "info"])
                .unwrap();

        let output = run(settings).await.unwrap();
        assert_eq!(output["points"], 1);
        assert_eq!(output["validation"]["rejected_coordinates"], 1);
    }
}
