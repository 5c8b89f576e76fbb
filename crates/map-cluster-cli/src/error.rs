use map_cluster_lib::ClusterError;
use std::path::PathBuf;

/// Everything that can stop a CLI run
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse listings: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Index build task failed: {0}")]
    Build(#[from] tokio::task::JoinError),
}
