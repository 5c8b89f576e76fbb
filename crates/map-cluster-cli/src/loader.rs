//! Reading listing datasets from disk or stdin

use crate::error::CliError;
use map_cluster_lib::{DatasetId, ListingPoint};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::Path;

/// A parsed dataset and its identity
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Derived from the raw bytes, so identical inputs share an identity
    pub id: DatasetId,
    pub listings: Vec<ListingPoint>,
}

impl Dataset {
    /// Load a JSON array of listings from `path`, or from stdin when `path` is `-`
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let io_error = |source| CliError::Io {
            path: path.to_path_buf(),
            source,
        };

        let bytes = if path == Path::new("-") {
            let mut bytes = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut bytes)
                .map_err(io_error)?;
            bytes
        } else {
            std::fs::read(path).map_err(io_error)?
        };

        let dataset = Self::from_slice(&bytes)?;
        tracing::info!(
            "Loaded {} listings from {}",
            dataset.listings.len(),
            path.display()
        );
        Ok(dataset)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CliError> {
        let listings: Vec<ListingPoint> = serde_json::from_slice(bytes)?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(Self {
            id: DatasetId(hasher.finish()),
            listings,
        })
    }
}
