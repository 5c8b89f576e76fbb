//! ViewportController - debounced viewport queries over a swappable cluster snapshot
//!
//! The controller sits between a map view and the cluster engine. Viewport changes
//! are debounced by a small `Idle`/`Moving` state machine driven by caller-supplied
//! instants, so the host decides how to wait and tests stay deterministic. The current
//! [`ClusterTree`] lives in a [`SnapshotSlot`] and is replaced wholesale whenever a new
//! dataset is built; readers only ever hold an `Arc` to an immutable tree.

use crate::builder::{Config, PointIndexBuilder};
use crate::point::{ListingPoint, Point};
use crate::tree::{ClusterId, ClusterTree, Feature};
use crate::{BoundingBox, Result};

use instant::Instant;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// The visible region of the map
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub bbox: BoundingBox,
    pub zoom: i32,
}

impl Viewport {
    pub fn new(bbox: BoundingBox, zoom: i32) -> Self {
        Self { bbox, zoom }
    }
}

/// Identity of a fetched dataset; the index is only rebuilt when it changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DatasetId(pub u64);

/// Debounce state of the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// The last settled viewport has been queried
    Idle,
    /// The viewport changed and has not been still for the debounce interval yet
    Moving { last_change: Instant },
}

/// Configuration for [`ViewportController`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControllerConfig {
    /// How long the viewport must stay unchanged before it is queried (default 300 ms)
    pub debounce: Duration,
    /// Index construction parameters
    pub index: Config,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            index: Config::default(),
        }
    }
}

/// Result of a settled viewport query
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ViewportQuery {
    pub viewport: Viewport,
    pub features: Vec<Feature>,
    /// Generation of the snapshot the features came from
    pub generation: u64,
}

/// Permission to install the result of one build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTicket {
    generation: u64,
    dataset: DatasetId,
}

impl BuildTicket {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }
}

#[derive(Debug)]
struct Installed {
    tree: Arc<ClusterTree>,
    generation: u64,
    dataset: Option<DatasetId>,
}

/// Holder of the current cluster tree
///
/// Builds take a [`BuildTicket`] before they start. Tickets are numbered in request
/// order and a finished build is installed only if its ticket is newer than the
/// installed one, so the most recently requested dataset always wins no matter which
/// build finishes first.
#[derive(Debug)]
pub struct SnapshotSlot {
    installed: RwLock<Installed>,
    last_ticket: AtomicU64,
}

impl SnapshotSlot {
    /// Create a slot holding `tree` as generation 0
    pub fn new(tree: ClusterTree) -> Self {
        Self {
            installed: RwLock::new(Installed {
                tree: Arc::new(tree),
                generation: 0,
                dataset: None,
            }),
            last_ticket: AtomicU64::new(0),
        }
    }

    /// The currently installed tree
    pub fn current(&self) -> Arc<ClusterTree> {
        self.read(|installed| Arc::clone(&installed.tree))
    }

    /// Generation of the currently installed tree (0 before the first install)
    pub fn generation(&self) -> u64 {
        self.read(|installed| installed.generation)
    }

    /// Dataset of the currently installed tree
    pub fn dataset(&self) -> Option<DatasetId> {
        self.read(|installed| installed.dataset)
    }

    /// Reserve the next generation for a build of `dataset`
    pub fn begin(&self, dataset: DatasetId) -> BuildTicket {
        let generation = self.last_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        BuildTicket {
            generation,
            dataset,
        }
    }

    /// Install a finished build, unless a newer one is already installed
    ///
    /// Returns `true` if `tree` became the current snapshot.
    pub fn install(&self, ticket: BuildTicket, tree: ClusterTree) -> bool {
        #[cfg(feature = "profiling")]
        profiling::scope!("controller::install");

        let tree = Arc::new(tree);
        let mut installed = self
            .installed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if ticket.generation <= installed.generation {
            tracing::debug!(
                "Discarding stale build of dataset {} (generation {} <= {})",
                ticket.dataset.0,
                ticket.generation,
                installed.generation
            );
            return false;
        }

        *installed = Installed {
            tree: Arc::clone(&tree),
            generation: ticket.generation,
            dataset: Some(ticket.dataset),
        };
        drop(installed);

        tracing::info!(
            "Installed cluster snapshot for dataset {} (generation {}, {} points)",
            ticket.dataset.0,
            ticket.generation,
            tree.len()
        );
        true
    }

    fn read<R>(&self, f: impl FnOnce(&Installed) -> R) -> R {
        let installed = self
            .installed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&installed)
    }
}

/// Debounces viewport changes and answers them from the current snapshot
///
/// ```
/// use map_cluster_lib::{BoundingBox, ControllerConfig, DatasetId, ListingPoint, Viewport, ViewportController};
/// use std::time::Duration;
///
/// let mut controller = ViewportController::new(ControllerConfig::default()).unwrap();
/// controller.load_dataset(DatasetId(1), &[ListingPoint::new("a", 2.35, 48.85, 100.0)]);
///
/// let start = instant::Instant::now();
/// controller.viewport_changed(Viewport::new(BoundingBox::world(), 4), start);
/// assert!(controller.poll(start).is_none());
///
/// let query = controller.poll(start + Duration::from_millis(300)).unwrap();
/// assert_eq!(query.features.len(), 1);
/// ```
#[derive(Debug)]
pub struct ViewportController {
    config: ControllerConfig,
    builder: PointIndexBuilder,
    slot: Arc<SnapshotSlot>,
    state: MotionState,
    /// Latest viewport not yet queried
    pending: Option<Viewport>,
    /// Last viewport that was queried
    settled: Option<Viewport>,
    /// Last dataset a build was requested for, shared with builds in flight
    requested: Arc<Mutex<Option<DatasetId>>>,
}

/// A requested build that has not finished yet
///
/// Dropped without [`finish`](Self::finish), for example when the build panics or
/// its task is dropped before it runs, it forgets its dataset as the requested one
/// so the same dataset can be requested again.
#[derive(Debug)]
struct PendingBuild {
    requested: Arc<Mutex<Option<DatasetId>>>,
    dataset: DatasetId,
    finished: bool,
}

impl PendingBuild {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PendingBuild {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut requested = self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A newer request owns the slot now
        if *requested == Some(self.dataset) {
            tracing::warn!(
                "Build of dataset {} did not finish, it will be rebuilt on the next request",
                self.dataset.0
            );
            *requested = None;
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ViewportController {
    /// Create a controller with an empty snapshot
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let builder = PointIndexBuilder::new(config.index.clone())?;
        let slot = Arc::new(SnapshotSlot::new(ClusterTree::empty(config.index.clone())));
        Ok(Self {
            config,
            builder,
            slot,
            state: MotionState::Idle,
            pending: None,
            settled: None,
            requested: Arc::new(Mutex::new(None)),
        })
    }

    #[inline]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Shared handle to the snapshot slot
    #[inline]
    pub fn slot(&self) -> &Arc<SnapshotSlot> {
        &self.slot
    }

    /// The currently installed tree
    #[inline]
    pub fn snapshot(&self) -> Arc<ClusterTree> {
        self.slot.current()
    }

    /// Record a viewport change at `now`, restarting the debounce interval
    pub fn viewport_changed(&mut self, viewport: Viewport, now: Instant) {
        self.pending = Some(viewport);
        self.state = MotionState::Moving { last_change: now };
    }

    /// When the pending viewport will settle, if the viewport is moving
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            MotionState::Moving { last_change } => Some(last_change + self.config.debounce),
            MotionState::Idle => None,
        }
    }

    /// Query the pending viewport if it has been still for the debounce interval
    ///
    /// Returns one query per settle; polling again before the next change yields
    /// `None`.
    pub fn poll(&mut self, now: Instant) -> Option<ViewportQuery> {
        let MotionState::Moving { last_change } = self.state else {
            return None;
        };
        if now.duration_since(last_change) < self.config.debounce {
            return None;
        }

        self.state = MotionState::Idle;
        let viewport = self.pending.take()?;
        self.settled = Some(viewport);
        Some(self.query(viewport))
    }

    /// Re-run the last settled viewport against the current snapshot
    pub fn refresh(&self) -> Option<ViewportQuery> {
        self.settled.map(|viewport| self.query(viewport))
    }

    /// Build and install the index for a dataset on the calling thread
    ///
    /// Does nothing and returns `false` if `dataset` is the one last requested.
    pub fn load_dataset(&mut self, dataset: DatasetId, candidates: &[ListingPoint]) -> bool {
        let Some(pending) = self.request(dataset) else {
            return false;
        };
        let ticket = self.slot.begin(dataset);
        let tree = self.builder.build(candidates);
        let installed = self.slot.install(ticket, tree);
        pending.finish();
        installed
    }

    /// Build and install the index for a dataset on tokio's blocking pool
    ///
    /// Returns `None` without spawning if `dataset` is the one last requested. The
    /// handle resolves to whether the build was installed; a build overtaken by a
    /// newer request resolves to `false`. If the build panics, or the task is dropped
    /// before it runs, the dataset can be requested again.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn_rebuild(
        &mut self,
        dataset: DatasetId,
        candidates: Vec<ListingPoint>,
    ) -> Option<tokio::task::JoinHandle<bool>> {
        let pending = self.request(dataset)?;
        let ticket = self.slot.begin(dataset);
        let builder = self.builder.clone();
        let slot = Arc::clone(&self.slot);

        Some(tokio::task::spawn_blocking(move || {
            #[cfg(feature = "profiling")]
            profiling::scope!("controller::rebuild");

            let tree = builder.build(&candidates);
            let installed = slot.install(ticket, tree);
            pending.finish();
            installed
        }))
    }

    /// Features visible in a viewport on the current snapshot
    pub fn clusters(&self, viewport: &Viewport) -> Vec<Feature> {
        self.snapshot().get_clusters(&viewport.bbox, viewport.zoom)
    }

    pub fn expansion_zoom(&self, id: ClusterId) -> Result<u8> {
        self.snapshot().get_cluster_expansion_zoom(id)
    }

    pub fn leaves(&self, id: ClusterId, limit: usize) -> Result<Vec<Point>> {
        self.snapshot().get_leaves(id, limit)
    }

    /// Remember `dataset` as the last requested one, `None` if it already was
    fn request(&self, dataset: DatasetId) -> Option<PendingBuild> {
        let mut requested = self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *requested == Some(dataset) {
            tracing::debug!("Dataset {} unchanged, keeping current index", dataset.0);
            return None;
        }
        *requested = Some(dataset);
        Some(PendingBuild {
            requested: Arc::clone(&self.requested),
            dataset,
            finished: false,
        })
    }

    fn query(&self, viewport: Viewport) -> ViewportQuery {
        let (tree, generation) = self
            .slot
            .read(|installed| (Arc::clone(&installed.tree), installed.generation));
        ViewportQuery {
            viewport,
            features: tree.get_clusters(&viewport.bbox, viewport.zoom),
            generation,
        }
    }
}
