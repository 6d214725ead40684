//! Snapshot storage, service, and persistence (spec §4.5–§4.7): the tiered
//! ledger used to restore a known-good display configuration.

use crate::cancellation::CancellationToken;
use crate::ports::DisplaySettingsPort;
use crate::types::{ApplyStatus, DeviceId, Snapshot, SnapshotTier};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Abstract snapshot storage. Implementations are synchronous: the only
/// conforming backend (`FileSnapshotStorage`) is a handful of small JSON
/// files, written from the state-machine thread and read from the async
/// worker — there is no benefit to an async trait here, matching the
/// original's synchronous file I/O.
pub trait SnapshotStorage: Send + Sync {
    fn load(&self, tier: SnapshotTier) -> Option<Snapshot>;
    fn save(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool;
    fn remove(&self, tier: SnapshotTier) -> bool;

    /// Device ids referenced by `snapshot` (from topology, falling back to
    /// the modes map if topology is empty) that are absent from `available`.
    fn missing_devices(&self, snapshot: &Snapshot, available: &BTreeSet<DeviceId>) -> Vec<DeviceId> {
        let mut devices: BTreeSet<DeviceId> = snapshot
            .topology
            .iter()
            .flatten()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        if devices.is_empty() {
            devices.extend(snapshot.modes.keys().cloned());
        }

        devices.into_iter().filter(|id| !available.contains(id)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub current: PathBuf,
    pub previous: PathBuf,
    pub golden: PathBuf,
}

pub struct FileSnapshotStorage {
    paths: SnapshotPaths,
}

impl FileSnapshotStorage {
    pub fn new(paths: SnapshotPaths) -> Self {
        Self { paths }
    }

    fn path_for(&self, tier: SnapshotTier) -> &Path {
        match tier {
            SnapshotTier::Current => &self.paths.current,
            SnapshotTier::Previous => &self.paths.previous,
            SnapshotTier::Golden => &self.paths.golden,
        }
    }
}

impl SnapshotStorage for FileSnapshotStorage {
    fn load(&self, tier: SnapshotTier) -> Option<Snapshot> {
        let path = self.path_for(tier);
        let contents = std::fs::read_to_string(path).ok()?;
        // Absent or unknown fields make the loader treat the snapshot as
        // absent, not corrupted-fatal (spec §6).
        serde_json::from_str(&contents).ok()
    }

    fn save(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool {
        let path = self.path_for(tier);
        let Some(parent) = path.parent() else {
            return false;
        };
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }

        let Ok(json) = serde_json::to_string_pretty(snapshot) else {
            return false;
        };

        // Write-then-rename so a reader never observes a partial file.
        let tmp_path = path.with_extension("json.tmp");
        if std::fs::write(&tmp_path, json).is_err() {
            return false;
        }
        std::fs::rename(&tmp_path, path).is_ok()
    }

    fn remove(&self, tier: SnapshotTier) -> bool {
        std::fs::remove_file(self.path_for(tier)).is_ok()
    }
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct InMemorySnapshotStorage {
    snapshots: Mutex<BTreeMap<SnapshotTier, Snapshot>>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStorage for InMemorySnapshotStorage {
    fn load(&self, tier: SnapshotTier) -> Option<Snapshot> {
        self.snapshots.lock().unwrap().get(&tier).cloned()
    }

    fn save(&self, tier: SnapshotTier, snapshot: &Snapshot) -> bool {
        self.snapshots.lock().unwrap().insert(tier, snapshot.clone());
        true
    }

    fn remove(&self, tier: SnapshotTier) -> bool {
        self.snapshots.lock().unwrap().remove(&tier).is_some()
    }
}

/// Thin adapter around the display port.
pub struct SnapshotService {
    display: Arc<dyn DisplaySettingsPort>,
}

impl SnapshotService {
    pub fn new(display: Arc<dyn DisplaySettingsPort>) -> Self {
        Self { display }
    }

    pub async fn capture(&self) -> Snapshot {
        self.display.capture_snapshot().await
    }

    pub async fn apply(&self, snapshot: &Snapshot, token: &CancellationToken) -> ApplyStatus {
        if token.is_cancelled() {
            return ApplyStatus::Fatal;
        }
        if !self.display.validate_topology(&snapshot.topology).await {
            return ApplyStatus::InvalidRequest;
        }
        if !self.display.apply_snapshot(snapshot).await {
            return ApplyStatus::Retryable;
        }
        if token.is_cancelled() {
            return ApplyStatus::Fatal;
        }
        ApplyStatus::Ok
    }

    pub async fn validate(&self, snapshot: &Snapshot) -> bool {
        self.display.validate_topology(&snapshot.topology).await
    }

    pub async fn matches_current(&self, snapshot: &Snapshot) -> bool {
        self.display.snapshot_matches_current(snapshot).await
    }
}

/// Wraps snapshot storage with tier ordering policy and device-blacklist
/// filtering.
pub struct SnapshotPersistence {
    storage: Arc<dyn SnapshotStorage>,
    prefer_golden_first: Mutex<bool>,
}

impl SnapshotPersistence {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        Self {
            storage,
            prefer_golden_first: Mutex::new(false),
        }
    }

    pub fn set_prefer_golden_first(&self, prefer: bool) {
        *self.prefer_golden_first.lock().unwrap() = prefer;
    }

    pub fn recovery_order(&self) -> [SnapshotTier; 3] {
        if *self.prefer_golden_first.lock().unwrap() {
            [SnapshotTier::Golden, SnapshotTier::Current, SnapshotTier::Previous]
        } else {
            [SnapshotTier::Current, SnapshotTier::Previous, SnapshotTier::Golden]
        }
    }

    /// Filters `blacklist`ed devices out of `snapshot` before persisting;
    /// rejects (returns false, writes nothing) if the filtered result has
    /// no topology groups and no modes.
    pub fn save(&self, tier: SnapshotTier, mut snapshot: Snapshot, blacklist: &BTreeSet<DeviceId>) -> bool {
        if !filter_snapshot_devices(&mut snapshot, blacklist) {
            return false;
        }
        self.storage.save(tier, &snapshot)
    }

    /// Loads from storage; refuses (returns `None`) if the snapshot
    /// references any device id absent from `available`.
    pub fn load(&self, tier: SnapshotTier, available: &BTreeSet<DeviceId>) -> Option<Snapshot> {
        let snapshot = self.storage.load(tier)?;
        let missing = self.storage.missing_devices(&snapshot, available);
        if !missing.is_empty() {
            return None;
        }
        Some(snapshot)
    }

    pub fn rotate_current_to_previous(&self) -> bool {
        let Some(current) = self.storage.load(SnapshotTier::Current) else {
            return false;
        };
        self.storage.save(SnapshotTier::Previous, &current)
    }

    pub fn remove(&self, tier: SnapshotTier) -> bool {
        self.storage.remove(tier)
    }
}

fn filter_snapshot_devices(snapshot: &mut Snapshot, blacklist: &BTreeSet<DeviceId>) -> bool {
    if blacklist.is_empty() {
        return true;
    }

    let is_allowed = |id: &str| !blacklist.contains(id);

    snapshot.topology = snapshot
        .topology
        .drain(..)
        .map(|group| group.into_iter().filter(|id| is_allowed(id)).collect::<Vec<_>>())
        .filter(|group| !group.is_empty())
        .collect();

    snapshot.modes.retain(|id, _| is_allowed(id));
    snapshot.hdr_states.retain(|id, _| is_allowed(id));

    if !snapshot.primary_device.is_empty() && !is_allowed(&snapshot.primary_device) {
        snapshot.primary_device.clear();
    }

    !(snapshot.topology.is_empty() && snapshot.modes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DisplayMode;

    fn sample_snapshot() -> Snapshot {
        let mut modes = BTreeMap::new();
        modes.insert(
            "A".to_string(),
            DisplayMode {
                width: 1920,
                height: 1080,
                refresh_rate_numerator: 60,
                refresh_rate_denominator: 1,
            },
        );
        Snapshot {
            topology: vec![vec!["A".to_string()]],
            modes,
            hdr_states: BTreeMap::new(),
            primary_device: "A".to_string(),
        }
    }

    #[test]
    fn in_memory_storage_round_trips() {
        let storage = InMemorySnapshotStorage::new();
        let snapshot = sample_snapshot();
        assert!(storage.save(SnapshotTier::Current, &snapshot));
        assert_eq!(storage.load(SnapshotTier::Current), Some(snapshot));
    }

    #[test]
    fn missing_devices_falls_back_to_modes_when_topology_empty() {
        let storage = InMemorySnapshotStorage::new();
        let mut snapshot = sample_snapshot();
        snapshot.topology.clear();
        let available = BTreeSet::new();
        assert_eq!(storage.missing_devices(&snapshot, &available), vec!["A".to_string()]);
    }

    #[test]
    fn persistence_rejects_save_that_would_empty_the_snapshot() {
        let storage: Arc<dyn SnapshotStorage> = Arc::new(InMemorySnapshotStorage::new());
        let persistence = SnapshotPersistence::new(storage);
        let snapshot = sample_snapshot();
        let blacklist: BTreeSet<DeviceId> = ["A".to_string()].into_iter().collect();
        assert!(!persistence.save(SnapshotTier::Current, snapshot, &blacklist));
    }

    #[test]
    fn persistence_load_refuses_snapshot_with_missing_device() {
        let storage: Arc<dyn SnapshotStorage> = Arc::new(InMemorySnapshotStorage::new());
        storage.save(SnapshotTier::Current, &sample_snapshot());
        let persistence = SnapshotPersistence::new(storage);
        let available = BTreeSet::new();
        assert_eq!(persistence.load(SnapshotTier::Current, &available), None);
    }

    #[test]
    fn persistence_recovery_order_flips_with_prefer_golden_first() {
        let storage: Arc<dyn SnapshotStorage> = Arc::new(InMemorySnapshotStorage::new());
        let persistence = SnapshotPersistence::new(storage);
        assert_eq!(
            persistence.recovery_order(),
            [SnapshotTier::Current, SnapshotTier::Previous, SnapshotTier::Golden]
        );
        persistence.set_prefer_golden_first(true);
        assert_eq!(
            persistence.recovery_order(),
            [SnapshotTier::Golden, SnapshotTier::Current, SnapshotTier::Previous]
        );
    }

    #[test]
    fn file_storage_round_trips_through_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths {
            current: dir.path().join("current.json"),
            previous: dir.path().join("previous.json"),
            golden: dir.path().join("golden.json"),
        };
        let storage = FileSnapshotStorage::new(paths);
        let snapshot = sample_snapshot();
        assert!(storage.save(SnapshotTier::Current, &snapshot));
        assert_eq!(storage.load(SnapshotTier::Current), Some(snapshot));
        assert_eq!(storage.load(SnapshotTier::Previous), None);
    }

    mod proptests {
        use super::*;
        use crate::types::DisplayMode;
        use proptest::prelude::*;

        fn device_id() -> impl Strategy<Value = String> {
            "[A-E]".prop_map(|s| s)
        }

        fn topology_strategy() -> impl Strategy<Value = ActiveTopology> {
            prop::collection::vec(prop::collection::vec(device_id(), 1..3), 0..3)
        }

        fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
            (topology_strategy(), prop::collection::vec(device_id(), 0..5)).prop_map(|(topology, mode_ids)| {
                let mut modes = BTreeMap::new();
                for id in mode_ids {
                    modes.insert(
                        id,
                        DisplayMode {
                            width: 1920,
                            height: 1080,
                            refresh_rate_numerator: 60,
                            refresh_rate_denominator: 1,
                        },
                    );
                }
                let primary_device = topology.first().and_then(|g| g.first()).cloned().unwrap_or_default();
                Snapshot {
                    topology,
                    modes,
                    hdr_states: BTreeMap::new(),
                    primary_device,
                }
            })
        }

        fn blacklist_strategy() -> impl Strategy<Value = BTreeSet<DeviceId>> {
            prop::collection::btree_set(device_id(), 0..3)
        }

        proptest! {
            /// Every device id present in the blacklist is absent from the
            /// filtered snapshot's topology, modes, and primary device, no
            /// matter the starting shape.
            #[test]
            fn filter_removes_every_blacklisted_device(
                mut snapshot in snapshot_strategy(),
                blacklist in blacklist_strategy(),
            ) {
                filter_snapshot_devices(&mut snapshot, &blacklist);

                for group in &snapshot.topology {
                    for id in group {
                        prop_assert!(!blacklist.contains(id));
                    }
                    prop_assert!(!group.is_empty());
                }
                for id in snapshot.modes.keys() {
                    prop_assert!(!blacklist.contains(id));
                }
                if !snapshot.primary_device.is_empty() {
                    prop_assert!(!blacklist.contains(&snapshot.primary_device));
                }
            }

            /// An empty blacklist is always a no-op.
            #[test]
            fn filter_with_empty_blacklist_is_identity(snapshot in snapshot_strategy()) {
                let mut filtered = snapshot.clone();
                let kept = filter_snapshot_devices(&mut filtered, &BTreeSet::new());
                prop_assert_eq!(&filtered, &snapshot);
                prop_assert_eq!(kept, !(snapshot.topology.is_empty() && snapshot.modes.is_empty()));
            }

            /// `missing_devices` only ever reports ids that are both
            /// referenced by the snapshot and absent from `available` — it
            /// never invents an id, and never reports one that is available.
            #[test]
            fn missing_devices_are_referenced_and_unavailable(
                snapshot in snapshot_strategy(),
                available in prop::collection::btree_set(device_id(), 0..5),
            ) {
                let storage = InMemorySnapshotStorage::new();
                let missing = storage.missing_devices(&snapshot, &available);

                let referenced: BTreeSet<DeviceId> = if !snapshot.topology.is_empty() {
                    snapshot.topology.iter().flatten().filter(|id| !id.is_empty()).cloned().collect()
                } else {
                    snapshot.modes.keys().cloned().collect()
                };

                for id in &missing {
                    prop_assert!(referenced.contains(id));
                    prop_assert!(!available.contains(id));
                }
            }
        }
    }
}
