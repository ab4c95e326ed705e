use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    binding::ModelBinding,
    core::ParamHandle,
};

/// Weights below this remove the override instead of storing a near-zero one.
const REMOVE_THRESHOLD: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
struct OverrideEntry {
    value: f32,
    weight: f32,
}

/// Last-applied weighted parameter overrides (lip sync and similar external
/// drivers). Writers may live on another thread: the map is lock-guarded and
/// the frame reads an atomic snapshot, so a mid-frame write can never race
/// the pipeline.
#[derive(Clone, Debug, Default)]
pub struct OverrideChannel {
    entries: Arc<Mutex<HashMap<usize, OverrideEntry>>>,
}

/// Frozen view of the channel taken at frame start.
#[derive(Clone, Debug, Default)]
pub struct OverrideSnapshot {
    entries: Vec<(usize, OverrideEntry)>,
}

impl OverrideChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: ParamHandle, value: f32, weight: f32) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if weight < REMOVE_THRESHOLD {
            entries.remove(&handle.0);
        } else {
            entries.insert(handle.0, OverrideEntry { value, weight });
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn snapshot(&self) -> OverrideSnapshot {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = entries.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_by_key(|&(k, _)| k);
        OverrideSnapshot { entries }
    }
}

impl OverrideSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight >= 1 sets the value outright, anything lower lerps toward it.
    /// Handles taken before a model swap can be stale; those are dropped.
    pub fn apply(&self, binding: &mut dyn ModelBinding) {
        let count = binding.param_count();
        let params = binding.params_mut();
        for &(idx, entry) in &self.entries {
            if idx >= count {
                continue;
            }
            if entry.weight >= 1.0 {
                params.values[idx] = entry.value;
            } else {
                params.values[idx] =
                    params.values[idx] * (1.0 - entry.weight) + entry.value * entry.weight;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::MemoryModel;

    #[test]
    fn sub_threshold_weight_removes_the_override() {
        let channel = OverrideChannel::new();
        channel.set(ParamHandle(0), 0.8, 1.0);
        assert!(!channel.snapshot().is_empty());
        channel.set(ParamHandle(0), 0.8, 0.0);
        assert!(channel.snapshot().is_empty());
    }

    #[test]
    fn full_weight_sets_partial_weight_lerps() {
        let mut model = MemoryModel::new();
        let a = model.add_param("A", 0.0, 0.0, 1.0);
        let b = model.add_param("B", 0.0, 0.0, 1.0);

        let channel = OverrideChannel::new();
        channel.set(a, 1.0, 1.0);
        channel.set(b, 1.0, 0.25);
        channel.snapshot().apply(&mut model);

        assert_eq!(model.param_values()[a.0], 1.0);
        assert!((model.param_values()[b.0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut model = MemoryModel::new();
        let a = model.add_param("A", 0.0, 0.0, 1.0);

        let channel = OverrideChannel::new();
        channel.set(a, 1.0, 1.0);
        let snapshot = channel.snapshot();
        channel.set(a, 0.5, 0.5);

        snapshot.apply(&mut model);
        assert_eq!(model.param_values()[a.0], 1.0);
    }

    #[test]
    fn stale_handles_are_ignored() {
        let mut model = MemoryModel::new();
        let channel = OverrideChannel::new();
        channel.set(ParamHandle(7), 1.0, 1.0);
        channel.snapshot().apply(&mut model);
        assert!(model.param_values().is_empty());
    }

    #[test]
    fn channel_clones_share_state_across_threads() {
        let channel = OverrideChannel::new();
        let writer = channel.clone();
        std::thread::spawn(move || {
            writer.set(ParamHandle(0), 0.4, 1.0);
        })
        .join()
        .unwrap();
        assert!(!channel.snapshot().is_empty());
    }
}
