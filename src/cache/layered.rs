//! Layered cache store
//!
//! A read-optimized map made of shared immutable layers plus one mutable
//! overlay. Immutable layers are `Arc`ed and never locked; only the overlay
//! is synchronized.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// Map composed of immutable layers and a mutable overlay.
///
/// Lookups probe the immutable layers first, in probe order, and fall back to
/// the overlay. A newly added layer is probed before every older layer it
/// shares a key with, so newer values shadow older ones. Within that
/// constraint larger layers are moved ahead, which keeps the common case of
/// one huge base snapshot plus small disjoint deltas at one probe per hit.
///
/// There is deliberately no `has` and no `delete`: call [`get`](Self::get)
/// and test for `None`, and model invalidation by building a new store.
#[derive(Debug)]
pub struct LayeredCache<K, V>
where
    K: Eq + Hash,
{
    /// Probe order: index 0 is probed first
    layers: Vec<Arc<HashMap<K, V>>>,

    overlay: DashMap<K, V>,
}

impl<K, V> Default for LayeredCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            overlay: DashMap::new(),
        }
    }
}

impl<K, V> LayeredCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a map to the store.
    ///
    /// An immutable map is shared as a new read-only layer. A mutable one is
    /// copied into the overlay, so the caller may keep modifying its own copy.
    pub fn add_layer(&mut self, map: &Arc<HashMap<K, V>>, immutable: bool) {
        if !immutable {
            for (key, value) in map.iter() {
                self.overlay.insert(key.clone(), value.clone());
            }
            return;
        }

        if map.is_empty() {
            return;
        }

        self.layers.insert(0, Arc::clone(map));

        // Sink the new layer behind larger older layers, but never past one
        // it overlaps with: that would let a stale value win.
        let mut i = 0;
        while i + 1 < self.layers.len() {
            let newer = &self.layers[i];
            let older = &self.layers[i + 1];
            if older.len() <= newer.len() || !is_disjoint(newer, older) {
                break;
            }
            self.layers.swap(i, i + 1);
            i += 1;
        }
    }

    /// Look a key up; the first hit in probe order wins.
    pub fn get(&self, key: &K) -> Option<V> {
        for layer in &self.layers {
            if let Some(value) = layer.get(key) {
                return Some(value.clone());
            }
        }
        self.overlay.get(key).map(|entry| entry.value().clone())
    }

    /// Write to the mutable overlay.
    pub fn set(&self, key: K, value: V) {
        self.overlay.insert(key, value);
    }

    /// Number of immutable layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Sizes of the immutable layers in probe order
    pub fn layer_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.len()).collect()
    }

    /// Number of entries in the overlay
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// Copy of the overlay contents
    pub fn overlay_snapshot(&self) -> HashMap<K, V> {
        self.overlay
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Build the store for the next build: every current layer is kept and
    /// the overlay is frozen into the newest immutable layer.
    pub fn next_generation(&self) -> Self {
        let mut next = Self {
            layers: self.layers.clone(),
            overlay: DashMap::new(),
        };
        let frozen = Arc::new(self.overlay_snapshot());
        next.add_layer(&frozen, true);
        next
    }
}

fn is_disjoint<K: Eq + Hash, V>(a: &HashMap<K, V>, b: &HashMap<K, V>) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    !small.keys().any(|key| large.contains_key(key))
}
