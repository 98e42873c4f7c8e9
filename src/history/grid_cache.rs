// src/history/grid_cache.rs

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::grid::Grid;

/// Materialized grids keyed by history entry id.
///
/// Purely an accelerator: a missing entry only costs replay time.
pub trait GridCache: Send + Sync + fmt::Debug {
    fn get(&self, entry_id: u64) -> Option<Grid>;
    fn put(&self, entry_id: u64, grid: Grid);
    fn cached_ids(&self) -> BTreeSet<u64>;
    fn evict(&self, entry_ids: &[u64]);
}

#[derive(Debug, Default)]
struct LruState {
    grids: HashMap<u64, (Grid, u64)>,
    clock: u64,
}

impl LruState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[derive(Debug)]
pub struct InMemoryGridCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl InMemoryGridCache {
    pub fn new(capacity: usize) -> Self {
        InMemoryGridCache {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GridCache for InMemoryGridCache {
    fn get(&self, entry_id: u64) -> Option<Grid> {
        let mut state = self.state.lock();
        let now = state.tick();
        state.grids.get_mut(&entry_id).map(|(grid, used)| {
            *used = now;
            grid.clone()
        })
    }

    fn put(&self, entry_id: u64, grid: Grid) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        let now = state.tick();
        state.grids.insert(entry_id, (grid, now));
        while state.grids.len() > self.capacity {
            let oldest = state
                .grids
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    state.grids.remove(&id);
                    debug!("GridCache: evicted grid of entry {}", id);
                }
                None => break,
            }
        }
    }

    fn cached_ids(&self) -> BTreeSet<u64> {
        self.state.lock().grids.keys().copied().collect()
    }

    fn evict(&self, entry_ids: &[u64]) {
        let mut state = self.state.lock();
        for id in entry_ids {
            state.grids.remove(id);
        }
    }
}
