//! Slot-arena table heap with mark bits and generation checks.

use ember_core::{Table, TableHandle};

use crate::stats::GcStats;

struct Slot {
    table: Option<Table>,
    mark: bool,
    /// Bumped every time the slot is reclaimed
    generation: u32,
}

/// Owner of every script-visible table.
///
/// Allocation hands out [`TableHandle`]s; resolution checks both
/// occupancy and generation, so handles that survive a collection that
/// reclaimed their table resolve to `None` rather than aliasing a
/// recycled slot.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: GcStats,
    /// Allocation size that triggers the next collection
    next_gc: usize,
    /// Added to the live size after each collection
    gc_increment: usize,
    /// Nesting depth of pause requests; nonzero suppresses the trigger
    pause_depth: u32,
}

impl Heap {
    /// Create a heap that requests a collection once allocations pass
    /// `gc_threshold` bytes.
    pub fn new(gc_threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            stats: GcStats::default(),
            next_gc: gc_threshold,
            gc_increment: gc_threshold,
            pause_depth: 0,
        }
    }

    /// Move a table into the heap and return its handle.
    pub fn alloc_table(&mut self, table: Table) -> TableHandle {
        self.stats.bytes_allocated += table.heap_size();

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.table = Some(table);
            slot.mark = false;
            TableHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                table: Some(table),
                mark: false,
                generation: 1,
            });
            TableHandle::new(index, 1)
        }
    }

    fn slot(&self, handle: TableHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.table.is_some())
    }

    /// Resolve a handle, returning `None` for stale or freed handles.
    pub fn get(&self, handle: TableHandle) -> Option<&Table> {
        self.slot(handle).and_then(|slot| slot.table.as_ref())
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: TableHandle) -> Option<&mut Table> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.table.as_mut())
    }

    /// Whether a handle still refers to a live table.
    pub fn is_live(&self, handle: TableHandle) -> bool {
        self.slot(handle).is_some()
    }

    /// Number of live tables.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.table.is_some()).count()
    }

    /// Bytes currently attributed to live tables.
    pub fn bytes_allocated(&self) -> usize {
        self.stats.bytes_allocated
    }

    /// Record growth of an already-allocated object.
    pub fn add_bytes(&mut self, bytes: usize) {
        self.stats.bytes_allocated += bytes;
    }

    /// Whether allocations have crossed the collection trigger.
    ///
    /// Always false while paused; explicitly requested collections
    /// are the caller's decision and are not gated here.
    pub fn should_collect(&self) -> bool {
        self.pause_depth == 0 && self.stats.bytes_allocated > self.next_gc
    }

    /// Suppress the automatic collection trigger. Calls nest; each
    /// pause needs a matching [`Heap::resume`].
    pub fn pause(&mut self) {
        self.pause_depth += 1;
    }

    /// Undo one [`Heap::pause`].
    pub fn resume(&mut self) {
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    /// Whether the automatic trigger is currently suppressed.
    pub fn is_paused(&self) -> bool {
        self.pause_depth > 0
    }

    /// Clear every mark bit ahead of a mark phase.
    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.mark = false;
        }
    }

    /// Mark a table live. Returns `true` when the table was newly
    /// marked, `false` when already marked or the handle is stale, so
    /// callers can stop tracing cycles.
    pub fn mark(&mut self, handle: TableHandle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot)
                if slot.generation == handle.generation && slot.table.is_some() && !slot.mark =>
            {
                slot.mark = true;
                true
            }
            _ => false,
        }
    }

    /// Reclaim every unmarked table, bumping reclaimed slots'
    /// generations and recomputing the live byte count.
    ///
    /// `elapsed_ms` is the duration of the whole collection cycle as
    /// measured by the caller, mark phase included.
    pub fn sweep(&mut self, elapsed_ms: u64) {
        let mut live = 0usize;
        let mut live_bytes = 0usize;
        let mut dead = 0usize;
        let mut freed_bytes = 0usize;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            match &slot.table {
                Some(table) if slot.mark => {
                    live += 1;
                    live_bytes += table.heap_size();
                }
                Some(table) => {
                    dead += 1;
                    freed_bytes += table.heap_size();
                    slot.table = None;
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free.push(index as u32);
                }
                None => {}
            }
        }

        self.stats.bytes_allocated = live_bytes;
        self.stats.bytes_freed += freed_bytes;
        self.stats.gc_runs += 1;
        self.stats.gc_time_ms += elapsed_ms;
        self.stats.live_objects = live;
        self.stats.dead_objects = dead;
        self.next_gc = live_bytes + self.gc_increment;
    }

    /// Fold objects reclaimed outside the slot arena (interned
    /// strings) into the most recent collection's statistics.
    pub fn note_external_free(&mut self, count: usize, bytes: usize) {
        self.stats.dead_objects += count;
        self.stats.bytes_freed += bytes;
    }

    /// Snapshot of collector statistics.
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Fold external live bytes (interned strings) into the stats
    /// snapshot without affecting the collection trigger.
    pub fn stats_with_extra_bytes(&self, extra: usize) -> GcStats {
        let mut stats = self.stats;
        stats.bytes_allocated += extra;
        stats
    }
}
