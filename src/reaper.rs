//! Ordered reaper queue: the most reapable cell sits at the head.

use std::collections::HashMap;

use rand::Rng;

use crate::cell::{Cell, CellId};

#[derive(Debug, Default)]
pub struct Reaper {
    /// Ordered head-to-tail; recomputed by `resort`.
    order: Vec<CellId>,
    /// Cells lazily promoted toward the head since the last resort.
    promoted: Vec<CellId>,
}

/// Reapability key: higher sorts closer to the head. Errors dominate age
/// so a handful of faults can outrank a much older, clean cell.
fn reap_key(cell: &Cell, now: u64) -> (u64, u64) {
    let age = cell.age(now);
    let error_weight = cell.demographics.error_count.saturating_mul(1000);
    (age.saturating_add(error_weight), cell.id)
}

impl Reaper {
    pub fn new() -> Reaper {
        Reaper::default()
    }

    pub fn push_tail(&mut self, id: CellId) {
        self.order.push(id);
    }

    pub fn remove(&mut self, id: CellId) {
        self.order.retain(|&x| x != id);
        self.promoted.retain(|&x| x != id);
    }

    pub fn mark_promoted(&mut self, id: CellId) {
        if !self.promoted.contains(&id) {
            self.promoted.push(id);
        }
    }

    /// Whether `id` was promoted toward the head by lazy-tolerance since
    /// the last `resort`. Used to tell a lazy reap from a plain one when
    /// the victim is actually killed.
    pub fn is_promoted(&self, id: CellId) -> bool {
        self.promoted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.order.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &CellId> {
        self.order.iter()
    }

    pub fn position_of(&self, id: CellId) -> Option<usize> {
        self.order.iter().position(|&x| x == id)
    }

    /// Rebuilds `order`: promoted cells come first (sorted by key among
    /// themselves, lower `id` breaking ties), then everyone else by key,
    /// with the same tie-break.
    pub fn resort(&mut self, cells: &HashMap<CellId, Cell>, now: u64) {
        let promoted = &self.promoted;
        self.order.sort_by(|&a, &b| {
            let a_promoted = promoted.contains(&a);
            let b_promoted = promoted.contains(&b);
            if a_promoted != b_promoted {
                return b_promoted.cmp(&a_promoted);
            }
            let (ka, kb) = match (cells.get(&a), cells.get(&b)) {
                (Some(ca), Some(cb)) => (reap_key(ca, now), reap_key(cb, now)),
                _ => ((0, a), (0, b)),
            };
            kb.0.cmp(&ka.0).then(ka.1.cmp(&kb.1))
        });
    }

    /// Head of the queue: the next cell to die under generic reaping
    /// pressure.
    pub fn head(&self) -> Option<CellId> {
        self.order.first().copied()
    }

    /// Selects a cell to reap on allocation failure, per `mal_reap_tol`.
    /// With tolerance 0, always the head. With tolerance 1 and a hint,
    /// the first queue entry (from the head) within `mal_tol *
    /// mean_cell_size` modular distance of the hint; falls back to the
    /// head if none qualify.
    pub fn select_for_reap(
        &self,
        cells: &HashMap<CellId, Cell>,
        mal_reap_tol: u8,
        hint: Option<usize>,
        mal_tol: u32,
        mean_cell_size: f64,
        soup_size: usize,
    ) -> Option<CellId> {
        if mal_reap_tol == 0 || hint.is_none() || soup_size == 0 {
            return self.head();
        }
        let hint = hint.unwrap();
        let bound = (mal_tol as f64 * mean_cell_size).round().max(0.0) as usize;
        for &id in &self.order {
            if let Some(cell) = cells.get(&id) {
                let fwd = (cell.mother_region.start + soup_size - hint % soup_size) % soup_size;
                let back = (hint + soup_size - cell.mother_region.start % soup_size) % soup_size;
                if fwd.min(back) <= bound {
                    return Some(id);
                }
            }
        }
        self.head()
    }

    /// Picks a `proportion` fraction of the live population uniformly at
    /// random for a disturbance mass-kill, independent of reaper order.
    pub fn sample_disturbance<R: Rng + ?Sized>(&self, proportion: f64, rng: &mut R) -> Vec<CellId> {
        let count = ((self.order.len() as f64) * proportion).round() as usize;
        let mut pool = self.order.clone();
        let mut chosen = Vec::with_capacity(count);
        for _ in 0..count.min(pool.len()) {
            let idx = rng.gen_range(0..pool.len());
            chosen.push(pool.swap_remove(idx));
        }
        chosen
    }
}
