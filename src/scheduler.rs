//! FIFO round-robin scheduler over live cell IDs, plus the slice-size
//! formulas from §4.3.

use std::collections::VecDeque;

use rand::Rng;

use crate::cell::CellId;
use crate::config::SimulationConfig;

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<CellId>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    pub fn push_tail(&mut self, id: CellId) {
        self.queue.push_back(id);
    }

    /// Returns the head and rotates it to the tail, as one atomic step.
    pub fn next(&mut self) -> Option<CellId> {
        let id = self.queue.pop_front()?;
        self.queue.push_back(id);
        Some(id)
    }

    pub fn remove(&mut self, id: CellId) {
        self.queue.retain(|&x| x != id);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.queue.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &CellId> {
        self.queue.iter()
    }

    pub fn position_of(&self, id: CellId) -> Option<usize> {
        self.queue.iter().position(|&x| x == id)
    }
}

/// Computes the instruction slice granted to a cell of `cell_size`, given
/// the population mean `ref_size` at the time of computation.
pub fn compute_slice<R: Rng + ?Sized>(
    config: &SimulationConfig,
    cell_size: usize,
    ref_size: f64,
    rng: &mut R,
) -> u32 {
    let base = if config.siz_dep_slice == 0 {
        config.slice_size as f64
    } else {
        let ratio = if ref_size > 0.0 {
            cell_size as f64 / ref_size
        } else {
            1.0
        };
        (config.slice_size as f64 * ratio.powf(config.slice_pow)).round()
    };

    let slice = if config.slice_style == 2 {
        let fixed = config.slic_fix_frac * base;
        let random_span = config.slic_ran_frac * base;
        let random_part = if random_span > 0.0 {
            rng.gen_range(0.0..random_span)
        } else {
            0.0
        };
        (fixed + random_part).round()
    } else {
        base
    };

    slice.max(1.0) as u32
}
