//! The shared linear memory ("soup") and its free-block allocator.
//!
//! All addressing is modular over `soup_size` (toroidal), mirroring the
//! teacher's modular head arithmetic in `cpu.rs` but operating on a single
//! shared byte array instead of per-organism stacks.

use rand::Rng;

use crate::instruction::Instruction;

/// A contiguous, possibly-wrapping range `[start, start+length)` (mod
/// soup size). Used both for a cell's mother/daughter regions and for
/// free-block bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub length: usize,
}

impl Region {
    pub fn new(start: usize, length: usize) -> Region {
        Region { start, length }
    }

    /// Whether modular address `addr` falls within this region.
    pub fn contains(&self, addr: usize, soup_size: usize) -> bool {
        if self.length == 0 || soup_size == 0 {
            return false;
        }
        let offset = (addr + soup_size - self.start % soup_size) % soup_size;
        offset < self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocPolicy {
    FirstFit,
    BetterFit,
    Random,
    NearAddress(usize),
}

impl AllocPolicy {
    /// Maps the config's `mal_mode` integer to a policy, with an optional
    /// reference address for the near-address/near-parent modes.
    pub fn from_mal_mode(mal_mode: u8, near_addr: Option<usize>) -> AllocPolicy {
        match mal_mode {
            0 => AllocPolicy::FirstFit,
            2 => AllocPolicy::Random,
            3 | 4 => match near_addr {
                Some(addr) => AllocPolicy::NearAddress(addr),
                None => AllocPolicy::BetterFit,
            },
            _ => AllocPolicy::BetterFit,
        }
    }
}

/// Modular distance from `from` to `to` going in the increasing-address
/// direction, over a ring of size `soup_size`.
fn forward_distance(from: usize, to: usize, soup_size: usize) -> usize {
    (to + soup_size - from) % soup_size
}

/// The shared byte memory plus its free-block index.
pub struct Soup {
    bytes: Vec<u8>,
    /// Free blocks, kept sorted by `start` and non-adjacent (adjacent
    /// blocks are merged eagerly on free, and whenever the count exceeds
    /// `max_free_blocks`).
    free_blocks: Vec<Region>,
    max_free_blocks: usize,
}

impl Soup {
    pub fn new(soup_size: usize, max_free_blocks: usize) -> Soup {
        let free_blocks = if soup_size == 0 {
            Vec::new()
        } else {
            vec![Region::new(0, soup_size)]
        };
        Soup {
            bytes: vec![0u8; soup_size],
            free_blocks,
            max_free_blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn wrap(&self, addr: usize) -> usize {
        addr % self.bytes.len()
    }

    pub fn read(&self, addr: usize) -> Instruction {
        Instruction::from_opcode(self.bytes[self.wrap(addr)])
    }

    pub fn write(&mut self, addr: usize, instr: Instruction) {
        let idx = self.wrap(addr);
        self.bytes[idx] = instr.to_opcode();
    }

    /// Flips one random bit of the byte at `addr`, bypassing protection —
    /// used by the cosmic-ray mutation and nothing else.
    pub fn flip_random_bit<R: Rng + ?Sized>(&mut self, addr: usize, rng: &mut R) {
        let idx = self.wrap(addr);
        let bit = rng.gen_range(0..8);
        self.bytes[idx] ^= 1 << bit;
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    pub fn free_blocks(&self) -> &[Region] {
        &self.free_blocks
    }

    pub fn total_free_length(&self) -> usize {
        self.free_blocks.iter().map(|r| r.length).sum()
    }

    /// Attempts to carve `requested_length` bytes out of the free-block
    /// index per `policy`. Returns `None` on `NoSpace` — callers (the
    /// `mal` handler) are responsible for invoking the reaper and retrying.
    pub fn allocate<R: Rng + ?Sized>(
        &mut self,
        requested_length: usize,
        policy: AllocPolicy,
        mal_tol: u32,
        rng: &mut R,
    ) -> Option<Region> {
        if requested_length == 0 {
            return None;
        }
        let candidate_idx = match policy {
            AllocPolicy::FirstFit => self
                .free_blocks
                .iter()
                .position(|b| b.length >= requested_length)?,
            AllocPolicy::BetterFit => {
                let tolerant_max = requested_length + mal_tol as usize;
                let within_tolerance = self
                    .free_blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.length >= requested_length && b.length <= tolerant_max)
                    .min_by_key(|(_, b)| b.length)
                    .map(|(i, _)| i);
                within_tolerance.or_else(|| {
                    self.free_blocks
                        .iter()
                        .enumerate()
                        .filter(|(_, b)| b.length >= requested_length)
                        .min_by_key(|(_, b)| b.length)
                        .map(|(i, _)| i)
                })?
            }
            AllocPolicy::Random => {
                let candidates: Vec<usize> = self
                    .free_blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.length >= requested_length)
                    .map(|(i, _)| i)
                    .collect();
                if candidates.is_empty() {
                    return None;
                }
                candidates[rng.gen_range(0..candidates.len())]
            }
            AllocPolicy::NearAddress(reference) => {
                let soup_size = self.bytes.len();
                self.free_blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.length >= requested_length)
                    .min_by_key(|(_, b)| {
                        let fwd = forward_distance(reference, b.start, soup_size);
                        let back = forward_distance(b.start, reference, soup_size);
                        fwd.min(back)
                    })
                    .map(|(i, _)| i)?
            }
        };

        let block = self.free_blocks[candidate_idx];
        let allocated = Region::new(block.start, requested_length);
        if block.length == requested_length {
            self.free_blocks.remove(candidate_idx);
        } else {
            self.free_blocks[candidate_idx] = Region::new(
                (block.start + requested_length) % self.bytes.len().max(1),
                block.length - requested_length,
            );
        }
        Some(allocated)
    }

    /// Whether `addr` currently falls inside any free block.
    pub fn is_free(&self, addr: usize) -> bool {
        let soup_size = self.bytes.len();
        self.free_blocks.iter().any(|b| b.contains(addr, soup_size))
    }

    /// Carves a specific, already-known region out of the free-block
    /// index (used when a mutated daughter genome grows into free tail
    /// space). Returns false, leaving the index untouched, if `region`
    /// does not lie fully within a single free block.
    pub fn claim_region(&mut self, region: Region) -> bool {
        if region.length == 0 {
            return true;
        }
        let soup_size = self.bytes.len();
        for i in 0..self.free_blocks.len() {
            let block = self.free_blocks[i];
            let rel_start = (region.start + soup_size - block.start % soup_size) % soup_size;
            if rel_start + region.length <= block.length {
                let before = Region::new(block.start, rel_start);
                let after_start = (region.start + region.length) % soup_size.max(1);
                let after_len = block.length - rel_start - region.length;
                let after = Region::new(after_start, after_len);
                self.free_blocks.remove(i);
                if before.length > 0 {
                    self.free_blocks.push(before);
                }
                if after.length > 0 {
                    self.free_blocks.push(after);
                }
                self.free_blocks.sort_by_key(|r| r.start);
                return true;
            }
        }
        false
    }

    /// Returns `region` to the free-block index, merging with adjacent
    /// blocks. Coalesces eagerly if the block count exceeds the configured
    /// ceiling.
    pub fn free(&mut self, region: Region) {
        if region.length == 0 {
            return;
        }
        self.free_blocks.push(region);
        self.free_blocks.sort_by_key(|r| r.start);
        self.merge_adjacent();
        if self.free_blocks.len() > self.max_free_blocks {
            self.merge_adjacent();
        }
    }

    fn merge_adjacent(&mut self) {
        if self.free_blocks.is_empty() {
            return;
        }
        self.free_blocks.sort_by_key(|r| r.start);
        let soup_size = self.bytes.len();
        let mut merged: Vec<Region> = Vec::with_capacity(self.free_blocks.len());
        for block in self.free_blocks.drain(..) {
            if let Some(last) = merged.last_mut() {
                if (last.start + last.length) % soup_size == block.start {
                    last.length += block.length;
                    continue;
                }
            }
            merged.push(block);
        }
        // Merge wrap-around: last block's end touches the first block's start.
        if merged.len() > 1 {
            let last = merged[merged.len() - 1];
            let first = merged[0];
            if (last.start + last.length) % soup_size == first.start && last.start != first.start
            {
                merged[0] = Region::new(last.start, last.length + first.length);
                merged.pop();
            }
        }
        self.free_blocks = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::SmallRng {
        rand::rngs::SmallRng::seed_from_u64(42)
    }

    #[test]
    fn fresh_soup_is_all_free() {
        let soup = Soup::new(100, 800);
        assert_eq!(soup.free_block_count(), 1);
        assert_eq!(soup.total_free_length(), 100);
    }

    #[test]
    fn read_write_roundtrip() {
        let mut soup = Soup::new(16, 800);
        soup.write(3, Instruction::Mal);
        assert_eq!(soup.read(3), Instruction::Mal);
    }

    #[test]
    fn modular_addressing() {
        let mut soup = Soup::new(16, 800);
        soup.write(2, Instruction::Divide);
        assert_eq!(soup.read(2), soup.read(2 + 16));
        assert_eq!(soup.read(2), soup.read(2 + 16 * 3));
    }

    #[test]
    fn first_fit_allocates_first_sufficient_block() {
        let mut soup = Soup::new(200, 800);
        // carve out three separate free blocks of size 40, 80, 50
        let a = soup.allocate(40, AllocPolicy::FirstFit, 0, &mut rng()).unwrap();
        soup.free(a);
        assert_eq!(soup.free_block_count(), 1);
    }

    #[test]
    fn better_fit_picks_smallest_within_tolerance() {
        let mut soup = Soup::new(500, 800);
        // Build free blocks [40, 80, 50] by allocating three cells and freeing gaps.
        let whole = soup.free_blocks()[0];
        soup.free_blocks.clear();
        soup.free_blocks.push(Region::new(whole.start, 40));
        soup.free_blocks
            .push(Region::new(whole.start + 100, 80));
        soup.free_blocks
            .push(Region::new(whole.start + 300, 50));

        let region = soup
            .allocate(40, AllocPolicy::BetterFit, 0, &mut rng())
            .unwrap();
        assert_eq!(region.length, 40);
        assert_eq!(region.start, whole.start);
    }

    #[test]
    fn better_fit_with_tolerance_prefers_smallest_oversized_block() {
        let mut soup = Soup::new(500, 800);
        soup.free_blocks.clear();
        soup.free_blocks.push(Region::new(0, 80));
        soup.free_blocks.push(Region::new(100, 45));
        soup.free_blocks.push(Region::new(200, 50));

        let region = soup
            .allocate(40, AllocPolicy::BetterFit, 15, &mut rng())
            .unwrap();
        assert_eq!(region.start, 100);
        assert_eq!(region.length, 40);
    }

    #[test]
    fn free_merges_adjacent_blocks() {
        let mut soup = Soup::new(100, 800);
        let a = soup.allocate(20, AllocPolicy::FirstFit, 0, &mut rng()).unwrap();
        let b = soup.allocate(20, AllocPolicy::FirstFit, 0, &mut rng()).unwrap();
        assert_eq!(soup.free_block_count(), 1);
        soup.free(a);
        soup.free(b);
        assert_eq!(soup.free_block_count(), 1);
        assert_eq!(soup.total_free_length(), 100);
    }

    #[test]
    fn allocate_over_capacity_returns_none() {
        let mut soup = Soup::new(10, 800);
        assert!(soup
            .allocate(20, AllocPolicy::FirstFit, 0, &mut rng())
            .is_none());
    }
}
