//! Mutation engine: cosmic rays, copy mutation, execution flaws, and the
//! genetic operators applied to a daughter genome on divide.

use rand::Rng;

use crate::instruction::{Instruction, OPCODE_COUNT};

/// `rate = 1 / (gen_per_x * mean_cell_size)`, per instruction executed.
/// `gen_per_x == 0` disables the corresponding mutation entirely.
pub fn rate_from_gen_per(gen_per: u32, mean_cell_size: f64) -> f64 {
    if gen_per == 0 || mean_cell_size <= 0.0 {
        0.0
    } else {
        1.0 / (gen_per as f64 * mean_cell_size)
    }
}

/// Flips one random bit at a random soup address, bypassing protection.
/// Returns the chosen address for logging/events.
pub fn cosmic_ray_address<R: Rng + ?Sized>(soup_size: usize, rng: &mut R) -> usize {
    rng.gen_range(0..soup_size.max(1))
}

/// Applies copy mutation to a byte about to be written by `movii`: with
/// probability `mut_bit_prop`, flips one random bit of the source byte;
/// otherwise returns a uniformly random opcode.
pub fn corrupt_copied_byte<R: Rng + ?Sized>(source: u8, mut_bit_prop: f64, rng: &mut R) -> u8 {
    if rng.gen_bool(mut_bit_prop.clamp(0.0, 1.0)) {
        let bit = rng.gen_range(0..8);
        source ^ (1 << bit)
    } else {
        rng.gen_range(0..OPCODE_COUNT)
    }
}

/// Perturbs a just-written register value by +-1, for the execution-flaw
/// mutation (§4.2/§4.5).
pub fn perturb_register<R: Rng + ?Sized>(value: i32, rng: &mut R) -> i32 {
    if rng.gen_bool(0.5) {
        value.wrapping_add(1)
    } else {
        value.wrapping_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneticOperator {
    InstructionInsertion,
    InstructionDeletion,
    InstructionCrossover,
    SegmentDeletion,
    SegmentInsertion,
    SegmentCrossover,
}

/// One maximal run of identical opcodes, used as the unit for
/// segment-level genetic operators.
fn segments(genome: &[Instruction]) -> Vec<(usize, usize)> {
    let mut result = Vec::new();
    let mut start = 0;
    for i in 1..=genome.len() {
        if i == genome.len() || genome[i].to_opcode() != genome[start].to_opcode() {
            result.push((start, i));
            start = i;
        }
    }
    result
}

/// Applies the independently-triggered genetic operators to a daughter
/// genome in place. `same_size_donor` supplies a same-size living genome
/// for crossover, when one is available. Each operator that would make
/// the genome empty, or that has no eligible donor, is skipped silently
/// (the spec treats a failed operator as a no-op, not an abort of the
/// whole divide). Returns the operators that actually fired, in the order
/// they were applied, so the caller can emit one `MUTATION` event per hit.
#[allow(clippy::too_many_arguments)]
pub fn apply_genetic_operators<R: Rng + ?Sized>(
    genome: &mut Vec<Instruction>,
    rates: &GeneticOperatorRates,
    mean_cell_size: f64,
    same_size_donor: Option<&[Instruction]>,
    rng: &mut R,
) -> Vec<GeneticOperator> {
    let roll = |gen_per: u32, rng: &mut R| -> bool {
        gen_per != 0 && rng.gen_bool(rate_from_gen_per(gen_per, mean_cell_size).clamp(0.0, 1.0))
    };
    let mut fired = Vec::new();

    if roll(rates.ins_ins, rng) && !genome.is_empty() {
        let pos = rng.gen_range(0..=genome.len());
        let new_instr = Instruction::from_opcode(rng.gen_range(0..OPCODE_COUNT));
        genome.insert(pos, new_instr);
        fired.push(GeneticOperator::InstructionInsertion);
    }

    if roll(rates.del_ins, rng) && genome.len() > 1 {
        let pos = rng.gen_range(0..genome.len());
        genome.remove(pos);
        fired.push(GeneticOperator::InstructionDeletion);
    }

    if roll(rates.cro_ins, rng) {
        if let Some(donor) = same_size_donor {
            if donor.len() == genome.len() && !genome.is_empty() {
                let pos = rng.gen_range(0..genome.len());
                genome[pos] = donor[pos];
                fired.push(GeneticOperator::InstructionCrossover);
            }
        }
    }

    if roll(rates.del_seg, rng) {
        let segs = segments(genome);
        if segs.len() > 1 {
            let (start, end) = segs[rng.gen_range(0..segs.len())];
            if end - start < genome.len() {
                genome.drain(start..end);
                fired.push(GeneticOperator::SegmentDeletion);
            }
        }
    }

    if roll(rates.ins_seg, rng) && !genome.is_empty() {
        let segs = segments(genome);
        let (start, end) = segs[rng.gen_range(0..segs.len())];
        let segment: Vec<Instruction> = genome[start..end].to_vec();
        let pos = rng.gen_range(0..=genome.len());
        for (offset, instr) in segment.into_iter().enumerate() {
            genome.insert(pos + offset, instr);
        }
        fired.push(GeneticOperator::SegmentInsertion);
    }

    if roll(rates.cro_seg, rng) {
        if let Some(donor) = same_size_donor {
            if donor.len() == genome.len() {
                let segs = segments(genome);
                let (start, end) = segs[rng.gen_range(0..segs.len())];
                if end <= donor.len() {
                    genome[start..end].copy_from_slice(&donor[start..end]);
                    fired.push(GeneticOperator::SegmentCrossover);
                }
            }
        }
    }

    fired
}

#[derive(Debug, Clone, Copy)]
pub struct GeneticOperatorRates {
    pub ins_ins: u32,
    pub del_ins: u32,
    pub cro_ins: u32,
    pub del_seg: u32,
    pub ins_seg: u32,
    pub cro_seg: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::SmallRng {
        rand::rngs::SmallRng::seed_from_u64(7)
    }

    #[test]
    fn zero_gen_per_disables_rate() {
        assert_eq!(rate_from_gen_per(0, 80.0), 0.0);
    }

    #[test]
    fn rate_scales_inversely_with_gen_per_and_size() {
        assert_eq!(rate_from_gen_per(32, 80.0), 1.0 / (32.0 * 80.0));
    }

    #[test]
    fn copy_mutation_always_random_when_bit_prop_zero() {
        let mut r = rng();
        for _ in 0..20 {
            let _ = corrupt_copied_byte(3, 0.0, &mut r);
        }
    }

    #[test]
    fn segments_split_on_opcode_boundaries() {
        let genome = vec![
            Instruction::Nop0,
            Instruction::Nop0,
            Instruction::Mal,
            Instruction::Nop1,
        ];
        let segs = segments(&genome);
        assert_eq!(segs, vec![(0, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn perturb_changes_value_by_one() {
        let mut r = rng();
        for _ in 0..20 {
            let v = perturb_register(10, &mut r);
            assert!(v == 9 || v == 11);
        }
    }
}
