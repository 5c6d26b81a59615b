//! Instruction dispatch: fetch-decode-execute for one cell, plus the
//! supporting template search, protection checks, and `divide` machinery.
//!
//! Mirrors the teacher's `execute.rs` in shape (a free function per
//! opcode group driven off a context struct) but against this spec's
//! 32-opcode, shared-soup machine instead of Avida's per-organism memory.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::Rng;

use crate::cell::{Cell, CellId};
use crate::config::SimulationConfig;
use crate::cpu::Register;
use crate::events::{DeathCause, Event, EventBus, MutationKind};
use crate::genebank::{self, Genebank};
use crate::instruction::Instruction;
use crate::mutation::{
    apply_genetic_operators, corrupt_copied_byte, cosmic_ray_address, perturb_register,
    rate_from_gen_per, GeneticOperator, GeneticOperatorRates,
};
use crate::reaper::Reaper;
use crate::scheduler::Scheduler;
use crate::soup::{AllocPolicy, Region, Soup};

const MAX_TEMPLATE_LEN: usize = 64;

/// Everything one instruction's handler needs besides the acting cell
/// itself, which the caller holds separately (removed from `cells` for
/// the duration of the step, so it can be mutated without a second
/// borrow of the map).
pub struct ExecCtx<'a> {
    pub soup: &'a mut Soup,
    pub genebank: &'a mut Genebank,
    pub scheduler: &'a mut Scheduler,
    pub reaper: &'a mut Reaper,
    pub cells: &'a mut HashMap<CellId, Cell>,
    pub events: &'a mut EventBus,
    pub rng: &'a mut SmallRng,
    pub config: &'a SimulationConfig,
    pub mean_cell_size: f64,
    pub next_cell_id: &'a mut CellId,
    pub instruction_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessKind {
    Execute = 1,
    Write = 2,
    Read = 4,
}

fn reg_as_addr(value: i32, soup_size: usize) -> usize {
    if soup_size == 0 {
        0
    } else {
        value.rem_euclid(soup_size as i32) as usize
    }
}

fn access_allowed(kind: AccessKind, addr: usize, cell: &Cell, soup: &Soup, config: &SimulationConfig) -> bool {
    let soup_size = soup.len();
    let mask = if soup.is_free(addr) {
        config.mem_mode_free
    } else if cell.mother_region.contains(addr, soup_size)
        || cell.daughter_region.map_or(false, |d| d.contains(addr, soup_size))
    {
        config.mem_mode_mine
    } else {
        config.mem_mode_prot
    };
    mask & (kind as u8) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchDirection {
    Forward,
    Backward,
    Outward,
}

/// Reads the maximal run of nop0/nop1 starting at `start`, up to
/// `MAX_TEMPLATE_LEN` bytes.
fn read_template(soup: &Soup, start: usize) -> Vec<Instruction> {
    let soup_size = soup.len();
    let mut template = Vec::new();
    for i in 0..MAX_TEMPLATE_LEN.min(soup_size) {
        let instr = soup.read((start + i) % soup_size);
        if instr.is_nop() {
            template.push(instr);
        } else {
            break;
        }
    }
    template
}

/// Searches for the bitwise complement of `template` within `limit`
/// addresses of `from`, in the given direction. `from` is the address
/// immediately after the template that was read (the search origin).
fn find_complement(
    soup: &Soup,
    template: &[Instruction],
    from: usize,
    direction: SearchDirection,
    limit: usize,
) -> Option<(usize, usize)> {
    if template.is_empty() {
        return None;
    }
    let complement: Vec<Instruction> = template
        .iter()
        .map(|i| i.complement().expect("templates are built from nops"))
        .collect();
    let len = complement.len();
    let soup_size = soup.len();
    if soup_size == 0 {
        return None;
    }
    let matches_at = |start: usize| -> bool {
        (0..len).all(|k| soup.read((start + k) % soup_size) == complement[k])
    };

    match direction {
        SearchDirection::Forward => {
            for d in 0..limit {
                let pos = (from + d) % soup_size;
                if matches_at(pos) {
                    return Some((pos, len));
                }
            }
            None
        }
        SearchDirection::Backward => {
            for d in 1..=limit {
                let pos = (from + soup_size - d % soup_size) % soup_size;
                if matches_at(pos) {
                    return Some((pos, len));
                }
            }
            None
        }
        SearchDirection::Outward => {
            for d in 0..=limit {
                let fpos = (from + d) % soup_size;
                if matches_at(fpos) {
                    return Some((fpos, len));
                }
                if d > 0 {
                    let bpos = (from + soup_size - d % soup_size) % soup_size;
                    if matches_at(bpos) {
                        return Some((bpos, len));
                    }
                }
            }
            None
        }
    }
}

fn written_register(instr: Instruction) -> Option<Register> {
    match instr {
        Instruction::Not0
        | Instruction::Shl
        | Instruction::Zero
        | Instruction::SubCab
        | Instruction::DecC
        | Instruction::IncC
        | Instruction::PopC => Some(Register::Cx),
        Instruction::SubAac | Instruction::IncA | Instruction::PopA => Some(Register::Ax),
        Instruction::IncB | Instruction::PopB | Instruction::MovBa => Some(Register::Bx),
        Instruction::PopD | Instruction::MovDc => Some(Register::Dx),
        Instruction::Adro | Instruction::Adrb | Instruction::Adrf | Instruction::Mal => {
            Some(Register::Ax)
        }
        _ => None,
    }
}

/// Removes `id` from the world entirely: frees its memory, drops it from
/// the scheduler/reaper queues, and updates genotype bookkeeping. Shared
/// by the mal-triggered reap, lazy reaping, and disturbance sampling.
pub fn kill_cell(id: CellId, cause: DeathCause, ctx: &mut ExecCtx) {
    let victim = match ctx.cells.remove(&id) {
        Some(v) => v,
        None => return,
    };
    let genome: Vec<Instruction> = (0..victim.mother_region.length)
        .map(|i| ctx.soup.read(victim.mother_region.start + i))
        .collect();
    ctx.soup.free(victim.mother_region);
    if let Some(d) = victim.daughter_region {
        ctx.soup.free(d);
    }
    ctx.scheduler.remove(id);
    ctx.reaper.remove(id);
    let identity = genebank::identity_of(&genome);
    let extinct = ctx.genebank.decrement(&identity);
    ctx.events.emit(Event::CellDied { cell_id: id, cause });
    if extinct {
        if let Some(g) = ctx.genebank.get(&identity) {
            ctx.events.emit(Event::GenotypeExtinct {
                genotype_name: g.name.clone(),
            });
        }
    }
}

fn genetic_operator_kind(op: GeneticOperator) -> MutationKind {
    match op {
        GeneticOperator::InstructionInsertion => MutationKind::GeneticInstructionInsertion,
        GeneticOperator::InstructionDeletion => MutationKind::GeneticInstructionDeletion,
        GeneticOperator::InstructionCrossover => MutationKind::GeneticInstructionCrossover,
        GeneticOperator::SegmentDeletion => MutationKind::GeneticSegmentDeletion,
        GeneticOperator::SegmentInsertion => MutationKind::GeneticSegmentInsertion,
        GeneticOperator::SegmentCrossover => MutationKind::GeneticSegmentCrossover,
    }
}

/// Deterministically picks a same-size living donor genome for
/// crossover (lowest `cell_id` among same-size cells, so the choice
/// never depends on hash-map iteration order).
fn find_same_size_donor(ctx: &ExecCtx, size: usize, exclude: CellId) -> Option<Vec<Instruction>> {
    let donor_id = ctx
        .cells
        .values()
        .filter(|c| c.id != exclude && c.mother_region.length == size)
        .map(|c| c.id)
        .min()?;
    let region = ctx.cells.get(&donor_id)?.mother_region;
    Some((0..region.length).map(|i| ctx.soup.read(region.start + i)).collect())
}

/// Executes exactly one instruction for `cell`, mutating its CPU state
/// and, for most opcodes, the shared soup. `cell` has already been
/// removed from `ctx.cells` by the caller.
pub fn step(cell: &mut Cell, ctx: &mut ExecCtx) {
    let soup_size = ctx.soup.len();
    let ip = cell.cpu.ip;

    if !access_allowed(AccessKind::Execute, ip, cell, ctx.soup, ctx.config) {
        cell.cpu.flags.e = true;
        cell.demographics.error_count += 1;
        cell.cpu.ip = (ip + 1) % soup_size.max(1);
        return;
    }

    let instr = ctx.soup.read(ip);
    cell.demographics.instructions_executed += 1;

    let mut ip_override: Option<usize> = None;
    let mut ip_delta: usize = 1;

    match instr {
        Instruction::Nop0 | Instruction::Nop1 => {}

        Instruction::Not0 => cell.cpu.set(Register::Cx, cell.cpu.cx ^ 1),
        Instruction::Shl => cell.cpu.set(Register::Cx, cell.cpu.cx.wrapping_shl(1)),
        Instruction::Zero => cell.cpu.set(Register::Cx, 0),
        Instruction::Ifz => {
            if cell.cpu.cx != 0 {
                ip_delta = 2;
            }
        }
        Instruction::SubCab => cell.cpu.set(Register::Cx, cell.cpu.ax.wrapping_sub(cell.cpu.bx)),
        Instruction::SubAac => cell.cpu.set(Register::Ax, cell.cpu.ax.wrapping_sub(cell.cpu.cx)),
        Instruction::IncA => cell.cpu.set(Register::Ax, cell.cpu.ax.wrapping_add(1)),
        Instruction::IncB => cell.cpu.set(Register::Bx, cell.cpu.bx.wrapping_add(1)),
        Instruction::DecC => cell.cpu.set(Register::Cx, cell.cpu.cx.wrapping_sub(1)),
        Instruction::IncC => cell.cpu.set(Register::Cx, cell.cpu.cx.wrapping_add(1)),

        Instruction::PushA => cell.cpu.push(cell.cpu.ax),
        Instruction::PushB => cell.cpu.push(cell.cpu.bx),
        Instruction::PushC => cell.cpu.push(cell.cpu.cx),
        Instruction::PushD => cell.cpu.push(cell.cpu.dx),
        Instruction::PopA => {
            if let Some(v) = cell.cpu.pop() {
                cell.cpu.set(Register::Ax, v);
            }
        }
        Instruction::PopB => {
            if let Some(v) = cell.cpu.pop() {
                cell.cpu.set(Register::Bx, v);
            }
        }
        Instruction::PopC => {
            if let Some(v) = cell.cpu.pop() {
                cell.cpu.set(Register::Cx, v);
            }
        }
        Instruction::PopD => {
            if let Some(v) = cell.cpu.pop() {
                cell.cpu.set(Register::Dx, v);
            }
        }

        Instruction::Jmpo | Instruction::Jmpb | Instruction::Call => {
            let template = read_template(ctx.soup, (ip + 1) % soup_size.max(1));
            let search_from = (ip + 1 + template.len()) % soup_size.max(1);
            let limit = (ctx.config.search_limit as f64 * ctx.mean_cell_size).round().max(1.0) as usize;
            let direction = match instr {
                Instruction::Jmpb => SearchDirection::Backward,
                _ => SearchDirection::Outward,
            };
            let found = find_complement(ctx.soup, &template, search_from, direction, limit);
            ip_delta = 1 + template.len();

            if matches!(instr, Instruction::Call) {
                cell.cpu.push(search_from as i32);
            }

            match found {
                Some((addr, _)) => {
                    ip_override = Some(addr);
                }
                None => {
                    cell.cpu.flags.e = true;
                }
            }
        }

        Instruction::Ret => {
            if let Some(addr) = cell.cpu.pop() {
                ip_override = Some(reg_as_addr(addr, soup_size));
            }
        }

        Instruction::MovDc => cell.cpu.set(Register::Dx, cell.cpu.cx),
        Instruction::MovBa => cell.cpu.set(Register::Bx, cell.cpu.ax),

        Instruction::Movii => {
            let dest = reg_as_addr(cell.cpu.ax, soup_size);
            let src = reg_as_addr(cell.cpu.bx, soup_size);
            if !access_allowed(AccessKind::Write, dest, cell, ctx.soup, ctx.config) {
                cell.cpu.flags.e = true;
            } else {
                let source_byte = ctx.soup.read(src).to_opcode();
                let rate = rate_from_gen_per(ctx.config.gen_per_mov_mut, ctx.mean_cell_size);
                let byte = if ctx.rng.gen_bool(rate.clamp(0.0, 1.0)) {
                    ctx.events.emit(Event::Mutation {
                        kind: MutationKind::Copy,
                        cell_id: Some(cell.id),
                    });
                    corrupt_copied_byte(source_byte, ctx.config.mut_bit_prop, ctx.rng)
                } else {
                    source_byte
                };
                ctx.soup.write(dest, Instruction::from_opcode(byte));
                if cell.daughter_region.map_or(false, |d| d.contains(dest, soup_size)) {
                    cell.demographics.mov_count += 1;
                }
            }
        }

        Instruction::Adro | Instruction::Adrb | Instruction::Adrf => {
            let template = read_template(ctx.soup, (ip + 1) % soup_size.max(1));
            let search_from = (ip + 1 + template.len()) % soup_size.max(1);
            let limit = (ctx.config.search_limit as f64 * ctx.mean_cell_size).round().max(1.0) as usize;
            let direction = match instr {
                Instruction::Adrb => SearchDirection::Backward,
                Instruction::Adrf => SearchDirection::Forward,
                _ => SearchDirection::Outward,
            };
            ip_delta = 1 + template.len();
            match find_complement(ctx.soup, &template, search_from, direction, limit) {
                Some((addr, len)) => {
                    cell.cpu.set(Register::Ax, addr as i32);
                    cell.cpu.set(Register::Cx, len as i32);
                }
                None => cell.cpu.flags.e = true,
            }
        }

        Instruction::Mal => {
            let requested = if cell.cpu.cx > 0 { cell.cpu.cx as usize } else { 0 };
            let policy = AllocPolicy::from_mal_mode(ctx.config.mal_mode, Some(cell.mother_region.start));
            let mut region = ctx.soup.allocate(requested, policy, ctx.config.mal_tol, ctx.rng);
            if region.is_none() {
                let victim = ctx.reaper.select_for_reap(
                    ctx.cells,
                    ctx.config.mal_reap_tol,
                    Some(cell.mother_region.start),
                    ctx.config.mal_tol,
                    ctx.mean_cell_size,
                    soup_size,
                );
                if let Some(victim_id) = victim {
                    // A victim already promoted by lazy tolerance is dying
                    // for laziness regardless of what triggered the reap;
                    // otherwise a tolerance-0 pick is a plain reaper-order
                    // kill, and a hint-guided pick is allocation pressure.
                    let cause = if ctx.reaper.is_promoted(victim_id) {
                        DeathCause::Lazy
                    } else if ctx.config.mal_reap_tol == 0 {
                        DeathCause::Reaper
                    } else {
                        DeathCause::Allocation
                    };
                    kill_cell(victim_id, cause, ctx);
                    region = ctx.soup.allocate(requested, policy, ctx.config.mal_tol, ctx.rng);
                }
            }
            match region {
                Some(r) => {
                    cell.cpu.set(Register::Ax, r.start as i32);
                    cell.daughter_region = Some(r);
                }
                None => cell.cpu.flags.e = true,
            }
        }

        Instruction::Divide => {
            divide(cell, ctx);
        }
    }

    if instr.writes_register() {
        let rate = rate_from_gen_per(ctx.config.gen_per_flaw, ctx.mean_cell_size);
        if ctx.rng.gen_bool(rate.clamp(0.0, 1.0)) {
            if let Some(reg) = written_register(instr) {
                let perturbed = perturb_register(cell.cpu.get(reg), ctx.rng);
                cell.cpu.set(reg, perturbed);
                ctx.events.emit(Event::Mutation {
                    kind: MutationKind::Flaw,
                    cell_id: Some(cell.id),
                });
            }
        }
    }

    if cell.cpu.flags.e {
        cell.demographics.error_count += 1;
    }

    let cosmic_rate = rate_from_gen_per(ctx.config.gen_per_bkg_mut, ctx.mean_cell_size);
    if ctx.rng.gen_bool(cosmic_rate.clamp(0.0, 1.0)) {
        let addr = cosmic_ray_address(soup_size, ctx.rng);
        ctx.soup.flip_random_bit(addr, ctx.rng);
        ctx.events.emit(Event::Mutation {
            kind: MutationKind::Cosmic,
            cell_id: None,
        });
    }

    cell.cpu.ip = match ip_override {
        Some(addr) => addr,
        None => (ip + ip_delta) % soup_size.max(1),
    };
}

/// Applies `divide`'s preconditions, genetic operators, and the
/// resulting split into mother + daughter cell.
fn divide(cell: &mut Cell, ctx: &mut ExecCtx) {
    let soup_size = ctx.soup.len();
    let daughter_region = match cell.daughter_region {
        Some(d) => d,
        None => {
            cell.cpu.flags.e = true;
            return;
        }
    };

    let copy_ratio = if daughter_region.length > 0 {
        cell.demographics.mov_count as f64 / daughter_region.length as f64
    } else {
        0.0
    };
    if copy_ratio < ctx.config.mov_prop_thr_div
        || daughter_region.length < ctx.config.min_cell_size
        || (ctx.config.div_same_siz != 0 && daughter_region.length != cell.mother_region.length)
    {
        cell.cpu.flags.e = true;
        return;
    }

    let mother_genome: Vec<Instruction> = (0..cell.mother_region.length)
        .map(|i| ctx.soup.read(cell.mother_region.start + i))
        .collect();
    let mut daughter_genome: Vec<Instruction> = (0..daughter_region.length)
        .map(|i| ctx.soup.read(daughter_region.start + i))
        .collect();

    if ctx.config.div_same_gen != 0
        && genebank::identity_of(&mother_genome) != genebank::identity_of(&daughter_genome)
    {
        cell.cpu.flags.e = true;
        return;
    }

    let donor = find_same_size_donor(ctx, daughter_region.length, cell.id);
    let rates = GeneticOperatorRates {
        ins_ins: ctx.config.gen_per_ins_ins,
        del_ins: ctx.config.gen_per_del_ins,
        cro_ins: ctx.config.gen_per_cro_ins,
        del_seg: ctx.config.gen_per_del_seg,
        ins_seg: ctx.config.gen_per_ins_seg,
        cro_seg: ctx.config.gen_per_cro_seg,
    };
    let before = daughter_genome.clone();
    let fired = apply_genetic_operators(&mut daughter_genome, &rates, ctx.mean_cell_size, donor.as_deref(), ctx.rng);
    for op in fired {
        ctx.events.emit(Event::Mutation {
            kind: genetic_operator_kind(op),
            cell_id: Some(cell.id),
        });
    }

    let div_mut_rate = rate_from_gen_per(ctx.config.gen_per_div_mut, ctx.mean_cell_size);
    if !daughter_genome.is_empty() && ctx.rng.gen_bool(div_mut_rate.clamp(0.0, 1.0)) {
        let pos = ctx.rng.gen_range(0..daughter_genome.len());
        let byte = daughter_genome[pos].to_opcode() ^ (1 << ctx.rng.gen_range(0..5));
        daughter_genome[pos] = Instruction::from_opcode(byte);
        ctx.events.emit(Event::Mutation {
            kind: MutationKind::DivideMutation,
            cell_id: Some(cell.id),
        });
    }

    let final_region = if daughter_genome.len() == daughter_region.length {
        daughter_region
    } else if daughter_genome.len() < daughter_region.length {
        let shrunk = Region::new(daughter_region.start, daughter_genome.len());
        let freed_len = daughter_region.length - daughter_genome.len();
        let freed_start = (daughter_region.start + daughter_genome.len()) % soup_size.max(1);
        ctx.soup.free(Region::new(freed_start, freed_len));
        shrunk
    } else {
        let extra = daughter_genome.len() - daughter_region.length;
        let extension_start = (daughter_region.start + daughter_region.length) % soup_size.max(1);
        let extension = Region::new(extension_start, extra);
        if ctx.soup.claim_region(extension) {
            Region::new(daughter_region.start, daughter_genome.len())
        } else {
            // Can't grow in place: abort the genetic-operator pass and
            // commit the unmutated daughter genome instead.
            daughter_genome = before;
            daughter_region
        }
    };

    for (i, instr) in daughter_genome.iter().enumerate() {
        ctx.soup.write((final_region.start + i) % soup_size.max(1), *instr);
    }

    if ctx.config.min_gen_mem_siz > 0 && final_region.length < ctx.config.min_gen_mem_siz {
        ctx.soup.free(final_region);
        cell.cpu.flags.e = true;
        cell.daughter_region = None;
        return;
    }

    let (genotype_name, is_new) = ctx.genebank.register(
        &daughter_genome,
        Some(cell.demographics.genotype_name.clone()),
        ctx.instruction_count,
    );
    if is_new {
        ctx.events.emit(Event::NewGenotype {
            genotype_name: genotype_name.clone(),
        });
    }

    let daughter_id = *ctx.next_cell_id;
    *ctx.next_cell_id += 1;
    let mut daughter = Cell::new(daughter_id, final_region, ctx.instruction_count, genotype_name.clone());
    daughter.demographics.parent_genotype_name = Some(cell.demographics.genotype_name.clone());

    ctx.cells.insert(daughter_id, daughter);
    ctx.scheduler.push_tail(daughter_id);
    ctx.reaper.push_tail(daughter_id);
    ctx.events.emit(Event::CellBorn {
        cell_id: daughter_id,
        parent_id: Some(cell.id),
        genotype_name,
    });

    cell.demographics.offspring_count += 1;
    cell.demographics.last_reproduction_instruction = ctx.instruction_count;
    cell.demographics.mov_count = 0;
    cell.daughter_region = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[allow(clippy::type_complexity)]
    fn fresh_ctx_parts(
        soup_size: usize,
    ) -> (
        Soup,
        Genebank,
        Scheduler,
        Reaper,
        HashMap<CellId, Cell>,
        EventBus,
        SmallRng,
        SimulationConfig,
    ) {
        (
            Soup::new(soup_size, 800),
            Genebank::new(),
            Scheduler::new(),
            Reaper::new(),
            HashMap::new(),
            EventBus::new(),
            SmallRng::seed_from_u64(1),
            SimulationConfig {
                gen_per_bkg_mut: 0,
                gen_per_flaw: 0,
                gen_per_mov_mut: 0,
                gen_per_div_mut: 0,
                gen_per_ins_ins: 0,
                gen_per_del_ins: 0,
                gen_per_cro_ins: 0,
                gen_per_del_seg: 0,
                gen_per_ins_seg: 0,
                gen_per_cro_seg: 0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn inc_a_sets_register_and_advances_ip() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(64);
        soup.write(0, Instruction::IncA);
        let mut cell = Cell::new(1, Region::new(0, 20), 0, "test".to_string());
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 20.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        step(&mut cell, &mut ctx);
        assert_eq!(cell.cpu.ax, 1);
        assert_eq!(cell.cpu.ip, 1);
    }

    #[test]
    fn ifz_skips_next_instruction_when_cx_nonzero() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(64);
        soup.write(0, Instruction::Ifz);
        soup.write(1, Instruction::IncA);
        soup.write(2, Instruction::IncB);
        let mut cell = Cell::new(1, Region::new(0, 20), 0, "test".to_string());
        cell.cpu.cx = 1;
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 20.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        step(&mut cell, &mut ctx);
        assert_eq!(cell.cpu.ip, 2);
    }

    #[test]
    fn movii_respects_destination_write_protection() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, mut config) =
            fresh_ctx_parts(64);
        config.mem_mode_prot = 2;
        soup.write(0, Instruction::Movii);
        soup.write(40, Instruction::Nop1);
        // Occupy [40, 50) with a foreign cell so it's neither free nor ours.
        cells.insert(9, Cell::new(9, Region::new(40, 10), 0, "other".to_string()));
        let mut cell = Cell::new(1, Region::new(0, 20), 0, "test".to_string());
        cell.cpu.ax = 40;
        cell.cpu.bx = 0;
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 20.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        step(&mut cell, &mut ctx);
        assert!(cell.cpu.flags.e);
        assert_eq!(cell.demographics.mov_count, 0);
    }

    #[test]
    fn backward_template_search_finds_complement() {
        let mut soup = Soup::new(32, 800);
        soup.write(0, Instruction::Nop0);
        soup.write(1, Instruction::Nop1);
        soup.write(20, Instruction::Jmpb);
        soup.write(21, Instruction::Nop1);
        soup.write(22, Instruction::Nop0);
        let template = read_template(&soup, 21);
        assert_eq!(template, vec![Instruction::Nop1, Instruction::Nop0]);
        let found = find_complement(&soup, &template, 23, SearchDirection::Backward, 30);
        assert_eq!(found, Some((0, 2)));
    }

    #[test]
    fn divide_fails_below_copy_threshold() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(64);
        let mut cell = Cell::new(1, Region::new(0, 12), 0, "test".to_string());
        cell.daughter_region = Some(Region::new(12, 12));
        cell.demographics.mov_count = 2; // far short of mov_prop_thr_div * 12
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 12.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        divide(&mut cell, &mut ctx);
        assert!(cell.cpu.flags.e);
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn divide_succeeds_and_registers_daughter() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(64);
        for i in 0..12usize {
            soup.write(i, Instruction::Nop0);
            soup.write(12 + i, Instruction::Nop0);
        }
        soup.claim_region(Region::new(0, 24));
        let mut cell = Cell::new(1, Region::new(0, 12), 0, "0012aaa".to_string());
        cell.daughter_region = Some(Region::new(12, 12));
        cell.demographics.mov_count = 12;
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 12.0,
            next_cell_id: &mut next_id,
            instruction_count: 5,
        };
        divide(&mut cell, &mut ctx);
        assert!(!cell.cpu.flags.e);
        assert_eq!(cell.demographics.offspring_count, 1);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(reaper.len(), 1);
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn movii_into_free_memory_does_not_count_toward_daughter_copy() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(64);
        soup.write(0, Instruction::Movii);
        let mut cell = Cell::new(1, Region::new(0, 20), 0, "test".to_string());
        cell.daughter_region = Some(Region::new(20, 10));
        cell.cpu.ax = 40; // destination outside the daughter region
        cell.cpu.bx = 0;
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 20.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        step(&mut cell, &mut ctx);
        assert!(!cell.cpu.flags.e);
        assert_eq!(cell.demographics.mov_count, 0);
    }

    #[test]
    fn divide_below_min_gen_mem_siz_frees_the_carved_region() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, mut config) =
            fresh_ctx_parts(64);
        config.min_gen_mem_siz = 13;
        for i in 0..12usize {
            soup.write(i, Instruction::Nop0);
            soup.write(12 + i, Instruction::Nop0);
        }
        soup.claim_region(Region::new(0, 24));
        let mut cell = Cell::new(1, Region::new(0, 12), 0, "0012aaa".to_string());
        cell.daughter_region = Some(Region::new(12, 12));
        cell.demographics.mov_count = 12;
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 12.0,
            next_cell_id: &mut next_id,
            instruction_count: 5,
        };
        divide(&mut cell, &mut ctx);
        assert!(cell.cpu.flags.e);
        assert_eq!(cell.daughter_region, None);
        assert_eq!(cells.len(), 0);
        // The rejected daughter region must come back to the free list
        // rather than leaking: only the mother's 12 bytes stay occupied.
        assert_eq!(soup.total_free_length(), 64 - 12);
    }

    #[test]
    fn lazily_promoted_victim_dies_with_lazy_cause_not_allocation() {
        let (mut soup, mut genebank, mut scheduler, mut reaper, mut cells, mut events, mut rng, config) =
            fresh_ctx_parts(40);
        soup.claim_region(Region::new(0, 20));
        soup.claim_region(Region::new(20, 20));
        soup.write(0, Instruction::Mal);
        let victim = Cell::new(9, Region::new(20, 20), 0, "victim".to_string());
        cells.insert(9, victim);
        reaper.push_tail(9);
        reaper.mark_promoted(9);
        let mut cell = Cell::new(1, Region::new(0, 20), 0, "test".to_string());
        cell.cpu.cx = 10; // request more than the currently free (zero) space
        let mut next_id: CellId = 2;
        let mut ctx = ExecCtx {
            soup: &mut soup,
            genebank: &mut genebank,
            scheduler: &mut scheduler,
            reaper: &mut reaper,
            cells: &mut cells,
            events: &mut events,
            rng: &mut rng,
            config: &config,
            mean_cell_size: 20.0,
            next_cell_id: &mut next_id,
            instruction_count: 0,
        };
        step(&mut cell, &mut ctx);
        assert!(!cells.contains_key(&9));
        let died = events
            .history()
            .iter()
            .find(|e| matches!(e, Event::CellDied { cell_id: 9, .. }));
        assert!(matches!(
            died,
            Some(Event::CellDied { cause: DeathCause::Lazy, .. })
        ));
    }
}
