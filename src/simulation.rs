//! Top-level engine: owns the soup, the cell slab, and every subsystem
//! queue, and drives the tick loop described in §4.7.
//!
//! Mirrors the shape of the teacher's `World` (a single struct owning all
//! mutable state, advanced one `update`/`tick` at a time) but over the
//! arena-of-cells model instead of a 2D organism grid.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::Rng;

use crate::cell::{Cell, CellId, Demographics};
use crate::config::SimulationConfig;
use crate::cpu::STACK_MAX_DEPTH;
use crate::datalog::{DataLog, Sample};
use crate::error::EngineError;
use crate::events::{DeathCause, Event, EventBus};
use crate::execute::{self, ExecCtx};
use crate::genebank::Genebank;
use crate::instruction::Instruction;
use crate::reaper::Reaper;
use crate::rng;
use crate::scheduler::{self, Scheduler};
use crate::soup::{AllocPolicy, Region, Soup};

/// Instructions per `drop_dead` unit, matching the teacher's convention
/// of expressing long timeouts in millions of instructions.
const DROP_DEAD_SCALE: u64 = 1_000_000;
const MILESTONE_INTERVAL: u64 = 1_000_000;

/// What `tick`/`tick_batch` report back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub ticks_run: u64,
    pub halted: bool,
}

#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub id: CellId,
    pub mother_region: Region,
    pub daughter_region: Option<Region>,
    pub ax: i32,
    pub bx: i32,
    pub cx: i32,
    pub dx: i32,
    pub ip: usize,
    pub stack_depth: usize,
    pub error_flag: bool,
    pub demographics: Demographics,
}

#[derive(Debug, Clone)]
pub struct GenotypeSnapshot {
    pub name: String,
    pub size: usize,
    pub parent_name: Option<String>,
    pub current_population: u64,
    pub max_population: u64,
}

/// The engine. A host wraps one of these in whatever synchronization it
/// needs (§5 says only the engine thread mutates it); this crate makes no
/// locking decisions of its own.
pub struct Simulation {
    config: SimulationConfig,
    soup: Soup,
    cells: HashMap<CellId, Cell>,
    next_cell_id: CellId,
    scheduler: Scheduler,
    reaper: Reaper,
    genebank: Genebank,
    events: EventBus,
    datalog: DataLog,
    rng: SmallRng,
    instruction_count: u64,
    last_birth_instruction: u64,
    last_disturbance_at: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Simulation, EngineError> {
        config.validate()?;
        let soup = Soup::new(config.soup_size, config.max_free_blocks);
        let rng = rng::from_seed(config.seed);
        Ok(Simulation {
            soup,
            cells: HashMap::new(),
            next_cell_id: 1,
            scheduler: Scheduler::new(),
            reaper: Reaper::new(),
            genebank: Genebank::new(),
            events: EventBus::new(),
            datalog: DataLog::new(1000, 100),
            rng,
            instruction_count: 0,
            last_birth_instruction: 0,
            last_disturbance_at: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn population(&self) -> usize {
        self.cells.len()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn datalog(&self) -> &DataLog {
        &self.datalog
    }

    /// Mean region length across live cells, used as the `ref_size` for
    /// size-dependent slices and as the divisor in every `gen_per_*` rate.
    /// Falls back to `min_cell_size` while the soup is empty so a freshly
    /// injected ancestor doesn't divide by zero.
    pub fn mean_cell_size(&self) -> f64 {
        if self.cells.is_empty() {
            self.config.min_cell_size as f64
        } else {
            let total: usize = self.cells.values().map(|c| c.mother_region.length).sum();
            total as f64 / self.cells.len() as f64
        }
    }

    /// Injects `genome` at a freshly allocated region (first-fit, so
    /// inoculation doesn't depend on the configured `mal_mode`). Returns
    /// the new cell's id, or `None` if the soup has no room.
    pub fn inject_genome(&mut self, genome: &[Instruction], name: Option<String>) -> Option<CellId> {
        let region = self
            .soup
            .allocate(genome.len(), AllocPolicy::FirstFit, 0, &mut self.rng)?;
        for (i, instr) in genome.iter().enumerate() {
            self.soup.write(region.start + i, *instr);
        }
        let genotype_name = match name {
            Some(n) => {
                self.genebank
                    .register_named(n.clone(), genome, None, self.instruction_count);
                n
            }
            None => {
                let (n, _) = self.genebank.register(genome, None, self.instruction_count);
                n
            }
        };
        let id = self.next_cell_id;
        self.next_cell_id += 1;
        let cell = Cell::new(id, region, self.instruction_count, genotype_name.clone());
        self.cells.insert(id, cell);
        self.scheduler.push_tail(id);
        self.reaper.push_tail(id);
        self.events.emit(Event::CellBorn {
            cell_id: id,
            parent_id: None,
            genotype_name,
        });
        self.last_birth_instruction = self.instruction_count;
        Some(id)
    }

    /// Injects the hand-derived 80-instruction self-replicating ancestor
    /// as the sole inoculant, per the law in §8.
    pub fn inject_ancestor(&mut self) -> Option<CellId> {
        let genome = ancestor_genome();
        let name = format!("{:04}god", genome.len());
        self.inject_genome(&genome, Some(name))
    }

    /// Runs one scheduler turn: pops the next cell, grants it a slice,
    /// executes up to `slice` instructions (fewer if the cell dies or the
    /// soup empties mid-slice), then applies lazy-reap promotion and
    /// disturbance. Returns `Err` if the run should stop.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let id = match self.scheduler.next() {
            Some(id) => id,
            None => return Err(EngineError::Extinction),
        };
        let mut cell = match self.cells.remove(&id) {
            Some(c) => c,
            None => return Ok(()), // stale scheduler entry; next tick will settle
        };

        let mean = self.mean_cell_size();
        let slice = scheduler::compute_slice(&self.config, cell.mother_region.length, mean, &mut self.rng);

        for _ in 0..slice {
            if self.soup.is_empty() {
                break;
            }
            self.instruction_count += 1;
            let offspring_before = cell.demographics.offspring_count;
            {
                let mut ctx = ExecCtx {
                    soup: &mut self.soup,
                    genebank: &mut self.genebank,
                    scheduler: &mut self.scheduler,
                    reaper: &mut self.reaper,
                    cells: &mut self.cells,
                    events: &mut self.events,
                    rng: &mut self.rng,
                    config: &self.config,
                    mean_cell_size: mean,
                    next_cell_id: &mut self.next_cell_id,
                    instruction_count: self.instruction_count,
                };
                execute::step(&mut cell, &mut ctx);
            }
            if cell.demographics.offspring_count > offspring_before {
                self.last_birth_instruction = self.instruction_count;
            }
            if self.instruction_count % MILESTONE_INTERVAL == 0 {
                self.events.emit(Event::Milestone {
                    instruction_count: self.instruction_count,
                });
            }
        }

        let lazy_threshold = self.config.lazy_tol as u64 * cell.mother_region.length as u64;
        if self.instruction_count.saturating_sub(cell.demographics.last_reproduction_instruction) > lazy_threshold {
            self.reaper.mark_promoted(id);
        }

        self.cells.insert(id, cell);
        self.reaper.resort(&self.cells, self.instruction_count);

        self.maybe_disturb();

        let sample = Sample {
            instruction_count: self.instruction_count,
            population: self.cells.len() as u64,
            genotype_count: self.genebank.len(),
            mean_genome_size: self.mean_cell_size(),
        };
        self.datalog.maybe_sample(self.instruction_count, sample);

        if self.cells.is_empty() {
            return Err(EngineError::Extinction);
        }
        let drop_dead_threshold = self.config.drop_dead.saturating_mul(DROP_DEAD_SCALE);
        let since_birth = self.instruction_count.saturating_sub(self.last_birth_instruction);
        if drop_dead_threshold > 0 && since_birth > drop_dead_threshold {
            return Err(EngineError::NoReproduction {
                instructions_since_birth: since_birth,
            });
        }
        Ok(())
    }

    /// Runs up to `n` ticks, stopping early if `stop` flips true between
    /// ticks (cooperative cancellation, §5) or the engine halts. Never
    /// returns `Err` for a clean stop or extinction with ticks already
    /// run; only a halt on the very first tick of the batch propagates.
    pub fn tick_batch(&mut self, n: u64, stop: &dyn Fn() -> bool) -> Result<TickOutcome, EngineError> {
        let mut ticks_run = 0;
        for _ in 0..n {
            if stop() {
                return Ok(TickOutcome { ticks_run, halted: true });
            }
            match self.tick() {
                Ok(()) => ticks_run += 1,
                Err(e) => {
                    if ticks_run == 0 {
                        return Err(e);
                    }
                    return Ok(TickOutcome { ticks_run, halted: true });
                }
            }
        }
        Ok(TickOutcome { ticks_run, halted: false })
    }

    /// §4.7 disturbance: every `dist_freq` million instructions (positive)
    /// or every `|dist_freq| * recovery_time` instructions (negative,
    /// recovery time approximated as `mean_cell_size / mov_prop_thr_div`,
    /// the instructions a generation typically needs to replicate once),
    /// kill a `dist_prop` fraction of the live population.
    fn maybe_disturb(&mut self) {
        if self.config.dist_freq == 0.0 || self.cells.is_empty() {
            return;
        }
        let period = if self.config.dist_freq > 0.0 {
            (self.config.dist_freq * DROP_DEAD_SCALE as f64).round() as u64
        } else {
            let recovery = self.mean_cell_size() / self.config.mov_prop_thr_div.max(0.01);
            ((-self.config.dist_freq) * recovery).round() as u64
        };
        let period = period.max(1);
        if self.instruction_count.saturating_sub(self.last_disturbance_at) < period {
            return;
        }
        self.last_disturbance_at = self.instruction_count;
        let victims = self.reaper.sample_disturbance(self.config.dist_prop, &mut self.rng);
        if victims.is_empty() {
            return;
        }
        let mean = self.mean_cell_size();
        let mut ctx = ExecCtx {
            soup: &mut self.soup,
            genebank: &mut self.genebank,
            scheduler: &mut self.scheduler,
            reaper: &mut self.reaper,
            cells: &mut self.cells,
            events: &mut self.events,
            rng: &mut self.rng,
            config: &self.config,
            mean_cell_size: mean,
            next_cell_id: &mut self.next_cell_id,
            instruction_count: self.instruction_count,
        };
        for victim in victims {
            execute::kill_cell(victim, DeathCause::Disturbance, &mut ctx);
        }
    }

    pub fn snapshot_cell(&self, id: CellId) -> Option<CellSnapshot> {
        self.cells.get(&id).map(|c| CellSnapshot {
            id: c.id,
            mother_region: c.mother_region,
            daughter_region: c.daughter_region,
            ax: c.cpu.ax,
            bx: c.cpu.bx,
            cx: c.cpu.cx,
            dx: c.cpu.dx,
            ip: c.cpu.ip,
            stack_depth: c.cpu.stack.len(),
            error_flag: c.cpu.flags.e,
            demographics: c.demographics.clone(),
        })
    }

    pub fn snapshot_cells(&self) -> Vec<CellSnapshot> {
        let mut ids: Vec<CellId> = self.cells.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.snapshot_cell(id)).collect()
    }

    pub fn snapshot_genotypes(&self) -> Vec<GenotypeSnapshot> {
        let mut names: Vec<String> = self
            .cells
            .values()
            .map(|c| c.demographics.genotype_name.clone())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter_map(|name| {
                let g = self.genebank.by_name(&name)?;
                Some(GenotypeSnapshot {
                    name: g.name.clone(),
                    size: g.size,
                    parent_name: g.parent_name.clone(),
                    current_population: g.current_population,
                    max_population: g.max_population,
                })
            })
            .collect()
    }

    /// Checks the §8 invariants; returns the first violation found, if
    /// any. Exercised by the crate's own tests, not by production code.
    pub fn check_invariants(&self) -> Result<(), String> {
        let soup_size = self.soup.len();
        let occupied: usize = self.cells.values().map(|c| c.mother_region.length).sum();
        if occupied + self.soup.total_free_length() != soup_size {
            return Err("region + free lengths do not cover the soup".to_string());
        }

        let mut blocks = self.soup.free_blocks().to_vec();
        blocks.sort_by_key(|r| r.start);
        for pair in blocks.windows(2) {
            if pair[0].start == pair[1].start {
                return Err("duplicate free block start".to_string());
            }
            let end = (pair[0].start + pair[0].length) % soup_size.max(1);
            if end == pair[1].start {
                return Err("adjacent free blocks were not merged".to_string());
            }
        }

        for cell in self.cells.values() {
            if !cell.mother_region.contains(cell.cpu.ip, soup_size) {
                return Err(format!("cell {} ip outside its mother region", cell.id));
            }
            if cell.cpu.stack.len() > STACK_MAX_DEPTH {
                return Err(format!("cell {} stack over max depth", cell.id));
            }
        }

        let live_ids: std::collections::HashSet<CellId> = self.cells.keys().copied().collect();
        let sched_ids: std::collections::HashSet<CellId> = self.scheduler.ids().copied().collect();
        let reap_ids: std::collections::HashSet<CellId> = self.reaper.ids().copied().collect();
        if sched_ids != live_ids {
            return Err("scheduler queue diverges from live cells".to_string());
        }
        if reap_ids != live_ids {
            return Err("reaper queue diverges from live cells".to_string());
        }

        Ok(())
    }
}

/// Builds the 80-instruction self-replicating ancestor genome.
///
/// Structure (relative offsets; placement-independent, every address is
/// found by template search or carried in a register):
/// - `nop0 nop1` at the very start is this genome's own location marker.
/// - `adrb` backward-searches for that marker to learn its own mother
///   start, stashes it in `bx` as the copy source.
/// - `zero` plus a `shl`/`not0` run builds the constant 80 (`1010000`) in
///   `cx`, padded with inert `nop0`s so the instruction count is exactly
///   the constant it encodes.
/// - `mal` allocates 80 bytes; `ax` becomes the copy destination.
/// - the `movii`/`incA`/`incB`/`decC`/`ifz` loop copies the genome byte by
///   byte. `ifz` fires "execute next" on `cx == 0`, so the instruction
///   right after it is the one reached when copying is done (`jmpo`,
///   outward search, forward to the post-loop marker); the instruction
///   after *that* is reached by the `ifz`-skip path when `cx != 0` (its
///   own template bytes are skipped over as harmless nops), landing on
///   `jmpb`, which searches backward for the loop-start marker.
/// - `jmpb`'s own template is separated from the post-loop marker by one
///   inert `incc` — `read_template` doesn't care whether a run is nop0 or
///   nop1, so two adjacent two-byte markers would otherwise fuse into one
///   four-byte template and search for the wrong complement.
/// - `divide` commits the daughter once the copy is complete.
pub fn ancestor_genome() -> Vec<Instruction> {
    use Instruction::*;
    let mut genome = vec![
        Nop0, Nop1, // self-location marker
        Adrb, Nop1, Nop0, // finds the marker backward; ax=own start, cx=2
        MovBa,  // bx = own start (copy source)
        Zero,   // cx = 0, about to build the allocation size
    ];
    genome.extend(std::iter::repeat(Nop0).take(46)); // filler so len() == 80
    genome.extend([
        Shl, Not0, Shl, Shl, Not0, Shl, Shl, Shl, Shl, // cx = 0b1010000 = 80
        Mal, // ax = daughter start, cx still 80 (the copy count)
        Nop1, Nop1, // loop-start marker
        Movii, IncA, IncB, DecC, Ifz, //
        Jmpo, Nop0, Nop0, // cx==0: jump to the post-loop marker
        Jmpb, Nop0, Nop0, // cx!=0 (reached via ifz-skip): jump to loop start
        IncC, // separator: stops jmpb's template before the next marker
        Nop1, Nop1, // post-loop marker
        Divide,
    ]);
    genome
}
