//! Simulation configuration.
//!
//! `SimulationConfig` is a flat, `serde`-deserializable record mirroring the
//! full set of recognized options. This crate owns the struct, its defaults,
//! and validation; an out-of-scope loader (TOML/JSON/etc.) is expected to
//! populate one and hand it to `Simulation::new`.

use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // Soup / time
    pub soup_size: usize,
    pub slice_size: u32,
    pub siz_dep_slice: u8,
    pub slice_pow: f64,
    pub slice_style: u8,
    pub slic_fix_frac: f64,
    pub slic_ran_frac: f64,

    // Mutation rates (expressed as "generations per event")
    pub gen_per_bkg_mut: u32,
    pub gen_per_flaw: u32,
    pub gen_per_mov_mut: u32,
    pub gen_per_div_mut: u32,
    pub mut_bit_prop: f64,

    // Genetic operators on divide
    pub gen_per_cro_ins_sam_siz: u32,
    pub gen_per_ins_ins: u32,
    pub gen_per_del_ins: u32,
    pub gen_per_cro_ins: u32,
    pub gen_per_del_seg: u32,
    pub gen_per_ins_seg: u32,
    pub gen_per_cro_seg: u32,

    // Allocator
    pub mal_mode: u8,
    pub mal_reap_tol: u8,
    pub mal_tol: u32,
    pub max_free_blocks: usize,
    pub mal_sam_siz: u32,

    // Cells
    pub min_cell_size: usize,
    pub min_gen_mem_siz: usize,
    pub min_templ_size: usize,
    pub mov_prop_thr_div: f64,
    pub search_limit: u32,

    // Reaper
    pub reap_rnd_prop: f64,
    pub lazy_tol: u32,
    pub drop_dead: u64,

    // Division
    pub div_same_gen: u8,
    pub div_same_siz: u8,

    // Disturbance
    pub dist_freq: f64,
    pub dist_prop: f64,
    pub eject_rate: f64,

    // Protection masks (bit-set: execute=1, write=2, read=4)
    pub mem_mode_free: u8,
    pub mem_mode_mine: u8,
    pub mem_mode_prot: u8,

    // Genebank
    pub disk_bank: u8,
    pub save_freq: u32,
    pub sav_min_num: u32,
    pub sav_thr_mem: f64,
    pub sav_thr_pop: f64,

    // Initial conditions
    pub seed: u64,
    pub new_soup: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            soup_size: 60_000,
            slice_size: 25,
            siz_dep_slice: 0,
            slice_pow: 1.0,
            slice_style: 2,
            slic_fix_frac: 0.0,
            slic_ran_frac: 2.0,

            gen_per_bkg_mut: 32,
            gen_per_flaw: 32,
            gen_per_mov_mut: 0,
            gen_per_div_mut: 32,
            mut_bit_prop: 0.2,

            gen_per_cro_ins_sam_siz: 32,
            gen_per_ins_ins: 32,
            gen_per_del_ins: 32,
            gen_per_cro_ins: 32,
            gen_per_del_seg: 32,
            gen_per_ins_seg: 32,
            gen_per_cro_seg: 32,

            mal_mode: 1,
            mal_reap_tol: 1,
            mal_tol: 20,
            max_free_blocks: 800,
            mal_sam_siz: 0,

            min_cell_size: 12,
            min_gen_mem_siz: 12,
            min_templ_size: 1,
            mov_prop_thr_div: 0.7,
            search_limit: 5,

            reap_rnd_prop: 0.3,
            lazy_tol: 10,
            drop_dead: 5,

            div_same_gen: 0,
            div_same_siz: 0,

            dist_freq: -0.3,
            dist_prop: 0.2,
            eject_rate: 0.0,

            mem_mode_free: 0,
            mem_mode_mine: 0,
            mem_mode_prot: 2,

            disk_bank: 1,
            save_freq: 100,
            sav_min_num: 10,
            sav_thr_mem: 0.02,
            sav_thr_pop: 0.02,

            seed: 0,
            new_soup: 1,
        }
    }
}

impl SimulationConfig {
    /// Rejects option combinations that would leave the engine in an
    /// inconsistent state before a single tick runs.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.soup_size == 0 {
            return Err(EngineError::ConfigError("soup_size must be > 0".into()));
        }
        if self.min_cell_size == 0 {
            return Err(EngineError::ConfigError(
                "min_cell_size must be > 0".into(),
            ));
        }
        if self.min_cell_size > self.soup_size {
            return Err(EngineError::ConfigError(
                "min_cell_size cannot exceed soup_size".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mov_prop_thr_div) {
            return Err(EngineError::ConfigError(
                "mov_prop_thr_div must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mut_bit_prop) {
            return Err(EngineError::ConfigError(
                "mut_bit_prop must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dist_prop) {
            return Err(EngineError::ConfigError(
                "dist_prop must be in [0, 1]".into(),
            ));
        }
        if self.search_limit == 0 {
            return Err(EngineError::ConfigError(
                "search_limit must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_soup_size_rejected() {
        let cfg = SimulationConfig {
            soup_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::ConfigError(_))));
    }

    #[test]
    fn min_cell_size_over_soup_rejected() {
        let cfg = SimulationConfig {
            soup_size: 10,
            min_cell_size: 12,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_fraction_rejected() {
        let cfg = SimulationConfig {
            mov_prop_thr_div: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
