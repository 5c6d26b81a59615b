//! Headless report-loop binary: runs a simulation from the default
//! configuration (or a seed override on the command line) and prints
//! periodic population/genotype statistics to stdout.
//!
//! Run with: cargo run --release [-- <seed>]

use tierra_core::config::SimulationConfig;
use tierra_core::{telemetry, Simulation};

const REPORT_INTERVAL: u64 = 100_000;
const TOTAL_INSTRUCTIONS: u64 = 5_000_000;

fn main() {
    telemetry::init();

    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let config = SimulationConfig {
        seed,
        ..Default::default()
    };

    let mut sim = Simulation::new(config).expect("default configuration is valid");
    sim.inject_ancestor().expect("fresh soup has room for the ancestor");

    println!("[tierra-core] starting run (seed={seed}, soup_size={})", sim.config().soup_size);
    println!("[tierra-core] ancestor injected, population={}", sim.population());

    let mut halted_early = false;
    while sim.instruction_count() < TOTAL_INSTRUCTIONS {
        let remaining = TOTAL_INSTRUCTIONS - sim.instruction_count();
        let batch = REPORT_INTERVAL.min(remaining.max(1));
        match sim.tick_batch(batch, &|| false) {
            Ok(outcome) if outcome.ticks_run > 0 => {
                println!(
                    "instructions={:>10} population={:>5} genotypes={:>4}",
                    sim.instruction_count(),
                    sim.population(),
                    sim.snapshot_genotypes().len(),
                );
            }
            Ok(_) => break,
            Err(err) => {
                println!("[tierra-core] run halted: {err}");
                halted_early = true;
                break;
            }
        }
    }

    if !halted_early {
        println!("[tierra-core] run complete after {} instructions", sim.instruction_count());
    }
    println!("final population: {}", sim.population());
    println!("distinct genotypes seen: {}", sim.snapshot_genotypes().len());
}
