//! Diagnostic harness: run a small soup for a fixed number of ticks and
//! print progress every 50, to catch stalls or non-replicating ancestors
//! quickly during development.
//!
//! Run with: cargo run --bin debug_test --release

use tierra_core::config::SimulationConfig;
use tierra_core::{telemetry, Simulation};

fn main() {
    println!("=== TIERRA-CORE DEBUG TEST ===\n");
    telemetry::init();

    println!("Step 1: building simulation...");
    let config = SimulationConfig {
        soup_size: 10_000,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).expect("default configuration is valid");
    println!("Step 2: simulation built, soup_size={}", sim.config().soup_size);

    println!("Step 3: injecting ancestor...");
    sim.inject_ancestor().expect("fresh soup has room for the ancestor");
    println!("Ancestor injected. Population: {}\n", sim.population());

    println!("--- Running 1000 ticks ---\n");
    let mut births_before = 0u64;
    for i in 0..1000u64 {
        if sim.tick().is_err() {
            println!("Run halted at tick {i}");
            break;
        }
        if (i + 1) % 50 == 0 {
            let births: u64 = sim
                .snapshot_cells()
                .iter()
                .map(|c| c.demographics.offspring_count)
                .sum();
            println!(
                "tick {:>4}: instructions={:>8} population={:>4} genotypes={:>3} births_so_far={}",
                i + 1,
                sim.instruction_count(),
                sim.population(),
                sim.snapshot_genotypes().len(),
                births,
            );
            births_before = births;
        }
    }

    println!("\n--- Simulation Complete ---\n");
    println!("Final population: {}", sim.population());
    println!("Distinct genotypes: {}", sim.snapshot_genotypes().len());
    println!("Instructions executed: {}", sim.instruction_count());

    if births_before == 0 {
        println!("\nWARNING: no births observed! Ancestor may not be replicating.");
    } else {
        println!("\nReplication working: {births_before} births observed.");
    }
}
