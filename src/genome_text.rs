//! Internal genome mnemonic text format, used by this crate's own tests
//! and fixtures. A full multi-section loader (headers, `track N:`,
//! arbitrary metadata) is out of scope; this pair only needs to
//! round-trip a code block this crate wrote itself.

use crate::error::GenomeParseError;
use crate::instruction::Instruction;

/// Renders a genome as one mnemonic per line, preceded by a `CODE`
/// marker line.
pub fn genome_to_text(genome: &[Instruction]) -> String {
    let mut out = String::from("CODE\n");
    for instr in genome {
        out.push_str(instr.to_mnemonic());
        out.push('\n');
    }
    out
}

/// Parses a genome previously rendered by `genome_to_text`. Lines before
/// the `CODE` marker are treated as ignorable metadata; `; comment`
/// suffixes and blank lines are skipped.
pub fn text_to_genome(text: &str) -> Result<Vec<Instruction>, GenomeParseError> {
    let mut lines = text.lines();
    let found_code = lines.by_ref().any(|line| line.trim() == "CODE");
    if !found_code {
        return Err(GenomeParseError::MissingCodeSection);
    }

    let mut genome = Vec::new();
    for line in lines {
        let mnemonic = line.split(';').next().unwrap_or("").trim();
        if mnemonic.is_empty() {
            continue;
        }
        genome.push(Instruction::from_mnemonic(mnemonic)?);
    }
    Ok(genome)
}
