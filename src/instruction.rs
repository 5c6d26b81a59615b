//! The 32-instruction opcode set.
//!
//! Each byte stored in the soup carries an opcode in its low 5 bits; the
//! upper 3 bits are ignored on read and always written zero. `Instruction`
//! is the decoded view of that opcode, with mnemonic conversions for the
//! genome text format (§6) mirroring the teacher's `from_char`/`to_char`
//! pair.

use crate::error::GenomeParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    Nop0 = 0,
    Nop1 = 1,
    Not0 = 2,
    Shl = 3,
    Zero = 4,
    Ifz = 5,
    SubCab = 6,
    SubAac = 7,
    IncA = 8,
    IncB = 9,
    DecC = 10,
    IncC = 11,
    PushA = 12,
    PushB = 13,
    PushC = 14,
    PushD = 15,
    PopA = 16,
    PopB = 17,
    PopC = 18,
    PopD = 19,
    Jmpo = 20,
    Jmpb = 21,
    Call = 22,
    Ret = 23,
    MovDc = 24,
    MovBa = 25,
    Movii = 26,
    Adro = 27,
    Adrb = 28,
    Adrf = 29,
    Mal = 30,
    Divide = 31,
}

pub const OPCODE_COUNT: u8 = 32;

impl Instruction {
    /// Decodes a raw soup byte, masking off the unused upper bits.
    pub fn from_opcode(byte: u8) -> Instruction {
        match byte & 0x1F {
            0 => Instruction::Nop0,
            1 => Instruction::Nop1,
            2 => Instruction::Not0,
            3 => Instruction::Shl,
            4 => Instruction::Zero,
            5 => Instruction::Ifz,
            6 => Instruction::SubCab,
            7 => Instruction::SubAac,
            8 => Instruction::IncA,
            9 => Instruction::IncB,
            10 => Instruction::DecC,
            11 => Instruction::IncC,
            12 => Instruction::PushA,
            13 => Instruction::PushB,
            14 => Instruction::PushC,
            15 => Instruction::PushD,
            16 => Instruction::PopA,
            17 => Instruction::PopB,
            18 => Instruction::PopC,
            19 => Instruction::PopD,
            20 => Instruction::Jmpo,
            21 => Instruction::Jmpb,
            22 => Instruction::Call,
            23 => Instruction::Ret,
            24 => Instruction::MovDc,
            25 => Instruction::MovBa,
            26 => Instruction::Movii,
            27 => Instruction::Adro,
            28 => Instruction::Adrb,
            29 => Instruction::Adrf,
            30 => Instruction::Mal,
            _ => Instruction::Divide,
        }
    }

    pub fn to_opcode(self) -> u8 {
        self as u8
    }

    pub fn is_nop(self) -> bool {
        matches!(self, Instruction::Nop0 | Instruction::Nop1)
    }

    /// `nop0` and `nop1` are complements of each other; every other
    /// instruction has no complement and is not a template bit.
    pub fn complement(self) -> Option<Instruction> {
        match self {
            Instruction::Nop0 => Some(Instruction::Nop1),
            Instruction::Nop1 => Some(Instruction::Nop0),
            _ => None,
        }
    }

    /// True for instructions that consume a template immediately following
    /// them in the soup (the template itself is never separately executed).
    pub fn uses_template(self) -> bool {
        matches!(
            self,
            Instruction::Jmpo
                | Instruction::Jmpb
                | Instruction::Call
                | Instruction::Adro
                | Instruction::Adrb
                | Instruction::Adrf
        )
    }

    /// True for every instruction whose handler writes a register, per the
    /// resolved flaw-eligibility rule (§4.5).
    pub fn writes_register(self) -> bool {
        matches!(
            self,
            Instruction::Not0
                | Instruction::Shl
                | Instruction::Zero
                | Instruction::SubCab
                | Instruction::SubAac
                | Instruction::IncA
                | Instruction::IncB
                | Instruction::DecC
                | Instruction::IncC
                | Instruction::PopA
                | Instruction::PopB
                | Instruction::PopC
                | Instruction::PopD
                | Instruction::MovDc
                | Instruction::MovBa
                | Instruction::Adro
                | Instruction::Adrb
                | Instruction::Adrf
                | Instruction::Mal
        )
    }

    pub fn to_mnemonic(self) -> &'static str {
        match self {
            Instruction::Nop0 => "nop0",
            Instruction::Nop1 => "nop1",
            Instruction::Not0 => "not0",
            Instruction::Shl => "shl",
            Instruction::Zero => "zero",
            Instruction::Ifz => "ifz",
            Instruction::SubCab => "subcab",
            Instruction::SubAac => "subaac",
            Instruction::IncA => "inca",
            Instruction::IncB => "incb",
            Instruction::DecC => "decc",
            Instruction::IncC => "incc",
            Instruction::PushA => "pusha",
            Instruction::PushB => "pushb",
            Instruction::PushC => "pushc",
            Instruction::PushD => "pushd",
            Instruction::PopA => "popa",
            Instruction::PopB => "popb",
            Instruction::PopC => "popc",
            Instruction::PopD => "popd",
            Instruction::Jmpo => "jmpo",
            Instruction::Jmpb => "jmpb",
            Instruction::Call => "call",
            Instruction::Ret => "ret",
            Instruction::MovDc => "movdc",
            Instruction::MovBa => "movba",
            Instruction::Movii => "movii",
            Instruction::Adro => "adro",
            Instruction::Adrb => "adrb",
            Instruction::Adrf => "adrf",
            Instruction::Mal => "mal",
            Instruction::Divide => "divide",
        }
    }

    pub fn from_mnemonic(s: &str) -> Result<Instruction, GenomeParseError> {
        let lower = s.trim().to_ascii_lowercase();
        let instr = match lower.as_str() {
            "nop0" => Instruction::Nop0,
            "nop1" => Instruction::Nop1,
            "not0" => Instruction::Not0,
            "shl" => Instruction::Shl,
            "zero" => Instruction::Zero,
            "ifz" => Instruction::Ifz,
            "subcab" => Instruction::SubCab,
            "subaac" => Instruction::SubAac,
            "inca" => Instruction::IncA,
            "incb" => Instruction::IncB,
            "decc" => Instruction::DecC,
            "incc" => Instruction::IncC,
            "pusha" => Instruction::PushA,
            "pushb" => Instruction::PushB,
            "pushc" => Instruction::PushC,
            "pushd" => Instruction::PushD,
            "popa" => Instruction::PopA,
            "popb" => Instruction::PopB,
            "popc" => Instruction::PopC,
            "popd" => Instruction::PopD,
            "jmpo" => Instruction::Jmpo,
            "jmpb" => Instruction::Jmpb,
            "call" => Instruction::Call,
            "ret" => Instruction::Ret,
            "movdc" => Instruction::MovDc,
            "movba" => Instruction::MovBa,
            "movii" => Instruction::Movii,
            "adro" => Instruction::Adro,
            "adrb" => Instruction::Adrb,
            "adrf" => Instruction::Adrf,
            "mal" => Instruction::Mal,
            "divide" => Instruction::Divide,
            _ => return Err(GenomeParseError::InvalidMnemonic(s.to_string())),
        };
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for op in 0..OPCODE_COUNT {
            let instr = Instruction::from_opcode(op);
            assert_eq!(instr.to_opcode(), op);
        }
    }

    #[test]
    fn upper_bits_ignored_on_decode() {
        assert_eq!(
            Instruction::from_opcode(0b1110_0101),
            Instruction::from_opcode(0b0000_0101)
        );
    }

    #[test]
    fn mnemonic_roundtrip() {
        for op in 0..OPCODE_COUNT {
            let instr = Instruction::from_opcode(op);
            let back = Instruction::from_mnemonic(instr.to_mnemonic()).unwrap();
            assert_eq!(instr, back);
        }
    }

    #[test]
    fn mnemonic_case_insensitive() {
        assert_eq!(Instruction::from_mnemonic("DIVIDE").unwrap(), Instruction::Divide);
        assert_eq!(Instruction::from_mnemonic(" MovBA ").unwrap(), Instruction::MovBa);
    }

    #[test]
    fn unknown_mnemonic_errors() {
        assert_eq!(
            Instruction::from_mnemonic("frobnicate"),
            Err(GenomeParseError::InvalidMnemonic("frobnicate".to_string()))
        );
    }

    #[test]
    fn nops_are_complements() {
        assert_eq!(Instruction::Nop0.complement(), Some(Instruction::Nop1));
        assert_eq!(Instruction::Nop1.complement(), Some(Instruction::Nop0));
        assert_eq!(Instruction::Mal.complement(), None);
    }
}
