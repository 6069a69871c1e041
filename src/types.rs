use std::fmt;

use serde::{Deserialize, Serialize};

/// Target register model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// 32-bit x86: 4-byte words, `%eXx` registers.
    #[value(name = "x86")]
    X86,
    /// 64-bit x86-64: 8-byte words, `%rXx` registers.
    #[value(name = "x86-64", alias = "x86_64")]
    #[serde(alias = "x86-64")]
    X86_64,
}

impl Arch {
    /// Size of a stack word in bytes.
    pub fn word_size(self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 => 8,
        }
    }

    /// Prefix of the full-width general purpose registers (`e` or `r`).
    pub fn reg_prefix(self) -> char {
        match self {
            Arch::X86 => 'e',
            Arch::X86_64 => 'r',
        }
    }

    /// AT&T name of the full-width `?x` register, e.g. `%ebx` for `'b'`.
    pub fn reg(self, letter: char) -> String {
        format!("%{}{}x", self.reg_prefix(), letter)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => write!(f, "x86"),
            Arch::X86_64 => write!(f, "x86-64"),
        }
    }
}

/// Separator between the instructions of a compound gadget.
pub const INSN_SEPARATOR: char = ';';

/// One catalog record: a gadget address and its AT&T disassembly.
///
/// A compound gadget keeps every instruction reachable from `addr` up to
/// the control transfer, e.g. `pop %eax ; pop %ebx ; ret`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub addr: u64,
    pub text: String,
    pub arch: Arch,
}

impl Instruction {
    pub fn new(addr: u64, text: impl Into<String>, arch: Arch) -> Self {
        Self {
            addr,
            text: normalize_text(&text.into()),
            arch,
        }
    }

    /// The individual instructions of this gadget, trimmed.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.text
            .split(INSN_SEPARATOR)
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Number of instructions in the gadget.
    pub fn insn_count(&self) -> usize {
        self.components().count()
    }

    /// First component matching `pattern` (`?` matches any character).
    pub fn find_component(&self, pattern: &str) -> Option<&str> {
        self.components().find(|c| wildcard_eq(pattern, c))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0width$x}: {}", self.addr, self.text, width = self.arch.word_size() * 2)
    }
}

/// Wildcard marker inside mnemonic patterns.
pub const WILDCARD: char = '?';

/// Compare a pattern against one instruction text character by character.
/// A `?` in the pattern matches any single character.
pub fn wildcard_eq(pattern: &str, text: &str) -> bool {
    let mut p = pattern.chars();
    let mut t = text.chars();
    loop {
        match (p.next(), t.next()) {
            (None, None) => return true,
            (Some(pc), Some(tc)) if pc == WILDCARD || pc == tc => {}
            _ => return false,
        }
    }
}

/// Collapse whitespace runs and rejoin components with ` ; `.
pub fn normalize_text(text: &str) -> String {
    text.split(INSN_SEPARATOR)
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ; ")
}
