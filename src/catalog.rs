//! Instruction catalog: the gadgets available in one target binary.
//!
//! The catalog is produced by an external gadget finder. This module keeps
//! the records in their listing order and answers exact-text lookups, where
//! a pattern must equal one whole instruction of a (possibly compound)
//! gadget and `?` stands for any single character.

use std::path::Path;

use crate::error::{Error, Result};
use crate::padding;
use crate::types::{Arch, Instruction};

/// Lookup interface the role-binding compiler consumes.
pub trait InstructionCatalog {
    /// Architecture every record belongs to.
    fn arch(&self) -> Arch;

    /// Find a gadget containing an instruction equal to `pattern`.
    fn find_exact(&self, pattern: &str) -> Option<&Instruction>;
}

/// In-memory catalog backed by a vector of records.
#[derive(Debug, Clone)]
pub struct Catalog {
    arch: Arch,
    entries: Vec<Instruction>,
}

impl Catalog {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            entries: Vec::new(),
        }
    }

    /// Append one gadget.
    pub fn push(&mut self, addr: u64, text: &str) {
        self.entries.push(Instruction::new(addr, text, self.arch));
    }

    /// Builder-style variant of [`Catalog::push`].
    pub fn with(mut self, addr: u64, text: &str) -> Self {
        self.push(addr, text);
        self
    }

    /// Parse a gadget listing.
    ///
    /// One gadget per line, `0xADDR: insn ; insn ; ret`. Blank lines and
    /// lines starting with `#` are skipped, as are the banner lines some
    /// gadget finders print (anything not starting with `0x`).
    pub fn from_listing(arch: Arch, listing: &str) -> Result<Self> {
        let mut catalog = Self::new(arch);
        for (lineno, line) in listing.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || !line.starts_with("0x") {
                continue;
            }
            let (addr, text) = line.split_once(':').ok_or_else(|| {
                Error::Catalog(format!("line {}: missing ':' after address", lineno + 1))
            })?;
            let addr = u64::from_str_radix(addr.trim().trim_start_matches("0x"), 16)
                .map_err(|e| Error::Catalog(format!("line {}: bad address: {}", lineno + 1, e)))?;
            let text = text.trim();
            if text.is_empty() {
                return Err(Error::Catalog(format!("line {}: empty gadget", lineno + 1)));
            }
            catalog.push(addr, text);
        }
        log::debug!("parsed {} gadget(s) for {}", catalog.len(), arch);
        Ok(catalog)
    }

    /// Load a gadget listing from disk.
    pub fn load(path: &Path, arch: Arch) -> Result<Self> {
        let listing = std::fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("read '{}': {}", path.display(), e)))?;
        Self::from_listing(arch, &listing)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl InstructionCatalog for Catalog {
    fn arch(&self) -> Arch {
        self.arch
    }

    /// Among all matching gadgets prefer the one with the fewest pops, then
    /// the fewest instructions (fewer side effects, less padding). Ties keep
    /// listing order.
    fn find_exact(&self, pattern: &str) -> Option<&Instruction> {
        self.entries
            .iter()
            .filter(|g| g.find_component(pattern).is_some())
            .min_by_key(|g| (padding::count(&g.text, padding::Side::Total), g.insn_count()))
    }
}
