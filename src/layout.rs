//! Layout builders: write words, strings and pointer vectors into a
//! writable section one stack-driven store at a time.
//!
//! Every store is the same three-step pattern: pop the destination address
//! into the pointer register, pop (or zero) the value register, then run
//! the `mov %VAL,(%PTR)` gadget.

use crate::att;
use crate::combo::{Bound, Role, RoleBinding};
use crate::emit::{Emitter, Operand, Section};
use crate::error::{Error, Result};
use crate::types::Instruction;

/// The gadgets a memory writer needs, derived from a role binding.
#[derive(Debug, Clone)]
pub struct Writer {
    /// Pops the destination address into the pointer register.
    pub pop_target: Bound,
    /// Pops the value into the stored register.
    pub pop_data: Bound,
    /// Zeroes the stored register.
    pub zero_data: Instruction,
    /// `mov %VAL,(%PTR)`.
    pub transfer: Instruction,
}

impl Writer {
    /// Pick the writer gadgets out of `binding` according to the registers
    /// its store gadget uses.
    pub fn from_binding(binding: &RoleBinding) -> Result<Self> {
        let store = binding.require(Role::Store)?;
        let (data, pointer) = att::store_registers(&store.component).ok_or_else(|| {
            Error::RoleConflict(format!("`{}` is not a register store", store.component))
        })?;
        if data == pointer {
            return Err(Error::RoleConflict(format!(
                "`{}` stores a register through itself",
                store.component
            )));
        }

        let pop_role = |letter: char| {
            Role::pop(letter).ok_or_else(|| {
                Error::RoleConflict(format!("no pop role for register `{}`", letter))
            })
        };
        let pop_target = binding.require(pop_role(pointer)?)?.clone();
        let pop_data = binding.require(pop_role(data)?)?.clone();

        let zero = binding.require(Role::Zero)?;
        let zeroed = att::split_operands(&zero.component).and_then(|(_, _, dst)| att::reg_letter(dst));
        if zeroed != Some(data) {
            return Err(Error::RoleConflict(format!(
                "`{}` does not clear the stored register of `{}`",
                zero.component, store.component
            )));
        }

        // pointer, then value, then the store
        let ptr = binding.arch().reg(pointer);
        let val = binding.arch().reg(data);
        let (ptr, val) = (ptr.as_str(), val.as_str());
        check_live(&pop_target, &[], &[ptr])?;
        check_live(&pop_data, &[ptr], &[ptr, val])?;
        check_live(zero, &[ptr], &[ptr, val])?;
        check_live(store, &[ptr, val], &[])?;

        log::debug!(
            "writer: pointer {}, value {} via {:#x}",
            ptr,
            val,
            store.insn.addr
        );
        Ok(Self {
            pop_target,
            pop_data,
            zero_data: zero.insn.clone(),
            transfer: store.insn.clone(),
        })
    }
}

/// Fails when a pop in `bound`'s gadget, other than the role component
/// itself, hits a live register. `before` is live up to the role component,
/// `after` from it on.
pub(crate) fn check_live(bound: &Bound, before: &[&str], after: &[&str]) -> Result<()> {
    let mut past = false;
    for component in bound.insn.components() {
        if !past && component == bound.component {
            past = true;
            continue;
        }
        let live = if past { after } else { before };
        if let Some(reg) = att::pop_register(component).filter(|r| live.contains(r)) {
            return Err(Error::RoleConflict(format!(
                "`{}` pops {} while it holds a loaded value",
                bound.insn.text, reg
            )));
        }
    }
    Ok(())
}

/// One entry of a pointer vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Address of `section + offset`.
    Offset(u64),
    /// The terminating null pointer.
    Null,
}

/// Where an argv/envp image ended up, as section offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgvLayout {
    /// Start of the pointer vector (right after the strings).
    pub argv: u64,
    /// The vector's terminating null entry.
    pub null: u64,
    /// Right after the pointer vector.
    pub envp: u64,
    /// Bytes consumed from the starting offset.
    pub span: u64,
}

/// Memory writer bound to one target section.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a> {
    writer: &'a Writer,
    section: Section,
}

impl<'a> Layout<'a> {
    pub fn new(writer: &'a Writer, section: Section) -> Self {
        Self { writer, section }
    }

    /// Load the pointer register with `value`.
    pub fn write_value(&self, em: &mut Emitter, value: Operand<'_>) -> Result<()> {
        em.gadget(&self.writer.pop_target, value)
    }

    fn store(&self, em: &mut Emitter, offset: u64, value: Option<Operand<'_>>) -> Result<()> {
        self.write_value(em, Operand::Section(self.section, offset))?;
        match value {
            Some(v) => em.gadget(&self.writer.pop_data, v)?,
            None => em.solo(&self.writer.zero_data)?,
        }
        em.solo(&self.writer.transfer)
    }

    /// Write `s` followed by a NUL terminator at `section + offset`.
    ///
    /// The string goes out in word-sized chunks (the last one filled with
    /// `A`), then a zero word lands at `offset + len`, overwriting the
    /// filler with the terminator.
    pub fn write_string(&self, em: &mut Emitter, s: &[u8], offset: u64) -> Result<()> {
        if s.contains(&0) {
            return Err(Error::InteriorNul { len: s.len() });
        }
        let width = em.width();
        for (i, chunk) in s.chunks(width).enumerate() {
            let at = offset + (i * width) as u64;
            self.store(em, at, Some(Operand::Bytes(chunk)))?;
        }
        self.store(em, offset + s.len() as u64, None)
    }

    /// Write a null-terminated pointer vector at `section + offset`.
    ///
    /// Stops after the first [`Slot::Null`]; a vector without one gets it
    /// appended. Returns the number of entries written.
    pub fn write_vector(&self, em: &mut Emitter, slots: &[Slot], offset: u64) -> Result<usize> {
        let width = em.width() as u64;
        let mut written = 0;
        for slot in slots.iter().copied().chain(std::iter::once(Slot::Null)) {
            let at = offset + width * written as u64;
            match slot {
                Slot::Offset(target) => {
                    self.store(em, at, Some(Operand::Section(self.section, target)))?
                }
                Slot::Null => self.store(em, at, None)?,
            }
            written += 1;
            if slot == Slot::Null {
                break;
            }
        }
        Ok(written)
    }

    /// Write a process-startup style image at `section + offset`: every
    /// string with its terminator, then the null-terminated vector of their
    /// addresses.
    pub fn write_argv<S: AsRef<[u8]>>(&self, em: &mut Emitter, args: &[S], offset: u64) -> Result<ArgvLayout> {
        let mut cursor = offset;
        let mut vector = Vec::with_capacity(args.len() + 1);
        for arg in args {
            let arg = arg.as_ref();
            self.write_string(em, arg, cursor)?;
            vector.push(Slot::Offset(cursor));
            cursor += arg.len() as u64 + 1;
        }
        vector.push(Slot::Null);

        let argv = cursor;
        self.write_vector(em, &vector, argv)?;

        let table = (args.len() as u64 + 1) * em.width() as u64;
        Ok(ArgvLayout {
            argv,
            null: argv + args.len() as u64 * em.width() as u64,
            envp: argv + table,
            span: (argv - offset) + table,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::catalog::Catalog;
    use crate::combo::{compile, Template};
    use crate::emit::{Payload, Sections};
    use crate::types::Arch;

    const DATA: u64 = 0x080e_c060;

    fn catalog() -> Catalog {
        Catalog::new(Arch::X86)
            .with(0x0806_0001, "int $0x80")
            .with(0x0806_0002, "inc %eax ; ret")
            .with(0x0806_0003, "xor %eax,%eax ; ret")
            .with(0x0806_0004, "mov %eax,(%edx) ; pop %ebx ; ret")
            .with(0x0806_0005, "pop %eax ; ret")
            .with(0x0806_0006, "pop %ebx ; ret")
            .with(0x0806_0007, "pop %ecx ; ret")
            .with(0x0806_0008, "pop %esi ; pop %edx ; pop %edi ; ret")
    }

    fn writer() -> Writer {
        let binding = compile(&Template::execve(Arch::X86), &catalog()).unwrap();
        Writer::from_binding(&binding).unwrap()
    }

    fn emitter() -> Emitter {
        Emitter::new(4, Sections { data: DATA, got: 0x080e_bff4 }).unwrap()
    }

    /// Run the chain's stores against a byte map.
    fn replay(payload: &Payload, writer: &Writer) -> BTreeMap<u64, u8> {
        let mut mem = BTreeMap::new();
        let mut ptr = 0u64;
        let mut data = vec![0u8; payload.width];
        for step in &payload.steps {
            let operand = step
                .lines
                .iter()
                .skip(1)
                .find(|l| l.comment() != Some("padding"));
            match step.gadget() {
                Some(a) if a == writer.pop_target.insn.addr => {
                    ptr = operand.and_then(|l| l.value()).unwrap();
                }
                Some(a) if a == writer.pop_data.insn.addr => {
                    data = operand.unwrap().to_bytes();
                }
                Some(a) if a == writer.zero_data.addr => data = vec![0; payload.width],
                Some(a) if a == writer.transfer.addr => {
                    for (i, b) in data.iter().enumerate() {
                        mem.insert(ptr + i as u64, *b);
                    }
                }
                other => panic!("unexpected step {:?}", other),
            }
        }
        mem
    }

    fn read_cstr(mem: &BTreeMap<u64, u8>, addr: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut a = addr;
        while let Some(&b) = mem.get(&a) {
            if b == 0 {
                return out;
            }
            out.push(b);
            a += 1;
        }
        panic!("unterminated string at {:#x}", addr);
    }

    #[test]
    fn writer_roles_follow_store_registers() {
        let w = writer();
        assert_eq!(w.pop_target.component, "pop %edx");
        assert_eq!(w.pop_target.insn.addr, 0x0806_0008);
        assert_eq!(w.pop_data.component, "pop %eax");
        assert_eq!(w.zero_data.addr, 0x0806_0003);
        assert_eq!(w.transfer.addr, 0x0806_0004);
    }

    #[test]
    fn writer_rejects_self_pointer() {
        let catalog = Catalog::new(Arch::X86)
            .with(0x1, "int $0x80")
            .with(0x2, "inc %eax ; ret")
            .with(0x3, "xor %eax,%eax ; ret")
            .with(0x4, "mov %eax,(%eax) ; ret")
            .with(0x5, "pop %eax ; ret")
            .with(0x6, "pop %ebx ; ret")
            .with(0x7, "pop %ecx ; ret")
            .with(0x8, "pop %edx ; ret");
        let binding = compile(&Template::execve(Arch::X86), &catalog).unwrap();
        assert!(matches!(
            Writer::from_binding(&binding),
            Err(Error::RoleConflict(_))
        ));
    }

    #[test]
    fn value_write_pads_pointer_pop() {
        let w = writer();
        let mut em = emitter();
        Layout::new(&w, Section::Data)
            .write_value(&mut em, Operand::Literal(0x0804_8000, "source"))
            .unwrap();
        let payload = em.finish();
        // gadget, 1 pad (pop %esi), value, 1 pad (pop %edi)
        let lines: Vec<_> = payload.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2].value(), Some(0x0804_8000));
    }

    #[test]
    fn string_round_trip() {
        let w = writer();
        for s in ["", "a", "sh", "/bin/sh", "/bin//sh", "-c"] {
            let mut em = emitter();
            Layout::new(&w, Section::Data)
                .write_string(&mut em, s.as_bytes(), 0x10)
                .unwrap();
            let payload = em.finish();
            let mem = replay(&payload, &w);
            assert_eq!(read_cstr(&mem, DATA + 0x10), s.as_bytes(), "string {:?}", s);
        }
    }

    #[test]
    fn string_chunk_count() {
        let w = writer();
        let mut em = emitter();
        Layout::new(&w, Section::Data)
            .write_string(&mut em, b"/bin/sh", 0)
            .unwrap();
        let payload = em.finish();
        // two data chunks and the terminator, three steps each
        assert_eq!(payload.step_count(), 9);
        let chunks: Vec<_> = payload
            .lines()
            .filter(|l| l.value().is_none() && l.comment().is_none())
            .map(|l| l.to_bytes())
            .collect();
        assert_eq!(chunks, vec![b"/bin".to_vec(), b"/shA".to_vec()]);
    }

    #[test]
    fn string_rejects_nul() {
        let w = writer();
        let mut em = emitter();
        assert!(matches!(
            Layout::new(&w, Section::Data).write_string(&mut em, b"a\0b", 0),
            Err(Error::InteriorNul { len: 3 })
        ));
        assert_eq!(em.finish().step_count(), 0);
    }

    fn x86_binding(extra: &[(u64, &str)]) -> RoleBinding {
        let mut catalog = Catalog::new(Arch::X86)
            .with(0x1, "int $0x80")
            .with(0x2, "inc %eax ; ret")
            .with(0x4, "mov %eax,(%edx) ; ret")
            .with(0x6, "pop %ebx ; ret")
            .with(0x7, "pop %ecx ; ret");
        for &(addr, text) in extra {
            catalog = catalog.with(addr, text);
        }
        compile(&Template::execve(Arch::X86), &catalog).unwrap()
    }

    #[test]
    fn writer_rejects_value_pop_clobbering_pointer() {
        let binding = x86_binding(&[
            (0x3, "xor %eax,%eax ; ret"),
            (0x5, "pop %eax ; pop %edx ; ret"),
            (0x8, "pop %edx ; ret"),
        ]);
        assert!(matches!(
            Writer::from_binding(&binding),
            Err(Error::RoleConflict(_))
        ));
    }

    #[test]
    fn writer_rejects_zero_clobbering_pointer() {
        let binding = x86_binding(&[
            (0x3, "xor %eax,%eax ; pop %edx ; ret"),
            (0x5, "pop %eax ; ret"),
            (0x8, "pop %edx ; ret"),
        ]);
        assert!(matches!(
            Writer::from_binding(&binding),
            Err(Error::RoleConflict(_))
        ));
    }

    #[test]
    fn writer_allows_pops_that_precede_the_load() {
        // the stray %eax pop runs before the pointer is loaded
        let binding = x86_binding(&[
            (0x3, "xor %eax,%eax ; ret"),
            (0x5, "pop %eax ; ret"),
            (0x8, "pop %eax ; pop %edx ; pop %ebx ; ret"),
        ]);
        let w = Writer::from_binding(&binding).unwrap();
        assert_eq!(w.pop_target.insn.addr, 0x8);
    }

    #[test]
    fn vector_stops_at_null() {
        let w = writer();
        let mut em = emitter();
        let slots = [Slot::Offset(0x100), Slot::Null, Slot::Offset(0x200)];
        let written = Layout::new(&w, Section::Data)
            .write_vector(&mut em, &slots, 0x40)
            .unwrap();
        assert_eq!(written, 2);
        let payload = em.finish();
        assert_eq!(payload.step_count(), 6);
        assert!(!payload.contains_word(DATA + 0x200));
    }

    #[test]
    fn vector_gets_terminator_appended() {
        let w = writer();
        let mut em = emitter();
        let written = Layout::new(&w, Section::Data)
            .write_vector(&mut em, &[Slot::Offset(0x100)], 0x40)
            .unwrap();
        assert_eq!(written, 2);
        let mem = replay(&em.finish(), &w);
        let entry = |i: u64| {
            let bytes: Vec<u8> = (0..4).map(|b| mem[&(DATA + 0x40 + i * 4 + b)]).collect();
            u32::from_le_bytes(bytes.try_into().unwrap())
        };
        assert_eq!(entry(0) as u64, DATA + 0x100);
        assert_eq!(entry(1), 0);
    }

    #[test]
    fn argv_image_layout() {
        let w = writer();
        let mut em = emitter();
        let layout = Layout::new(&w, Section::Data)
            .write_argv(&mut em, &["a", "bb"], 0x100)
            .unwrap();
        assert_eq!(layout.argv, 0x105);
        assert_eq!(layout.null, 0x105 + 2 * 4);
        assert_eq!(layout.envp, 0x105 + 3 * 4);
        assert_eq!(layout.span, 5 + 3 * 4);

        let mem = replay(&em.finish(), &w);
        assert_eq!(read_cstr(&mem, DATA + 0x100), b"a");
        assert_eq!(read_cstr(&mem, DATA + 0x102), b"bb");
        let word = |addr: u64| {
            let bytes: Vec<u8> = (0..4).map(|b| mem[&(addr + b)]).collect();
            u32::from_le_bytes(bytes.try_into().unwrap()) as u64
        };
        let vector = DATA + layout.argv;
        assert_eq!(word(vector), DATA + 0x100);
        assert_eq!(word(vector + 4), DATA + 0x102);
        assert_eq!(word(vector + 8), 0);
    }
}
