//! Execve mode: write an argv image into `.data` and call `execve`.
//!
//! x86 passes the arguments in `%ebx`, `%ecx`, `%edx` with number 11 in
//! `%eax`; x86-64 uses `%rdi`, `%rsi`, `%rdx` with number 59 in `%rax`.
//! The syscall number is built from the zero gadget and repeated
//! increments, so no literal ever has to hold small values with NUL bytes.

use crate::att;
use crate::combo::{Bound, Role, RoleBinding};
use crate::emit::{Emitter, Operand, Payload, Section, Sections};
use crate::error::{Error, Result};
use crate::layout::{Layout, Writer};
use crate::types::{Arch, Instruction};

/// `execve` syscall number.
pub fn syscall_number(arch: Arch) -> u64 {
    match arch {
        Arch::X86 => 11,
        Arch::X86_64 => 59,
    }
}

/// Build the execve chain for `argv` (`argv[0]` is the program path).
///
/// `syscall_args` supplies the `%rdi` / `%rsi` pops on x86-64 and is
/// ignored on x86.
pub fn synthesize<S: AsRef<[u8]>>(
    binding: &RoleBinding,
    syscall_args: Option<&RoleBinding>,
    argv: &[S],
    sections: Sections,
) -> Result<Payload> {
    if argv.is_empty() {
        return Err(Error::EmptyArgv);
    }
    let arch = binding.arch();
    let writer = Writer::from_binding(binding)?;

    let (path, vector, env) = match arch {
        Arch::X86 => (
            binding.require(Role::PopB)?,
            binding.require(Role::PopC)?,
            binding.require(Role::PopD)?,
        ),
        Arch::X86_64 => {
            let args = syscall_args.ok_or(Error::RoleUnbound(Role::PopDi))?;
            (
                args.require(Role::PopDi)?,
                args.require(Role::PopSi)?,
                binding.require(Role::PopD)?,
            )
        }
    };
    let zero = &binding.require(Role::Zero)?.insn;
    let increment = &binding.require(Role::Increment)?.insn;
    let syscall = &binding.require(Role::Syscall)?.insn;

    let mut em = Emitter::new(arch.word_size(), sections)?;
    let image = Layout::new(&writer, Section::Data).write_argv(&mut em, argv, 0)?;
    log::debug!(
        "argv image: vector at .data + {}, envp at .data + {}",
        image.argv,
        image.null
    );

    let mut loads = vec![
        (path, Operand::Section(Section::Data, 0)),
        (vector, Operand::Section(Section::Data, image.argv)),
        // the vector's own null entry doubles as an empty environment
        (env, Operand::Section(Section::Data, image.null)),
    ];
    // sysenter returns through %ebp; point it at scratch space past the image.
    if let Some(frame) = binding.get(Role::FramePop) {
        loads.push((frame, Operand::Section(Section::Data, image.span)));
    }

    let groups = group_loads(&loads);
    let order = schedule(&groups).ok_or_else(|| {
        Error::RoleConflict("every order of the argument pops clobbers a loaded register".into())
    })?;
    let loaded: Vec<&str> = groups.iter().flat_map(|g| g.loads.iter().copied()).collect();
    for insn in [zero, increment, syscall] {
        preserves(insn, &loaded)?;
    }

    for i in order {
        em.load(groups[i].insn, &groups[i].operands)?;
    }
    em.solo(zero)?;
    for _ in 0..syscall_number(arch) {
        em.solo(increment)?;
    }
    em.solo(syscall)?;

    let payload = em.finish();
    log::info!(
        "execve chain: {} argument(s), {} step(s), {} byte payload",
        argv.len(),
        payload.step_count(),
        payload.size()
    );
    Ok(payload)
}

/// Register loads that share one gadget invocation.
struct LoadGroup<'a> {
    insn: &'a Instruction,
    operands: Vec<(&'a str, Operand<'a>)>,
    loads: Vec<&'a str>,
    clobbers: Vec<&'a str>,
}

fn group_loads<'a>(loads: &[(&'a Bound, Operand<'a>)]) -> Vec<LoadGroup<'a>> {
    let mut groups: Vec<LoadGroup<'a>> = Vec::new();
    for &(bound, operand) in loads {
        let component = bound.component.as_str();
        let reg = att::pop_register(component);
        match groups.iter_mut().find(|g| g.insn.addr == bound.insn.addr) {
            Some(group) => {
                group.operands.push((component, operand));
                group.loads.extend(reg);
            }
            None => groups.push(LoadGroup {
                insn: &bound.insn,
                operands: vec![(component, operand)],
                loads: reg.into_iter().collect(),
                clobbers: Vec::new(),
            }),
        }
    }
    for group in &mut groups {
        group.clobbers = group
            .insn
            .components()
            .filter_map(att::pop_register)
            .filter(|r| !group.loads.contains(r))
            .collect();
    }
    groups
}

/// An order in which no invocation pads a register an earlier one loaded.
fn schedule(groups: &[LoadGroup<'_>]) -> Option<Vec<usize>> {
    fn place(groups: &[LoadGroup<'_>], order: &mut Vec<usize>) -> bool {
        if order.len() == groups.len() {
            return true;
        }
        for i in 0..groups.len() {
            if order.contains(&i) {
                continue;
            }
            let safe = order
                .iter()
                .all(|&j| groups[j].loads.iter().all(|r| !groups[i].clobbers.contains(r)));
            if !safe {
                continue;
            }
            order.push(i);
            if place(groups, order) {
                return true;
            }
            order.pop();
        }
        false
    }

    let mut order = Vec::with_capacity(groups.len());
    place(groups, &mut order).then_some(order)
}

fn preserves(insn: &Instruction, loaded: &[&str]) -> Result<()> {
    match insn.components().filter_map(att::pop_register).find(|r| loaded.contains(r)) {
        Some(reg) => Err(Error::RoleConflict(format!(
            "`{}` pops {} after the syscall arguments are loaded",
            insn.text, reg
        ))),
        None => Ok(()),
    }
}
