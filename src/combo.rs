//! Gadget combinator: binds abstract roles to concrete gadgets.
//!
//! A [`Template`] is a postfix boolean expression over mnemonic patterns.
//! Each pattern is tagged with the [`Role`] it fills. `AND` needs both
//! operands, `OR` takes the first operand that can be satisfied. Evaluating
//! a template against an [`InstructionCatalog`] yields a [`RoleBinding`] or
//! fails as a whole.
//!
//! Patterns may contain register wildcards. A bare `?` matches any single
//! character. `?N` (N a digit) is a named wildcard: the first match records
//! the captured register letter in slot N, and every later pattern that
//! names slot N has the letter substituted before lookup. This is how a
//! `pop` / `mov` / `mov` chain is kept on one register.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::att;
use crate::catalog::InstructionCatalog;
use crate::error::{Error, Result};
use crate::types::{Arch, Instruction, WILDCARD};

/// Abstract purpose a gadget fills in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// `int $0x80`, `sysenter` or `syscall`.
    Syscall,
    /// `pop %ebp`, required alongside `sysenter`.
    FramePop,
    /// Increment of the accumulator (`inc %eax` and narrower forms).
    Increment,
    /// Zero the accumulator (`xor %eax,%eax`).
    Zero,
    /// Store a register through a pointer register.
    Store,
    PopA,
    PopB,
    PopC,
    PopD,
    PopSi,
    PopDi,
    /// Load the pointer register (import mode).
    PopPointer,
    /// Read through the pointer register (import mode).
    Load,
    /// Copy the loaded value into the stored register (import mode).
    Normalize,
}

impl Role {
    /// Pop role for the `?x` register with the given letter.
    pub fn pop(letter: char) -> Option<Role> {
        match letter {
            'a' => Some(Role::PopA),
            'b' => Some(Role::PopB),
            'c' => Some(Role::PopC),
            'd' => Some(Role::PopD),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Syscall => "syscall",
            Role::FramePop => "pop-frame",
            Role::Increment => "increment",
            Role::Zero => "zero",
            Role::Store => "store",
            Role::PopA => "pop-a",
            Role::PopB => "pop-b",
            Role::PopC => "pop-c",
            Role::PopD => "pop-d",
            Role::PopSi => "pop-si",
            Role::PopDi => "pop-di",
            Role::PopPointer => "pop-pointer",
            Role::Load => "load",
            Role::Normalize => "normalize",
        };
        write!(f, "{}", s)
    }
}

/// One element of a postfix template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternElement {
    /// A mnemonic pattern and the role it binds.
    Insn { pattern: String, role: Role },
    /// Both preceding operands must match.
    And,
    /// The first preceding operand that matches wins.
    Or,
}

/// A postfix AND/OR expression over mnemonic patterns.
///
/// Templates are plain owned values: every compilation starts from a fresh
/// instance and nothing is mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    elements: Vec<PatternElement>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a mnemonic pattern.
    pub fn insn(mut self, pattern: impl Into<String>, role: Role) -> Self {
        self.elements.push(PatternElement::Insn {
            pattern: pattern.into(),
            role,
        });
        self
    }

    /// Combine the two previous operands with AND.
    pub fn and(mut self) -> Self {
        self.elements.push(PatternElement::And);
        self
    }

    /// Combine the two previous operands with OR.
    pub fn or(mut self) -> Self {
        self.elements.push(PatternElement::Or);
        self
    }

    pub fn elements(&self) -> &[PatternElement] {
        &self.elements
    }

    /// Roles needed to write memory and issue `execve`.
    pub fn execve(arch: Arch) -> Self {
        match arch {
            Arch::X86 => Template::new()
                .insn("int $0x80", Role::Syscall)
                .insn("sysenter", Role::Syscall)
                .insn("pop %ebp", Role::FramePop)
                .and()
                .or()
                .insn("inc %eax", Role::Increment)
                .insn("inc %ax", Role::Increment)
                .or()
                .insn("inc %al", Role::Increment)
                .or()
                .and()
                .insn("xor %eax,%eax", Role::Zero)
                .and()
                .insn("mov %eax,(%e?2x)", Role::Store)
                .and()
                .insn("pop %eax", Role::PopA)
                .and()
                .insn("pop %ebx", Role::PopB)
                .and()
                .insn("pop %ecx", Role::PopC)
                .and()
                .insn("pop %edx", Role::PopD)
                .and(),
            Arch::X86_64 => Template::new()
                .insn("xor %rax,%rax", Role::Zero)
                .insn("mov %rax,(%r?2x)", Role::Store)
                .and()
                .insn("pop %rax", Role::PopA)
                .and()
                .insn("pop %rbx", Role::PopB)
                .and()
                .insn("pop %rcx", Role::PopC)
                .and()
                .insn("pop %rdx", Role::PopD)
                .and()
                .insn("inc %rax", Role::Increment)
                .insn("inc %eax", Role::Increment)
                .or()
                .insn("inc %ax", Role::Increment)
                .or()
                .insn("inc %al", Role::Increment)
                .or()
                .and()
                .insn("syscall", Role::Syscall)
                .and(),
        }
    }

    /// Extra argument registers the x86-64 syscall convention needs.
    pub fn syscall_args(arch: Arch) -> Option<Self> {
        match arch {
            Arch::X86 => None,
            Arch::X86_64 => Some(
                Template::new()
                    .insn("pop %rdi", Role::PopDi)
                    .insn("pop %rsi", Role::PopSi)
                    .and(),
            ),
        }
    }

    /// Roles needed to copy bytes from code into a writable section.
    ///
    /// Slot 1 is the stored register, slot 2 the pointer register and slot
    /// 3 the register the dereference lands in.
    pub fn import(arch: Arch) -> Self {
        let p = arch.reg_prefix();
        Template::new()
            .insn(format!("mov %{p}?1x,(%{p}?2x)"), Role::Store)
            .insn(format!("pop %{p}?2x"), Role::PopPointer)
            .and()
            .insn(format!("mov (%{p}?2x),%{p}?3x"), Role::Load)
            .and()
            .insn(format!("mov %{p}?3x,%{p}?1x"), Role::Normalize)
            .and()
    }

    fn to_expr(&self) -> Result<Expr> {
        let mut stack: Vec<Expr> = Vec::new();
        for (i, element) in self.elements.iter().enumerate() {
            match element {
                PatternElement::Insn { pattern, role } => stack.push(Expr::Insn {
                    pattern: pattern.clone(),
                    role: *role,
                }),
                PatternElement::And | PatternElement::Or => {
                    let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
                        return Err(Error::Template(format!(
                            "combinator at element {} needs two operands",
                            i
                        )));
                    };
                    let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
                    stack.push(match element {
                        PatternElement::And => Expr::And(lhs, rhs),
                        _ => Expr::Or(lhs, rhs),
                    });
                }
            }
        }
        let expr = stack
            .pop()
            .ok_or_else(|| Error::Template("empty template".into()))?;
        if !stack.is_empty() {
            return Err(Error::Template(format!(
                "{} operand(s) left without a combinator",
                stack.len()
            )));
        }
        Ok(expr)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Insn { pattern: String, role: Role },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A role filled by a catalog gadget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    /// The whole (possibly compound) gadget.
    pub insn: Instruction,
    /// The instruction inside the gadget that fills the role.
    pub component: String,
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct RoleBinding {
    arch: Arch,
    roles: BTreeMap<Role, Bound>,
    degenerate: BTreeSet<Role>,
    registers: BTreeMap<u8, char>,
}

impl RoleBinding {
    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn get(&self, role: Role) -> Option<&Bound> {
        self.roles.get(&role)
    }

    /// The gadget for `role`, or [`Error::RoleUnbound`].
    pub fn require(&self, role: Role) -> Result<&Bound> {
        self.get(role).ok_or(Error::RoleUnbound(role))
    }

    /// Whether `role` resolved to a self copy and was dropped.
    pub fn is_degenerate(&self, role: Role) -> bool {
        self.degenerate.contains(&role)
    }

    /// Register letter captured by named wildcard `slot`.
    pub fn register(&self, slot: u8) -> Option<char> {
        self.registers.get(&slot).copied()
    }

    /// Bound roles in role order.
    pub fn iter(&self) -> impl Iterator<Item = (Role, &Bound)> {
        self.roles.iter().map(|(r, b)| (*r, b))
    }

    /// Roles dropped as self copies.
    pub fn degenerate(&self) -> impl Iterator<Item = Role> + '_ {
        self.degenerate.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    roles: BTreeMap<Role, Bound>,
    degenerate: BTreeSet<Role>,
    registers: BTreeMap<u8, char>,
}

struct Compiler<'a, C: ?Sized> {
    catalog: &'a C,
    state: State,
    failed: Option<String>,
}

impl<'a, C: InstructionCatalog + ?Sized> Compiler<'a, C> {
    fn eval(&mut self, expr: &Expr) -> bool {
        match expr {
            Expr::Insn { pattern, role } => self.resolve(pattern, *role),
            Expr::And(lhs, rhs) => self.eval(lhs) && self.eval(rhs),
            Expr::Or(lhs, rhs) => {
                let saved = self.state.clone();
                if self.eval(lhs) {
                    return true;
                }
                self.state = saved;
                self.eval(rhs)
            }
        }
    }

    fn resolve(&mut self, pattern: &str, role: Role) -> bool {
        let (concrete, holes) = substitute(pattern, &self.state.registers);

        if holes.is_empty() && att::is_self_transfer(&concrete) {
            log::warn!("`{}` copies a register onto itself, dropping role {}", concrete, role);
            self.state.degenerate.insert(role);
            return true;
        }

        let found = self
            .catalog
            .find_exact(&concrete)
            .and_then(|insn| insn.find_component(&concrete).map(|c| (insn, c)));
        let Some((insn, component)) = found else {
            log::debug!("no gadget for `{}` ({})", concrete, role);
            self.failed = Some(concrete);
            return false;
        };

        for (slot, letter) in holes.iter().zip(capture(&concrete, component)) {
            let Some(slot) = slot else { continue };
            match self.state.registers.get(slot) {
                Some(&prev) if prev != letter => {
                    self.failed = Some(concrete);
                    return false;
                }
                Some(_) => {}
                None => {
                    self.state.registers.insert(*slot, letter);
                }
            }
        }

        log::debug!("{} -> {:#x}: {}", role, insn.addr, insn.text);
        self.state.roles.insert(
            role,
            Bound {
                insn: insn.clone(),
                component: component.to_string(),
            },
        );
        true
    }
}

/// Evaluate `template` against `catalog`.
///
/// Either every required pattern is found and a complete binding is
/// returned, or [`Error::PatternNotFound`] names the pattern that failed.
pub fn compile<C: InstructionCatalog + ?Sized>(template: &Template, catalog: &C) -> Result<RoleBinding> {
    let expr = template.to_expr()?;
    let mut compiler = Compiler {
        catalog,
        state: State::default(),
        failed: None,
    };

    if !compiler.eval(&expr) {
        return Err(Error::PatternNotFound {
            pattern: compiler.failed.unwrap_or_default(),
        });
    }

    let State {
        roles,
        degenerate,
        registers,
    } = compiler.state;
    log::info!(
        "bound {} role(s) for {} ({} dropped)",
        roles.len(),
        catalog.arch(),
        degenerate.len()
    );
    Ok(RoleBinding {
        arch: catalog.arch(),
        roles,
        degenerate,
        registers,
    })
}

/// Replace bound named wildcards with their letters.
///
/// Returns the lookup pattern (only bare `?` left) and, for each remaining
/// `?` in order, the named slot it came from.
fn substitute(pattern: &str, registers: &BTreeMap<u8, char>) -> (String, Vec<Option<u8>>) {
    let mut out = String::with_capacity(pattern.len());
    let mut holes = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != WILDCARD {
            out.push(c);
            continue;
        }
        let slot = chars
            .peek()
            .and_then(|d| d.to_digit(10))
            .map(|d| d as u8);
        if slot.is_some() {
            chars.next();
        }
        match slot.and_then(|s| registers.get(&s)) {
            Some(&letter) => out.push(letter),
            None => {
                out.push(WILDCARD);
                holes.push(slot);
            }
        }
    }
    (out, holes)
}

/// Characters of `text` sitting under each `?` of `pattern`.
fn capture(pattern: &str, text: &str) -> Vec<char> {
    pattern
        .chars()
        .zip(text.chars())
        .filter(|(p, _)| *p == WILDCARD)
        .map(|(_, t)| t)
        .collect()
}
