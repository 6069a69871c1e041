//! ropcombo: a return-oriented chain builder for x86 and x86-64.
//!
//! Given the gadgets of a binary (as listed by a gadget finder), the
//! addresses of its writable sections and, optionally, its read-only code
//! bytes, ropcombo binds abstract roles (pop into a register, store through
//! a pointer, zero the accumulator, ...) to concrete gadgets and emits a
//! padding-correct chain that writes data into memory and hands control
//! over to it.
//!
//! # Module overview
//!
//! ## Gadgets
//!
//! - [`error`]: Error types used throughout the crate.
//! - [`types`]: `Arch`, `Instruction` and wildcard matching.
//! - [`att`]: AT&T operand helpers.
//! - [`catalog`]: Gadget catalog with exact-instruction lookup.
//! - [`combo`]: Postfix AND/OR templates and the role-binding compiler.
//!
//! ## Code generation
//!
//! - [`padding`]: Filler words for incidental pops in compound gadgets.
//! - [`emit`]: Word, string and gadget-invocation primitives.
//! - [`layout`]: Values, strings, pointer vectors and argv images in memory.
//! - [`execve`]: `execve(argv[0], argv, envp)` chains.
//! - [`octet`]: Locating shellcode bytes in read-only code.
//! - [`importsc`]: Byte-by-byte shellcode import into `.got`.
//! - [`ropmaker`]: Mode dispatch.
//! - [`script`]: Python `struct.pack` rendering.
//!
//! ## Configuration
//!
//! - [`config`]: Target description files (TOML or JSON).

pub mod error;
pub mod types;
pub mod att;
pub mod catalog;
pub mod padding;
pub mod combo;
pub mod emit;
pub mod layout;
pub mod execve;
pub mod octet;
pub mod importsc;
pub mod ropmaker;
pub mod script;
pub mod config;
