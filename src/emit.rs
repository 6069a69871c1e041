//! Code emitter: turns gadget invocations into payload lines.
//!
//! Every line appends either one packed stack word or one literal block to
//! the payload. Lines are grouped into [`Step`]s, one per gadget invocation,
//! so a caller can see which words belong to which gadget.

use serde::{Deserialize, Serialize};

use crate::combo::Bound;
use crate::error::{Error, Result};
use crate::padding::{self, Side};
use crate::types::Instruction;

/// Filler byte for padding words and short string blocks.
pub const FILLER: u8 = b'A';

/// Base addresses of the writable regions a chain writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sections {
    /// Base of `.data`.
    pub data: u64,
    /// Base of `.got`.
    pub got: u64,
}

/// Which writable region an offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Data,
    Got,
}

impl Section {
    pub fn name(self) -> &'static str {
        match self {
            Section::Data => ".data",
            Section::Got => ".got",
        }
    }
}

impl Sections {
    pub fn base(&self, section: Section) -> u64 {
        match section {
            Section::Data => self.data,
            Section::Got => self.got,
        }
    }
}

/// One generated payload line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A packed little-endian word of `width` bytes.
    Word {
        value: u64,
        width: usize,
        comment: Option<String>,
    },
    /// A literal block, already padded to the word width.
    Bytes {
        bytes: Vec<u8>,
        comment: Option<String>,
    },
}

impl Line {
    pub fn comment(&self) -> Option<&str> {
        match self {
            Line::Word { comment, .. } | Line::Bytes { comment, .. } => comment.as_deref(),
        }
    }

    /// Bytes this line appends to the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Line::Word { value, width, .. } => value.to_le_bytes()[..*width].to_vec(),
            Line::Bytes { bytes, .. } => bytes.clone(),
        }
    }

    /// Packed word value, if this is a word line.
    pub fn value(&self) -> Option<u64> {
        match self {
            Line::Word { value, .. } => Some(*value),
            Line::Bytes { .. } => None,
        }
    }
}

/// The lines of one gadget invocation (or one standalone word).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Step {
    pub lines: Vec<Line>,
}

impl Step {
    /// Address of the gadget this step invokes (its first word).
    pub fn gadget(&self) -> Option<u64> {
        self.lines.first().and_then(Line::value)
    }
}

/// What a gadget invocation pops into its role register.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    /// Address of `section + offset`.
    Section(Section, u64),
    /// A literal word with its comment.
    Literal(u64, &'a str),
    /// A literal block of at most one word.
    Bytes(&'a [u8]),
}

/// Accumulates payload lines for one word width.
#[derive(Debug)]
pub struct Emitter {
    width: usize,
    sections: Sections,
    steps: Vec<Step>,
}

impl Emitter {
    /// Only 4- and 8-byte words are supported.
    pub fn new(width: usize, sections: Sections) -> Result<Self> {
        if !matches!(width, 4 | 8) {
            return Err(Error::UnsupportedWordWidth(width));
        }
        Ok(Self {
            width,
            sections,
            steps: Vec::new(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    fn begin_step(&mut self) {
        self.steps.push(Step::default());
    }

    fn push(&mut self, line: Line) {
        if self.steps.is_empty() {
            self.begin_step();
        }
        if let Some(step) = self.steps.last_mut() {
            step.lines.push(line);
        }
    }

    /// Emit one packed word.
    pub fn word(&mut self, value: u64, comment: Option<&str>) -> Result<()> {
        if self.width < 8 && value >> (self.width * 8) != 0 {
            return Err(Error::ValueTooWide {
                value,
                width: self.width,
            });
        }
        self.push(Line::Word {
            value,
            width: self.width,
            comment: comment.map(str::to_string),
        });
        Ok(())
    }

    /// Emit one literal block, filled up to the word width with `A`.
    ///
    /// Without a comment the rendered line shows the block itself.
    pub fn string(&mut self, src: &[u8], comment: Option<&str>) -> Result<()> {
        if src.len() > self.width {
            return Err(Error::LengthExceeded {
                len: src.len(),
                max: self.width,
            });
        }
        let mut bytes = src.to_vec();
        bytes.resize(self.width, FILLER);
        self.push(Line::Bytes {
            bytes,
            comment: comment.map(str::to_string),
        });
        Ok(())
    }

    /// Emit `count` filler words.
    pub fn padding(&mut self, count: usize) {
        let filler = vec![FILLER; self.width];
        for _ in 0..count {
            self.push(Line::Bytes {
                bytes: filler.clone(),
                comment: Some("padding".into()),
            });
        }
    }

    /// Emit the address `section + offset`, commented `@ .data + N`.
    pub fn section_addr(&mut self, section: Section, offset: u64) -> Result<()> {
        let addr = self
            .sections
            .base(section)
            .checked_add(offset)
            .ok_or_else(|| Error::Other(format!("{} + {} overflows", section.name(), offset)))?;
        let comment = if offset == 0 {
            format!("@ {}", section.name())
        } else {
            format!("@ {} + {}", section.name(), offset)
        };
        self.word(addr, Some(&comment))
    }

    /// Invoke `bound` and feed its role sub-instruction `operand`.
    ///
    /// Incidental pops before and after the role instruction get filler
    /// words so the operand lands in the right register.
    pub fn gadget(&mut self, bound: &Bound, operand: Operand<'_>) -> Result<()> {
        let (before, after) = padding::around(&bound.insn.text, &bound.component);
        self.begin_step();
        self.word(bound.insn.addr, Some(&bound.insn.text))?;
        self.padding(before);
        self.operand(operand)?;
        self.padding(after);
        Ok(())
    }

    /// Invoke a compound gadget that pops several role registers at once.
    ///
    /// `operands` pairs pop components of `insn` with the value each one
    /// receives. Every other pop gets a filler word.
    pub fn load(&mut self, insn: &Instruction, operands: &[(&str, Operand<'_>)]) -> Result<()> {
        self.begin_step();
        self.word(insn.addr, Some(&insn.text))?;
        for component in insn.components() {
            match operands.iter().find(|(c, _)| *c == component) {
                Some((_, operand)) => self.operand(*operand)?,
                None => self.padding(padding::count(component, Side::Total)),
            }
        }
        Ok(())
    }

    fn operand(&mut self, operand: Operand<'_>) -> Result<()> {
        match operand {
            Operand::Section(section, offset) => self.section_addr(section, offset),
            Operand::Literal(value, comment) => self.word(value, Some(comment)),
            Operand::Bytes(bytes) => self.string(bytes, None),
        }
    }

    /// Invoke a gadget that takes no operand. Every pop it contains is
    /// padded.
    pub fn solo(&mut self, insn: &Instruction) -> Result<()> {
        self.begin_step();
        self.word(insn.addr, Some(&insn.text))?;
        self.padding(padding::count(&insn.text, Side::Total));
        Ok(())
    }

    /// Final word transferring control to the start of `section`.
    pub fn pivot(&mut self, section: Section) -> Result<()> {
        self.begin_step();
        let comment = format!("jump to our shellcode in {}", section.name());
        self.word(self.sections.base(section), Some(&comment))
    }

    /// Lines emitted so far.
    pub fn line_count(&self) -> usize {
        self.steps.iter().map(|s| s.lines.len()).sum()
    }

    pub fn finish(self) -> Payload {
        Payload {
            width: self.width,
            steps: self.steps,
        }
    }
}

/// A complete generated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub width: usize,
    pub steps: Vec<Step>,
}

impl Payload {
    /// All lines in emission order.
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.steps.iter().flat_map(|s| s.lines.iter())
    }

    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Raw payload bytes (little-endian words and literal blocks).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.lines().flat_map(Line::to_bytes).collect()
    }

    /// Total size in bytes.
    pub fn size(&self) -> usize {
        self.line_count() * self.width
    }

    /// Whether any word of the payload equals `value`.
    pub fn contains_word(&self, value: u64) -> bool {
        self.lines().any(|l| l.value() == Some(value))
    }
}
