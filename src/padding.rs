//! Stack padding for compound gadgets.
//!
//! Every `pop` executed by a gadget consumes one stack word, whether or not
//! the chain cares about that register. The emitter must supply one filler
//! word per incidental pop, in stack order around the word the chain does
//! care about.

/// Prefix shared by the pop family (`pop`, `popl`, `popa`, ...).
pub const POP_PREFIX: &str = "pop";

/// Which part of the gadget text to count pops in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side<'a> {
    /// Pops strictly before the first occurrence of the sub-instruction.
    Before(&'a str),
    /// Pops after the end of the sub-instruction.
    After(&'a str),
    /// Every pop in the gadget.
    Total,
}

/// Count incidental pops in `gadget`.
///
/// When the sub-instruction is missing from the text, `Before` counts the
/// whole gadget and `After` counts nothing.
pub fn count(gadget: &str, side: Side<'_>) -> usize {
    match side {
        Side::Before(target) => {
            let end = gadget.find(target).unwrap_or(gadget.len());
            count_pops(&gadget[..end])
        }
        Side::After(target) => match gadget.find(target) {
            Some(pos) => count_pops(&gadget[pos + target.len()..]),
            None => 0,
        },
        Side::Total => count_pops(gadget),
    }
}

/// Filler words `(before, after)` around `target`.
pub fn around(gadget: &str, target: &str) -> (usize, usize) {
    (count(gadget, Side::Before(target)), count(gadget, Side::After(target)))
}

fn count_pops(text: &str) -> usize {
    text.matches(POP_PREFIX).count()
}
