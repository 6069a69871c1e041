//! AT&T operand helpers.
//!
//! Gadget texts use AT&T order (`mov SRC,DST`), so a store through a
//! pointer reads `mov %eax,(%edx)` and a register copy `mov %ecx,%eax`.

/// Split `mnemonic a,b` into `(mnemonic, a, b)`.
///
/// Memory operands keep their parentheses. Returns `None` for anything
/// that does not have exactly two operands.
pub fn split_operands(insn: &str) -> Option<(&str, &str, &str)> {
    let (mnemonic, rest) = insn.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim();

    // The separating comma is the first one outside parentheses.
    let mut depth = 0usize;
    let mut split = None;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let i = split?;
    let (src, dst) = (rest[..i].trim(), rest[i + 1..].trim());
    // Three-operand forms (`imul $4,%eax,%ebx`) are not transfers.
    if src.is_empty() || dst.is_empty() || (dst.contains(',') && !dst.starts_with('(')) {
        return None;
    }
    Some((mnemonic, src, dst))
}

/// Whether the operand is a plain register (`%eax`, `%al`, ...).
pub fn is_register(operand: &str) -> bool {
    operand.starts_with('%') && operand.len() > 1 && !operand.contains('(')
}

/// Letter of a full-width `?x` register: `%ebx` / `%rbx` / `(%ebx)` -> `b`.
pub fn reg_letter(operand: &str) -> Option<char> {
    let name = operand
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .strip_prefix('%')?;
    let mut chars = name.chars();
    let prefix = chars.next()?;
    let letter = chars.next()?;
    let suffix = chars.next()?;
    if chars.next().is_some() || !matches!(prefix, 'e' | 'r') || suffix != 'x' {
        return None;
    }
    matches!(letter, 'a'..='d').then_some(letter)
}

/// A register-to-register `mov` whose source and destination are the same
/// register. Executing it has no effect.
pub fn is_self_transfer(insn: &str) -> bool {
    match split_operands(insn) {
        Some(("mov", src, dst)) => is_register(src) && src == dst,
        _ => false,
    }
}

/// Register written by a `pop`: `pop %ebx` -> `%ebx`.
pub fn pop_register(insn: &str) -> Option<&str> {
    let mut parts = insn.split_whitespace();
    if parts.next()? != "pop" {
        return None;
    }
    let reg = parts.next()?;
    (parts.next().is_none() && is_register(reg)).then_some(reg)
}

/// Registers of a store `mov %SRC,(%DST)`: `(data, pointer)` letters.
pub fn store_registers(insn: &str) -> Option<(char, char)> {
    let (mnemonic, src, dst) = split_operands(insn)?;
    if mnemonic != "mov" || !is_register(src) || !dst.starts_with('(') {
        return None;
    }
    Some((reg_letter(src)?, reg_letter(dst)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_register_pair() {
        assert_eq!(
            split_operands("mov %ecx,%eax"),
            Some(("mov", "%ecx", "%eax"))
        );
    }

    #[test]
    fn split_memory_operand() {
        assert_eq!(
            split_operands("mov %eax,(%edx)"),
            Some(("mov", "%eax", "(%edx)"))
        );
        assert_eq!(
            split_operands("mov (%edx),%ecx"),
            Some(("mov", "(%edx)", "%ecx"))
        );
    }

    #[test]
    fn split_rejects_single_operand() {
        assert_eq!(split_operands("pop %eax"), None);
        assert_eq!(split_operands("ret"), None);
    }

    #[test]
    fn register_letters() {
        assert_eq!(reg_letter("%eax"), Some('a'));
        assert_eq!(reg_letter("%rdx"), Some('d'));
        assert_eq!(reg_letter("(%ebx)"), Some('b'));
        assert_eq!(reg_letter("%esi"), None);
        assert_eq!(reg_letter("%al"), None);
        assert_eq!(reg_letter("%r8"), None);
    }

    #[test]
    fn self_transfer() {
        assert!(is_self_transfer("mov %eax,%eax"));
        assert!(!is_self_transfer("mov %ecx,%eax"));
        assert!(!is_self_transfer("mov %eax,(%eax)"));
        assert!(!is_self_transfer("xor %eax,%eax"));
    }

    #[test]
    fn popped_register() {
        assert_eq!(pop_register("pop %ebx"), Some("%ebx"));
        assert_eq!(pop_register("pop %r15"), Some("%r15"));
        assert_eq!(pop_register("popal"), None);
        assert_eq!(pop_register("mov %eax,%ebx"), None);
    }

    #[test]
    fn store_register_letters() {
        assert_eq!(store_registers("mov %eax,(%edx)"), Some(('a', 'd')));
        assert_eq!(store_registers("mov %rax,(%rcx)"), Some(('a', 'c')));
        assert_eq!(store_registers("mov (%edx),%eax"), None);
        assert_eq!(store_registers("mov %ecx,%eax"), None);
    }
}
