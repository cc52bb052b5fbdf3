//! Constructors for positioned assembler diagnostics.
//!
//! Every diagnostic leads with `Line L:C ERROR on <token>: <message>.` and
//! carries a labeled span so the rendered report underlines the offending
//! token in its source line. Tokens that came out of a macro expansion name
//! the macro and its definition line in the header.

use miette::{miette, LabeledSpan, Report, Severity};

use crate::lexer::{Token, TokenKind};

/// Which macro produced a token, for the diagnostic header trailer.
#[derive(Clone, Copy, Debug)]
pub struct MacroOrigin<'a> {
    pub name: &'a str,
    pub def_line: u32,
}

fn header(tok: &Token, origin: Option<MacroOrigin>) -> String {
    match origin {
        Some(mac) => format!(
            "Line {} (expanded from macro '{}' defined on line {}) ERROR on {}",
            tok.pos,
            mac.name,
            mac.def_line,
            tok.as_debug(true)
        ),
        None => format!("Line {} ERROR on {}", tok.pos, tok.as_debug(true)),
    }
}

fn caret(tok: &Token, label: &str) -> LabeledSpan {
    if tok.span.is_empty() {
        // Eof tokens have no extent; point at the last source byte instead.
        LabeledSpan::at_offset(tok.span.offs().saturating_sub(1), label.to_string())
    } else {
        LabeledSpan::at(tok.span, label.to_string())
    }
}

pub fn syntax_expected(
    src: &str,
    expected: &str,
    found: &Token,
    origin: Option<MacroOrigin>,
) -> Report {
    let help = if found.kind == TokenKind::Invalid {
        "this token failed to lex; check literal digits against their base and the literal's range"
    } else {
        "a statement is `label:`, an instruction, `db <byte>` or `%define <name> <text>`, ended by a newline"
    };
    miette!(
        severity = Severity::Error,
        code = "asm::syntax",
        help = help,
        labels = vec![caret(found, "unexpected token")],
        "{}: Syntax error: expected {} found {}.",
        header(found, origin),
        expected,
        found.as_debug(true),
    )
    .with_source_code(src.to_string())
}

pub fn unexpected_operand(src: &str, tok: &Token, origin: Option<MacroOrigin>) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::operand",
        help = "no instruction takes this operand shape; check the mnemonic's listing",
        labels = vec![caret(tok, "unexpected token")],
        "{}: Unexpected token.",
        header(tok, origin),
    )
    .with_source_code(src.to_string())
}

pub fn imm_out_of_range(src: &str, tok: &Token, bits: u32, origin: Option<MacroOrigin>) -> Report {
    let umax = (1u32 << bits) - 1;
    miette!(
        severity = Severity::Error,
        code = "asm::imm_range",
        help = format!(
            "this operand field is {bits} bits wide; 0 to {umax} (or down to -{} as two's complement) fits",
            (umax + 1) / 2,
        ),
        labels = vec![caret(tok, "out-of-range immediate")],
        "{}: Immediate out of range.",
        header(tok, origin),
    )
    .with_source_code(src.to_string())
}

pub fn duplicate_label(src: &str, tok: &Token, origin: Option<MacroOrigin>) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::duplicate_label",
        help = "a label may be defined once per program",
        labels = vec![caret(tok, "duplicate label")],
        "{}: Duplicate label name.",
        header(tok, origin),
    )
    .with_source_code(src.to_string())
}

pub fn reserved_label(src: &str, tok: &Token) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::reserved_label",
        help = "F, B, I, K, DT and ST name machine registers and cannot label code",
        labels = vec![caret(tok, "reserved name")],
        "{}: Reserved name cannot be used as a label.",
        header(tok, None),
    )
    .with_source_code(src.to_string())
}

pub fn label_not_found(src: &str, tok: &Token, origin: Option<MacroOrigin>) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::label_not_found",
        help = "labels are case-sensitive and must be defined somewhere in the program",
        labels = vec![caret(tok, "unresolved label")],
        "{}: Label not found.",
        header(tok, origin),
    )
    .with_source_code(src.to_string())
}

pub fn too_many_errors(limit: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::error_limit",
        "Too many errors ({limit}), stopping.",
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::Lexer;

    #[test]
    fn header_carries_position_and_token() {
        let src = "CLS\nfoo";
        let mut lexer = Lexer::new(src);
        lexer.next();
        lexer.next();
        let tok = lexer.next();
        let msg = unexpected_operand(src, &tok, None).to_string();
        assert!(msg.contains("Line 2:1"), "got: {msg}");
        assert!(msg.contains("[Identifier, 'foo']"), "got: {msg}");
    }

    #[test]
    fn macro_origin_trailer() {
        let src = "x";
        let tok = Lexer::new(src).next();
        let origin = MacroOrigin {
            name: "pi",
            def_line: 3,
        };
        let msg = label_not_found(src, &tok, Some(origin)).to_string();
        assert!(
            msg.contains("expanded from macro 'pi' defined on line 3"),
            "got: {msg}"
        );
    }
}
