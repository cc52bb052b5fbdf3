//! Statement-level assembler driver.
//!
//! Parsing is two passes. The first pass walks the token stream (through a
//! macro-aware producer), matches instructions against the ISA format rules,
//! and builds a statement list plus a label table keyed by raw lexeme. The
//! second pass resolves label references against that table and emits the
//! big-endian byte stream. Any recorded diagnostic suppresses emission.

use fxhash::FxHashMap;
use miette::Report;

use crate::error::{self, MacroOrigin};
use crate::isa::{Ins, INS_LEN, OPCODES, PROG_START, VX_OFFSET, VY_OFFSET};
use crate::lexer::{Lexer, Position, Token, TokenKind};
use crate::matcher::{Matched, RuleMatcher};

/// Diagnostics past this count abort the run.
const ERROR_LIMIT: usize = 10;

/// Marker error: the diagnostic is already recorded, the caller only has to
/// skip to the next line.
struct Recover;

type ParseResult = Result<(), Recover>;

/// One parsed statement, either a two-byte instruction or a single data
/// byte. `imm` is rewritten by the resolution pass when `label` is set.
#[derive(Clone, Copy, Default, Debug)]
struct Statement<'a> {
    opcode: u16,
    imm: u16,
    vx: u8,
    vy: u8,
    label: Option<Token<'a>>,
    is_data_byte: bool,
}

/// A `%define` record. The substitution is the raw remainder of the defining
/// line; it gets re-lexed at every use site.
#[derive(Clone, Copy, Debug)]
struct Macro<'a> {
    name: &'a str,
    subst: &'a str,
    pos: Position,
}

/// While a macro is being expanded, tokens come from a secondary lexer over
/// the substitution text and are stamped with the call site.
struct ActiveMacro<'a> {
    index: usize,
    call_site: Token<'a>,
    lexer: Lexer<'a>,
}

/// Owns all state for one assembly run. Create a fresh parser per source.
pub struct Parser<'a> {
    src: &'a str,
    lexer: Lexer<'a>,
    previous: Token<'a>,
    current: Token<'a>,
    matcher: RuleMatcher,

    active_macro: Option<ActiveMacro<'a>>,
    macros: Vec<Macro<'a>>,
    macro_names: FxHashMap<&'a str, usize>,

    errors: Vec<Report>,
    next_stmt_addr: u16,
    statements: Vec<Statement<'a>>,
    labels: FxHashMap<&'a str, u16>,
}

/// Assemble a full source buffer into ROM bytes, or every diagnostic the
/// source produced.
pub fn assemble(src: &str) -> Result<Vec<u8>, Vec<Report>> {
    Parser::new(src).parse_and_assemble()
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Parser {
            src,
            lexer: Lexer::new(src),
            previous: Token::new(TokenKind::Eof, 0),
            current: Token::new(TokenKind::Eof, 0),
            matcher: RuleMatcher::new(),
            active_macro: None,
            macros: Vec::new(),
            macro_names: FxHashMap::default(),
            errors: Vec::new(),
            next_stmt_addr: PROG_START,
            statements: Vec::new(),
            labels: FxHashMap::default(),
        }
    }

    pub fn parse_and_assemble(mut self) -> Result<Vec<u8>, Vec<Report>> {
        self.advance(); // take in the first token
        while self.current.kind != TokenKind::Eof {
            if self.errors.len() >= ERROR_LIMIT {
                self.errors.push(error::too_many_errors(ERROR_LIMIT));
                return Err(self.errors);
            }
            if self.parse_statement().is_err() {
                self.recover();
            }
        }

        // Resolution pass: every label target is known by now.
        for i in 0..self.statements.len() {
            let Some(label) = self.statements[i].label else {
                continue;
            };
            if self.errors.len() >= ERROR_LIMIT {
                self.errors.push(error::too_many_errors(ERROR_LIMIT));
                return Err(self.errors);
            }
            match self.labels.get(label.lexeme).copied() {
                Some(addr) => self.statements[i].imm = addr,
                None => {
                    let origin = self.origin_of(&label);
                    self.errors
                        .push(error::label_not_found(self.src, &label, origin));
                }
            }
        }

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let mut bincode = Vec::with_capacity(self.statements.len() * INS_LEN as usize);
        for stmt in &self.statements {
            if stmt.is_data_byte {
                bincode.push(stmt.imm as u8);
                continue;
            }
            let code = stmt.opcode
                | stmt.imm
                | u16::from(stmt.vx) << VX_OFFSET
                | u16::from(stmt.vy) << VY_OFFSET;
            bincode.extend_from_slice(&code.to_be_bytes());
        }
        Ok(bincode)
    }

    fn parse_statement(&mut self) -> ParseResult {
        if self.match_advance(TokenKind::Identifier, None) {
            self.parse_label()?;
        }

        if self.match_advance(TokenKind::Instruction, None) {
            self.parse_instruction()?;
        } else if self.match_advance(TokenKind::Db, None) {
            self.parse_db()?;
        } else if self.match_advance(TokenKind::Define, None) {
            self.parse_define()?;
        } else if self.matches(TokenKind::SpecialRegister, None) {
            let reserved = self.current;
            self.advance();
            if self.matches(TokenKind::Char, Some(i32::from(b':'))) {
                self.log_err(error::reserved_label(self.src, &reserved));
            } else {
                let origin = self.origin_of(&reserved);
                self.log_err(error::syntax_expected(
                    self.src,
                    "a statement",
                    &reserved,
                    origin,
                ));
            }
            return Err(Recover);
        }

        self.expect_newline()
    }

    fn parse_instruction(&mut self) -> ParseResult {
        let mut stmt = Statement::default();
        let mut regs_matched = 0;
        self.matcher.start_new_match();

        // The mnemonic itself always matches some rule's head.
        let head = self.matcher.try_next(&self.previous);
        assert!(head != Matched::None, "not an instruction token");

        loop {
            if let Some(ins) = self.matcher.matched_rule() {
                stmt.opcode = opcode_of(ins);
                self.add_statement(stmt);
                return Ok(());
            }

            let role = self.matcher.try_next(&self.current);
            match role {
                Matched::None => {
                    let origin = self.origin_of(&self.current);
                    self.log_err(error::unexpected_operand(self.src, &self.current, origin));
                    return Err(Recover);
                }
                Matched::Multiple => {
                    // Only exact-match positions may stay ambiguous; an
                    // ambiguous immediate means the format table is broken.
                    assert!(
                        self.current.kind != TokenKind::Immediate,
                        "ambiguous immediate token in rule table"
                    );
                }
                Matched::Register => {
                    match regs_matched {
                        0 => stmt.vx = self.current.value as u8,
                        1 => stmt.vy = self.current.value as u8,
                        _ => unreachable!("more than two registers in rule"),
                    }
                    regs_matched += 1;
                }
                Matched::Label => stmt.label = Some(self.current),
                Matched::Address | Matched::Byte | Matched::Nibble => {
                    let bits = match role {
                        Matched::Address => 12,
                        Matched::Byte => 8,
                        _ => 4,
                    };
                    match limit_value(self.current.value, bits) {
                        Some(v) => stmt.imm = v,
                        // Keep the statement so later passes still diagnose
                        // its labels; the field stays zero.
                        None => {
                            let origin = self.origin_of(&self.current);
                            self.log_err(error::imm_out_of_range(
                                self.src,
                                &self.current,
                                bits,
                                origin,
                            ));
                        }
                    }
                }
                Matched::Exact => {}
            }
            self.advance();
        }
    }

    fn parse_label(&mut self) -> ParseResult {
        let label = self.previous;
        self.expect(TokenKind::Char, Some(i32::from(b':')))?;

        if self.labels.contains_key(label.lexeme) {
            let origin = self.origin_of(&label);
            self.log_err(error::duplicate_label(self.src, &label, origin));
        } else {
            self.labels.insert(label.lexeme, self.next_stmt_addr);
        }
        Ok(())
    }

    fn parse_define(&mut self) -> ParseResult {
        // Any identifier-shaped lexeme may name a macro, even one that lexed
        // as a mnemonic or directive.
        if self
            .current
            .lexeme
            .as_bytes()
            .first()
            .is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_')
        {
            self.current.kind = TokenKind::Identifier;
        }
        self.lexer.set_next_token_as_line();
        self.expect(TokenKind::Identifier, None)?;

        let name = self.previous;
        let subst = self.advance();
        debug_assert_eq!(subst.kind, TokenKind::Raw);

        let mac = Macro {
            name: name.lexeme,
            subst: subst.lexeme,
            pos: subst.pos,
        };
        match self.macro_names.get(name.lexeme) {
            Some(&index) => self.macros[index] = mac,
            None => {
                self.macros.push(mac);
                self.macro_names.insert(name.lexeme, self.macros.len() - 1);
            }
        }
        Ok(())
    }

    fn parse_db(&mut self) -> ParseResult {
        self.expect(TokenKind::Immediate, None)?;
        let tok = self.previous;
        let imm = match limit_value(tok.value, 8) {
            Some(v) => v,
            None => {
                let origin = self.origin_of(&tok);
                self.log_err(error::imm_out_of_range(self.src, &tok, 8, origin));
                0
            }
        };

        self.add_statement(Statement {
            imm,
            is_data_byte: true,
            ..Statement::default()
        });
        Ok(())
    }

    /// Statements end at a newline; end of input is accepted in its place so
    /// an unterminated final line cannot wedge the parser.
    fn expect_newline(&mut self) -> ParseResult {
        if self.current.kind == TokenKind::Eof {
            return Ok(());
        }
        self.expect(TokenKind::Char, Some(i32::from(b'\n')))
    }

    fn expect(&mut self, kind: TokenKind, value: Option<i32>) -> ParseResult {
        if self.match_advance(kind, value) {
            return Ok(());
        }

        let expected = Token::new(kind, value.unwrap_or(0));
        let origin = self.origin_of(&self.current);
        self.log_err(error::syntax_expected(
            self.src,
            &expected.as_debug(value.is_some()),
            &self.current,
            origin,
        ));
        Err(Recover)
    }

    fn match_advance(&mut self, kind: TokenKind, value: Option<i32>) -> bool {
        if self.matches(kind, value) {
            self.advance();
            return true;
        }
        false
    }

    fn matches(&self, kind: TokenKind, value: Option<i32>) -> bool {
        self.current.kind == kind && value.map_or(true, |v| v == self.current.value)
    }

    /// Step the macro-aware token producer: move `current` into `previous`
    /// and pull the next token, entering or leaving macro expansion as
    /// needed. Tokens from an expansion are stamped with the call site and
    /// never trigger further lookups; neither does the name being defined by
    /// a `%define`.
    fn advance(&mut self) -> Token<'a> {
        let defines_name = self.current.kind == TokenKind::Define;
        self.previous = self.current;

        loop {
            if let Some(active) = &mut self.active_macro {
                let mut tok = active.lexer.next();
                if tok.kind != TokenKind::Eof {
                    tok.origin = Some(active.index);
                    tok.pos = active.call_site.pos;
                    tok.span = active.call_site.span;
                    self.current = tok;
                    break;
                }
                self.active_macro = None;
            } else {
                let tok = self.lexer.next();
                if !defines_name && tok.kind == TokenKind::Identifier {
                    if let Some(&index) = self.macro_names.get(tok.lexeme) {
                        self.active_macro = Some(ActiveMacro {
                            index,
                            call_site: tok,
                            lexer: Lexer::new(self.macros[index].subst),
                        });
                        continue;
                    }
                }
                self.current = tok;
                break;
            }
        }

        self.previous
    }

    fn add_statement(&mut self, stmt: Statement<'a>) {
        self.next_stmt_addr = self
            .next_stmt_addr
            .wrapping_add(if stmt.is_data_byte { 1 } else { INS_LEN });
        self.statements.push(stmt);
    }

    fn log_err(&mut self, report: Report) {
        self.errors.push(report);
    }

    fn origin_of(&self, tok: &Token) -> Option<MacroOrigin<'a>> {
        tok.origin.map(|index| MacroOrigin {
            name: self.macros[index].name,
            def_line: self.macros[index].pos.line,
        })
    }

    /// Skip to just past the next newline (or to end of input).
    fn recover(&mut self) {
        loop {
            if self.current.kind == TokenKind::Eof
                || self.match_advance(TokenKind::Char, Some(i32::from(b'\n')))
            {
                break;
            }
            self.advance();
        }
    }
}

fn opcode_of(ins: Ins) -> u16 {
    OPCODES[ins as usize]
}

/// Clamp a parsed integer into a `bits`-wide field. Non-negative values must
/// fit as-is; negative values down to `-2^(bits-1)` become their
/// two's-complement encoding.
fn limit_value(value: i32, bits: u32) -> Option<u16> {
    let umax: u32 = (1 << bits) - 1;
    let mag = value.unsigned_abs();

    if value >= 0 && mag <= umax {
        return Some(mag as u16);
    }
    if value < 0 && mag <= (umax + 1) / 2 {
        return Some(((!mag).wrapping_add(1) & umax) as u16);
    }
    None
}
