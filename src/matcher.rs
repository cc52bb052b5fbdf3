//! Data-driven instruction matching.
//!
//! Instead of hand-writing operand parsing for every instruction, the format
//! strings in [`crate::isa::FORMATS`] are themselves lexed into rule vectors
//! once, and a token sequence is matched against all 35 rules at the same
//! time. Candidates that stop matching are dropped; the rule that survives to
//! its full length is the instruction.

use lazy_static::lazy_static;

use crate::isa::{icase_eq, Ins, FORMATS, INS_COUNT, INS_TABLE};
use crate::lexer::{Lexer, Token, TokenKind};

lazy_static! {
    /// Sub-lexemes of every instruction format, in table order. Reusing the
    /// assembly lexer here means the rules tokenize exactly like source
    /// does.
    static ref RULES: Vec<Vec<&'static str>> = FORMATS
        .iter()
        .map(|format| {
            let mut lexer = Lexer::new(format);
            let mut subs = Vec::with_capacity(4);
            loop {
                let tok = lexer.next();
                if !tok.is_real() {
                    break;
                }
                subs.push(tok.lexeme);
            }
            subs
        })
        .collect();
}

/// Role a token played in the rules that accepted it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Matched {
    /// No surviving rule accepted the token.
    None,
    /// Surviving rules disagree on the role. Never produced for immediate
    /// positions: no two formats share a prefix and then differ in the kind
    /// of immediate they want.
    Multiple,
    Register,
    Label,
    Address,
    Byte,
    Nibble,
    /// Literal sub-lexeme (mnemonic, special register, punctuation).
    Exact,
}

/// Matches one token sequence against all instruction formats at once.
pub struct RuleMatcher {
    match_count: usize,
    matched: Option<Ins>,
    /// One candidate bit per rule.
    alive: u64,
}

const ALL_ALIVE: u64 = (1 << INS_COUNT) - 1;

impl RuleMatcher {
    pub fn new() -> Self {
        RuleMatcher {
            match_count: 0,
            matched: None,
            alive: ALL_ALIVE,
        }
    }

    pub fn start_new_match(&mut self) {
        self.match_count = 0;
        self.matched = None;
        self.alive = ALL_ALIVE;
    }

    /// The instruction whose rule matched to completion, once one has.
    pub fn matched_rule(&self) -> Option<Ins> {
        self.matched
    }

    /// Try matching the token against all surviving rules and advance if any
    /// accepted it. Returns the merged role across the rules that did.
    pub fn try_next(&mut self, tok: &Token) -> Matched {
        if self.matched.is_some() {
            return Matched::None;
        }
        let mut code = Matched::None;

        for (i, rule) in RULES.iter().enumerate() {
            if self.alive & (1 << i) == 0 {
                continue;
            }
            if self.match_count >= rule.len() {
                self.alive &= !(1 << i);
                continue;
            }

            let c = match_one(rule[self.match_count], tok);
            if c == Matched::None {
                self.alive &= !(1 << i);
            }
            if code == Matched::None {
                code = c;
            } else if c != Matched::None && c != code {
                code = Matched::Multiple;
            }

            if c != Matched::None && self.match_count == rule.len() - 1 {
                self.matched = Some(INS_TABLE[i]);
                break;
            }
        }

        if code != Matched::None {
            self.match_count += 1;
        }
        code
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Match a token against a single rule sub-lexeme. Lowercase `v`, `a`, `b`
/// and `n` are placeholders; anything else must equal the token's lexeme,
/// ignoring case.
fn match_one(sub: &str, tok: &Token) -> Matched {
    match sub {
        "v" if tok.kind == TokenKind::Register => Matched::Register,
        "a" if tok.kind == TokenKind::Identifier => Matched::Label,
        "a" if tok.kind == TokenKind::Immediate => Matched::Address,
        "b" if tok.kind == TokenKind::Immediate => Matched::Byte,
        "n" if tok.kind == TokenKind::Immediate => Matched::Nibble,
        "v" | "a" | "b" | "n" => Matched::None,
        _ if icase_eq(sub, tok.lexeme) => Matched::Exact,
        _ => Matched::None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Feed a source line through the matcher, returning the roles and the
    /// matched instruction.
    fn run(src: &str) -> (Vec<Matched>, Option<Ins>) {
        let mut lexer = Lexer::new(src);
        let mut matcher = RuleMatcher::new();
        let mut roles = Vec::new();
        loop {
            if matcher.matched_rule().is_some() {
                break;
            }
            let tok = lexer.next();
            if !tok.is_real() {
                break;
            }
            roles.push(matcher.try_next(&tok));
        }
        (roles, matcher.matched_rule())
    }

    #[test]
    fn matches_no_operand_rule() {
        let (roles, ins) = run("CLS");
        assert_eq!(roles, vec![Matched::Exact]);
        assert_eq!(ins, Some(Ins::Cls));
    }

    #[test]
    fn byte_immediate_role_is_unambiguous() {
        let (roles, ins) = run("LD V1, 0x2A");
        assert_eq!(
            roles,
            vec![
                Matched::Exact,
                Matched::Register,
                Matched::Exact,
                Matched::Byte
            ]
        );
        assert_eq!(ins, Some(Ins::LdVB));
    }

    #[test]
    fn register_operand_distinguishes_rules() {
        let (_, ins) = run("LD V1, V2");
        assert_eq!(ins, Some(Ins::LdVV));
        let (_, ins) = run("LD I, 0x200");
        assert_eq!(ins, Some(Ins::LdIA));
        let (_, ins) = run("LD [I], V3");
        assert_eq!(ins, Some(Ins::LdImV));
        let (_, ins) = run("LD V3, [I]");
        assert_eq!(ins, Some(Ins::LdVIm));
    }

    #[test]
    fn jp_v0_takes_the_exact_branch() {
        let (roles, ins) = run("JP V0, 0x200");
        // V0 matches the literal in "JP V0, a", not a register placeholder.
        assert_eq!(roles[1], Matched::Exact);
        assert_eq!(ins, Some(Ins::JpV0A));
        let (_, ins) = run("JP 0x200");
        assert_eq!(ins, Some(Ins::JpA));
    }

    #[test]
    fn labels_match_address_positions() {
        let (roles, ins) = run("CALL main");
        assert_eq!(roles, vec![Matched::Exact, Matched::Label]);
        assert_eq!(ins, Some(Ins::CallA));
    }

    #[test]
    fn nibble_only_in_drw() {
        let (roles, ins) = run("DRW V0, V1, 5");
        assert_eq!(*roles.last().unwrap(), Matched::Nibble);
        assert_eq!(ins, Some(Ins::DrwVVN));
    }

    #[test]
    fn rejects_bad_operand() {
        let (roles, ins) = run("SHR 12");
        assert_eq!(roles, vec![Matched::Exact, Matched::None]);
        assert_eq!(ins, None);
    }

    #[test]
    fn no_rule_vector_is_empty() {
        for rule in RULES.iter() {
            assert!(!rule.is_empty());
        }
    }

    #[test]
    fn stops_after_completion() {
        let mut lexer = Lexer::new("RET RET");
        let mut matcher = RuleMatcher::new();
        let tok = lexer.next();
        assert_eq!(matcher.try_next(&tok), Matched::Exact);
        assert_eq!(matcher.matched_rule(), Some(Ins::Ret));
        let tok = lexer.next();
        assert_eq!(matcher.try_next(&tok), Matched::None);
    }
}
