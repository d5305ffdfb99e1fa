//! Textual IR parser.
//!
//! Accepts the output of the printer plus `;` line comments and free-form whitespace.

use super::*;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

pub fn parse_module(text: &str) -> Result<Module, ParseError> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    module: Module,
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '$' | '-')
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            module: Module::default(),
        }
    }

    fn parse(mut self) -> Result<Module, ParseError> {
        self.skip_whitespace();
        while !self.is_eof() {
            self.parse_item()?;
            self.skip_whitespace();
        }
        Ok(self.module)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let line = self.text[..self.pos.min(self.text.len())]
            .chars()
            .filter(|&c| c == '\n')
            .count()
            + 1;
        ParseError {
            line,
            message: message.into(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseError> {
        if self.try_read(ch) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{ch}'")))
        }
    }

    fn parse_identifier(&mut self) -> Result<&'a str, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if !is_ident_char(ch) {
                break;
            }
            self.advance();
        }
        if start == self.pos {
            return Err(self.error("expected identifier"));
        }
        Ok(&self.text[start..self.pos])
    }

    /// Consume `keyword` if it is the next identifier.
    fn try_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        if let Some(after) = rest.strip_prefix(keyword) {
            if !after.chars().next().is_some_and(is_ident_char) {
                self.pos += keyword.len();
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.try_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{keyword}'")))
        }
    }

    fn parse_sigiled(&mut self, sigil: char) -> Result<&'a str, ParseError> {
        self.expect(sigil)?;
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if !is_ident_char(ch) {
                break;
            }
            self.advance();
        }
        if start == self.pos {
            return Err(self.error(format!("expected name after '{sigil}'")));
        }
        Ok(&self.text[start..self.pos])
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        Ok(Value::new(self.parse_sigiled('%')?))
    }

    fn parse_symbol(&mut self) -> Result<String, ParseError> {
        Ok(self.parse_sigiled('@')?.to_string())
    }

    fn parse_int(&mut self) -> Result<i64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.current_char() == Some('-') {
            self.advance();
        }
        while self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected integer"))
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.current_char() {
                None => return Err(self.error("unterminated string")),
                Some('"') => {
                    self.advance();
                    return Ok(out);
                }
                Some('\\') => {
                    self.advance();
                    match self.current_char() {
                        Some('n') => out.push('\n'),
                        Some(c @ ('"' | '\\')) => out.push(c),
                        _ => return Err(self.error("invalid escape in string")),
                    }
                    self.advance();
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
    }

    fn parse_item(&mut self) -> Result<(), ParseError> {
        if self.try_keyword("source_filename") {
            self.expect('=')?;
            self.module.name = self.parse_string()?;
        } else if self.try_keyword("target") {
            let which = self.parse_identifier()?;
            self.expect('=')?;
            let value = self.parse_string()?;
            match which {
                "triple" => self.module.target_triple = value,
                "datalayout" => self.module.data_layout = value,
                other => return Err(self.error(format!("unknown target property '{other}'"))),
            }
        } else if self.try_read('!') {
            self.expect_keyword("flag")?;
            let behavior = self.parse_identifier()?;
            let behavior = FlagBehavior::from_keyword(behavior)
                .ok_or_else(|| self.error(format!("unknown flag behavior '{behavior}'")))?;
            let key = self.parse_string()?;
            self.expect('=')?;
            let value = self.parse_int()?;
            self.module.flags.push(ModuleFlag {
                behavior,
                key,
                value,
            });
        } else if self.try_keyword("global") {
            let global = self.parse_global()?;
            self.module.globals.push(global);
        } else if self.try_keyword("declare") {
            let linkage = self.parse_linkage();
            let (name, params) = self.parse_signature()?;
            self.module
                .functions
                .push(Function::declare(name, params).with_linkage(linkage));
        } else if self.try_keyword("define") {
            let linkage = self.parse_linkage();
            let (name, params) = self.parse_signature()?;
            let blocks = self.parse_body()?;
            self.module
                .functions
                .push(Function::new(name, params, blocks).with_linkage(linkage));
        } else {
            return Err(self.error("expected top-level item"));
        }
        Ok(())
    }

    fn parse_linkage(&mut self) -> Linkage {
        if self.try_keyword("internal") {
            Linkage::Internal
        } else {
            Linkage::External
        }
    }

    fn parse_global(&mut self) -> Result<Global, ParseError> {
        let linkage = self.parse_linkage();
        let constant = self.try_keyword("constant");
        let name = self.parse_symbol()?;
        self.expect('=')?;
        self.expect('[')?;
        let mut init = Vec::new();
        if !self.try_read(']') {
            loop {
                init.push(self.parse_int()?);
                if self.try_read(']') {
                    break;
                }
                self.expect(',')?;
            }
        }
        Ok(Global {
            name,
            linkage,
            constant,
            init,
        })
    }

    fn parse_signature(&mut self) -> Result<(String, Vec<Value>), ParseError> {
        let name = self.parse_symbol()?;
        let params = self.parse_value_list()?;
        Ok((name, params))
    }

    fn parse_value_list(&mut self) -> Result<Vec<Value>, ParseError> {
        self.expect('(')?;
        let mut values = Vec::new();
        if self.try_read(')') {
            return Ok(values);
        }
        loop {
            values.push(self.parse_value()?);
            if self.try_read(')') {
                return Ok(values);
            }
            self.expect(',')?;
        }
    }

    fn parse_body(&mut self) -> Result<Vec<Block>, ParseError> {
        self.expect('{')?;
        let mut blocks = Vec::new();
        loop {
            if self.try_read('}') {
                break;
            }
            blocks.push(self.parse_block()?);
        }
        if blocks.is_empty() {
            return Err(self.error("function body has no blocks"));
        }
        Ok(blocks)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let label = self.parse_identifier()?.to_string();
        self.expect(':')?;
        let mut insts = Vec::new();
        loop {
            if let Some(term) = self.try_parse_terminator()? {
                return Ok(Block::new(label, insts, term));
            }
            insts.push(self.parse_inst()?);
        }
    }

    fn try_parse_terminator(&mut self) -> Result<Option<Terminator>, ParseError> {
        if self.try_keyword("ret") {
            self.skip_whitespace();
            // `ret %v` vs a bare `ret` followed by the next label or `}`.
            if self.current_char() == Some('%') {
                return Ok(Some(Terminator::Ret(Some(self.parse_value()?))));
            }
            return Ok(Some(Terminator::Ret(None)));
        }
        if self.try_keyword("br") {
            let dest = self.parse_identifier()?.to_string();
            return Ok(Some(Terminator::Br(dest)));
        }
        if self.try_keyword("condbr") {
            let cond = self.parse_value()?;
            self.expect(',')?;
            let then_dest = self.parse_identifier()?.to_string();
            self.expect(',')?;
            let else_dest = self.parse_identifier()?.to_string();
            return Ok(Some(Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            }));
        }
        if self.try_keyword("unreachable") {
            return Ok(Some(Terminator::Unreachable));
        }
        Ok(None)
    }

    fn parse_inst(&mut self) -> Result<Inst, ParseError> {
        self.skip_whitespace();
        let result = if self.current_char() == Some('%') {
            let value = self.parse_value()?;
            self.expect('=')?;
            Some(value)
        } else {
            None
        };

        if self.current_char() == Some('}') || self.is_eof() {
            return Err(self.error("block is missing a terminator"));
        }
        // A label here means the previous block ran into the next one.
        if self.peek_label() {
            return Err(self.error("block is missing a terminator"));
        }

        let opcode = self.parse_identifier()?;
        let op = match opcode {
            "const" => Op::Const(self.parse_int()?),
            "load" => Op::Load(self.parse_value()?),
            "store" => {
                let value = self.parse_value()?;
                self.expect(',')?;
                let ptr = self.parse_value()?;
                Op::Store { value, ptr }
            }
            "call" => {
                let callee = self.parse_symbol()?;
                let args = self.parse_value_list()?;
                Op::Call { callee, args }
            }
            "addr" => Op::Addr(self.parse_symbol()?),
            "rc.retain" => Op::Retain(self.parse_value()?),
            "rc.release" => Op::Release(self.parse_value()?),
            other => match BinaryOp::from_mnemonic(other) {
                Some(bin) => {
                    let lhs = self.parse_value()?;
                    self.expect(',')?;
                    let rhs = self.parse_value()?;
                    Op::Binary(bin, lhs, rhs)
                }
                None => return Err(self.error(format!("unknown instruction '{other}'"))),
            },
        };
        Ok(Inst::new(result, op))
    }

    fn peek_label(&self) -> bool {
        let mut offset = 0;
        while let Some(ch) = self.peek_char(offset) {
            if !is_ident_char(ch) {
                return offset > 0 && ch == ':';
            }
            offset += 1;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
; leading comment
source_filename = "unit"
target triple = "x86_64-unknown-linux-gnu"
target datalayout = "e-m:e-i64:64-n8:16:32:64-S128"
!flag warning "Dwarf Version" = 3

global @counter = [0]
global internal constant @table = [1, -2, 3]

declare @ext(%a, %b)

define internal @pick(%c, %x) {
entry:
  condbr %c, yes, no
yes:
  ret %x
no:
  %z = const -7
  ret %z
}

define @main() {
entry:
  %p = addr @counter
  rc.retain %p
  %v = load %p
  store %v, %p
  call @ext(%v, %p)
  %r = call @pick(%v, %v)
  rc.release %p
  ret
}
"#;

    #[test]
    fn test_parse_sample() {
        let module = parse_module(SAMPLE).unwrap();
        assert_eq!(module.name, "unit");
        assert_eq!(module.target_triple, "x86_64-unknown-linux-gnu");
        assert_eq!(module.flags.len(), 1);
        assert_eq!(module.global_names(), vec!["counter", "table"]);
        assert_eq!(module.global("table").unwrap().init, vec![1, -2, 3]);
        assert_eq!(module.function_names(), vec!["ext", "pick", "main"]);
        assert!(module.function("ext").unwrap().is_declaration());

        let pick = module.function("pick").unwrap();
        assert_eq!(pick.linkage, Linkage::Internal);
        assert_eq!(pick.blocks.len(), 3);

        let main = module.function("main").unwrap();
        assert_eq!(main.blocks[0].insts.len(), 7);
        assert_eq!(main.blocks[0].term, Terminator::Ret(None));
    }

    #[test]
    fn test_print_parse_is_stable() {
        let module = parse_module(SAMPLE).unwrap();
        let printed = module.to_string();
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(reparsed, module);
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn test_missing_terminator() {
        let err = parse_module("define @f() {\nentry:\n  %a = const 1\n}\n").unwrap_err();
        assert!(err.message.contains("terminator"), "{err}");
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_unknown_instruction() {
        let err = parse_module("define @f() {\nentry:\n  %a = frob %b\n  ret\n}").unwrap_err();
        assert!(err.message.contains("frob"));
    }
}
