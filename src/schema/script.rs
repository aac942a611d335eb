//! Snippet Compiler
//!
//! Compiles custom validation snippets written by form authors, e.g.
//!
//! ```text
//! valid = (input === "Bob") ? "Bobs are not allowed" : true;
//! ```
//!
//! into [`ExprVM`](super::expr::ExprVM) bytecode. The accepted language is a
//! small JavaScript subset: declarations, assignments, `if`/`else`, blocks,
//! the ternary, logical, equality, relational and arithmetic operators,
//! `.length`, and the string methods `indexOf(x)`, `includes(x)`, `trim()`,
//! `toLowerCase()` and `toUpperCase()`. Any other member access fails to
//! compile. The compiled program leaves the final value of `valid` on the
//! stack.

use super::expr::{BytecodeBuilder, ExprError, Opcode};

/// Maximum nesting of blocks, parentheses and unary operators
const MAX_DEPTH: usize = 64;

/// Longest punctuators first so `===` never lexes as `==` `=`
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "{", "}", ";", "?", ":", ".",
    "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

const KEYWORDS: &[&str] = &[
    "var", "let", "const", "if", "else", "true", "false", "null", "undefined",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
    newline_before: bool,
}

fn syntax(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut newline_before = false;

    while let Some(c) = source[pos..].chars().next() {
        let rest = &source[pos..];

        if c.is_whitespace() {
            newline_before |= c == '\n';
            pos += c.len_utf8();
            continue;
        }
        if rest.starts_with("//") {
            pos += rest.find('\n').unwrap_or(rest.len());
            continue;
        }
        if let Some(body) = rest.strip_prefix("/*") {
            let end = body
                .find("*/")
                .ok_or_else(|| syntax(pos, "unterminated comment"))?;
            newline_before |= body[..end].contains('\n');
            pos += end + 4;
            continue;
        }

        let offset = pos;
        let token = if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let len = number_len(rest);
            let text = &rest[..len];
            pos += len;
            Token::Number(
                text.parse::<f64>()
                    .map_err(|_| syntax(offset, format!("invalid number '{}'", text)))?,
            )
        } else if c == '"' || c == '\'' {
            let (value, len) = string_literal(rest, c).ok_or_else(|| syntax(offset, "unterminated string"))?;
            pos += len;
            Token::Str(value)
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '$'))
                .unwrap_or(rest.len());
            pos += len;
            Token::Ident(rest[..len].to_string())
        } else if let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(*p)) {
            pos += punct.len();
            Token::Punct(*punct)
        } else {
            return Err(syntax(offset, format!("unexpected character '{}'", c)));
        };

        tokens.push(Spanned {
            token,
            offset,
            newline_before,
        });
        newline_before = false;
    }

    Ok(tokens)
}

fn number_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut end = 0;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            end = exp;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    end
}

/// Returns the unescaped literal and the number of source bytes consumed
fn string_literal(rest: &str, quote: char) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Some((value, i + c.len_utf8())),
            '\n' => return None,
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    'v' => '\u{b}',
                    '0' => '\0',
                    other => other,
                });
            }
            c => value.push(c),
        }
    }

    None
}

/// Side-effect-free string methods: opcode and whether it takes one argument
fn string_method(name: &str) -> Option<(Opcode, bool)> {
    match name {
        "indexOf" => Some((Opcode::IndexOf, true)),
        "includes" => Some((Opcode::Includes, true)),
        "trim" => Some((Opcode::Trim, false)),
        "toLowerCase" => Some((Opcode::ToLowerCase, false)),
        "toUpperCase" => Some((Opcode::ToUpperCase, false)),
        _ => None,
    }
}

/// Compile snippet source into bytecode that evaluates to the final `valid`
pub fn compile(source: &str) -> Result<Vec<u8>, ExprError> {
    let tokens = tokenize(source)?;
    let mut compiler = Compiler {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        end_offset: source.len(),
        code: BytecodeBuilder::new(),
    };

    while !compiler.at_end() {
        compiler.statement()?;
    }
    compiler.code.load_var("valid")?;

    Ok(compiler.code.build())
}

struct Compiler<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
    end_offset: usize,
    code: BytecodeBuilder,
}

impl<'a> Compiler<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end_offset, |t| t.offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos).map(|t| &t.token);
        self.pos += 1;
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        let matched = self.is_punct(punct);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected '{}'", punct)))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let matched = self.is_keyword(keyword);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn identifier(&mut self) -> Result<&'a str, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(name)) if !KEYWORDS.contains(&name.as_str()) => Ok(name.as_str()),
            _ => Err(syntax(offset, "expected identifier")),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::Unsupported("nesting too deep".to_string()));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn end_statement(&mut self) -> Result<(), ExprError> {
        if self.eat_punct(";") || self.at_end() || self.is_punct("}") {
            return Ok(());
        }
        match self.tokens.get(self.pos) {
            Some(next) if next.newline_before => Ok(()),
            _ => Err(syntax(self.offset(), "expected ';'")),
        }
    }

    fn statement(&mut self) -> Result<(), ExprError> {
        self.nested(|c| {
            if c.eat_punct(";") {
                return Ok(());
            }

            if c.eat_punct("{") {
                while !c.eat_punct("}") {
                    if c.at_end() {
                        return Err(syntax(c.offset(), "expected '}'"));
                    }
                    c.statement()?;
                }
                return Ok(());
            }

            if c.eat_keyword("if") {
                c.expect_punct("(")?;
                c.assignment()?;
                c.expect_punct(")")?;
                let else_branch = c.code.jump(Opcode::JumpIfFalse);
                c.statement()?;
                if c.eat_keyword("else") {
                    let end = c.code.jump(Opcode::Jump);
                    c.code.patch_jump(else_branch)?;
                    c.statement()?;
                    c.code.patch_jump(end)?;
                } else {
                    c.code.patch_jump(else_branch)?;
                }
                return Ok(());
            }

            if c.eat_keyword("var") || c.eat_keyword("let") || c.eat_keyword("const") {
                let name = c.identifier()?;
                if c.eat_punct("=") {
                    c.assignment()?;
                } else {
                    c.code.op(Opcode::PushUndefined);
                }
                c.code.store_var(name)?;
                return c.end_statement();
            }

            c.assignment()?;
            c.code.op(Opcode::Pop);
            c.end_statement()
        })
    }

    fn assignment(&mut self) -> Result<(), ExprError> {
        self.nested(|c| {
            let is_assignment = matches!(
                (c.peek(), c.tokens.get(c.pos + 1).map(|t| &t.token)),
                (Some(Token::Ident(_)), Some(Token::Punct("=")))
            );
            if !is_assignment {
                return c.ternary();
            }

            let name = c.identifier()?;
            c.pos += 1;
            c.assignment()?;
            c.code.op(Opcode::Dup);
            c.code.store_var(name)?;
            Ok(())
        })
    }

    fn ternary(&mut self) -> Result<(), ExprError> {
        self.logical_or()?;
        if self.eat_punct("?") {
            let else_branch = self.code.jump(Opcode::JumpIfFalse);
            self.assignment()?;
            self.expect_punct(":")?;
            let end = self.code.jump(Opcode::Jump);
            self.code.patch_jump(else_branch)?;
            self.assignment()?;
            self.code.patch_jump(end)?;
        }
        Ok(())
    }

    /// `a || b` leaves `a` when truthy, otherwise `b`
    fn logical_or(&mut self) -> Result<(), ExprError> {
        self.logical_and()?;
        while self.eat_punct("||") {
            self.code.op(Opcode::Dup);
            let short_circuit = self.code.jump(Opcode::JumpIfTrue);
            self.code.op(Opcode::Pop);
            self.logical_and()?;
            self.code.patch_jump(short_circuit)?;
        }
        Ok(())
    }

    /// `a && b` leaves `a` when falsy, otherwise `b`
    fn logical_and(&mut self) -> Result<(), ExprError> {
        self.equality()?;
        while self.eat_punct("&&") {
            self.code.op(Opcode::Dup);
            let short_circuit = self.code.jump(Opcode::JumpIfFalse);
            self.code.op(Opcode::Pop);
            self.equality()?;
            self.code.patch_jump(short_circuit)?;
        }
        Ok(())
    }

    fn equality(&mut self) -> Result<(), ExprError> {
        self.binary(
            &[
                ("===", Opcode::StrictEq),
                ("!==", Opcode::StrictNe),
                ("==", Opcode::Eq),
                ("!=", Opcode::Ne),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<(), ExprError> {
        self.binary(
            &[
                ("<=", Opcode::Le),
                (">=", Opcode::Ge),
                ("<", Opcode::Lt),
                (">", Opcode::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<(), ExprError> {
        self.binary(&[("+", Opcode::Add), ("-", Opcode::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<(), ExprError> {
        self.binary(
            &[("*", Opcode::Mul), ("/", Opcode::Div), ("%", Opcode::Mod)],
            Self::unary,
        )
    }

    fn binary(
        &mut self,
        operators: &[(&str, Opcode)],
        operand: fn(&mut Self) -> Result<(), ExprError>,
    ) -> Result<(), ExprError> {
        operand(self)?;
        loop {
            let Some(opcode) = operators
                .iter()
                .find(|(punct, _)| self.is_punct(punct))
                .map(|(_, opcode)| *opcode)
            else {
                return Ok(());
            };
            self.pos += 1;
            operand(self)?;
            self.code.op(opcode);
        }
    }

    fn unary(&mut self) -> Result<(), ExprError> {
        let opcode = if self.eat_punct("!") {
            Opcode::Not
        } else if self.eat_punct("-") {
            Opcode::Neg
        } else if self.eat_punct("+") {
            Opcode::ToNumber
        } else {
            return self.postfix();
        };

        self.nested(Self::unary)?;
        self.code.op(opcode);
        Ok(())
    }

    fn postfix(&mut self) -> Result<(), ExprError> {
        self.primary()?;
        while self.eat_punct(".") {
            let offset = self.offset();
            let property = match self.advance() {
                Some(Token::Ident(property)) => property.as_str(),
                _ => return Err(syntax(offset, "expected property name")),
            };

            if property == "length" {
                self.code.op(Opcode::Length);
                continue;
            }

            let Some((opcode, takes_argument)) = string_method(property) else {
                return Err(ExprError::Unsupported(format!("property '{}'", property)));
            };
            if !self.eat_punct("(") {
                return Err(ExprError::Unsupported(format!("method '{}' without a call", property)));
            }
            if takes_argument {
                self.assignment()?;
            }
            self.expect_punct(")")?;
            self.code.op(opcode);
        }
        Ok(())
    }

    fn primary(&mut self) -> Result<(), ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => {
                self.code.push_number(*n);
            }
            Some(Token::Str(s)) => {
                self.code.push_string(s)?;
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => {
                    self.code.op(Opcode::PushTrue);
                }
                "false" => {
                    self.code.op(Opcode::PushFalse);
                }
                "null" => {
                    self.code.op(Opcode::PushNull);
                }
                "undefined" => {
                    self.code.op(Opcode::PushUndefined);
                }
                keyword if KEYWORDS.contains(&keyword) => {
                    return Err(syntax(offset, format!("unexpected keyword '{}'", keyword)));
                }
                _ => {
                    self.code.load_var(name)?;
                }
            },
            Some(Token::Punct("(")) => {
                self.assignment()?;
                self.expect_punct(")")?;
            }
            Some(Token::Punct(p)) => {
                return Err(syntax(offset, format!("unexpected token '{}'", p)));
            }
            None => return Err(syntax(offset, "unexpected end of input")),
        }
        Ok(())
    }
}
