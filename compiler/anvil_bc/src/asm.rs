//! Textual `.anv` assembler.
//!
//! ```text
//! module demo
//!
//! global counter: int = 0
//!
//! fn sum(n: int) -> int {
//!   locals 3
//!   iconst 0
//!   istore 1
//!   iconst 0
//!   istore 2
//! loop:
//!   iload 2
//!   iload 0
//!   if_icmpge done
//!   ...
//!   goto loop
//! done:
//!   iload 1
//!   iret
//! }
//! ```
//!
//! Instructions are self-delimiting (each mnemonic has a fixed operand
//! shape), so whitespace and newlines carry no meaning. Labels are
//! `name:` and branch operands are label names, backpatched in a single
//! pass. `call` and `getglobal`/`setglobal` operands are names resolved
//! after the whole module is read, so forward references are fine.

use std::fmt;

use logos::Logos;
use rustc_hash::FxHashMap;

use crate::insn::Insn;
use crate::kind::{ArrayKind, Kind};
use crate::module::{Global, Method, Module};
use crate::value::Value;

#[cfg(test)]
mod tests;

/// Assembly failure with 1-based line/column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsmError {
    pub line: u32,
    pub col: u32,
    pub msg: String,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.msg)
    }
}

impl std::error::Error for AsmError {}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
enum RawTok {
    #[token("module")]
    Module,
    #[token("global")]
    Global,
    #[token("fn")]
    Fn,
    #[token("locals")]
    Locals,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Eq,
    #[token("->")]
    Arrow,

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|-?inf|nan")]
    Float,
    #[regex(r"-?0x[0-9a-fA-F]+|-?[0-9]+")]
    Int,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tok<'src> {
    raw: RawTok,
    text: &'src str,
    offset: usize,
}

struct Tokens<'src> {
    src: &'src str,
    toks: Vec<Tok<'src>>,
    pos: usize,
}

impl<'src> Tokens<'src> {
    fn lex(src: &'src str) -> Result<Self, AsmError> {
        let mut toks = Vec::new();
        let mut lexer = RawTok::lexer(src);
        while let Some(item) = lexer.next() {
            let span = lexer.span();
            match item {
                Ok(raw) => toks.push(Tok {
                    raw,
                    text: &src[span.clone()],
                    offset: span.start,
                }),
                Err(()) => {
                    return Err(err_at(src, span.start, "unrecognized token".into()));
                }
            }
        }
        Ok(Tokens { src, toks, pos: 0 })
    }

    fn peek(&self) -> Option<Tok<'src>> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Tok<'src>> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error(&self, msg: String) -> AsmError {
        let offset = self
            .toks
            .get(self.pos.saturating_sub(1))
            .map_or(self.src.len(), |t| t.offset);
        err_at(self.src, offset, msg)
    }

    fn expect(&mut self, raw: RawTok, what: &str) -> Result<Tok<'src>, AsmError> {
        match self.next() {
            Some(t) if t.raw == raw => Ok(t),
            Some(t) => Err(err_at(
                self.src,
                t.offset,
                format!("expected {what}, found `{}`", t.text),
            )),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<&'src str, AsmError> {
        Ok(self.expect(RawTok::Ident, what)?.text)
    }
}

fn err_at(src: &str, offset: usize, msg: String) -> AsmError {
    let mut line = 1u32;
    let mut col = 1u32;
    for (i, ch) in src.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    AsmError { line, col, msg }
}

/// Assemble `.anv` source into a module. The result is *not* verified;
/// callers run [`crate::verify`] next.
pub fn assemble(src: &str) -> Result<Module, AsmError> {
    Assembler {
        toks: Tokens::lex(src)?,
        module: Module::new(""),
        call_fixups: Vec::new(),
        global_fixups: Vec::new(),
    }
    .run()
}

struct Assembler<'src> {
    toks: Tokens<'src>,
    module: Module,
    /// (method index, insn index, callee name, src offset)
    call_fixups: Vec<(usize, usize, &'src str, usize)>,
    /// (method index, insn index, global name, src offset)
    global_fixups: Vec<(usize, usize, &'src str, usize)>,
}

impl<'src> Assembler<'src> {
    fn run(mut self) -> Result<Module, AsmError> {
        self.toks.expect(RawTok::Module, "`module`")?;
        self.module.name = self.toks.expect_ident("module name")?.to_string();

        while let Some(tok) = self.toks.next() {
            match tok.raw {
                RawTok::Global => self.parse_global()?,
                RawTok::Fn => self.parse_fn()?,
                _ => {
                    return Err(err_at(
                        self.toks.src,
                        tok.offset,
                        format!("expected `global` or `fn`, found `{}`", tok.text),
                    ))
                }
            }
        }

        self.apply_fixups()?;
        Ok(self.module)
    }

    fn apply_fixups(&mut self) -> Result<(), AsmError> {
        for (m, i, name, offset) in std::mem::take(&mut self.call_fixups) {
            let Some(mid) = self.module.method_id(name) else {
                return Err(err_at(
                    self.toks.src,
                    offset,
                    format!("call to unknown function `{name}`"),
                ));
            };
            self.module.methods[m].code[i] = Insn::Call(mid.raw());
        }
        for (m, i, name, offset) in std::mem::take(&mut self.global_fixups) {
            let Some(gid) = self.module.global_id(name) else {
                return Err(err_at(
                    self.toks.src,
                    offset,
                    format!("unknown global `{name}`"),
                ));
            };
            let insn = &mut self.module.methods[m].code[i];
            *insn = match insn {
                Insn::GetGlobal(_) => Insn::GetGlobal(gid),
                _ => Insn::SetGlobal(gid),
            };
        }
        Ok(())
    }

    fn parse_kind(&mut self) -> Result<Kind, AsmError> {
        let name = self.toks.expect_ident("a type")?;
        let base = match name {
            "int" => Kind::I32,
            "long" => Kind::I64,
            "double" => Kind::F64,
            other => {
                return Err(self.toks.error(format!("unknown type `{other}`")));
            }
        };
        if matches!(self.toks.peek(), Some(t) if t.raw == RawTok::LBracket) {
            self.toks.next();
            self.toks.expect(RawTok::RBracket, "`]`")?;
            let ak = match base {
                Kind::I32 => ArrayKind::I32,
                Kind::I64 => ArrayKind::I64,
                _ => ArrayKind::F64,
            };
            return Ok(Kind::Ref(ak));
        }
        Ok(base)
    }

    fn parse_int_lit<T>(&mut self, what: &str) -> Result<T, AsmError>
    where
        T: TryFrom<i64>,
    {
        let tok = self.toks.expect(RawTok::Int, what)?;
        let parsed = if let Some(hex) = tok.text.strip_prefix("0x") {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(hex) = tok.text.strip_prefix("-0x") {
            i64::from_str_radix(hex, 16).ok().map(|v| -v)
        } else {
            tok.text.parse::<i64>().ok()
        };
        let Some(v) = parsed else {
            return Err(err_at(
                self.toks.src,
                tok.offset,
                format!("integer literal out of range: `{}`", tok.text),
            ));
        };
        T::try_from(v).map_err(|_| {
            err_at(
                self.toks.src,
                tok.offset,
                format!("{what} out of range: `{}`", tok.text),
            )
        })
    }

    fn parse_i32_lit(&mut self) -> Result<i32, AsmError> {
        // Accept the full u32 hex range so bit patterns like 0x80000000 work.
        let tok = self.toks.expect(RawTok::Int, "an int literal")?;
        let parsed: Option<i32> = if let Some(hex) = tok.text.strip_prefix("0x") {
            u32::from_str_radix(hex, 16).ok().map(|v| v as i32)
        } else if let Some(hex) = tok.text.strip_prefix("-0x") {
            i64::from_str_radix(hex, 16)
                .ok()
                .and_then(|v| i32::try_from(-v).ok())
        } else {
            tok.text
                .parse::<i64>()
                .ok()
                .and_then(|v| i32::try_from(v).ok())
        };
        parsed.ok_or_else(|| {
            err_at(
                self.toks.src,
                tok.offset,
                format!("int literal out of range: `{}`", tok.text),
            )
        })
    }

    fn parse_i64_lit(&mut self) -> Result<i64, AsmError> {
        let tok = self.toks.expect(RawTok::Int, "a long literal")?;
        let parsed: Option<i64> = if let Some(hex) = tok.text.strip_prefix("0x") {
            u64::from_str_radix(hex, 16).ok().map(|v| v as i64)
        } else if let Some(hex) = tok.text.strip_prefix("-0x") {
            i128::from_str_radix(hex, 16)
                .ok()
                .and_then(|v| i64::try_from(-v).ok())
        } else {
            tok.text.parse::<i64>().ok()
        };
        parsed.ok_or_else(|| {
            err_at(
                self.toks.src,
                tok.offset,
                format!("long literal out of range: `{}`", tok.text),
            )
        })
    }

    fn parse_f64_lit(&mut self) -> Result<f64, AsmError> {
        let tok = match self.toks.peek() {
            Some(t) if t.raw == RawTok::Float || t.raw == RawTok::Int => {
                self.toks.next();
                t
            }
            Some(t) => {
                return Err(err_at(
                    self.toks.src,
                    t.offset,
                    format!("expected a double literal, found `{}`", t.text),
                ))
            }
            None => {
                return Err(self.toks.error("expected a double literal".into()));
            }
        };
        match tok.text {
            "nan" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            text => text.parse::<f64>().map_err(|_| {
                err_at(
                    self.toks.src,
                    tok.offset,
                    format!("bad double literal `{text}`"),
                )
            }),
        }
    }

    fn parse_global(&mut self) -> Result<(), AsmError> {
        let name = self.toks.expect_ident("global name")?.to_string();
        self.toks.expect(RawTok::Colon, "`:`")?;
        let kind = self.parse_kind()?;
        self.toks.expect(RawTok::Eq, "`=`")?;
        let init = match kind {
            Kind::I32 => Value::I32(self.parse_i32_lit()?),
            Kind::I64 => Value::I64(self.parse_i64_lit()?),
            Kind::F64 => Value::F64(self.parse_f64_lit()?),
            Kind::Ref(_) => {
                let t = self.toks.expect_ident("`null`")?;
                if t != "null" {
                    return Err(self
                        .toks
                        .error("reference globals can only be initialized to null".into()));
                }
                Value::Null
            }
        };
        self.module.push_global(Global { name, kind, init });
        Ok(())
    }

    fn parse_array_kind(&mut self) -> Result<ArrayKind, AsmError> {
        let name = self.toks.expect_ident("an element type")?;
        match name {
            "int" => Ok(ArrayKind::I32),
            "long" => Ok(ArrayKind::I64),
            "double" => Ok(ArrayKind::F64),
            other => Err(self.toks.error(format!("unknown element type `{other}`"))),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn parse_fn(&mut self) -> Result<(), AsmError> {
        let name = self.toks.expect_ident("function name")?.to_string();
        self.toks.expect(RawTok::LParen, "`(`")?;
        let mut params = Vec::new();
        if !matches!(self.toks.peek(), Some(t) if t.raw == RawTok::RParen) {
            loop {
                // Parameters may be `name: type` or a bare type.
                if matches!(self.toks.peek(), Some(t) if t.raw == RawTok::Ident)
                    && matches!(
                        self.toks.toks.get(self.toks.pos + 1),
                        Some(t) if t.raw == RawTok::Colon
                    )
                {
                    self.toks.next();
                    self.toks.next();
                }
                params.push(self.parse_kind()?);
                match self.toks.peek() {
                    Some(t) if t.raw == RawTok::Comma => {
                        self.toks.next();
                    }
                    _ => break,
                }
            }
        }
        self.toks.expect(RawTok::RParen, "`)`")?;
        let ret = if matches!(self.toks.peek(), Some(t) if t.raw == RawTok::Arrow) {
            self.toks.next();
            let peeked = self.toks.peek();
            if matches!(peeked, Some(t) if t.text == "void") {
                self.toks.next();
                None
            } else {
                Some(self.parse_kind()?)
            }
        } else {
            None
        };
        self.toks.expect(RawTok::LBrace, "`{`")?;

        let n_params = u16::try_from(params.len()).unwrap_or(u16::MAX);
        let mut max_locals = n_params;
        if matches!(self.toks.peek(), Some(t) if t.raw == RawTok::Locals) {
            self.toks.next();
            max_locals = self.parse_int_lit::<u16>("locals count")?;
        }

        let m_index = self.module.methods.len();
        let mut code: Vec<Insn> = Vec::new();
        let mut labels: FxHashMap<&'src str, u32> = FxHashMap::default();
        // (insn index, label name, src offset)
        let mut label_fixups: Vec<(usize, &'src str, usize)> = Vec::new();

        loop {
            let Some(tok) = self.toks.next() else {
                return Err(self.toks.error("unterminated function body".into()));
            };
            if tok.raw == RawTok::RBrace {
                break;
            }
            if tok.raw != RawTok::Ident {
                return Err(err_at(
                    self.toks.src,
                    tok.offset,
                    format!("expected an instruction or label, found `{}`", tok.text),
                ));
            }
            // Label?
            if matches!(self.toks.peek(), Some(t) if t.raw == RawTok::Colon) {
                self.toks.next();
                let at = u32::try_from(code.len()).unwrap_or(u32::MAX);
                if labels.insert(tok.text, at).is_some() {
                    return Err(err_at(
                        self.toks.src,
                        tok.offset,
                        format!("duplicate label `{}`", tok.text),
                    ));
                }
                continue;
            }

            let insn = self.parse_insn(tok, m_index, code.len(), &mut label_fixups)?;
            code.push(insn);
        }

        for (i, label, offset) in label_fixups {
            let Some(&target) = labels.get(label) else {
                return Err(err_at(
                    self.toks.src,
                    offset,
                    format!("unknown label `{label}`"),
                ));
            };
            code[i].set_branch_target(target);
        }

        self.module.push_method(Method {
            name,
            params,
            ret,
            max_locals: max_locals.max(n_params),
            code,
        });
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn parse_insn(
        &mut self,
        tok: Tok<'src>,
        m_index: usize,
        insn_index: usize,
        label_fixups: &mut Vec<(usize, &'src str, usize)>,
    ) -> Result<Insn, AsmError> {
        let mut branch = |this: &mut Self, make: fn(u32) -> Insn| -> Result<Insn, AsmError> {
            let label = this.toks.expect(RawTok::Ident, "a label")?;
            label_fixups.push((insn_index, label.text, label.offset));
            Ok(make(0))
        };

        let insn = match tok.text {
            "iconst" => Insn::IConst(self.parse_i32_lit()?),
            "lconst" => Insn::LConst(self.parse_i64_lit()?),
            "dconst" => {
                // A hex literal is taken as raw IEEE-754 bits, so NaN
                // payloads round-trip through the disassembler.
                if let Some(t) = self.toks.peek() {
                    if t.raw == RawTok::Int && t.text.starts_with("0x") {
                        self.toks.next();
                        let bits = u64::from_str_radix(&t.text[2..], 16).map_err(|_| {
                            err_at(
                                self.toks.src,
                                t.offset,
                                format!("bad double bit pattern `{}`", t.text),
                            )
                        })?;
                        return Ok(Insn::DConst(bits));
                    }
                }
                Insn::DConst(self.parse_f64_lit()?.to_bits())
            }
            "aconst_null" => Insn::NullConst,

            "iload" => Insn::ILoad(self.parse_int_lit("local index")?),
            "lload" => Insn::LLoad(self.parse_int_lit("local index")?),
            "dload" => Insn::DLoad(self.parse_int_lit("local index")?),
            "aload" => Insn::ALoad(self.parse_int_lit("local index")?),
            "istore" => Insn::IStore(self.parse_int_lit("local index")?),
            "lstore" => Insn::LStore(self.parse_int_lit("local index")?),
            "dstore" => Insn::DStore(self.parse_int_lit("local index")?),
            "astore" => Insn::AStore(self.parse_int_lit("local index")?),

            "pop" => Insn::Pop,
            "dup" => Insn::Dup,

            "iadd" => Insn::IAdd,
            "isub" => Insn::ISub,
            "imul" => Insn::IMul,
            "idiv" => Insn::IDiv,
            "irem" => Insn::IRem,
            "ineg" => Insn::INeg,
            "iand" => Insn::IAnd,
            "ior" => Insn::IOr,
            "ixor" => Insn::IXor,
            "ishl" => Insn::IShl,
            "ishr" => Insn::IShr,
            "iushr" => Insn::IUShr,

            "ladd" => Insn::LAdd,
            "lsub" => Insn::LSub,
            "lmul" => Insn::LMul,
            "ldiv" => Insn::LDiv,
            "lrem" => Insn::LRem,
            "lneg" => Insn::LNeg,
            "land" => Insn::LAnd,
            "lor" => Insn::LOr,
            "lxor" => Insn::LXor,
            "lshl" => Insn::LShl,
            "lshr" => Insn::LShr,
            "lushr" => Insn::LUShr,
            "lcmp" => Insn::LCmp,

            "dadd" => Insn::DAdd,
            "dsub" => Insn::DSub,
            "dmul" => Insn::DMul,
            "ddiv" => Insn::DDiv,
            "drem" => Insn::DRem,
            "dneg" => Insn::DNeg,
            "dcmpl" => Insn::DCmpL,
            "dcmpg" => Insn::DCmpG,

            "i2l" => Insn::I2L,
            "l2i" => Insn::L2I,
            "i2d" => Insn::I2D,
            "d2i" => Insn::D2I,
            "l2d" => Insn::L2D,
            "d2l" => Insn::D2L,

            "goto" => branch(self, Insn::Goto)?,
            "ifeq" => branch(self, Insn::IfEq)?,
            "ifne" => branch(self, Insn::IfNe)?,
            "iflt" => branch(self, Insn::IfLt)?,
            "ifge" => branch(self, Insn::IfGe)?,
            "ifgt" => branch(self, Insn::IfGt)?,
            "ifle" => branch(self, Insn::IfLe)?,
            "if_icmpeq" => branch(self, Insn::IfICmpEq)?,
            "if_icmpne" => branch(self, Insn::IfICmpNe)?,
            "if_icmplt" => branch(self, Insn::IfICmpLt)?,
            "if_icmpge" => branch(self, Insn::IfICmpGe)?,
            "if_icmpgt" => branch(self, Insn::IfICmpGt)?,
            "if_icmple" => branch(self, Insn::IfICmpLe)?,
            "ifnull" => branch(self, Insn::IfNull)?,
            "ifnonnull" => branch(self, Insn::IfNonNull)?,

            "newarr" => Insn::NewArr(self.parse_array_kind()?),
            "arraylen" => Insn::ArrayLen,
            "iaload" => Insn::IALoad,
            "laload" => Insn::LALoad,
            "daload" => Insn::DALoad,
            "iastore" => Insn::IAStore,
            "lastore" => Insn::LAStore,
            "dastore" => Insn::DAStore,

            "getglobal" => {
                let g = self.toks.expect(RawTok::Ident, "a global name")?;
                self.global_fixups.push((m_index, insn_index, g.text, g.offset));
                Insn::GetGlobal(0)
            }
            "setglobal" => {
                let g = self.toks.expect(RawTok::Ident, "a global name")?;
                self.global_fixups.push((m_index, insn_index, g.text, g.offset));
                Insn::SetGlobal(u16::MAX)
            }
            "call" => {
                let callee = self.toks.expect(RawTok::Ident, "a function name")?;
                self.call_fixups
                    .push((m_index, insn_index, callee.text, callee.offset));
                Insn::Call(0)
            }

            "ret" => Insn::Ret,
            "iret" => Insn::IRet,
            "lret" => Insn::LRet,
            "dret" => Insn::DRet,
            "aret" => Insn::ARet,

            other => {
                return Err(err_at(
                    self.toks.src,
                    tok.offset,
                    format!("unknown instruction `{other}`"),
                ));
            }
        };
        Ok(insn)
    }
}
