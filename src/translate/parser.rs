use crate::error::TranslateError;
use crate::translate::ast::{BinOp, CmpOp, Expr, FunctionDef, Stmt, UnaryOp};
use crate::translate::source::{logical_lines, LogicalLine};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
    Bool(bool),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Arrow,
    Assign,
    /// Compound assignment such as `+=`
    AugAssign(BinOp),
    Op(BinOp),
    Cmp(CmpOp),
}

// Tokenizer over one logical line
pub fn tokenize(routine: &str, line: &LogicalLine) -> Result<Vec<Token>, TranslateError> {
    let error = |message: String| TranslateError::syntax(routine, line.number, message);
    let mut toks = Vec::new();
    let mut chars = line.text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '+' || d == '-') && (num.ends_with('e') || num.ends_with('E'));
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || d == '_' || exponent_sign {
                    if d != '_' {
                        num.push(d);
                    }
                    chars.next();
                } else {
                    break;
                }
            }
            let is_real = num.contains(['.', 'e', 'E']);
            let token = if is_real {
                num.parse::<f64>().map(Token::Real).ok()
            } else {
                num.parse::<i64>().map(Token::Int).ok()
            };
            toks.push(token.ok_or_else(|| error(format!("invalid number '{}'", num)))?);
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut id = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_alphanumeric() || d == '_' {
                    id.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            toks.push(match id.as_str() {
                "True" => Token::Bool(true),
                "False" => Token::Bool(false),
                _ => Token::Name(id),
            });
            continue;
        }

        chars.next();
        let next = chars.peek().copied();
        let token = match (c, next) {
            ('.', Some(d)) if d.is_ascii_digit() => {
                let mut num = String::from("0.");
                while let Some(&d) = chars.peek() {
                    let exponent_sign =
                        (d == '+' || d == '-') && (num.ends_with('e') || num.ends_with('E'));
                    if d.is_ascii_digit() || d == 'e' || d == 'E' || exponent_sign {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                num.parse::<f64>()
                    .map(Token::Real)
                    .map_err(|_| error(format!("invalid number '{}'", num)))?
            }
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('[', _) => Token::LBracket,
            (']', _) => Token::RBracket,
            (',', _) => Token::Comma,
            (':', _) => Token::Colon,
            ('.', _) => Token::Dot,
            ('-', Some('>')) => take(&mut chars, Token::Arrow),
            ('*', Some('*')) => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    Token::AugAssign(BinOp::Pow)
                } else {
                    Token::Op(BinOp::Pow)
                }
            }
            ('/', Some('/')) => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    Token::AugAssign(BinOp::FloorDiv)
                } else {
                    Token::Op(BinOp::FloorDiv)
                }
            }
            ('+', Some('=')) => take(&mut chars, Token::AugAssign(BinOp::Add)),
            ('-', Some('=')) => take(&mut chars, Token::AugAssign(BinOp::Sub)),
            ('*', Some('=')) => take(&mut chars, Token::AugAssign(BinOp::Mul)),
            ('/', Some('=')) => take(&mut chars, Token::AugAssign(BinOp::Div)),
            ('%', Some('=')) => take(&mut chars, Token::AugAssign(BinOp::Mod)),
            ('+', _) => Token::Op(BinOp::Add),
            ('-', _) => Token::Op(BinOp::Sub),
            ('*', _) => Token::Op(BinOp::Mul),
            ('/', _) => Token::Op(BinOp::Div),
            ('%', _) => Token::Op(BinOp::Mod),
            ('<', Some('=')) => take(&mut chars, Token::Cmp(CmpOp::Le)),
            ('>', Some('=')) => take(&mut chars, Token::Cmp(CmpOp::Ge)),
            ('=', Some('=')) => take(&mut chars, Token::Cmp(CmpOp::Eq)),
            ('!', Some('=')) => take(&mut chars, Token::Cmp(CmpOp::Ne)),
            ('<', _) => Token::Cmp(CmpOp::Lt),
            ('>', _) => Token::Cmp(CmpOp::Gt),
            ('=', _) => Token::Assign,
            (other, _) => return Err(error(format!("unexpected character '{}'", other))),
        };
        toks.push(token);
    }
    Ok(toks)
}

fn take(chars: &mut std::iter::Peekable<std::str::Chars>, tok: Token) -> Token {
    chars.next();
    tok
}

/// Parse the single `def` of a routine's source
pub fn parse_routine(routine: &str, source: &str) -> Result<FunctionDef, TranslateError> {
    let lines = logical_lines(routine, source)?;
    let mut tokenized = Vec::with_capacity(lines.len());
    for line in &lines {
        tokenized.push((line.clone(), tokenize(routine, line)?));
    }
    let mut parser = BlockParser {
        routine,
        lines: tokenized,
        pos: 0,
    };
    parser.function()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════════

struct BlockParser<'a> {
    routine: &'a str,
    lines: Vec<(LogicalLine, Vec<Token>)>,
    pos: usize,
}

impl BlockParser<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> TranslateError {
        TranslateError::syntax(self.routine, line, message)
    }

    fn function(&mut self) -> Result<FunctionDef, TranslateError> {
        let Some((line, tokens)) = self.lines.first().cloned() else {
            return Err(self.error(1, "empty routine"));
        };
        let mut p = Parser::new(self.routine, line.number, &tokens);
        p.keyword("def")?;
        let name = p.name()?;
        p.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        while p.peek() != Some(&Token::RParen) {
            params.push(p.name()?);
            if p.eat(&Token::Colon) {
                p.skip_annotation();
            }
            if p.peek() == Some(&Token::Assign) {
                return Err(p.error("default parameter values are not supported"));
            }
            if !p.eat(&Token::Comma) {
                break;
            }
        }
        p.expect(&Token::RParen, "')'")?;
        if p.eat(&Token::Arrow) {
            p.skip_annotation();
        }
        p.expect(&Token::Colon, "':'")?;
        p.end()?;

        self.pos = 1;
        let body = self.block(line.indent, line.number)?;
        if self.pos < self.lines.len() {
            let number = self.lines[self.pos].0.number;
            return Err(self.error(number, "unexpected statement after the routine body"));
        }
        Ok(FunctionDef { name, params, body })
    }

    /// Statements indented deeper than `parent`, all at the same level
    fn block(&mut self, parent: usize, header: usize) -> Result<Vec<Stmt>, TranslateError> {
        let indent = match self.lines.get(self.pos) {
            Some((line, _)) if line.indent > parent => line.indent,
            _ => return Err(self.error(header, "expected an indented block")),
        };
        let mut body = Vec::new();
        while let Some((line, _)) = self.lines.get(self.pos) {
            if line.indent < indent {
                if line.indent > parent {
                    return Err(self.error(line.number, "inconsistent dedent"));
                }
                break;
            }
            if line.indent > indent {
                return Err(self.error(line.number, "unexpected indent"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    /// Body of a compound statement: either inline after `:` or an indented block
    fn suite(&mut self, p: &mut Parser, indent: usize, number: usize) -> Result<Vec<Stmt>, TranslateError> {
        if p.at_end() {
            self.block(indent, number)
        } else {
            Ok(vec![p.simple_statement()?])
        }
    }

    fn statement(&mut self) -> Result<Stmt, TranslateError> {
        let (line, tokens) = self.lines[self.pos].clone();
        self.pos += 1;
        let mut p = Parser::new(self.routine, line.number, &tokens);

        match p.peek_name() {
            Some("if") => {
                p.next();
                let cond = p.expr()?;
                p.expect(&Token::Colon, "':'")?;
                let mut branches = vec![(cond, self.suite(&mut p, line.indent, line.number)?)];
                let mut otherwise = Vec::new();
                while let Some((next, tokens)) = self.lines.get(self.pos).cloned() {
                    if next.indent != line.indent {
                        break;
                    }
                    let mut p = Parser::new(self.routine, next.number, &tokens);
                    match p.peek_name() {
                        Some("elif") => {
                            self.pos += 1;
                            p.next();
                            let cond = p.expr()?;
                            p.expect(&Token::Colon, "':'")?;
                            branches.push((cond, self.suite(&mut p, next.indent, next.number)?));
                        }
                        Some("else") => {
                            self.pos += 1;
                            p.next();
                            p.expect(&Token::Colon, "':'")?;
                            otherwise = self.suite(&mut p, next.indent, next.number)?;
                            break;
                        }
                        _ => break,
                    }
                }
                Ok(Stmt::If {
                    branches,
                    otherwise,
                })
            }
            Some("for") => {
                p.next();
                let var = p.name()?;
                p.keyword("in")?;
                p.keyword("range")?;
                p.expect(&Token::LParen, "'('")?;
                let mut args = vec![p.expr()?];
                while p.eat(&Token::Comma) {
                    args.push(p.expr()?);
                }
                p.expect(&Token::RParen, "')'")?;
                p.expect(&Token::Colon, "':'")?;
                let body = self.suite(&mut p, line.indent, line.number)?;
                let mut args = args.into_iter();
                let (start, stop, step) = match (args.next(), args.next(), args.next(), args.next()) {
                    (Some(stop), None, None, None) => (None, stop, None),
                    (Some(start), Some(stop), None, None) => (Some(start), stop, None),
                    (Some(start), Some(stop), Some(step), None) => (Some(start), stop, Some(step)),
                    _ => return Err(self.error(line.number, "range() takes one to three arguments")),
                };
                if let Some(Expr::Unary {
                    op: UnaryOp::Neg, ..
                }) = step
                {
                    return Err(self.error(line.number, "negative range steps are not supported"));
                }
                Ok(Stmt::For {
                    var,
                    start,
                    stop,
                    step,
                    body,
                })
            }
            Some("while") => {
                p.next();
                let cond = p.expr()?;
                p.expect(&Token::Colon, "':'")?;
                let body = self.suite(&mut p, line.indent, line.number)?;
                Ok(Stmt::While { cond, body })
            }
            Some("elif") | Some("else") => Err(p.error("'elif' or 'else' without 'if'")),
            Some("def") => Err(p.error("nested functions are not supported")),
            _ => {
                let stmt = p.simple_statement()?;
                p.end()?;
                Ok(stmt)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Parser<'t> {
    routine: &'t str,
    line: usize,
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    pub fn new(routine: &'t str, line: usize, tokens: &'t [Token]) -> Self {
        Self {
            routine,
            line,
            tokens,
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> TranslateError {
        TranslateError::syntax(self.routine, self.line, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_name(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Name(n)) => Some(n.as_str()),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<&Token> {
        let r = self.tokens.get(self.pos);
        if r.is_some() {
            self.pos += 1;
        }
        r
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token, what: &str) -> Result<(), TranslateError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn keyword(&mut self, word: &str) -> Result<(), TranslateError> {
        if self.peek_name() == Some(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {:?}", word, self.peek())))
        }
    }

    fn name(&mut self) -> Result<String, TranslateError> {
        match self.next().cloned() {
            Some(Token::Name(n)) => Ok(n),
            other => Err(self.error(format!("expected a name, found {:?}", other))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn end(&self) -> Result<(), TranslateError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("unexpected {:?}", tok))),
        }
    }

    /// Skip a type annotation up to the next top-level `,`, `)` or `:`
    fn skip_annotation(&mut self) {
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket if depth > 0 => depth -= 1,
                Token::Comma | Token::RParen | Token::Colon if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
    }

    pub fn simple_statement(&mut self) -> Result<Stmt, TranslateError> {
        let stmt = match self.peek_name() {
            Some("pass") => {
                self.next();
                Stmt::Pass
            }
            Some("break") => {
                self.next();
                Stmt::Break
            }
            Some("continue") => {
                self.next();
                Stmt::Continue
            }
            Some("return") => {
                self.next();
                if self.at_end() || self.peek_name() == Some("None") {
                    self.eat(&Token::Name("None".to_string()));
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.expr()?))
                }
            }
            _ => {
                let target = self.expr()?;
                match self.peek().cloned() {
                    Some(Token::Assign) => {
                        self.next();
                        let value = self.expr()?;
                        if self.peek() == Some(&Token::Assign) {
                            return Err(self.error("chained assignments are not supported"));
                        }
                        Stmt::Assign { target, value }
                    }
                    Some(Token::AugAssign(op)) => {
                        self.next();
                        let value = self.expr()?;
                        Stmt::AugAssign { target, op, value }
                    }
                    _ => Stmt::Expr(target),
                }
            }
        };
        self.end()?;
        Ok(stmt)
    }

    pub fn expr(&mut self) -> Result<Expr, TranslateError> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, TranslateError> {
        let then = self.or()?;
        if self.peek_name() == Some("if") {
            self.next();
            let cond = self.or()?;
            self.keyword("else")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or(&mut self) -> Result<Expr, TranslateError> {
        let mut lhs = self.and()?;
        while self.peek_name() == Some("or") {
            self.next();
            lhs = Expr::binary(BinOp::Or, lhs, self.and()?);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, TranslateError> {
        let mut lhs = self.not()?;
        while self.peek_name() == Some("and") {
            self.next();
            lhs = Expr::binary(BinOp::And, lhs, self.not()?);
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, TranslateError> {
        if self.peek_name() == Some("not") {
            self.next();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(self.not()?),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, TranslateError> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        while let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.next();
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn additive(&mut self) -> Result<Expr, TranslateError> {
        let mut lhs = self.multiplicative()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.next();
            lhs = Expr::binary(op, lhs, self.multiplicative()?);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, TranslateError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod))) =
            self.peek().cloned()
        {
            self.next();
            lhs = Expr::binary(op, lhs, self.unary()?);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, TranslateError> {
        let op = match self.peek() {
            Some(Token::Op(BinOp::Sub)) => UnaryOp::Neg,
            Some(Token::Op(BinOp::Add)) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.next();
        Ok(Expr::Unary {
            op,
            operand: Box::new(self.unary()?),
        })
    }

    // `**` is right-associative and binds tighter than a unary minus on its left
    fn power(&mut self) -> Result<Expr, TranslateError> {
        let base = self.postfix()?;
        if self.eat(&Token::Op(BinOp::Pow)) {
            let exponent = self.unary()?;
            return Ok(Expr::binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, TranslateError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    let attr = self.name()?;
                    expr = Expr::Attr(Box::new(expr), attr);
                }
                Some(Token::LParen) => {
                    self.next();
                    let mut args = Vec::new();
                    while self.peek() != Some(&Token::RParen) {
                        args.push(self.expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Some(Token::LBracket) => {
                    self.next();
                    let mut idx = vec![self.expr()?];
                    while self.eat(&Token::Comma) {
                        idx.push(self.expr()?);
                    }
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), idx);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, TranslateError> {
        match self.next().cloned() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Real(v)) => Ok(Expr::Real(v)),
            Some(Token::Bool(b)) => Ok(Expr::Bool(b)),
            Some(Token::Name(n)) => match n.as_str() {
                "if" | "else" | "and" | "or" | "not" | "for" | "in" | "while" | "return"
                | "lambda" | "None" => Err(self.error(format!("unexpected keyword '{}'", n))),
                _ => Ok(Expr::Name(n)),
            },
            Some(Token::LParen) => {
                let inner = self.expr()?;
                if self.peek() == Some(&Token::Comma) {
                    return Err(self.error("tuples are not supported"));
                }
                self.expect(&Token::RParen, "')'")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(self.error(format!("expected an expression, found {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> LogicalLine {
        LogicalLine {
            number: 1,
            indent: 0,
            text: text.to_string(),
        }
    }

    fn parse_expr(text: &str) -> Expr {
        let tokens = tokenize("t", &line(text)).unwrap();
        let mut parser = Parser::new("t", 1, &tokens);
        let expr = parser.expr().unwrap();
        parser.end().unwrap();
        expr
    }

    #[test]
    fn test_tokenize_operators_and_numbers() {
        let tokens = tokenize("t", &line("x **= 1.5e-3 // 2 -> .5")).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("x".into()),
                Token::AugAssign(BinOp::Pow),
                Token::Real(1.5e-3),
                Token::Op(BinOp::FloorDiv),
                Token::Int(2),
                Token::Arrow,
                Token::Real(0.5),
            ]
        );
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let expr = parse_expr("-a**2");
        assert!(matches!(
            expr,
            Expr::Unary { op: UnaryOp::Neg, operand } if matches!(*operand, Expr::Binary { op: BinOp::Pow, .. })
        ));
    }

    #[test]
    fn test_precedence_and_ternary() {
        let expr = parse_expr("a + b * c if x < y < z else 0");
        let Expr::Ternary { cond, then, .. } = expr else {
            panic!("expected a conditional expression");
        };
        assert!(matches!(*cond, Expr::Compare { ref rest, .. } if rest.len() == 2));
        assert!(matches!(*then, Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_parse_routine_structure() {
        let source = "\
def calc_q_v1(model, k: int) -> None:
    flu = model.sequences.fluxes.fastaccess
    for i in range(1, 10, 2):
        if flu.q[i] > 0.0:
            flu.q[i] += 1
        elif flu.q[i] < 0.0: flu.q[i] = 0.0
        else:
            pass
    while k > 0:
        k -= 1
";
        let def = parse_routine("calc_q_v1", source).unwrap();
        assert_eq!(def.name, "calc_q_v1");
        assert_eq!(def.params, vec!["model", "k"]);
        assert_eq!(def.body.len(), 3);
        let Stmt::For { start, step, body, .. } = &def.body[1] else {
            panic!("expected a for loop");
        };
        assert_eq!(start, &Some(Expr::Int(1)));
        assert_eq!(step, &Some(Expr::Int(2)));
        let Stmt::If { branches, otherwise } = &body[0] else {
            panic!("expected an if statement");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise, &vec![Stmt::Pass]);
        assert!(matches!(def.body[2], Stmt::While { .. }));
    }

    #[test]
    fn test_negative_step_is_rejected() {
        let source = "def f(model):\n    for i in range(10, 0, -1):\n        pass\n";
        let err = parse_routine("f", source).unwrap_err();
        assert!(err.to_string().contains("negative range steps"));
    }

    #[test]
    fn test_bad_indentation() {
        let source = "def f(model):\n        x = 1\n    y = 2\n";
        assert!(parse_routine("f", source).is_err());
        assert!(parse_routine("f", "def f(model):\nx = 1\n").is_err());
    }
}
