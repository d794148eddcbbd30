//! Arithmetic expressions shared by index definitions and emitted formula
//! text. In an index definition identifiers are vocabulary attributes; in a
//! formula they are A1 cell references.

use std::convert::Infallible;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("cannot parse '{expression}' at offset {position}: {message}")]
    Parse {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("{function} takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("{function} is undefined for {value}")]
    Domain { function: &'static str, value: f64 },

    #[error("result is not a finite number")]
    NonFinite,

    #[error("'{name}' has no value")]
    MissingValue { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 3,
        }
    }

    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Ln,
    Log10,
    Exp,
    Sqrt,
    Abs,
    Min,
    Max,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name.to_ascii_lowercase().as_str() {
            "ln" => Function::Ln,
            "log10" => Function::Log10,
            "exp" => Function::Exp,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            _ => return None,
        };
        Some(function)
    }

    /// Name as spreadsheet software spells it.
    pub fn spreadsheet_name(self) -> &'static str {
        match self {
            Function::Ln => "LN",
            Function::Log10 => "LOG10",
            Function::Exp => "EXP",
            Function::Sqrt => "SQRT",
            Function::Abs => "ABS",
            Function::Min => "MIN",
            Function::Max => "MAX",
        }
    }

    fn check_arity(self, found: usize) -> Result<(), ExpressionError> {
        let (ok, expected) = match self {
            Function::Min | Function::Max => (found >= 1, "at least 1"),
            _ => (found == 1, "exactly 1"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                function: self.spreadsheet_name(),
                expected,
                found,
            })
        }
    }

    /// Applies the function to already evaluated arguments.
    pub fn apply(self, args: &[f64]) -> Result<f64, EvalError> {
        let first = args.first().copied().unwrap_or(f64::NAN);
        let domain = |value: f64| EvalError::Domain {
            function: self.spreadsheet_name(),
            value,
        };
        let value = match self {
            Function::Ln if first <= 0.0 => return Err(domain(first)),
            Function::Ln => first.ln(),
            Function::Log10 if first <= 0.0 => return Err(domain(first)),
            Function::Log10 => first.log10(),
            Function::Sqrt if first < 0.0 => return Err(domain(first)),
            Function::Sqrt => first.sqrt(),
            Function::Exp => first.exp(),
            Function::Abs => first.abs(),
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        finite(value)
    }
}

fn finite(value: f64) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}

/// Applies a binary operator with the same failure rules as a spreadsheet.
pub fn apply_binary(op: BinaryOp, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
    let value = match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div if rhs == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => lhs / rhs,
        BinaryOp::Pow if lhs == 0.0 && rhs < 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Pow => lhs.powf(rhs),
    };
    finite(value)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Reference(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn number(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Expr::Reference(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Expr::Call { function, args }
    }

    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        Self::parse_with(text, false)
    }

    /// Parses formula text with spreadsheet precedence: unary minus binds
    /// tighter than `^` and `^` is left-associative, so `-A2^2` is `(-A2)^2`.
    pub fn parse_formula(text: &str) -> Result<Self, ExpressionError> {
        Self::parse_with(text, true)
    }

    fn parse_with(text: &str, spreadsheet: bool) -> Result<Self, ExpressionError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
            spreadsheet,
        };
        let expr = parser.expression()?;
        match parser.peek() {
            None => Ok(expr),
            Some((position, token)) => Err(parser.error_at(
                *position,
                format!("unexpected {}", token.describe()),
            )),
        }
    }

    /// Identifiers in order of first appearance.
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Reference(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_references(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(names);
                rhs.collect_references(names);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(names);
                }
            }
        }
    }

    pub fn evaluate<F>(&self, lookup: &F) -> Result<f64, EvalError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Number(value) => finite(*value),
            Expr::Reference(name) => lookup(name).ok_or_else(|| EvalError::MissingValue {
                name: name.clone(),
            }),
            Expr::Neg(inner) => Ok(-inner.evaluate(lookup)?),
            Expr::Binary { op, lhs, rhs } => {
                apply_binary(*op, lhs.evaluate(lookup)?, rhs.evaluate(lookup)?)
            }
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&values)
            }
        }
    }

    /// Renders the expression in spreadsheet syntax, asking `resolve` for the
    /// text of every identifier. Parentheses are added wherever spreadsheet
    /// precedence could read the tree differently.
    pub fn render<F, E>(&self, resolve: &mut F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let text = match self {
            Expr::Number(value) if *value < 0.0 => format!("({value})"),
            Expr::Number(value) => format!("{value}"),
            Expr::Reference(name) => resolve(name)?,
            Expr::Neg(inner) => format!("-({})", inner.render(resolve)?),
            Expr::Binary { op, lhs, rhs } => {
                let left = lhs.render(resolve)?;
                let right = rhs.render(resolve)?;
                let left = if lhs.needs_parens_as_left(*op) {
                    format!("({left})")
                } else {
                    left
                };
                let right = if rhs.needs_parens_as_right(*op) {
                    format!("({right})")
                } else {
                    right
                };
                format!("{left}{}{right}", op.symbol())
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.render(resolve))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{}({})", function.spreadsheet_name(), args.join(","))
            }
        };
        Ok(text)
    }

    fn is_atomic(&self) -> bool {
        match self {
            Expr::Number(value) => *value >= 0.0,
            Expr::Reference(_) | Expr::Call { .. } => true,
            Expr::Neg(_) | Expr::Binary { .. } => false,
        }
    }

    fn needs_parens_as_left(&self, parent: BinaryOp) -> bool {
        if parent == BinaryOp::Pow {
            return !self.is_atomic();
        }
        match self {
            Expr::Binary { op, .. } => op.precedence() < parent.precedence(),
            _ => false,
        }
    }

    fn needs_parens_as_right(&self, parent: BinaryOp) -> bool {
        match self {
            Expr::Binary { op, .. } => op.precedence() <= parent.precedence(),
            Expr::Neg(_) => parent == BinaryOp::Pow,
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .render(&mut |name: &str| Ok::<_, Infallible>(name.to_string()))
            .unwrap_or_else(|never| match never {});
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(value) => format!("number {value}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Op(op) => format!("operator '{op}'"),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let value = literal.parse::<f64>().map_err(|_| ExpressionError::Parse {
                expression: text.to_string(),
                position: offset,
                message: format!("invalid number '{literal}'"),
            })?;
            tokens.push((offset, Token::Number(value)));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push((offset, Token::Ident(name)));
            continue;
        }

        let token = match ch {
            '+' | '-' | '*' | '/' | '^' => Token::Op(ch),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            other => {
                return Err(ExpressionError::Parse {
                    expression: text.to_string(),
                    position: offset,
                    message: format!("unexpected character '{other}'"),
                })
            }
        };
        tokens.push((offset, token));
        i += 1;
    }

    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
    spreadsheet: bool,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<char> {
        match self.peek() {
            Some((_, Token::Op(op))) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, position: usize, message: String) -> ExpressionError {
        ExpressionError::Parse {
            expression: self.text.to_string(),
            position,
            message,
        }
    }

    fn end_error(&self) -> ExpressionError {
        self.error_at(self.text.len(), "unexpected end of expression".to_string())
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek_op().filter(|op| matches!(*op, '+' | '-')) {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_op().filter(|op| matches!(*op, '*' | '/')) {
            self.pos += 1;
            let rhs = self.unary()?;
            let op = if op == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.spreadsheet {
            return self.spreadsheet_power();
        }
        match self.peek_op() {
            Some('-') => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.primary()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn spreadsheet_power(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.prefixed()?;
        while self.peek_op() == Some('^') {
            self.pos += 1;
            let rhs = self.prefixed()?;
            lhs = Expr::binary(BinaryOp::Pow, lhs, rhs);
        }
        Ok(lhs)
    }

    fn prefixed(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek_op() {
            Some('-') => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.prefixed()?)))
            }
            Some('+') => {
                self.pos += 1;
                self.prefixed()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let (position, token) = self.next().ok_or_else(|| self.end_error())?;
        match token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Some((_, Token::LParen))) {
                    self.pos += 1;
                    self.call(&name)
                } else {
                    Ok(Expr::Reference(name))
                }
            }
            other => Err(self.error_at(position, format!("unexpected {}", other.describe()))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ExpressionError> {
        let function = Function::from_name(name).ok_or_else(|| ExpressionError::UnknownFunction {
            name: name.to_string(),
        })?;

        let mut args = Vec::new();
        if matches!(self.peek(), Some((_, Token::RParen))) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expression()?);
                match self.next() {
                    Some((_, Token::Comma)) => continue,
                    Some((_, Token::RParen)) => break,
                    Some((position, other)) => {
                        return Err(self.error_at(
                            position,
                            format!("expected ',' or ')', found {}", other.describe()),
                        ))
                    }
                    None => return Err(self.end_error()),
                }
            }
        }

        function.check_arity(args.len())?;
        Ok(Expr::call(function, args))
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.next() {
            Some((_, Token::RParen)) => Ok(()),
            Some((position, other)) => {
                Err(self.error_at(position, format!("expected ')', found {}", other.describe())))
            }
            None => Err(self.end_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
        Expr::parse(text).unwrap().evaluate(&lookup)
    }

    #[test]
    fn precedence_follows_arithmetic() {
        let none = |_: &str| -> Option<f64> { None };
        assert_eq!(eval("1 + 2 * 3", &none), Ok(7.0));
        assert_eq!(eval("(1 + 2) * 3", &none), Ok(9.0));
        assert_eq!(eval("2 ^ 3 ^ 2", &none), Ok(512.0));
        assert_eq!(eval("-2 ^ 2", &none), Ok(-4.0));
        assert_eq!(eval("8 / 4 / 2", &none), Ok(1.0));
        assert_eq!(eval("max(1, 5, 3) - min(4, 2)", &none), Ok(3.0));
        assert_eq!(eval("1.5e2", &none), Ok(150.0));
    }

    #[test]
    fn references_are_listed_once_in_order() {
        let expr = Expr::parse("Al_wt_pct / (Al_wt_pct + Ca_wt_pct) * K_wt_pct").unwrap();
        assert_eq!(expr.references(), vec!["Al_wt_pct", "Ca_wt_pct", "K_wt_pct"]);
    }

    #[test]
    fn rendering_keeps_the_tree() {
        let cases = [
            "a - (b - c)",
            "(a - b) - c",
            "a / (b * c)",
            "(a + b) ^ 2",
            "a ^ (b ^ c)",
            "(a ^ b) ^ c",
            "-(a + b) * c",
            "-a ^ 2",
            "2 ^ -a",
            "ln(a / b) + sqrt(abs(c))",
        ];
        for case in cases {
            let expr = Expr::parse(case).unwrap();
            let rendered = expr.to_string();
            assert_eq!(Expr::parse(&rendered).unwrap(), expr, "{case} -> {rendered}");
            assert_eq!(
                Expr::parse_formula(&rendered).unwrap(),
                expr,
                "{case} -> {rendered} in formula mode"
            );
        }
        assert_eq!(Expr::parse("-a^2").unwrap().to_string(), "-(a^2)");
        assert_eq!(Expr::parse("(-a)^2").unwrap().to_string(), "(-(a))^2");
    }

    #[test]
    fn formula_mode_uses_spreadsheet_precedence() {
        let none = |_: &str| -> Option<f64> { None };
        let formula = |text: &str| Expr::parse_formula(text).unwrap().evaluate(&none);
        assert_eq!(formula("-2^2"), Ok(4.0));
        assert_eq!(formula("2^3^2"), Ok(64.0));
        assert_eq!(formula("1-2^2"), Ok(-3.0));
        assert_eq!(formula("2*-3"), Ok(-6.0));
    }

    #[test]
    fn evaluation_failures_are_reported() {
        let zero = |_: &str| -> Option<f64> { Some(0.0) };
        assert_eq!(eval("1 / x", &zero), Err(EvalError::DivisionByZero));
        assert!(matches!(eval("ln(x)", &zero), Err(EvalError::Domain { .. })));
        assert!(matches!(
            eval("y + 1", &|_: &str| None),
            Err(EvalError::MissingValue { ref name }) if name == "y"
        ));
        assert_eq!(eval("exp(1000)", &zero), Err(EvalError::NonFinite));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(Expr::parse("1 +"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expr::parse("(a"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expr::parse("a b"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expr::parse("a % b"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(
            Expr::parse("foo(a)"),
            Err(ExpressionError::UnknownFunction { .. })
        ));
        assert!(matches!(Expr::parse("ln(a, b)"), Err(ExpressionError::Arity { .. })));
        assert!(matches!(Expr::parse("max()"), Err(ExpressionError::Arity { .. })));
    }
}
