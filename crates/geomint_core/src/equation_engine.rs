use crate::autodiff::Dual;
use crate::error::{GeomintError, GeomintResult};
use crate::traits::{Hamiltonian, Scalar};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    /// Indices follow the layout `[p_1 .. p_d, q_1 .. q_d]`.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// Stateless: the caller owns the stack, so a compiled system can be shared
/// between threads.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val).unwrap_or_else(T::nan)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = stack.pop().unwrap_or_else(T::nan);
                    let a = stack.pop().unwrap_or_else(T::nan);
                    stack.push(match op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
                unary => {
                    let a = stack.pop().unwrap_or_else(T::nan);
                    stack.push(match unary {
                        OpCode::Neg => -a,
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Tan => a.tan(),
                        OpCode::Exp => a.exp(),
                        OpCode::Ln => a.ln(),
                        _ => a.sqrt(),
                    });
                }
            }
        }

        // Compiled expressions always leave exactly one value.
        stack.pop().unwrap_or_else(T::nan)
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Parses an expression such as `p1 * (q2 - 2) + sin(q1)^2`.
///
/// `^` binds tighter than unary minus and is right associative.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("unexpected trailing {:?}", token);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    literal.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !literal.contains(['e', 'E']) {
                    literal.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            literal.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .with_context(|| format!("invalid number `{literal}`"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => bail!("unexpected character `{other}`"),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(anyhow!("expected `)`")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(anyhow!("unexpected {:?}", token)),
            None => Err(anyhow!("unexpected end of expression")),
        }
    }
}

/// Compiles an AST into bytecode, resolving variable and parameter names to indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let index = |names: &[String]| -> HashMap<String, usize> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect()
        };
        Self {
            var_map: index(var_names),
            param_map: index(param_names),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else {
                    bail!("unknown variable or parameter `{name}`");
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => bail!("unknown binary operator `{other}`"),
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "tan" => OpCode::Tan,
                    "exp" => OpCode::Exp,
                    "ln" | "log" => OpCode::Ln,
                    "sqrt" => OpCode::Sqrt,
                    other => bail!("unknown function `{other}`"),
                });
            }
        }
        Ok(())
    }
}

/// State variable names for a system of dimension `dim`:
/// `p`, `q` when `dim == 1`, otherwise `p1 .. pd` followed by `q1 .. qd`.
pub fn state_variable_names(dim: usize) -> Vec<String> {
    if dim == 1 {
        return vec!["p".to_string(), "q".to_string()];
    }
    let p = (1..=dim).map(|i| format!("p{i}"));
    let q = (1..=dim).map(|i| format!("q{i}"));
    p.chain(q).collect()
}

// --- ExpressionHamiltonian ---

/// A Hamiltonian system whose `H_p` and `H_q` are given as expressions.
///
/// Derivative blocks for the implicit solves are computed exactly with
/// forward mode dual numbers.
#[derive(Debug, Clone)]
pub struct ExpressionHamiltonian {
    dimension: usize,
    hp: Vec<Bytecode>,
    hq: Vec<Bytecode>,
    params: Vec<f64>,
}

impl ExpressionHamiltonian {
    /// Compiles one expression per coordinate for `H_p` and `H_q`.
    ///
    /// `params` are named constants that expressions may refer to.
    pub fn new(
        dimension: usize,
        hp: &[&str],
        hq: &[&str],
        params: &[(&str, f64)],
    ) -> GeomintResult<Self> {
        Self::compile(dimension, hp, hq, params)
            .map_err(|err| GeomintError::invalid(format!("{err:#}")))
    }

    fn compile(
        dimension: usize,
        hp: &[&str],
        hq: &[&str],
        params: &[(&str, f64)],
    ) -> Result<Self> {
        if dimension == 0 {
            bail!("dimension must be positive");
        }
        if hp.len() != dimension || hq.len() != dimension {
            bail!(
                "expected {} expressions each for H_p and H_q, got {} and {}",
                dimension,
                hp.len(),
                hq.len()
            );
        }

        let var_names = state_variable_names(dimension);
        let param_names: Vec<String> = params.iter().map(|(name, _)| name.to_string()).collect();
        for (i, name) in param_names.iter().enumerate() {
            if var_names.contains(name) {
                bail!("parameter `{name}` collides with a state variable");
            }
            if param_names[..i].contains(name) {
                bail!("parameter `{name}` is given more than once");
            }
        }
        let compiler = Compiler::new(&var_names, &param_names);
        let compile_all = |label: &str, sources: &[&str]| -> Result<Vec<Bytecode>> {
            sources
                .iter()
                .enumerate()
                .map(|(i, src)| {
                    let expr = parse(src).with_context(|| format!("{label}[{i}] `{src}`"))?;
                    compiler
                        .compile(&expr)
                        .with_context(|| format!("{label}[{i}] `{src}`"))
                })
                .collect()
        };

        Ok(Self {
            dimension,
            hp: compile_all("H_p", hp)?,
            hq: compile_all("H_q", hq)?,
            params: params.iter().map(|&(_, value)| value).collect(),
        })
    }

    fn evaluate(&self, equations: &[Bytecode], p: &[f64], q: &[f64], out: &mut [f64]) {
        let vars: Vec<f64> = p.iter().chain(q).copied().collect();
        let mut stack = Vec::with_capacity(16);
        for (slot, eq) in out.iter_mut().zip(equations) {
            *slot = VM::execute(eq, &vars, &self.params, &mut stack);
        }
    }

    /// Row-major Jacobian of `equations` with respect to the variables
    /// starting at `offset` (0 for `p`, `d` for `q`).
    fn jacobian_block(&self, equations: &[Bytecode], p: &[f64], q: &[f64], offset: usize, out: &mut [f64]) {
        let d = self.dimension;
        let values: Vec<f64> = p.iter().chain(q).copied().collect();
        let params: Vec<Dual> = self.params.iter().map(|&v| Dual::constant(v)).collect();
        let mut vars = vec![Dual::constant(0.0); 2 * d];
        let mut stack = Vec::with_capacity(16);

        for j in 0..d {
            Dual::seeded(&values, Some(offset + j), &mut vars);
            for (i, eq) in equations.iter().enumerate() {
                out[i * d + j] = VM::execute(eq, &vars, &params, &mut stack).eps;
            }
        }
    }
}

impl Hamiltonian for ExpressionHamiltonian {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn hp(&self, p: &[f64], q: &[f64], out: &mut [f64]) {
        self.evaluate(&self.hp, p, q, out);
    }

    fn hq(&self, p: &[f64], q: &[f64], out: &mut [f64]) {
        self.evaluate(&self.hq, p, q, out);
    }

    fn hq_jacobian_p(&self, p: &[f64], q: &[f64], out: &mut [f64]) -> bool {
        self.jacobian_block(&self.hq, p, q, 0, out);
        true
    }

    fn hp_jacobian_q(&self, p: &[f64], q: &[f64], out: &mut [f64]) -> bool {
        self.jacobian_block(&self.hp, p, q, self.dimension, out);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, vars: &[(&str, f64)]) -> f64 {
        let names: Vec<String> = vars.iter().map(|(n, _)| n.to_string()).collect();
        let values: Vec<f64> = vars.iter().map(|&(_, v)| v).collect();
        let code = Compiler::new(&names, &[]).compile(&parse(src).unwrap()).unwrap();
        VM::execute(&code, &values, &[], &mut Vec::new())
    }

    #[test]
    fn respects_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[]), 512.0);
        assert_eq!(eval("-2 ^ 2", &[]), -4.0);
        assert_eq!(eval("2 ^ -1", &[]), 0.5);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("8 / 4 / 2", &[]), 1.0);
        assert!((eval("1.5e2 + 2E-1", &[]) - 150.2).abs() < 1e-12);
    }

    #[test]
    fn evaluates_functions_of_variables() {
        let x = 0.7;
        let value = eval("sin(x)^2 + cos(x)^2 + ln(exp(x)) - sqrt(x*x)", &[("x", x)]);
        assert!((value - 1.0).abs() < 1e-14);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("(p + 1").is_err());
        assert!(parse("p + ").is_err());
        assert!(parse("p q").is_err());
        assert!(parse("p # q").is_err());

        let compiler = Compiler::new(&state_variable_names(1), &[]);
        assert!(compiler.compile(&parse("r + 1").unwrap()).is_err());
        assert!(compiler.compile(&parse("foo(p)").unwrap()).is_err());
    }

    #[test]
    fn variable_names_follow_dimension() {
        assert_eq!(state_variable_names(1), vec!["p", "q"]);
        assert_eq!(state_variable_names(2), vec!["p1", "p2", "q1", "q2"]);
    }

    #[test]
    fn expression_pendulum_matches_closed_form() {
        let system = ExpressionHamiltonian::new(1, &["p / m"], &["m * g * sin(q)"], &[("m", 2.0), ("g", 9.81)])
            .unwrap();
        let mut out = [0.0];
        system.hp(&[4.0], &[0.0], &mut out);
        assert_eq!(out[0], 2.0);
        system.hq(&[0.0], &[0.3], &mut out);
        assert!((out[0] - 2.0 * 9.81 * 0.3_f64.sin()).abs() < 1e-12);

        let mut block = [0.0];
        assert!(system.hp_jacobian_q(&[1.0], &[0.3], &mut block));
        assert_eq!(block[0], 0.0);
    }

    #[test]
    fn jacobian_blocks_are_exact() {
        // H = p1 p2 q1 q2 + (p1^2 + p2^2) / 2
        let system = ExpressionHamiltonian::new(
            2,
            &["p1 + p2*q1*q2", "p2 + p1*q1*q2"],
            &["p1*p2*q2", "p1*p2*q1"],
            &[],
        )
        .unwrap();
        let (p, q) = ([0.5, -0.2], [0.3, 0.7]);

        let mut dhq_dp = [0.0; 4];
        assert!(system.hq_jacobian_p(&p, &q, &mut dhq_dp));
        assert_eq!(dhq_dp, [p[1] * q[1], p[0] * q[1], p[1] * q[0], p[0] * q[0]]);

        let mut dhp_dq = [0.0; 4];
        assert!(system.hp_jacobian_q(&p, &q, &mut dhp_dq));
        assert_eq!(dhp_dq, [p[1] * q[1], p[1] * q[0], p[0] * q[1], p[0] * q[0]]);
    }

    #[test]
    fn construction_errors_name_the_offending_expression() {
        let err = ExpressionHamiltonian::new(1, &["p"], &["sin(z)"], &[]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("H_q[0]"), "unexpected message: {message}");
        assert!(message.contains("`z`"), "unexpected message: {message}");

        assert!(ExpressionHamiltonian::new(2, &["p1"], &["q1", "q2"], &[]).is_err());
        assert!(ExpressionHamiltonian::new(0, &[], &[], &[]).is_err());
    }

    #[test]
    fn parameters_may_not_shadow_state_variables() {
        let err = ExpressionHamiltonian::new(1, &["p"], &["q"], &[("q", 3.0)]).unwrap_err();
        assert!(matches!(err, GeomintError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("`q`"), "unexpected message: {err}");

        let err = ExpressionHamiltonian::new(2, &["p1", "p2"], &["a * q1", "q2"], &[("p2", 1.0)]).unwrap_err();
        assert!(matches!(err, GeomintError::InvalidConfiguration { .. }));

        assert!(ExpressionHamiltonian::new(1, &["a * p"], &["q"], &[("a", 1.0), ("a", 2.0)]).is_err());
        // `p` is not a state variable name when d = 2
        assert!(ExpressionHamiltonian::new(2, &["p * p1", "p2"], &["q1", "q2"], &[("p", 1.0)]).is_ok());
    }
}
