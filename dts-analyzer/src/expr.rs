//! Integer expressions, shared by `#if`/`#elif` conditions and parenthesized property cells.
//!
//! The grammar follows C precedence: ternary, `||`, `&&`, `|`, `^`, `&`, equality, relational,
//! shifts, additive, multiplicative, then unary `-`, `~` and `!`. Literals may be decimal,
//! octal, hexadecimal or character literals, with optional `U`/`L`/`f` suffixes.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, multispace0, none_of, one_of, satisfy},
    combinator::{map, map_opt, not, opt, recognize, value},
    error::{ErrorKind, ParseError},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

type Input<'a> = &'a str;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("Unterminated expression")]
    Unterminated { offset: usize },
    #[error("Unable to evaluate expression")]
    Invalid { offset: usize },
    #[error("Division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Lit(i64),
    Unary(UnaryOp, Box<Expression>),
    Binary(Box<Expression>, BinaryOp, Box<Expression>),
    Ternary {
        cond: Box<Expression>,
        then: Box<Expression>,
        else_: Box<Expression>,
    },
}

impl Expression {
    pub fn eval(&self) -> Result<i64, ExprError> {
        Ok(match self {
            Expression::Lit(l) => *l,
            Expression::Unary(op, e) => op.eval(e.eval()?),
            Expression::Binary(lhs, BinaryOp::And, rhs) => {
                (lhs.eval()? != 0 && rhs.eval()? != 0) as i64
            }
            Expression::Binary(lhs, BinaryOp::Or, rhs) => {
                (lhs.eval()? != 0 || rhs.eval()? != 0) as i64
            }
            Expression::Binary(lhs, op, rhs) => op.eval(lhs.eval()?, rhs.eval()?)?,
            Expression::Ternary { cond, then, else_ } => {
                if cond.eval()? != 0 {
                    then.eval()?
                } else {
                    else_.eval()?
                }
            }
        })
    }
}

impl From<i64> for Box<Expression> {
    fn from(i: i64) -> Self {
        Box::new(Expression::Lit(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

impl UnaryOp {
    pub fn eval(&self, v: i64) -> i64 {
        match self {
            UnaryOp::Neg => v.wrapping_neg(),
            UnaryOp::BitNot => !v,
            UnaryOp::LogicalNot => (v == 0) as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn eval(&self, l: i64, r: i64) -> Result<i64, ExprError> {
        Ok(match self {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::Div => l.checked_div(r).ok_or(ExprError::DivisionByZero)?,
            BinaryOp::Mod => l.checked_rem(r).ok_or(ExprError::DivisionByZero)?,
            BinaryOp::BitAnd => l & r,
            BinaryOp::BitOr => l | r,
            BinaryOp::BitXor => l ^ r,
            BinaryOp::LShift => l.wrapping_shl(r as u32),
            BinaryOp::RShift => l.wrapping_shr(r as u32),
            BinaryOp::And => (l != 0 && r != 0) as i64,
            BinaryOp::Or => (l != 0 || r != 0) as i64,
            BinaryOp::Eq => (l == r) as i64,
            BinaryOp::Neq => (l != r) as i64,
            BinaryOp::Lt => (l < r) as i64,
            BinaryOp::Gt => (l > r) as i64,
            BinaryOp::Le => (l <= r) as i64,
            BinaryOp::Ge => (l >= r) as i64,
        })
    }
}

/// Parse an expression. The whole input must be consumed.
pub fn parse(s: &str) -> Result<Expression, ExprError> {
    if let Some(offset) = unbalanced(s) {
        return Err(ExprError::Unterminated { offset });
    }

    match ternary::<nom::error::Error<Input>>(s) {
        Ok((rest, expr)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(expr)
            } else {
                Err(ExprError::Unterminated {
                    offset: s.len() - rest.len(),
                })
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExprError::Invalid {
            offset: s.len() - e.input.len(),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ExprError::Invalid { offset: s.len() }),
    }
}

/// Parse and evaluate an expression.
pub fn evaluate(s: &str) -> Result<i64, ExprError> {
    parse(s)?.eval()
}

/// Convert the text of an integer literal to its value, also reporting whether it was written in
/// hexadecimal.
pub fn literal_value(text: &str) -> Option<(i64, bool)> {
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let digits = digits.trim_end_matches(|c: char| "uUlL".contains(c));
        return u64::from_str_radix(digits, 16).ok().map(|v| (v as i64, true));
    }

    let digits = text.trim_end_matches(|c: char| "uUlLfF".contains(c));
    let value = if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };

    Some((value as i64, false))
}

/// Return the offset at which an opening parenthesis is left unclosed.
fn unbalanced(s: &str) -> Option<usize> {
    let mut depth = 0usize;

    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ => {}
        }
    }

    (depth > 0).then(|| s.len())
}

type Operator = (&'static str, &'static str, BinaryOp);

const LOGICAL_OR: &[Operator] = &[("||", "", BinaryOp::Or)];
const LOGICAL_AND: &[Operator] = &[("&&", "", BinaryOp::And)];
const BIT_OR: &[Operator] = &[("|", "|", BinaryOp::BitOr)];
const BIT_XOR: &[Operator] = &[("^", "", BinaryOp::BitXor)];
const BIT_AND: &[Operator] = &[("&", "&", BinaryOp::BitAnd)];
const EQUALITY: &[Operator] = &[("==", "", BinaryOp::Eq), ("!=", "", BinaryOp::Neq)];
const RELATIONAL: &[Operator] = &[
    ("<=", "", BinaryOp::Le),
    (">=", "", BinaryOp::Ge),
    ("<", "<", BinaryOp::Lt),
    (">", ">", BinaryOp::Gt),
];
const SHIFT: &[Operator] = &[("<<", "", BinaryOp::LShift), (">>", "", BinaryOp::RShift)];
const ADDITIVE: &[Operator] = &[("+", "", BinaryOp::Add), ("-", "", BinaryOp::Sub)];
const MULTIPLICATIVE: &[Operator] = &[
    ("*", "", BinaryOp::Mul),
    ("/", "", BinaryOp::Div),
    ("%", "", BinaryOp::Mod),
];

/// Parse a ternary expression (lowest precedence), or a simple expression if not ternary.
fn ternary<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    let (input, cond) = logical_or(input)?;
    let (input, branches) = opt(pair(
        preceded(lexeme(char('?')), ternary),
        preceded(lexeme(char(':')), ternary),
    ))(input)?;

    let expr = match branches {
        Some((then, else_)) => Expression::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            else_: Box::new(else_),
        },
        None => cond,
    };

    Ok((input, expr))
}

fn logical_or<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(logical_and, LOGICAL_OR)(input)
}

fn logical_and<'a, E: ParseError<Input<'a>>>(
    input: Input<'a>,
) -> IResult<Input<'a>, Expression, E> {
    binary(bit_or, LOGICAL_AND)(input)
}

fn bit_or<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(bit_xor, BIT_OR)(input)
}

fn bit_xor<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(bit_and, BIT_XOR)(input)
}

fn bit_and<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(equality, BIT_AND)(input)
}

fn equality<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(relational, EQUALITY)(input)
}

fn relational<'a, E: ParseError<Input<'a>>>(
    input: Input<'a>,
) -> IResult<Input<'a>, Expression, E> {
    binary(shift, RELATIONAL)(input)
}

fn shift<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(additive, SHIFT)(input)
}

fn additive<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    binary(multiplicative, ADDITIVE)(input)
}

fn multiplicative<'a, E: ParseError<Input<'a>>>(
    input: Input<'a>,
) -> IResult<Input<'a>, Expression, E> {
    binary(unary, MULTIPLICATIVE)(input)
}

/// Parse a unary expression, i.e. an atom prefixed by zero or more unary operators.
fn unary<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    alt((
        map(pair(lexeme(unary_operator), unary), |(op, e)| {
            Expression::Unary(op, Box::new(e))
        }),
        primary,
    ))(input)
}

/// Parse an atom: a literal or a parenthesized expression.
fn primary<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, Expression, E> {
    lexeme(alt((
        map(integer_literal, Expression::Lit),
        map(char_literal, |c| Expression::Lit(c as i64)),
        delimited(char('('), ternary, lexeme(char(')'))),
    )))(input)
}

fn unary_operator<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, UnaryOp, E> {
    alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::BitNot, char('~')),
        value(UnaryOp::LogicalNot, terminated(char('!'), not(char('=')))),
    ))(input)
}

/// Parse an integer literal in any base, with an optional suffix.
fn integer_literal<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, i64, E> {
    let hex = recognize(tuple((
        alt((tag("0x"), tag("0X"))),
        hex_digit1,
        take_while(|c: char| "uUlL".contains(c)),
    )));
    let dec = recognize(pair(digit1, take_while(|c: char| "uUlLfF".contains(c))));

    map_opt(
        terminated(alt((hex, dec)), not(satisfy(is_ident_char))),
        |s: Input| literal_value(s).map(|(v, _)| v),
    )(input)
}

/// Parse a character literal such as `'A'` or `'\n'`.
fn char_literal<'a, E: ParseError<Input<'a>>>(input: Input<'a>) -> IResult<Input<'a>, char, E> {
    let escape = map(one_of("nrt0\\'\""), |c| match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        c => c,
    });

    delimited(
        char('\''),
        alt((preceded(char('\\'), escape), none_of("\\'"))),
        char('\''),
    )(input)
}

/// Build a left-associative binary operator level on top of `operand`.
fn binary<'a, E, F>(
    mut operand: F,
    operators: &'static [Operator],
) -> impl FnMut(Input<'a>) -> IResult<Input<'a>, Expression, E>
where
    E: ParseError<Input<'a>>,
    F: FnMut(Input<'a>) -> IResult<Input<'a>, Expression, E>,
{
    move |input| {
        let (mut input, mut lhs) = operand(input)?;

        loop {
            match operator::<E>(input, operators) {
                Ok((rest, op)) => {
                    let (rest, rhs) = operand(rest)?;
                    lhs = Expression::Binary(Box::new(lhs), op, Box::new(rhs));
                    input = rest;
                }
                Err(nom::Err::Error(_)) => return Ok((input, lhs)),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Recognize one of `operators`, rejecting tokens that are a prefix of a longer operator.
fn operator<'a, E: ParseError<Input<'a>>>(
    input: Input<'a>,
    operators: &'static [Operator],
) -> IResult<Input<'a>, BinaryOp, E> {
    for (token, longer, op) in operators {
        let res: IResult<Input<'a>, _, E> =
            preceded(multispace0, terminated(tag(*token), not(one_of(*longer))))(input);
        if let Ok((rest, _)) = res {
            return Ok((rest, *op));
        }
    }

    Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Tag)))
}

/// Parse a lexeme using the combinator passed as its argument, consuming surrounding whitespace.
fn lexeme<'a, O, F, E: ParseError<Input<'a>>>(f: F) -> impl FnMut(Input<'a>) -> IResult<Input<'a>, O, E>
where
    F: FnMut(Input<'a>) -> IResult<Input<'a>, O, E>,
{
    delimited(multispace0, f, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/* === Unit Tests === */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_unsigned_numbers() {
        for (input, expected) in [
            ("0", 0),
            ("1", 1),
            ("25", 25),
            ("0x1", 0x1),
            ("0x25", 0x25),
            ("0x1f", 0x1f),
            ("0XFF", 0xff),
            ("010", 8),
            ("10U", 10),
            ("10UL", 10),
            ("0x10ULL", 0x10),
            ("3f", 3),
        ] {
            assert_eq!(Expression::Lit(expected), parse(input).unwrap(), "{input}");
        }
    }

    #[test]
    fn parse_and_eval_unary_op() {
        use Expression::Unary;
        use UnaryOp::*;

        for (input, res, ast) in [
            ("-1", -1, Unary(Neg, 1.into())),
            ("- ~0xf", 16, Unary(Neg, Box::new(Unary(BitNot, 0xf.into())))),
            (
                "!!0",
                0,
                Unary(LogicalNot, Box::new(Unary(LogicalNot, 0.into()))),
            ),
        ] {
            let expr = parse(input).unwrap();

            assert_eq!(ast, expr);
            assert_eq!(res, expr.eval().unwrap());
        }
    }

    #[test]
    fn evaluate_with_precedence() {
        for (input, expected) in [
            ("1+1", 2),
            ("2 * 1", 2),
            ("(3+2) * 1", 5),
            ("(1-4*2+~0)", -8),
            ("~1 << (2 >> 1)", -4),
            ("1 <= 2 > 3 == 5", 0),
            ("2-1 != 0", 1),
            ("((2 + 'A') != 0) ? (5 << 1) : ~0", 10),
            ("1 | 2 & 3", 3),
            ("1 || 0 && 0", 1),
            ("6 ^ 3", 5),
            ("7 % 4", 3),
            ("123 + 456 < 999", 1),
            ("(1 << 3) | (1 << 0)", 9),
            ("0 && 1 / 0", 0),
            ("'\\n'", 10),
        ] {
            assert_eq!(evaluate(input), Ok(expected), "{input}");
        }
    }

    #[test]
    fn report_errors() {
        for (input, expected) in [
            ("(1 + 2", ExprError::Unterminated { offset: 6 }),
            ("1 + 2)", ExprError::Unterminated { offset: 5 }),
            ("1 2", ExprError::Unterminated { offset: 2 }),
            ("", ExprError::Invalid { offset: 0 }),
            ("FOO", ExprError::Invalid { offset: 0 }),
            ("1 / 0", ExprError::DivisionByZero),
        ] {
            assert_eq!(evaluate(input), Err(expected), "{input}");
        }
    }

    #[test]
    fn literal_values() {
        for (input, expected) in [
            ("0x10", Some((16, true))),
            ("0xffffffff", Some((0xffff_ffff, true))),
            ("42", Some((42, false))),
            ("042", Some((34, false))),
            ("9f", Some((9, false))),
            ("0x", None),
            ("08", None),
        ] {
            assert_eq!(literal_value(input), expected, "{input}");
        }
    }
}
