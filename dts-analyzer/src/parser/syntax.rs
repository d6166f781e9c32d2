use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1, take_while_m_n},
    character::complete::{alphanumeric0, anychar, char, digit1, multispace1, not_line_ending, satisfy},
    combinator::{map, map_res, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use nom_locate::LocatedSpan;

use super::errors::ParseState;
use crate::ast::PHandle;

pub type Span<'a> = LocatedSpan<&'a str, &'a ParseState>;

pub type IResult<'a, O> = nom::IResult<Span<'a>, O>;

/// Recognize a label definition, like `uart0:`.
pub fn label(input: Span) -> IResult<Span> {
    terminated(label_name, char(':'))(input)
}

/// Recognize a label name.
pub fn label_name(input: Span) -> IResult<Span> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Recognize a node name with an optional unit address, like `uart@4000`.
pub fn node_name(input: Span) -> IResult<Span> {
    recognize(pair(
        take_while1(is_node_char),
        opt(pair(char('@'), take_while1(is_node_char))),
    ))(input)
}

/// Recognize a property name.
pub fn prop_name(input: Span) -> IResult<Span> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || ",._+?#-".contains(c))(input)
}

/// Parse a node reference, either `&label` or `&{/path}`.
pub fn reference(input: Span) -> IResult<PHandle> {
    preceded(
        char('&'),
        alt((
            map(
                delimited(char('{'), take_while1(|c: char| c != '}'), char('}')),
                |s: Span| PHandle::path(s.fragment().trim()),
            ),
            map(label_name, |s: Span| PHandle::label(*s.fragment())),
        )),
    )(input)
}

/// Recognize a string literal, returning the text between the quotes without unescaping it.
pub fn string_literal(input: Span) -> IResult<Span> {
    delimited(
        char('"'),
        recognize(many0(alt((
            is_not("\\\"\n"),
            recognize(pair(char('\\'), anychar)),
        )))),
        char('"'),
    )(input)
}

/// Recognize a character literal, returning the text between the quotes.
pub fn char_literal(input: Span) -> IResult<Span> {
    delimited(
        char('\''),
        recognize(alt((
            recognize(pair(char('\\'), anychar)),
            recognize(satisfy(|c| c != '\'' && c != '\\')),
        ))),
        char('\''),
    )(input)
}

/// Recognize a numeric literal in any base, including its suffix.
pub fn number(input: Span) -> IResult<Span> {
    recognize(pair(digit1, alphanumeric0))(input)
}

/// Parse a byte represented by two hex digits.
pub fn hex_byte(input: Span) -> IResult<u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: Span| u8::from_str_radix(s.fragment(), 16),
    )(input)
}

/// Recognize a parenthesized expression, including nested parentheses.
pub fn parens(input: Span) -> IResult<Span> {
    recognize(delimited(
        char('('),
        many0(alt((is_not("()"), parens))),
        char(')'),
    ))(input)
}

/// Recognize the root node opening, `/ {`.
pub fn root_open(input: Span) -> IResult<Span> {
    recognize(tuple((char('/'), ws, char('{'))))(input)
}

/* === Keywords === */

pub fn version_keyword(input: Span) -> IResult<Span> {
    alt((tag("/dts-v1/"), tag("/plugin/")))(input)
}

pub fn memreserve_keyword(input: Span) -> IResult<Span> {
    tag("/memreserve/")(input)
}

pub fn delete_node_keyword(input: Span) -> IResult<Span> {
    tag("/delete-node/")(input)
}

pub fn delete_property_keyword(input: Span) -> IResult<Span> {
    tag("/delete-property/")(input)
}

pub fn omit_if_no_ref_keyword(input: Span) -> IResult<Span> {
    tag("/omit-if-no-ref/")(input)
}

pub fn bits_keyword(input: Span) -> IResult<Span> {
    tag("/bits/")(input)
}

/* === Utility functions === */

/// Parse a lexeme using the combinator passed as its argument,
/// also consuming any whitespaces or comments before or after.
pub fn lexeme<'a, O, F>(f: F) -> impl FnMut(Span<'a>) -> IResult<'a, O>
where
    F: FnMut(Span<'a>) -> IResult<'a, O>,
{
    delimited(ws, f, ws)
}

/// Consume zero or more whitespace characters or comments.
pub fn ws(input: Span) -> IResult<Span> {
    recognize(many0(alt((multispace1, line_comment, block_comment))))(input)
}

/// Parse block comments.
fn block_comment(input: Span) -> IResult<Span> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Parse a single line comment, without its line ending.
fn line_comment(input: Span) -> IResult<Span> {
    recognize(pair(tag("//"), not_line_ending))(input)
}

fn is_node_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+-".contains(c)
}

/// Resolve escape sequences in a string or character literal.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('x') => {
                let mut value = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(16)) {
                    value = value * 16 + d;
                    chars.next();
                }
                out.extend(char::from_u32(value));
            }
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.extend(char::from_u32(value));
            }
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }

    out
}

/* === Unit Tests === */
