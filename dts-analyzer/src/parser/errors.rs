use std::{cell::RefCell, ops::Range};

use nom::{error, Err};

use super::syntax::{IResult, Span};

/// A recoverable syntax error, as a byte range in the expanded text and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error(pub(super) Range<usize>, pub(super) String);

/// Shared state threaded through the parser as the span's `extra` field.
#[derive(Debug, Default)]
pub struct ParseState {
    errors: RefCell<Vec<Error>>,
}

impl ParseState {
    pub fn report_error(&self, error: Error) {
        self.errors.borrow_mut().push(error);
    }

    pub fn take_errors(&self) -> Vec<Error> {
        self.errors.take()
    }
}

pub trait ToRange {
    fn to_range(&self) -> Range<usize>;
}

impl<'a> ToRange for Span<'a> {
    /// The range of the token at the start of the span.
    fn to_range(&self) -> Range<usize> {
        let start = self.location_offset();
        let len = self
            .fragment()
            .find(|c: char| c.is_whitespace() || c == ';')
            .unwrap_or(self.fragment().len());
        start..start + len.max(1).min(self.fragment().len())
    }
}

/// Run `parser`, reporting `error_msg` and succeeding with `None` if it fails.
pub(super) fn expect<'a, F, O>(
    mut parser: F,
    error_msg: &'a str,
) -> impl FnMut(Span<'a>) -> IResult<'a, Option<O>>
where
    F: FnMut(Span<'a>) -> IResult<'a, O>,
{
    move |input| match parser(input) {
        Ok((remaining, output)) => Ok((remaining, Some(output))),
        Err(Err::Error(error::Error { input, .. }))
        | Err(Err::Failure(error::Error { input, .. })) => {
            let err = Error(input.to_range(), error_msg.to_string());
            input.extra.report_error(err);
            Ok((input, None))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nom::character::complete::char;

    #[test]
    fn report_and_continue() {
        let state = ParseState::default();
        let input = Span::new_extra("x >", &state);

        let (rest, output) = expect(char('>'), "Expected '>'")(input).unwrap();

        assert_eq!(output, None);
        assert_eq!(*rest.fragment(), "x >");
        assert_eq!(
            state.take_errors(),
            vec![Error(0..1, "Expected '>'".to_string())]
        );
        assert!(state.take_errors().is_empty());
    }
}
