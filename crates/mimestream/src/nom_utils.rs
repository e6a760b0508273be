use nom::error::{ContextError, ErrorKind, FromExternalError};
use nom_locate::LocatedSpan;

pub type Span<'a> = LocatedSpan<&'a str>;

pub fn make_span(s: &str) -> Span {
    LocatedSpan::new(s)
}

pub type IResult<'a, A, B> = nom::IResult<A, B, ParseError<Span<'a>>>;

/// Tracks the stack of contexts through which a parse error propagated,
/// so that the rendered explanation can say which grammar production
/// failed and where in the input.
#[derive(Debug, PartialEq)]
pub struct ParseError<I> {
    pub errors: Vec<(I, ParseErrorKind)>,
}

#[derive(Debug, PartialEq)]
pub enum ParseErrorKind {
    Context(&'static str),
    Char(char),
    Nom(ErrorKind),
    External(String),
}

pub fn make_context_error<'a>(
    input: Span<'a>,
    reason: impl Into<String>,
) -> nom::Err<ParseError<Span<'a>>> {
    let err = ParseError {
        errors: vec![(input, ParseErrorKind::External(reason.into()))],
    };
    nom::Err::Error(err)
}

impl<I> nom::error::ParseError<I> for ParseError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Nom(kind))],
        }
    }

    fn append(input: I, kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Nom(kind)));
        other
    }

    fn from_char(input: I, c: char) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Char(c))],
        }
    }
}

impl<I> ContextError<I> for ParseError<I> {
    fn add_context(input: I, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Context(ctx)));
        other
    }
}

impl<I: Clone, E: std::fmt::Display> FromExternalError<I, E> for ParseError<I> {
    fn from_external_error(input: I, kind: ErrorKind, e: E) -> Self {
        Self {
            errors: vec![
                (input.clone(), ParseErrorKind::External(format!("{e:#}"))),
                (input, ParseErrorKind::Nom(kind)),
            ],
        }
    }
}

/// Render a human-readable explanation of a parse failure, quoting the
/// line of input on which the innermost error occurred.
pub fn explain_nom(input: &str, err: nom::Err<ParseError<Span>>) -> String {
    match err {
        nom::Err::Incomplete(_) => "parse error: incomplete input".to_string(),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            use std::fmt::Write;
            let mut result = String::new();
            for (span, kind) in e.errors.iter().rev() {
                let line_no = span.location_line();
                let col = span.get_utf8_column();
                let line = input.lines().nth(line_no as usize - 1).unwrap_or("");
                match kind {
                    ParseErrorKind::Context(ctx) => {
                        write!(result, "in {ctx}, ").ok();
                    }
                    ParseErrorKind::Char(c) => {
                        write!(
                            result,
                            "expected '{c}' at line {line_no} column {col}: {line:?}"
                        )
                        .ok();
                        break;
                    }
                    ParseErrorKind::Nom(nom_kind) => {
                        write!(
                            result,
                            "{} failed at line {line_no} column {col}: {line:?}",
                            nom_kind.description()
                        )
                        .ok();
                        break;
                    }
                    ParseErrorKind::External(reason) => {
                        write!(
                            result,
                            "{reason} at line {line_no} column {col}: {line:?}"
                        )
                        .ok();
                        break;
                    }
                }
            }
            if result.is_empty() {
                result.push_str("parse error");
            }
            result
        }
    }
}
