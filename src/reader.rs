//! S-expression reader: source text to [`Node`] trees.
//!
//! Produces exactly the shapes the evaluator consumes: `'x` reads as `(quote x)`, `nil`
//! as [`Node::Nil`], `()` as an empty list.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, digit1, multispace0, multispace1, not_line_ending},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::{many0, many0_count},
    sequence::pair,
};

use crate::ast::{Node, NumberType, SYMBOL_SPECIAL_CHARS, is_valid_symbol};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Treat `;` up to the end of the line as whitespace
    pub handle_comments: bool,
    /// Maximum nesting of lists and quotes
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

type NomError<'a> = nom::Err<nom::error::Error<&'a str>>;

fn fail(input: &str, code: ErrorKind) -> NomError<'_> {
    nom::Err::Error(nom::error::Error::new(input, code))
}

/// Input that ends inside a form can't be fixed by trying another branch, so the
/// error is promoted to a failure and reported as incomplete
fn cut_at_eof(error: NomError<'_>) -> NomError<'_> {
    match error {
        nom::Err::Error(e) if e.input.is_empty() => nom::Err::Failure(e),
        other => other,
    }
}

/// Convert nom errors to a structured [`ParseError`]
fn to_parse_error(input: &str, error: NomError<'_>, config: &ParseConfig) -> Error {
    let (kind, message, offset) = match error {
        nom::Err::Incomplete(_) => (
            ParseErrorKind::Incomplete,
            "Incomplete input".to_owned(),
            input.len(),
        ),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!(
                        "Expression too deeply nested (max depth: {})",
                        config.max_depth
                    ),
                    offset,
                ),
                _ if e.input.is_empty() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input".to_owned(),
                    offset,
                ),
                _ => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid syntax at position {offset}"),
                    offset,
                ),
            }
        }
    };
    Error::ParseError(ParseError::with_context(kind, message, input, offset))
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), not_line_ending)).parse(input)
}

/// Skip whitespace and, when enabled, comments
fn skip_junk(input: &str, handle_comments: bool) -> IResult<&str, ()> {
    if handle_comments {
        value((), many0_count(alt((multispace1, comment)))).parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

/// Succeeds without consuming if an atom may end here
fn at_delimiter(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        None => Ok((input, ())),
        Some(c) if c.is_whitespace() || matches!(c, '(' | ')' | ';') => Ok((input, ())),
        Some(_) => Err(fail(input, ErrorKind::Verify)),
    }
}

fn parse_number(input: &str) -> IResult<&str, Node> {
    let (rest, digits) = recognize(pair(opt(char('-')), digit1)).parse(input)?;
    match digits.parse::<NumberType>() {
        Ok(n) => Ok((rest, Node::Number(n))),
        // Out of range; the symbol branch rejects a leading digit as well
        Err(_) => Err(fail(input, ErrorKind::Digit)),
    }
}

fn parse_bool(input: &str) -> IResult<&str, Node> {
    alt((
        value(Node::Bool(true), tag("#t")),
        value(Node::Bool(false), tag("#f")),
    ))
    .parse(input)
}

fn parse_char(input: &str) -> IResult<&str, Node> {
    let (input, _) = tag("#\\").parse(input)?;
    let (input, c) = alt((
        value(' ', tag("space")),
        value('\n', tag("newline")),
        value('\t', tag("tab")),
        anychar,
    ))
    .parse(input)?;
    Ok((input, Node::Char(c)))
}

fn parse_symbol(input: &str) -> IResult<&str, Node> {
    let (rest, candidate) =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
            .parse(input)?;

    match candidate {
        "nil" => Ok((rest, Node::Nil)),
        _ if is_valid_symbol(candidate) => Ok((rest, Node::Symbol(candidate.into()))),
        _ => Err(fail(input, ErrorKind::Alpha)),
    }
}

fn parse_string(input: &str) -> IResult<&str, Node> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Node::String(text))),
            Some('\\') => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some(_) => return Err(fail(remaining, ErrorKind::Escaped)),
                    None => return Err(cut_at_eof(fail(chars.as_str(), ErrorKind::Escaped))),
                };
                text.push(escaped);
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            // Unterminated
            None => return Err(cut_at_eof(fail(remaining, ErrorKind::Char))),
        }
    }
}

fn parse_list<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> IResult<&'a str, Node> {
    let (input, _) = char('(').parse(input)?;
    let (input, elements) = many0(|i| parse_expr(i, config, depth + 1)).parse(input)?;
    let (input, ()) = skip_junk(input, config.handle_comments)?;
    let (input, _) = char(')').parse(input).map_err(cut_at_eof)?;
    Ok((input, Node::list(elements)))
}

/// `'expr` reads as `(quote expr)`
fn parse_quote<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> IResult<&'a str, Node> {
    let (input, _) = char('\'').parse(input)?;
    let (input, quoted) = parse_expr(input, config, depth + 1).map_err(cut_at_eof)?;
    Ok((input, Node::list(vec![Node::Symbol("quote".into()), quoted])))
}

fn parse_expr<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> IResult<&'a str, Node> {
    if depth >= config.max_depth {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    let (input, ()) = skip_junk(input, config.handle_comments)?;

    // Dispatch on the first character so errors point at the offending token
    match input.chars().next() {
        Some('(') => parse_list(input, config, depth),
        Some('\'') => parse_quote(input, config, depth),
        Some('"') => parse_string(input),
        Some('#') => {
            let (rest, node) = alt((parse_char, parse_bool)).parse(input)?;
            let (rest, ()) = at_delimiter(rest)?;
            Ok((rest, node))
        }
        Some(_) => {
            let (rest, node) = alt((parse_number, parse_symbol)).parse(input)?;
            let (rest, ()) = at_delimiter(rest)?;
            Ok((rest, node))
        }
        None => Err(fail(input, ErrorKind::Eof)),
    }
}

/// Read exactly one expression with the default configuration
pub fn parse(input: &str) -> Result<Node, Error> {
    parse_with_config(input, &ParseConfig::default())
}

/// Read exactly one expression; anything but whitespace or comments after it is an error
pub fn parse_with_config(input: &str, config: &ParseConfig) -> Result<Node, Error> {
    let (rest, node) = parse_expr(input, config, 0).map_err(|e| to_parse_error(input, e, config))?;

    let (rest, ()) =
        skip_junk(rest, config.handle_comments).map_err(|e| to_parse_error(input, e, config))?;
    if !rest.is_empty() {
        let offset = input.len() - rest.len();
        return Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            "Unexpected remaining input after expression",
            input,
            offset,
        )));
    }
    Ok(node)
}

/// Read zero or more top-level expressions
pub fn parse_program<'a>(input: &'a str) -> Result<Vec<Node>, Error> {
    let config = ParseConfig::default();
    let skip = |i: &'a str| {
        skip_junk(i, config.handle_comments).map_err(|e| to_parse_error(input, e, &config))
    };

    let mut forms = Vec::new();
    let (mut rest, ()) = skip(input)?;
    while !rest.is_empty() {
        let (after, node) =
            parse_expr(rest, &config, 0).map_err(|e| to_parse_error(input, e, &config))?;
        forms.push(node);
        (rest, _) = skip(after)?;
    }
    Ok(forms)
}
