//! Server-to-server line parsing.
//!
//! A TS6 line decomposes into an optional `:source`, a verb, up to
//! [`MAXPARA`] space-delimited middle parameters, and an optional final
//! `:trailing` parameter that absorbs the rest of the line including
//! spaces. There are no IRCv3 tags on a server link.
//!
//! [`ParsedLine`] borrows from the input buffer; [`Line`] is the owned
//! form used to build outbound traffic.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;
use std::fmt;

use crate::error::ProtoError;

/// Maximum number of middle parameters on one line.
pub const MAXPARA: usize = 15;

/// Parse the `:source` token.
fn parse_source(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the verb: letters or exactly three digits.
fn parse_verb(input: &str) -> IResult<&str, &str> {
    let (rest, verb) = take_while1(|c: char| c.is_alphanumeric())(input)?;

    let all_letters = verb.chars().all(|c| c.is_ascii_alphabetic());
    let three_digits = verb.len() == 3 && verb.chars().all(|c| c.is_ascii_digit());

    if all_letters || three_digits {
        Ok((rest, verb))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::AlphaNumeric,
        )))
    }
}

/// Parse parameters after the verb.
///
/// Runs of spaces collapse to one separator. A `:` introduces the trailing
/// parameter, which ends only at line end. Stops collecting after
/// [`MAXPARA`] parameters.
fn parse_params(input: &str) -> (&str, SmallVec<[&str; MAXPARA]>) {
    let mut params: SmallVec<[&str; MAXPARA]> = SmallVec::new();
    let mut rest = input;

    while rest.as_bytes().first() == Some(&b' ') {
        if params.len() >= MAXPARA {
            break;
        }

        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }

        if rest.as_bytes().first() == Some(&b':') {
            let after = &rest[1..];
            let end = after.find(['\r', '\n']).unwrap_or(after.len());
            params.push(&after[..end]);
            rest = &after[end..];
            break;
        }

        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        params.push(param);
        rest = &rest[end..];
    }

    (rest, params)
}

/// One inbound line, borrowed from the read buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine<'a> {
    /// The `:source` token without the colon, when present.
    pub source: Option<&'a str>,
    /// The verb, as written on the wire.
    pub verb: &'a str,
    /// Middle parameters plus any trailing parameter, in order.
    pub params: SmallVec<[&'a str; MAXPARA]>,
}

impl<'a> ParsedLine<'a> {
    /// Parse a single line. CRLF at the end is tolerated.
    pub fn parse(input: &'a str) -> Result<Self, ProtoError> {
        fn inner(input: &str) -> IResult<&str, (Option<&str>, &str)> {
            let (input, source) = opt(parse_source)(input)?;
            let (input, _) = space0(input)?;
            let (input, verb) = parse_verb(input)?;
            Ok((input, (source, verb)))
        }

        if input.trim_end_matches(['\r', '\n']).is_empty() {
            return Err(ProtoError::EmptyLine);
        }

        match inner(input) {
            Ok((rest, (source, verb))) => {
                let (_rest, params) = parse_params(rest);
                Ok(ParsedLine {
                    source,
                    verb,
                    params,
                })
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(ProtoError::BadVerb(input.len() - e.input.len()))
            }
            Err(nom::Err::Incomplete(_)) => Err(ProtoError::EmptyLine),
        }
    }

    /// Parameter by index, or `""` when absent.
    pub fn param(&self, idx: usize) -> &'a str {
        self.params.get(idx).copied().unwrap_or("")
    }
}

/// An owned outbound line.
///
/// The final parameter is emitted with a `:` prefix whenever it contains a
/// space, begins with `:`, or is empty, so round-tripping is loss-free.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Optional source to prefix with `:`.
    pub source: Option<String>,
    /// The verb.
    pub verb: String,
    /// Parameters; only the last may contain spaces.
    pub params: Vec<String>,
}

impl Line {
    /// Build a line with no source.
    pub fn new(verb: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            source: None,
            verb: verb.into(),
            params,
        }
    }

    /// Build a line carrying a `:source` prefix.
    pub fn with_source(
        source: impl Into<String>,
        verb: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            verb: verb.into(),
            params,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }
        write!(f, "{}", self.verb)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.starts_with(':') || param.contains(' ')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_verb() {
        let line = ParsedLine::parse("PING").unwrap();
        assert_eq!(line.verb, "PING");
        assert!(line.source.is_none());
        assert!(line.params.is_empty());
    }

    #[test]
    fn parses_source_and_trailing() {
        let line = ParsedLine::parse(":42X SJOIN 1000 #x +nt :@42XAAAAAA +42XAAAAAB\r\n").unwrap();
        assert_eq!(line.source, Some("42X"));
        assert_eq!(line.verb, "SJOIN");
        assert_eq!(
            line.params.as_slice(),
            &["1000", "#x", "+nt", "@42XAAAAAA +42XAAAAAB"]
        );
    }

    #[test]
    fn collapses_space_runs() {
        let line = ParsedLine::parse("MODE  #chan   +o  nick").unwrap();
        assert_eq!(line.params.as_slice(), &["#chan", "+o", "nick"]);
    }

    #[test]
    fn empty_trailing_is_kept() {
        let line = ParsedLine::parse("TOPIC #chan :").unwrap();
        assert_eq!(line.params.as_slice(), &["#chan", ""]);
    }

    #[test]
    fn enforces_para_limit() {
        let raw = format!("CMD{}", " p".repeat(MAXPARA + 4));
        let line = ParsedLine::parse(&raw).unwrap();
        assert_eq!(line.params.len(), MAXPARA);
    }

    #[test]
    fn rejects_empty_and_bad_verbs() {
        assert!(ParsedLine::parse("").is_err());
        assert!(ParsedLine::parse("\r\n").is_err());
        assert!(ParsedLine::parse("12").is_err());
        assert!(ParsedLine::parse("PING2PONG").is_err());
    }

    #[test]
    fn numeric_verbs_pass() {
        let line = ParsedLine::parse(":svc.example 451 * :You have not registered").unwrap();
        assert_eq!(line.verb, "451");
    }

    #[test]
    fn display_round_trips() {
        let line = Line::with_source(
            "42XAA0001",
            "PRIVMSG",
            vec!["#chan".into(), "hello there".into()],
        );
        assert_eq!(line.to_string(), ":42XAA0001 PRIVMSG #chan :hello there");

        let parsed_input = line.to_string();
        let parsed = ParsedLine::parse(&parsed_input).unwrap();
        assert_eq!(parsed.param(1), "hello there");
    }

    #[test]
    fn display_escapes_awkward_trailing() {
        let line = Line::new("TOPIC", vec!["#c".into(), String::new()]);
        assert_eq!(line.to_string(), "TOPIC #c :");

        let line = Line::new("TOPIC", vec!["#c".into(), ":colon first".into()]);
        assert_eq!(line.to_string(), "TOPIC #c ::colon first");
    }
}
