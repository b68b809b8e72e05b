//! Parses a single `WWW-Authenticate` header value into a [`Challenge`].
//!
//! Grammar, per spec: `scheme (SP token "=" (token | quoted-string)
//! ("," token "=" (token | quoted-string))*)?`, scheme case-insensitive,
//! arbitrary whitespace around commas. Duplicate parameter keys are
//! rejected; unknown schemes, or a known scheme word followed by something
//! that isn't a parameter list, both degrade to `Scheme::Unknown` with no
//! parameters.

use std::collections::BTreeMap;

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{char, multispace0},
    combinator::all_consuming,
    multi::separated_list0,
    sequence::{delimited, separated_pair},
};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Bearer,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: Scheme,
    /// `None` for unknown schemes; `Some` (possibly empty) otherwise.
    pub params: Option<BTreeMap<String, String>>,
}

impl Challenge {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key).map(String::as_str)
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    pub fn service(&self) -> Option<&str> {
        self.param("service")
    }

    pub fn scope(&self) -> Option<&str> {
        self.param("scope")
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till1(|c| c == '"'), char('"')).parse(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    nom::branch::alt((quoted, token)).parse(input)
}

fn key_value(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(token, char('='), value).parse(input)
}

fn param_list(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    let comma = delimited(multispace0, char(','), multispace0);
    all_consuming(separated_list0(comma, key_value)).parse(input)
}

/// Parse one `WWW-Authenticate` header value.
pub fn parse(header: &str) -> Result<Challenge, Error> {
    let trimmed = header.trim();
    let (scheme_word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((s, r)) => (s, r.trim_start()),
        None => (trimmed, ""),
    };

    let scheme = match scheme_word.to_ascii_lowercase().as_str() {
        "basic" => Scheme::Basic,
        "bearer" => Scheme::Bearer,
        _ => Scheme::Unknown,
    };

    if scheme == Scheme::Unknown {
        return Ok(Challenge {
            scheme,
            params: None,
        });
    }

    if rest.is_empty() {
        return Ok(Challenge {
            scheme,
            params: Some(BTreeMap::new()),
        });
    }

    let Ok((_, pairs)) = param_list(rest) else {
        // a known scheme word followed by something that isn't a
        // well-formed parameter list degrades to Unknown
        return Ok(Challenge {
            scheme: Scheme::Unknown,
            params: None,
        });
    };

    let mut params = BTreeMap::new();
    for (k, v) in pairs {
        if params.insert(k.to_string(), v.to_string()).is_some() {
            return Err(Error::InvalidChallenge {
                header: header.to_string(),
                reason: format!("duplicate parameter {k:?}"),
            });
        }
    }

    Ok(Challenge {
        scheme,
        params: Some(params),
    })
}

/// Parse every `WWW-Authenticate` header value present on a response,
/// skipping any that fail to parse as a documented degrade path (a header
/// we can't make sense of at all is simply not a candidate challenge).
pub fn parse_all<'a>(values: impl Iterator<Item = &'a str>) -> Vec<Challenge> {
    values.filter_map(|v| parse(v).ok()).collect()
}
