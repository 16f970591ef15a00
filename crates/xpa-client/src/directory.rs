//! Access-point lookup through the name server.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use xpa_core::access;
use xpa_core::{AccessPoint, Error, Method, NAME_SERVER, Result, Shape};

use crate::connection::Connection;
use crate::request::{RequestOptions, Target};

/// What to do with a listing line that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnMalformed {
    /// Log a warning (unless `XPA_VERBOSITY` is off) and skip the line.
    #[default]
    Warn,
    /// Fail the whole listing.
    Fail,
    Skip,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub on_malformed: OnMalformed,
    /// Only keep access points reachable by this method.
    pub method: Option<Method>,
}

type Reducer = dyn Fn(&[AccessPoint]) -> Option<AccessPoint> + Send + Sync;

/// How `find` picks among several matches.
#[derive(Clone)]
pub enum Select {
    First,
    /// Refuse with [`Error::Ambiguous`].
    Error,
    /// Let a function pick; `None` counts as ambiguous.
    With(Arc<Reducer>),
    /// Ask on stderr and read the choice from stdin.
    Interactive,
}

impl Select {
    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&[AccessPoint]) -> Option<AccessPoint> + Send + Sync + 'static,
    {
        Select::With(Arc::new(f))
    }
}

impl fmt::Debug for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Select::First => f.write_str("First"),
            Select::Error => f.write_str("Error"),
            Select::With(_) => f.write_str("With(..)"),
            Select::Interactive => f.write_str("Interactive"),
        }
    }
}

/// Parse a name-server listing.
///
/// Blank lines are ignored; malformed lines are handled per `on_malformed`.
pub fn parse_listing(listing: &str, on_malformed: OnMalformed, verbose: bool) -> Result<Vec<AccessPoint>> {
    let mut points = Vec::new();
    for (n, line) in listing.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<AccessPoint>() {
            Ok(apt) => points.push(apt),
            Err(err) => match on_malformed {
                OnMalformed::Fail => return Err(err),
                OnMalformed::Warn if verbose => {
                    tracing::warn!(line = n + 1, "skipping malformed listing line: {}", err);
                }
                OnMalformed::Warn | OnMalformed::Skip => {}
            },
        }
    }
    Ok(points)
}

/// Let the user pick one of `candidates` by number.
///
/// Returns `None` on an empty, unreadable or out-of-range answer.
pub fn choose<R: BufRead, W: Write>(candidates: &[AccessPoint], input: R, mut output: W) -> Option<AccessPoint> {
    for (i, apt) in candidates.iter().enumerate() {
        writeln!(output, "{:>3}) {} {}", i + 1, apt.id(), apt.address()).ok()?;
    }
    write!(output, "select [1-{}]: ", candidates.len()).ok()?;
    output.flush().ok()?;
    let line = input.lines().next()?.ok()?;
    let choice: usize = line.trim().parse().ok()?;
    candidates.get(choice.checked_sub(1)?).cloned()
}

impl Connection {
    /// Access points known to the name server that satisfy `predicate`.
    pub fn list<F>(&self, predicate: F, options: &ListOptions) -> Result<Vec<AccessPoint>>
    where
        F: Fn(&AccessPoint) -> bool,
    {
        let listing = self
            .get_as::<u8, &str>(
                &Shape::Text,
                Target::Template(NAME_SERVER.to_string()),
                &[],
                &RequestOptions::new(),
            )?
            .into_text()
            .unwrap_or_default();
        let points = parse_listing(&listing, options.on_malformed, self.config().verbose())?;
        Ok(points
            .into_iter()
            .filter(|apt| options.method.is_none_or(|m| apt.method() == Some(m)))
            .filter(|apt| predicate(apt))
            .collect())
    }

    /// The single access point matching `template`.
    ///
    /// `Ok(None)` if nothing matches; several matches are resolved by
    /// `select`.
    pub fn find(&self, template: &str, select: &Select) -> Result<Option<AccessPoint>> {
        let mut matches = self.list(|apt| apt.matches(template), &ListOptions::default())?;
        let ambiguous = |count| Error::Ambiguous {
            pattern: template.to_string(),
            count,
        };
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => match select {
                Select::First => Ok(Some(matches.swap_remove(0))),
                Select::Error => Err(ambiguous(count)),
                Select::With(reduce) => reduce(&matches).map(Some).ok_or_else(|| ambiguous(count)),
                Select::Interactive => choose(&matches, io::stdin().lock(), io::stderr())
                    .map(Some)
                    .ok_or_else(|| ambiguous(count)),
            },
        }
    }

    /// Address of `id`: literal addresses are returned as is, `class:name`
    /// patterns must resolve to exactly one access point.
    pub fn address(&self, id: &str) -> Result<String> {
        if access::is_address(id) {
            return Ok(id.to_string());
        }
        self.find(id, &Select::Error)?
            .map(|apt| apt.address().to_string())
            .ok_or_else(|| Error::NoMatch {
                pattern: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpa_core::Access;

    const LISTING: &str = "\
DS9 ds9 gs 127.0.0.1:14286 alice
DS9 other gsi /tmp/.xpa/DS9_other.2 bob
broken line
XPA xpans gx 127.0.0.1:14285 root

";

    #[test]
    fn malformed_lines_follow_policy() {
        let points = parse_listing(LISTING, OnMalformed::Skip, false).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].access(), Access::GET | Access::SET);
        assert_eq!(points[1].method(), Some(Method::Local));

        assert_eq!(parse_listing(LISTING, OnMalformed::Warn, true).unwrap(), points);
        assert!(matches!(
            parse_listing(LISTING, OnMalformed::Fail, true),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn interactive_choice() {
        let points = parse_listing(LISTING, OnMalformed::Skip, false).unwrap();
        let mut prompt = Vec::new();
        let picked = choose(&points, "2\n".as_bytes(), &mut prompt).unwrap();
        assert_eq!(picked.name(), "other");
        assert!(String::from_utf8(prompt).unwrap().contains("  1) DS9:ds9 127.0.0.1:14286"));

        assert!(choose(&points, "0\n".as_bytes(), io::sink()).is_none());
        assert!(choose(&points, "x\n".as_bytes(), io::sink()).is_none());
        assert!(choose(&points, "".as_bytes(), io::sink()).is_none());
    }
}
