//! Access points: the records kept by the name server.
//!
//! Listing format, one record per line:
//!
//! ```text
//! class name access address owner
//! ```
//!
//! `access` is any non-empty combination of `g` (get), `s` (set) and `i`
//! (info). `address` is either `host:port` or a socket path.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags! {
    /// Operations an access point accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u8 {
        const GET = 1;
        const SET = 2;
        const INFO = 4;
    }
}

impl Access {
    /// Parse access letters in any order. Repeated letters are accepted.
    pub fn parse(letters: &str) -> Result<Self> {
        if letters.is_empty() {
            return Err(Error::parse("empty access string"));
        }
        letters.chars().try_fold(Access::empty(), |acc, c| match c {
            'g' => Ok(acc | Access::GET),
            's' => Ok(acc | Access::SET),
            'i' => Ok(acc | Access::INFO),
            other => Err(Error::parse(format!(
                "unknown access letter '{other}' in \"{letters}\""
            ))),
        })
    }

    /// Canonical letters, always in `gsi` order.
    pub fn letters(&self) -> String {
        let mut s = String::with_capacity(3);
        if self.contains(Access::GET) {
            s.push('g');
        }
        if self.contains(Access::SET) {
            s.push('s');
        }
        if self.contains(Access::INFO) {
            s.push('i');
        }
        s
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

/// How an access point is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// `host:port` over TCP.
    Inet,
    /// A filesystem socket path.
    Local,
}

impl Method {
    /// Method implied by an address, if it is an address at all.
    pub fn of_address(address: &str) -> Option<Method> {
        if address.contains('/') {
            return Some(Method::Local);
        }
        let (host, port) = address.rsplit_once(':')?;
        if !host.is_empty() && port.parse::<u16>().is_ok() {
            Some(Method::Inet)
        } else {
            None
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Inet => f.write_str("inet"),
            Method::Local => f.write_str("local"),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inet" => Ok(Method::Inet),
            "local" | "unix" => Ok(Method::Local),
            other => Err(Error::parse(format!("unknown method \"{other}\""))),
        }
    }
}

/// True if `id` is a literal address rather than a `class:name` pattern.
pub fn is_address(id: &str) -> bool {
    Method::of_address(id).is_some()
}

/// One name-server record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessPoint {
    class: String,
    name: String,
    address: String,
    owner: String,
    access: Access,
}

impl AccessPoint {
    /// Create an access point.
    ///
    /// Every text field must be a single non-empty token and `access` must
    /// not be empty, so that the record survives a trip through the listing.
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        owner: impl Into<String>,
        access: Access,
    ) -> Result<Self> {
        let apt = Self {
            class: class.into(),
            name: name.into(),
            address: address.into(),
            owner: owner.into(),
            access,
        };
        for (field, value) in [
            ("class", &apt.class),
            ("name", &apt.name),
            ("address", &apt.address),
            ("owner", &apt.owner),
        ] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(Error::parse(format!(
                    "access point {field} must be a single token, got \"{value}\""
                )));
            }
        }
        if access.is_empty() {
            return Err(Error::parse("access point grants no access"));
        }
        Ok(apt)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// `class:name` identifier.
    pub fn id(&self) -> String {
        format!("{}:{}", self.class, self.name)
    }

    /// Transport method implied by the address.
    pub fn method(&self) -> Option<Method> {
        Method::of_address(&self.address)
    }

    /// True if this access point matches a `class:name` template.
    pub fn matches(&self, template: &str) -> bool {
        template_matches(template, &self.class, &self.name)
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.class, self.name, self.access, self.address, self.owner
        )
    }
}

impl FromStr for AccessPoint {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [class, name, access, address, owner] = tokens.as_slice() else {
            return Err(Error::parse(format!(
                "expected 5 tokens in listing line, got {}: \"{}\"",
                tokens.len(),
                line.trim()
            )));
        };
        AccessPoint::new(*class, *name, *address, *owner, Access::parse(access)?)
    }
}

impl TryFrom<String> for AccessPoint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AccessPoint> for String {
    fn from(apt: AccessPoint) -> Self {
        apt.to_string()
    }
}

/// Match a `class:name` template against an access point identity.
///
/// A template without `:` only constrains the name. Both halves accept `*`
/// and `?` wildcards and compare case-insensitively.
pub fn template_matches(template: &str, class: &str, name: &str) -> bool {
    match template.split_once(':') {
        Some((class_pat, name_pat)) => glob(class_pat, class) && glob(name_pat, name),
        None => glob(template, name),
    }
}

fn glob(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let t: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((spi, sti)) = star {
            pi = spi + 1;
            ti = sti + 1;
            star = Some((spi, sti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
