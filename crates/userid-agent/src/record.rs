//! Parsing of DTS-compliant accounting records into identity events.
//!
//! A network access server appends one XML document per line to its
//! accounting log. Only session start, interim-update and stop records that
//! carry a user name and a framed IP address are of interest; everything
//! else is dropped silently at trace level.

use regex::Regex;
use tracing::trace;

use crate::errors::Creation;
use crate::xml;

/// Direction of an identity mapping change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Login,
    Logout,
}

/// A validated user-session identity event extracted from one accounting
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    pub direction: Direction,
    /// Domain-qualified user name, always in `domain\user` form.
    pub username: String,
    pub source_ip: String,
    /// NAS identifier, used as a dynamic address tag when the feature is on.
    pub tag: Option<String>,
}

impl IdentityEvent {
    /// Two events describe the same session iff user name and source IP
    /// match; direction and tag play no role.
    pub fn same_session(&self, other: &IdentityEvent) -> bool {
        self.username == other.username && self.source_ip == other.source_ip
    }
}

pub struct RecordParser {
    default_domain: String,
    include: Regex,
}

impl RecordParser {
    /// The include pattern is matched against the whole record line;
    /// non-matching records are dropped before any parsing happens.
    pub fn new(default_domain: &str, include_pattern: &str) -> Result<Self, Creation> {
        Ok(RecordParser {
            default_domain: default_domain.to_string(),
            include: Regex::new(&format!("^(?:{include_pattern})$"))?,
        })
    }

    /// Returns the identity event carried by one accounting record, or
    /// `None` for records that do not describe a user session change.
    pub fn parse(&self, line: &str) -> Option<IdentityEvent> {
        if !self.include.is_match(line) {
            trace!("record does not match the include pattern");
            return None;
        }
        let direction = match xml::element_text(line, "Acct-Status-Type")? {
            "1" | "3" => Direction::Login,
            "2" => Direction::Logout,
            status => {
                trace!(status, "ignoring accounting record of unhandled type");
                return None;
            }
        };
        let username = xml::unescape(xml::element_text(line, "User-Name")?).to_lowercase();
        if username.starts_with("host/") {
            trace!("ignoring machine authentication record");
            return None;
        }
        let source_ip = xml::unescape(xml::element_text(line, "Framed-IP-Address")?);
        let tag = xml::element_text(line, "NAS-Identifier").map(|t| xml::unescape(t));
        let event = IdentityEvent {
            direction,
            username: self.qualify(&username),
            source_ip,
            tag,
        };
        trace!(
            user = %event.username,
            ip = %event.source_ip,
            direction = ?event.direction,
            "valid accounting record"
        );
        Some(event)
    }

    /// User names arrive as `user@domain`, `domain\user` or bare `user`;
    /// the destination expects the `domain\user` form.
    fn qualify(&self, username: &str) -> String {
        if let Some((user, domain)) = username.split_once('@') {
            format!("{domain}\\{user}")
        } else if username.contains('\\') {
            username.to_string()
        } else {
            format!("{}\\{}", self.default_domain, username)
        }
    }
}
