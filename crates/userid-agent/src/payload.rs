//! Rendering of uid-message update payloads.
//!
//! One flush produces one `<uid-message>` document enumerating every
//! buffered login and logout entry, plus register/unregister blocks for
//! tagged entries when the dynamic address feature is enabled.

use crate::record::IdentityEvent;
use crate::xml;

/// Renders the update document for one batch. Login entries carry the
/// configured timeout in minutes; entry order follows buffer insertion
/// order.
pub fn render(
    login: &[IdentityEvent],
    logout: &[IdentityEvent],
    timeout_minutes: u32,
    dynamic_tags: bool,
) -> String {
    let mut message =
        String::from("<uid-message><version>1.0</version><type>update</type><payload><login>");
    for entry in login {
        message.push_str(&format!(
            "<entry name=\"{}\" ip=\"{}\" timeout=\"{}\"/>",
            xml::escape(&entry.username),
            xml::escape(&entry.source_ip),
            timeout_minutes
        ));
    }
    message.push_str("</login><logout>");
    for entry in logout {
        message.push_str(&format!(
            "<entry name=\"{}\" ip=\"{}\"/>",
            xml::escape(&entry.username),
            xml::escape(&entry.source_ip)
        ));
    }
    message.push_str("</logout>");
    if dynamic_tags {
        message.push_str("<register>");
        for entry in login {
            if let Some(tag) = &entry.tag {
                message.push_str(&format!(
                    "<entry ip=\"{}\"><tag><member>{}</member></tag></entry>",
                    xml::escape(&entry.source_ip),
                    xml::escape(tag)
                ));
            }
        }
        message.push_str("</register><unregister>");
        for entry in logout {
            if entry.tag.is_some() {
                message.push_str(&format!(
                    "<entry ip=\"{}\"></entry>",
                    xml::escape(&entry.source_ip)
                ));
            }
        }
        message.push_str("</unregister>");
    }
    message.push_str("</payload></uid-message>");
    message
}

/// Structural view of a rendered update document, independent of attribute
/// order. Used to verify what actually went over the wire.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PayloadSummary {
    /// (name, ip, timeout) per login entry.
    pub login: Vec<(String, String, u32)>,
    /// (name, ip) per logout entry.
    pub logout: Vec<(String, String)>,
    /// (ip, tag) per registered dynamic address object.
    pub register: Vec<(String, String)>,
    /// ip per unregistered dynamic address object.
    pub unregister: Vec<String>,
}

/// Reparses a rendered update document into its entry sets.
pub fn parse(message: &str) -> PayloadSummary {
    let mut summary = PayloadSummary::default();
    if let Some(section) = xml::element_text(message, "login") {
        for tag in entry_tags(section) {
            if let (Some(name), Some(ip)) =
                (xml::attr_value(tag, "name"), xml::attr_value(tag, "ip"))
            {
                let timeout = xml::attr_value(tag, "timeout")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
                summary
                    .login
                    .push((xml::unescape(name), xml::unescape(ip), timeout));
            }
        }
    }
    if let Some(section) = xml::element_text(message, "logout") {
        for tag in entry_tags(section) {
            if let (Some(name), Some(ip)) =
                (xml::attr_value(tag, "name"), xml::attr_value(tag, "ip"))
            {
                summary.logout.push((xml::unescape(name), xml::unescape(ip)));
            }
        }
    }
    if let Some(section) = xml::element_text(message, "register") {
        for chunk in section.split("</entry>") {
            if let (Some(tag), Some(member)) =
                (xml::first_tag(chunk, "entry"), xml::element_text(chunk, "member"))
            {
                if let Some(ip) = xml::attr_value(tag, "ip") {
                    summary
                        .register
                        .push((xml::unescape(ip), xml::unescape(member)));
                }
            }
        }
    }
    if let Some(section) = xml::element_text(message, "unregister") {
        for chunk in section.split("</entry>") {
            if let Some(ip) = xml::first_tag(chunk, "entry").and_then(|t| xml::attr_value(t, "ip"))
            {
                summary.unregister.push(xml::unescape(ip));
            }
        }
    }
    summary
}

/// Yields the start-tag slice of every `<entry .../>` in a section.
fn entry_tags(section: &str) -> impl Iterator<Item = &str> {
    section.split("<entry").skip(1).filter_map(|rest| {
        rest.find('>').map(|gt| rest[..gt].trim_end_matches('/'))
    })
}
