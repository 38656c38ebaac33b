//! Scanning helpers for the small, well-known XML shapes this system
//! exchanges: single-line accounting records, uid-message payloads and API
//! acknowledgements. The shapes are flat and tiny, which keeps a full XML
//! stack out of the dependency tree.

/// Extracts the text content of the first `<name ...>text</name>` element.
///
/// Self-closing elements carry no text and yield `None`. A tag whose name
/// merely starts with `name` (e.g. `User-Name-Suffix` vs `User-Name`) is
/// skipped, not matched.
pub fn element_text<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut at = 0;
    while let Some(pos) = xml[at..].find(&open) {
        let tag_start = at + pos + open.len();
        let rest = &xml[tag_start..];
        match rest.chars().next() {
            Some('/') => return None,
            Some(c) if c == '>' || c.is_whitespace() => {
                let gt = rest.find('>')?;
                if rest[..gt].ends_with('/') {
                    return None;
                }
                let body = &rest[gt + 1..];
                return body.find(&close).map(|end| &body[..end]);
            }
            _ => at = tag_start,
        }
    }
    None
}

/// Returns the attribute list of the first `<name ...>` start tag, i.e. the
/// slice between the tag name and the closing `>`.
pub fn first_tag<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");
    let mut at = 0;
    while let Some(pos) = xml[at..].find(&open) {
        let tag_start = at + pos + open.len();
        let rest = &xml[tag_start..];
        match rest.chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let gt = rest.find('>')?;
                return Some(&rest[..gt]);
            }
            _ => at = tag_start,
        }
    }
    None
}

/// Looks up a double-quoted attribute value inside a start-tag slice as
/// returned by [`first_tag`].
pub fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{name}=\"");
    let start = tag.find(&marker)? + marker.len();
    let rest = &tag[start..];
    rest.find('"').map(|end| &rest[..end])
}

/// Escapes a value for use inside a double-quoted XML attribute or as
/// element text.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Resolves the five predefined entities. Unknown entities pass through
/// verbatim.
pub fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        unescaped.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let known = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match known {
            Some((entity, c)) => {
                unescaped.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                unescaped.push('&');
                rest = &rest[1..];
            }
        }
    }
    unescaped.push_str(rest);
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_text_plain() {
        assert_eq!(
            element_text("<Event><User-Name>bob</User-Name></Event>", "User-Name"),
            Some("bob")
        );
    }

    #[test]
    fn element_text_with_attributes() {
        assert_eq!(
            element_text(
                r#"<Acct-Status-Type data_type="0">1</Acct-Status-Type>"#,
                "Acct-Status-Type"
            ),
            Some("1")
        );
    }

    #[test]
    fn element_text_skips_longer_tag_names() {
        assert_eq!(
            element_text(
                "<User-Name-Style>x</User-Name-Style><User-Name>bob</User-Name>",
                "User-Name"
            ),
            Some("bob")
        );
    }

    #[test]
    fn element_text_self_closing_is_empty() {
        assert_eq!(element_text("<User-Name/>", "User-Name"), None);
        assert_eq!(element_text("<User-Name />", "User-Name"), None);
    }

    #[test]
    fn element_text_missing() {
        assert_eq!(element_text("<Event></Event>", "User-Name"), None);
    }

    #[test]
    fn first_tag_and_attr() {
        let xml = r#"<response status="error"><msg>bad key</msg></response>"#;
        let tag = first_tag(xml, "response").unwrap();
        assert_eq!(attr_value(tag, "status"), Some("error"));
        assert_eq!(attr_value(tag, "code"), None);
    }

    #[test]
    fn escape_round_trip() {
        let raw = r#"corp\o'brien <&> "x""#;
        assert_eq!(unescape(&escape(raw)), raw);
    }

    #[test]
    fn unescape_leaves_unknown_entities() {
        assert_eq!(unescape("a&nbsp;b"), "a&nbsp;b");
    }
}
