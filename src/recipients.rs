//! Header recipients and envelope-derived Bcc.

use mail_parser::{Address, HeaderName, HeaderValue, Message};
use serde::{Deserialize, Serialize};

/// One address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RecipientEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }
}

/// Resolved recipients for one message.
///
/// Every `bcc` address is absent from `to` and `cc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    pub to: Vec<RecipientEntry>,
    pub cc: Vec<RecipientEntry>,
    pub bcc: Vec<RecipientEntry>,
    pub reply_to: Vec<RecipientEntry>,
}

/// Build the recipient set from the message headers and SMTP envelope.
///
/// `message` is `None` for a blank payload; every recipient then lands in
/// Bcc.
pub fn resolve(message: Option<&Message<'_>>, envelope: &[String]) -> RecipientSet {
    let (to, cc, reply_to) = match message {
        Some(m) => (
            header_entries(m, HeaderName::To),
            header_entries(m, HeaderName::Cc),
            header_entries(m, HeaderName::ReplyTo),
        ),
        None => Default::default(),
    };
    let bcc = bcc_from_envelope(&to, &cc, envelope);
    RecipientSet {
        to,
        cc,
        bcc,
        reply_to,
    }
}

/// Envelope recipients not named in To or Cc, in envelope order.
///
/// Comparison is on the literal address string: `A@x.com` and `a@x.com`
/// are different recipients here.
pub fn bcc_from_envelope(
    to: &[RecipientEntry],
    cc: &[RecipientEntry],
    envelope: &[String],
) -> Vec<RecipientEntry> {
    let visible: std::collections::HashSet<&str> = to
        .iter()
        .chain(cc)
        .map(|r| r.address.as_str())
        .collect();

    envelope
        .iter()
        .flat_map(|rcpt| rcpt.split(','))
        .map(str::trim)
        .filter(|addr| !addr.is_empty() && !visible.contains(addr))
        .map(RecipientEntry::new)
        .collect()
}

/// Every occurrence of `name`, flattened into entries. Group syntax
/// contributes its member addresses.
fn header_entries(message: &Message<'_>, name: HeaderName<'_>) -> Vec<RecipientEntry> {
    let mut entries = Vec::new();
    for value in message.header_values(name) {
        let HeaderValue::Address(address) = value else {
            continue;
        };
        match address {
            Address::List(addrs) => entries.extend(addrs.iter().filter_map(to_entry)),
            Address::Group(groups) => entries.extend(
                groups
                    .iter()
                    .flat_map(|g| g.addresses.iter())
                    .filter_map(to_entry),
            ),
        }
    }
    entries
}

fn to_entry(addr: &mail_parser::Addr<'_>) -> Option<RecipientEntry> {
    let address = addr.address.as_deref()?.trim();
    if address.is_empty() {
        return None;
    }
    Some(RecipientEntry {
        address: address.to_string(),
        name: addr
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use mail_parser::MessageParser;

    use super::*;

    fn resolve_raw(headers: &str, envelope: &[&str]) -> RecipientSet {
        let raw = format!("{headers}\r\n\r\nbody\r\n");
        let message = MessageParser::default().parse(raw.as_bytes()).unwrap();
        let envelope: Vec<String> = envelope.iter().map(|s| s.to_string()).collect();
        resolve(Some(&message), &envelope)
    }

    fn addresses(entries: &[RecipientEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.address.as_str()).collect()
    }

    #[test]
    fn bcc_is_envelope_minus_visible() {
        let set = resolve_raw(
            "To: a@x.com\r\nCc: b@x.com",
            &["a@x.com", "b@x.com", "c@x.com"],
        );
        assert_eq!(set.to, vec![RecipientEntry::new("a@x.com")]);
        assert_eq!(set.cc, vec![RecipientEntry::new("b@x.com")]);
        assert_eq!(set.bcc, vec![RecipientEntry::new("c@x.com")]);
    }

    #[test]
    fn display_names_quoted_and_unquoted() {
        let set = resolve_raw(
            "To: \"Doe, Jane\" <jane@x.com>, Bob <bob@x.com>, plain@x.com",
            &[],
        );
        assert_eq!(
            set.to,
            vec![
                RecipientEntry::named("jane@x.com", "Doe, Jane"),
                RecipientEntry::named("bob@x.com", "Bob"),
                RecipientEntry::new("plain@x.com"),
            ]
        );
    }

    #[test]
    fn repeated_headers_accumulate() {
        let set = resolve_raw("To: a@x.com\r\nTo: b@x.com, c@x.com", &[]);
        assert_eq!(addresses(&set.to), vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn reply_to_is_resolved_separately() {
        let set = resolve_raw(
            "To: a@x.com\r\nReply-To: Help Desk <help@x.com>",
            &["a@x.com"],
        );
        assert_eq!(set.reply_to, vec![RecipientEntry::named("help@x.com", "Help Desk")]);
        assert!(set.bcc.is_empty());
    }

    #[test]
    fn group_members_are_included() {
        let set = resolve_raw("To: Team: a@x.com, b@x.com;", &[]);
        assert_eq!(addresses(&set.to), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn bcc_keeps_envelope_order_and_splits_entries() {
        let visible = vec![RecipientEntry::new("v@x.com")];
        let envelope = vec![
            "z@x.com".to_string(),
            " v@x.com , y@x.com".to_string(),
            "".to_string(),
            "a@x.com".to_string(),
        ];
        let bcc = bcc_from_envelope(&visible, &[], &envelope);
        assert_eq!(addresses(&bcc), vec!["z@x.com", "y@x.com", "a@x.com"]);
        assert!(bcc.iter().all(|e| e.name.is_none()));
    }

    #[test]
    fn bcc_comparison_is_case_sensitive() {
        let visible = vec![RecipientEntry::new("a@x.com")];
        let bcc = bcc_from_envelope(&visible, &[], &["A@x.com".to_string()]);
        assert_eq!(addresses(&bcc), vec!["A@x.com"]);
    }

    #[test]
    fn bcc_never_overlaps_to_or_cc() {
        let to = vec![RecipientEntry::new("a@x.com"), RecipientEntry::new("b@x.com")];
        let cc = vec![RecipientEntry::new("c@x.com")];
        let envelope: Vec<String> = ["c@x.com", "d@x.com", "a@x.com", "e@x.com", "b@x.com"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bcc = bcc_from_envelope(&to, &cc, &envelope);
        for entry in &bcc {
            assert!(!to.iter().chain(&cc).any(|v| v.address == entry.address));
        }
        assert_eq!(addresses(&bcc), vec!["d@x.com", "e@x.com"]);
    }

    #[test]
    fn missing_message_puts_everyone_in_bcc() {
        let set = resolve(None, &["a@x.com".to_string()]);
        assert!(set.to.is_empty() && set.cc.is_empty() && set.reply_to.is_empty());
        assert_eq!(addresses(&set.bcc), vec!["a@x.com"]);
    }
}
