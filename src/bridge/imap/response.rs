//! IMAP response formatting
use crate::bridge::api::MessageDetail;
use chrono::{DateTime, TimeZone, Utc};

/// Capabilities announced in the greeting and CAPABILITY
pub const CAPABILITIES: &str = "IMAP4rev1 IDLE NAMESPACE ID";

/// Format a tagged OK response
pub fn ok(tag: &str, message: &str) -> String {
    format!("{} OK {}\r\n", tag, message)
}

/// Format a tagged NO response
pub fn no(tag: &str, message: &str) -> String {
    format!("{} NO {}\r\n", tag, message)
}

/// Format a tagged BAD response
pub fn bad(tag: &str, message: &str) -> String {
    format!("{} BAD {}\r\n", tag, message)
}

/// Format an untagged response
pub fn untagged(response: &str) -> String {
    format!("* {}\r\n", response)
}

/// Format a BYE response
pub fn bye(message: &str) -> String {
    format!("* BYE {}\r\n", message)
}

/// Format a continuation request
pub fn continuation(message: &str) -> String {
    format!("+ {}\r\n", message)
}

pub fn greeting(server_name: &str) -> String {
    untagged(&format!("OK [CAPABILITY {}] {} ready", CAPABILITIES, server_name))
}

/// Format a capability response
pub fn capability() -> String {
    untagged(&format!("CAPABILITY {}", CAPABILITIES))
}

/// Format mailbox status for SELECT/EXAMINE
pub fn mailbox_status(
    exists: u32,
    first_unseen: Option<u32>,
    uid_validity: u64,
    uid_next: u32,
) -> String {
    let mut response = String::new();

    response.push_str(&untagged(&format!("{} EXISTS", exists)));
    response.push_str(&untagged("0 RECENT"));
    response.push_str(&untagged("FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)"));
    response.push_str(&untagged("OK [PERMANENTFLAGS (\\Seen \\Deleted \\Flagged)]"));

    if let Some(seq) = first_unseen {
        response.push_str(&untagged(&format!("OK [UNSEEN {}]", seq)));
    }

    response.push_str(&untagged(&format!("OK [UIDVALIDITY {}]", uid_validity)));
    response.push_str(&untagged(&format!("OK [UIDNEXT {}]", uid_next)));

    response
}

/// Format a FETCH response line. Items are raw bytes since they may carry
/// message literals.
pub fn fetch_response(seq: u32, items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("* {} FETCH (", seq).into_bytes();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(item);
    }
    out.extend_from_slice(b")\r\n");
    out
}

/// Format a literal: length prefix followed by the raw bytes
pub fn literal(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{{{}}}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

/// Encode an IMAP string.
///
/// `None` is NIL, empty is `""`. Values that cannot live inside a quoted
/// string (CR, LF, quote, backslash) become a literal whose length is the
/// UTF-8 byte length.
pub fn quote_string(s: Option<&str>) -> String {
    match s {
        None => nil().to_string(),
        Some("") => "\"\"".to_string(),
        Some(s) if s.contains(['\r', '\n', '"', '\\']) => format!("{{{}}}\r\n{}", s.len(), s),
        Some(s) => format!("\"{}\"", s),
    }
}

/// Format NIL for empty values
pub fn nil() -> &'static str {
    "NIL"
}

/// Format a parenthesized flag list
pub fn format_flags<S: AsRef<str>>(flags: &[S]) -> String {
    let flags: Vec<&str> = flags.iter().map(AsRef::as_ref).collect();
    format!("({})", flags.join(" "))
}

/// Format internal date
pub fn format_internal_date(date: &DateTime<Utc>) -> String {
    date.format("\"%d-%b-%Y %H:%M:%S +0000\"").to_string()
}

/// Millisecond timestamp to a date; missing or out-of-range input is now
pub fn timestamp_to_datetime(millis: i64) -> DateTime<Utc> {
    if millis <= 0 {
        return Utc::now();
    }
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

/// Value for a `Date:` header: the original one if known, else the
/// received time
pub fn date_header_value(detail: &MessageDetail) -> String {
    match detail.summary.date_header.as_deref().filter(|d| !d.is_empty()) {
        Some(date) => date.to_string(),
        None => timestamp_to_datetime(detail.summary.received_at)
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    }
}

/// Message-ID from the original headers, or one derived from the backend id
pub fn message_id(detail: &MessageDetail) -> String {
    detail
        .header("Message-ID")
        .unwrap_or_else(|| format!("<{}@inboxer.local>", detail.id()))
}

/// Split on commas that are outside quotes and angle brackets
fn split_addresses(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);

    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

fn format_single_address(addr: &str) -> String {
    let (personal, email) = match (addr.rfind('<'), addr.ends_with('>')) {
        (Some(lt), true) => {
            let name = addr[..lt].trim().trim_matches('"').trim();
            (Some(name).filter(|n| !n.is_empty()), &addr[lt + 1..addr.len() - 1])
        }
        _ => (None, addr.trim_start_matches('<').trim_end_matches('>')),
    };

    let (mailbox, host) = email.split_once('@').unwrap_or((email, ""));

    format!(
        "({} NIL {} {})",
        quote_string(personal),
        quote_string(Some(mailbox)),
        quote_string(Some(host))
    )
}

/// Format an address header value as an ENVELOPE address list
pub fn parse_address_list(raw: Option<&str>) -> String {
    let addresses = split_addresses(raw.unwrap_or(""));
    if addresses.is_empty() {
        return nil().to_string();
    }

    let formatted: String = addresses.into_iter().map(format_single_address).collect();
    format!("({})", formatted)
}

/// Build the ENVELOPE structure for a message
pub fn build_envelope(detail: &MessageDetail) -> String {
    let summary = &detail.summary;
    let from = parse_address_list(summary.from_addr.as_deref());

    format!(
        "({} {} {} {} {} {} NIL NIL {} {})",
        quote_string(Some(date_header_value(detail).as_str())),
        quote_string(summary.subject.as_deref()),
        from,
        from,
        from,
        parse_address_list(summary.to_addr.as_deref()),
        quote_string(detail.header("In-Reply-To").as_deref()),
        quote_string(Some(message_id(detail).as_str())),
    )
}

fn text_part(subtype: &str, body: &str) -> String {
    format!(
        "(\"text\" \"{}\" (\"charset\" \"utf-8\") NIL NIL \"7bit\" {} {})",
        subtype,
        body.len(),
        body.matches('\n').count() + 1
    )
}

/// Build BODYSTRUCTURE from whichever bodies the message has
pub fn build_body_structure(detail: &MessageDetail) -> String {
    match (detail.text_body(), detail.html_body()) {
        (Some(text), Some(html)) => format!(
            "({}{} \"alternative\")",
            text_part("plain", text),
            text_part("html", html)
        ),
        (None, Some(html)) => text_part("html", html),
        (text, None) => text_part("plain", text.unwrap_or("")),
    }
}

/// Multipart boundary derived from the backend id
pub fn mime_boundary(id: &str) -> String {
    let compact: String = id.chars().filter(|&c| c != '-').take(16).collect();
    format!("----=_Part_{}", compact)
}

/// Reconstruct an RFC 5322 message from the structured record
pub fn synthesize_rfc5322(detail: &MessageDetail) -> String {
    let summary = &detail.summary;
    let mut message = String::new();

    message.push_str(&format!("Message-ID: {}\r\n", message_id(detail)));
    message.push_str(&format!(
        "From: {}\r\n",
        summary.from_addr.as_deref().unwrap_or("unknown@unknown")
    ));
    message.push_str(&format!(
        "To: {}\r\n",
        summary.to_addr.as_deref().unwrap_or("unknown@unknown")
    ));
    message.push_str(&format!("Subject: {}\r\n", summary.subject.as_deref().unwrap_or("")));
    message.push_str(&format!("Date: {}\r\n", date_header_value(detail)));
    message.push_str("MIME-Version: 1.0\r\n");

    match (detail.text_body(), detail.html_body()) {
        (Some(text), Some(html)) => {
            let boundary = mime_boundary(detail.id());
            message.push_str(&format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
                boundary
            ));
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            message.push_str(text);
            message.push_str("\r\n");
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
            message.push_str(html);
            message.push_str("\r\n");
            message.push_str(&format!("--{}--\r\n", boundary));
        }
        (None, Some(html)) => {
            message.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
            message.push_str(html);
            message.push_str("\r\n");
        }
        (text, None) => {
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            message.push_str(text.unwrap_or(""));
            message.push_str("\r\n");
        }
    }

    message
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a message into its header block (including the blank line that
/// ends it) and body. Accepts CRLF or bare LF line endings.
pub fn split_message(content: &[u8]) -> (Vec<u8>, &[u8]) {
    let crlf = find(content, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(content, b"\n\n").map(|i| (i, 2));
    let separator = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match separator {
        Some((at, len)) => (content[..at + len].to_vec(), &content[at + len..]),
        None => {
            let mut header = content.to_vec();
            header.extend_from_slice(b"\r\n\r\n");
            (header, &[])
        }
    }
}

/// Header fields named in a `HEADER.FIELDS (...)` or `HEADER.FIELDS.NOT
/// (...)` section, with folded continuation lines kept and a terminating
/// blank line
pub fn extract_header_fields(content: &[u8], section: &str) -> Vec<u8> {
    let (header, _) = split_message(content);
    let upper = section.to_uppercase();
    let exclude = upper.starts_with("HEADER.FIELDS.NOT");

    let names: Vec<String> = match (section.find('('), section.rfind(')')) {
        (Some(open), Some(close)) if open < close => section[open + 1..close]
            .split_whitespace()
            .map(str::to_lowercase)
            .collect(),
        _ => return header,
    };

    let text = String::from_utf8_lossy(&header);
    let mut result = String::new();
    let mut keep = false;

    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if keep {
                result.push_str(line);
                result.push_str("\r\n");
            }
            continue;
        }
        keep = match line.split_once(':') {
            Some((name, _)) if !name.is_empty() => {
                names.contains(&name.trim().to_lowercase()) != exclude
            }
            _ => false,
        };
        if keep {
            result.push_str(line);
            result.push_str("\r\n");
        }
    }

    result.push_str("\r\n");
    result.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::api::MessageSummary;

    fn detail(text: Option<&str>, html: Option<&str>) -> MessageDetail {
        MessageDetail {
            summary: MessageSummary {
                id: "abcd-ef01-2345-6789-0000".to_string(),
                received_at: 1_700_000_000_000,
                subject: Some("Hello".to_string()),
                from_addr: Some("\"Doe, Jane\" <jane@example.com>".to_string()),
                to_addr: Some("bob@example.org".to_string()),
                ..MessageSummary::default()
            },
            text_body: text.map(str::to_string),
            html_body: html.map(str::to_string),
            headers_json: None,
        }
    }

    #[test]
    fn test_responses() {
        assert_eq!(ok("A1", "LOGIN completed"), "A1 OK LOGIN completed\r\n");
        assert_eq!(no("A2", "SELECT failed"), "A2 NO SELECT failed\r\n");
        assert_eq!(bad("A3", "Unknown command"), "A3 BAD Unknown command\r\n");
        assert_eq!(
            greeting("Test bridge"),
            "* OK [CAPABILITY IMAP4rev1 IDLE NAMESPACE ID] Test bridge ready\r\n"
        );
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string(None), "NIL");
        assert_eq!(quote_string(Some("")), "\"\"");
        assert_eq!(quote_string(Some("plain text")), "\"plain text\"");
        assert_eq!(quote_string(Some("say \"hi\"")), "{8}\r\nsay \"hi\"");
        // Literal length counts UTF-8 bytes, not characters
        assert_eq!(quote_string(Some("héllo\r\nwörld")), "{14}\r\nhéllo\r\nwörld");
    }

    #[test]
    fn test_fetch_response_with_literal() {
        let items = vec![b"UID 3".to_vec(), [b"BODY[] ".to_vec(), literal(b"hi")].concat()];
        assert_eq!(fetch_response(2, &items), b"* 2 FETCH (UID 3 BODY[] {2}\r\nhi)\r\n");
    }

    #[test]
    fn test_internal_date() {
        let date = timestamp_to_datetime(1_700_000_000_000);
        assert_eq!(format_internal_date(&date), "\"14-Nov-2023 22:13:20 +0000\"");
    }

    #[test]
    fn test_address_list() {
        assert_eq!(parse_address_list(None), "NIL");
        assert_eq!(parse_address_list(Some(" ")), "NIL");
        assert_eq!(
            parse_address_list(Some("\"Doe, Jane\" <jane@example.com>, bob@example.org")),
            "((\"Doe, Jane\" NIL \"jane\" \"example.com\")(NIL NIL \"bob\" \"example.org\"))"
        );
        assert_eq!(
            parse_address_list(Some("<root@localhost>")),
            "((NIL NIL \"root\" \"localhost\"))"
        );
    }

    #[test]
    fn test_envelope() {
        let mut msg = detail(Some("body"), None);
        msg.headers_json = Some(r#"{"In-Reply-To":"<parent@x>"}"#.to_string());
        let envelope = build_envelope(&msg);
        let from = "(\"Doe, Jane\" NIL \"jane\" \"example.com\")";

        assert_eq!(
            envelope,
            format!(
                "(\"Tue, 14 Nov 2023 22:13:20 GMT\" \"Hello\" ({f}) ({f}) ({f}) \
                 ((NIL NIL \"bob\" \"example.org\")) NIL NIL \"<parent@x>\" \
                 \"<abcd-ef01-2345-6789-0000@inboxer.local>\")",
                f = from
            )
        );
    }

    #[test]
    fn test_body_structure() {
        assert_eq!(
            build_body_structure(&detail(Some("one\ntwo"), None)),
            "(\"text\" \"plain\" (\"charset\" \"utf-8\") NIL NIL \"7bit\" 7 2)"
        );
        assert_eq!(
            build_body_structure(&detail(None, None)),
            "(\"text\" \"plain\" (\"charset\" \"utf-8\") NIL NIL \"7bit\" 0 1)"
        );
        let both = build_body_structure(&detail(Some("t"), Some("<p>h</p>")));
        assert!(both.starts_with("((\"text\" \"plain\""));
        assert!(both.contains(")(\"text\" \"html\""));
        assert!(both.ends_with(" \"alternative\")"));
    }

    #[test]
    fn test_synthesize_multipart() {
        let message = synthesize_rfc5322(&detail(Some("plain"), Some("<b>rich</b>")));
        assert!(message.starts_with("Message-ID: <abcd-ef01-2345-6789-0000@inboxer.local>\r\n"));
        assert!(message.contains("Content-Type: multipart/alternative; boundary=\"----=_Part_abcdef0123456789\"\r\n"));
        assert!(message.contains("\r\n\r\n------=_Part_abcdef0123456789\r\nContent-Type: text/plain"));
        assert!(message.ends_with("------=_Part_abcdef0123456789--\r\n"));
    }

    #[test]
    fn test_synthesize_single_part() {
        let mut msg = detail(None, Some("<i>x</i>"));
        msg.summary.from_addr = None;
        let message = synthesize_rfc5322(&msg);
        assert!(message.contains("From: unknown@unknown\r\n"));
        assert!(message.ends_with("Content-Type: text/html; charset=utf-8\r\n\r\n<i>x</i>\r\n"));
    }

    #[test]
    fn test_split_message() {
        let (header, body) = split_message(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        assert_eq!(header, b"A: 1\r\nB: 2\r\n\r\n");
        assert_eq!(body, b"body\r\n");

        let (header, body) = split_message(b"A: 1\n\nbody");
        assert_eq!(header, b"A: 1\n\n");
        assert_eq!(body, b"body");

        let (header, body) = split_message(b"A: 1");
        assert_eq!(header, b"A: 1\r\n\r\n");
        assert!(body.is_empty());
    }

    #[test]
    fn test_extract_header_fields() {
        let raw = b"From: a@b\r\nSubject: long\r\n  folded\r\nTo: c@d\r\n\r\nbody";
        assert_eq!(
            extract_header_fields(raw, "HEADER.FIELDS (SUBJECT from)"),
            b"From: a@b\r\nSubject: long\r\n  folded\r\n\r\n"
        );
        assert_eq!(
            extract_header_fields(raw, "HEADER.FIELDS.NOT (SUBJECT)"),
            b"From: a@b\r\nTo: c@d\r\n\r\n"
        );
    }
}
