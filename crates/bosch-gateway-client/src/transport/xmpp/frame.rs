use crate::error::{Error, Result};
use crate::transport::{Method, Request, USER_AGENT};

const SEPARATORS: [&str; 3] = ["\r\n\r\n", "\n\n", "\r\r"];

// Encodes the HTTP-like frame carried in a request stanza body.
pub(crate) fn request_frame(request: &Request, body: Option<&str>) -> String {
    let mut frame = format!(
        "{} {} HTTP/1.1\r\nUser-Agent: {USER_AGENT}\r\n",
        request.method, request.path
    );
    if let (Method::Put, Some(body)) = (request.method, body) {
        frame.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ));
    } else {
        frame.push_str("\r\n");
    }
    frame
}

// A decoded reply frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Reply<'a> {
    pub(crate) status: u16,
    pub(crate) reason: &'a str,
    pub(crate) body: &'a str,
}

impl Reply<'_> {
    pub(crate) const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    // Returns the body, failing on non-success statuses.
    pub(crate) fn into_body(self) -> Result<String> {
        if self.is_success() {
            Ok(self.body.to_owned())
        } else {
            Err(Error::device(self.status, self.reason.to_owned()))
        }
    }
}

// Parses a reply frame, `None` when the text does not start with a status
// line.
pub(crate) fn parse_reply(text: &str) -> Option<Reply<'_>> {
    let text = text.trim_start();
    let status_line = text.lines().next()?.split('\r').next()?;

    let mut parts = status_line.splitn(3, ' ');
    if !parts.next()?.starts_with("HTTP/1.") {
        return None;
    }
    let status = parts.next()?.trim().parse::<u16>().ok()?;
    let reason = parts.next().unwrap_or_default().trim();

    Some(Reply {
        status,
        reason,
        body: frame_body(text),
    })
}

// Returns the payload of a frame, or the whole text when it has no headers.
pub(crate) fn frame_body(text: &str) -> &str {
    let boundary = SEPARATORS
        .iter()
        .filter_map(|separator| text.find(separator).map(|index| index + separator.len()))
        .min();

    match boundary {
        Some(start) if has_start_line(text) => text[start..].trim(),
        None if has_start_line(text) => "",
        _ => text.trim(),
    }
}

fn has_start_line(text: &str) -> bool {
    let first = text.trim_start().split(['\r', '\n']).next().unwrap_or_default();
    first.starts_with("HTTP/1.") || first.ends_with("HTTP/1.0") || first.ends_with("HTTP/1.1")
}
