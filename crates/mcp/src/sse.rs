//! Server-Sent-Events body parsing for Streamable HTTP responses.
//!
//! A Streamable HTTP server may answer a POST with `text/event-stream`. The
//! JSON-RPC result is the last complete JSON payload carried in `data:` lines.

use serde_json::Value;

/// Parse an SSE body into the last complete JSON payload found in `data:`
/// lines. Multi-line `data:` fields within one event block are joined with
/// newlines per the SSE spec.
pub fn last_json_payload(body: &str) -> Option<Value> {
    let mut last: Option<Value> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>, last: &mut Option<Value>| {
        if lines.is_empty() {
            return;
        }
        let joined = lines.join("\n");
        lines.clear();
        if let Ok(value) = serde_json::from_str::<Value>(&joined) {
            *last = Some(value);
        }
    };

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            // Blank line terminates an event block.
            flush(&mut data_lines, &mut last);
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Other SSE fields (event:, id:, retry:, comments) are ignored.
    }
    flush(&mut data_lines, &mut last);
    last
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"tools\":[]}}\n\n";
        let value = last_json_payload(body).unwrap();
        assert_eq!(value["result"]["tools"], serde_json::json!([]));
    }

    #[test]
    fn last_payload_wins() {
        let body = concat!(
            "data: {\"n\":1}\n\n",
            "event: message\n",
            "data: {\"n\":2}\n\n",
        );
        assert_eq!(last_json_payload(body).unwrap()["n"], 2);
    }

    #[test]
    fn multiline_data_joined() {
        let body = "data: {\"a\":\ndata: 1}\n\n";
        assert_eq!(last_json_payload(body).unwrap()["a"], 1);
    }

    #[test]
    fn incomplete_json_ignored() {
        let body = "data: {\"broken\":\n\ndata: {\"ok\":true}\n\n";
        assert_eq!(last_json_payload(body).unwrap()["ok"], true);
    }

    #[test]
    fn empty_body_is_none() {
        assert!(last_json_payload("").is_none());
        assert!(last_json_payload(": comment only\n\n").is_none());
    }

    #[test]
    fn crlf_lines_handled() {
        let body = "data: {\"n\":7}\r\n\r\n";
        assert_eq!(last_json_payload(body).unwrap()["n"], 7);
    }
}
