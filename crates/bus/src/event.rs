//! Agent run event shapes.

use serde::{Deserialize, Serialize};

/// Which stream of a run an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStream {
    Assistant,
    Tool,
    Lifecycle,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Start,
    End,
    Error,
    Other,
}

/// A single sequenced event emitted by an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub run_id: String,
    pub stream: AgentStream,
    /// Monotone positive integer per run id.
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AgentEvent {
    pub fn lifecycle_phase(&self) -> Option<LifecyclePhase> {
        if self.stream != AgentStream::Lifecycle {
            return None;
        }
        Some(
            match self.data.get("phase").and_then(|p| p.as_str()) {
                Some("start") => LifecyclePhase::Start,
                Some("end") => LifecyclePhase::End,
                Some("error") => LifecyclePhase::Error,
                _ => LifecyclePhase::Other,
            },
        )
    }

    /// Cumulative assistant text carried by this event, if any.
    pub fn assistant_text(&self) -> Option<&str> {
        if self.stream != AgentStream::Assistant {
            return None;
        }
        self.data.get("text").and_then(|t| t.as_str())
    }

    /// Media URLs discovered under `data.mediaUrls` and
    /// `data.images[].{url,imageUrl}`, in document order.
    pub fn media_urls(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(urls) = self.data.get("mediaUrls").and_then(|v| v.as_array()) {
            for url in urls {
                if let Some(s) = url.as_str() {
                    out.push(s.to_string());
                }
            }
        }
        if let Some(images) = self.data.get("images").and_then(|v| v.as_array()) {
            for image in images {
                for key in ["url", "imageUrl"] {
                    if let Some(s) = image.get(key).and_then(|v| v.as_str()) {
                        out.push(s.to_string());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(stream: AgentStream, data: serde_json::Value) -> AgentEvent {
        AgentEvent {
            run_id: "r1".into(),
            stream,
            seq: 1,
            ts: 0,
            session_key: None,
            data,
        }
    }

    #[test]
    fn stream_parses_lowercase() {
        let e: AgentEvent = serde_json::from_value(serde_json::json!({
            "runId": "r", "stream": "assistant", "seq": 1, "ts": 2, "data": {}
        }))
        .unwrap();
        assert_eq!(e.stream, AgentStream::Assistant);
    }

    #[test]
    fn lifecycle_phase_end() {
        let e = event(AgentStream::Lifecycle, serde_json::json!({"phase": "end"}));
        assert_eq!(e.lifecycle_phase(), Some(LifecyclePhase::End));
    }

    #[test]
    fn assistant_text_only_for_assistant_stream() {
        let e = event(AgentStream::Tool, serde_json::json!({"text": "x"}));
        assert!(e.assistant_text().is_none());
        let e = event(AgentStream::Assistant, serde_json::json!({"text": "x"}));
        assert_eq!(e.assistant_text(), Some("x"));
    }

    #[test]
    fn media_urls_from_both_shapes() {
        let e = event(
            AgentStream::Assistant,
            serde_json::json!({
                "mediaUrls": ["https://a/1.png"],
                "images": [
                    {"url": "https://a/2.png"},
                    {"imageUrl": "https://a/3.png"}
                ]
            }),
        );
        assert_eq!(
            e.media_urls(),
            vec!["https://a/1.png", "https://a/2.png", "https://a/3.png"]
        );
    }
}
