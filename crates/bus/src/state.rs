//! Bus state machine: chat links, sequencing, throttling, suppression.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use {serde_json::Value, tracing::warn};

use crate::event::{AgentEvent, AgentStream, LifecyclePhase};

/// Minimum spacing between chat delta broadcasts per run.
pub const DELTA_THROTTLE: Duration = Duration::from_millis(150);

/// Joins one agent run to one user-facing chat run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLink {
    pub session_key: String,
    pub client_run_id: String,
}

/// Per-run context registered when a run starts.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    /// Internal session id owning the run (joins to the chat link FIFO).
    pub session_id: Option<String>,
    /// Fallback session key when no chat link is queued.
    pub session_key: Option<String>,
    /// Heartbeat runs are internal; their chat broadcasts can be suppressed.
    pub heartbeat: bool,
    /// Run-scope tool-event verbosity override.
    pub verbosity: Option<String>,
    /// Session-scope tool-event verbosity override.
    pub session_verbosity: Option<String>,
}

/// Hot-reloadable bus settings.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub show_heartbeat_ok: bool,
    pub default_verbosity: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            show_heartbeat_ok: true,
            default_verbosity: "on".into(),
        }
    }
}

/// Where an emission goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitTarget {
    /// All subscribers (the gateway applies `dropIfSlow`).
    Broadcast,
    /// Per-session unicast.
    Session(String),
}

/// One event the caller must deliver.
#[derive(Debug, Clone)]
pub struct BusEmit {
    pub target: EmitTarget,
    pub event: &'static str,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct ChatBuffer {
    text: String,
    media: Vec<String>,
    last_delta: Option<Instant>,
}

#[derive(Default)]
struct BusState {
    settings: BusSettings,
    /// sessionId → FIFO of chat links awaiting their agent run.
    chat_links: HashMap<String, VecDeque<ChatLink>>,
    run_meta: HashMap<String, RunMeta>,
    last_seq: HashMap<String, u64>,
    /// clientRunId → accumulated chat state.
    buffers: HashMap<String, ChatBuffer>,
    aborted: HashSet<String>,
}

/// Process-local agent event bus.
pub struct AgentEventBus {
    inner: Mutex<BusState>,
}

impl Default for AgentEventBus {
    fn default() -> Self {
        Self::new(BusSettings::default())
    }
}

impl AgentEventBus {
    pub fn new(settings: BusSettings) -> Self {
        Self {
            inner: Mutex::new(BusState {
                settings,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("bus mutex poisoned, continuing with inner state");
                poisoned.into_inner()
            },
        }
    }

    /// Replace the hot-reloadable settings.
    pub fn update_settings(&self, settings: BusSettings) {
        self.lock().settings = settings;
    }

    /// Register run context before (or as) its first event arrives.
    pub fn register_run(&self, run_id: &str, meta: RunMeta) {
        self.lock().run_meta.insert(run_id.to_string(), meta);
    }

    /// FIFO-enqueue a chat link for a session.
    pub fn register_chat_run(&self, session_id: &str, link: ChatLink) {
        self.lock()
            .chat_links
            .entry(session_id.to_string())
            .or_default()
            .push_back(link);
    }

    /// Mark a run aborted: its terminal lifecycle event drains silently.
    pub fn mark_aborted(&self, run_id: &str) {
        self.lock().aborted.insert(run_id.to_string());
    }

    /// Handle one agent event; returns the emissions the caller delivers.
    pub fn handle_event(&self, evt: &AgentEvent) -> Vec<BusEmit> {
        let mut out = Vec::new();
        let mut state = self.lock();

        let meta = state.run_meta.get(&evt.run_id).cloned().unwrap_or_default();

        // 1. Resolve the chat link: queued link first, then fallbacks.
        let queued = meta
            .session_id
            .as_ref()
            .and_then(|sid| state.chat_links.get(sid))
            .and_then(|q| q.front())
            .cloned();
        let session_key = queued
            .as_ref()
            .map(|l| l.session_key.clone())
            .or_else(|| evt.session_key.clone())
            .or_else(|| meta.session_key.clone());
        let client_run_id = queued
            .as_ref()
            .map(|l| l.client_run_id.clone())
            .unwrap_or_else(|| evt.run_id.clone());

        // 2. Sequence check with gap detection. Gaps emit a synthetic error
        //    but never block delivery.
        let expected = state.last_seq.get(&evt.run_id).copied().unwrap_or(0) + 1;
        if evt.seq != expected {
            out.push(BusEmit {
                target: EmitTarget::Broadcast,
                event: "agent",
                payload: serde_json::json!({
                    "runId": evt.run_id,
                    "stream": "error",
                    "data": {
                        "reason": "seq gap",
                        "expected": expected,
                        "received": evt.seq,
                    },
                }),
            });
        }
        state.last_seq.insert(evt.run_id.clone(), evt.seq);

        // 3. Tool events pass only when verbosity resolves to "on"
        //    (run > session > default scope).
        if evt.stream == AgentStream::Tool {
            let effective = meta
                .verbosity
                .as_deref()
                .or(meta.session_verbosity.as_deref())
                .unwrap_or(&state.settings.default_verbosity)
                .to_string();
            if effective != "on" {
                return out;
            }
        }

        // 4. Heartbeat suppression: chat-facing broadcasts are dropped, the
        //    per-session unicast always goes out.
        let suppress_broadcast = meta.heartbeat && !state.settings.show_heartbeat_ok;

        let agent_payload = serde_json::to_value(evt).unwrap_or(Value::Null);
        if !suppress_broadcast {
            out.push(BusEmit {
                target: EmitTarget::Broadcast,
                event: "agent",
                payload: agent_payload.clone(),
            });
        }
        if let Some(key) = &session_key {
            out.push(BusEmit {
                target: EmitTarget::Session(key.clone()),
                event: "agent",
                payload: agent_payload,
            });
        }

        // 5. Assistant deltas: buffer cumulative text + media, throttled.
        if let Some(text) = evt.assistant_text() {
            let media = evt.media_urls();
            let buffer = state.buffers.entry(client_run_id.clone()).or_default();
            buffer.text = text.to_string();
            for url in media {
                let trimmed = url.trim().to_string();
                if !trimmed.is_empty() && !buffer.media.contains(&trimmed) {
                    buffer.media.push(trimmed);
                }
            }

            let due = buffer
                .last_delta
                .is_none_or(|at| at.elapsed() >= DELTA_THROTTLE);
            if due {
                buffer.last_delta = Some(Instant::now());
                let payload = serde_json::json!({
                    "state": "delta",
                    "clientRunId": client_run_id,
                    "sessionKey": session_key,
                    "message": buffer.text,
                    "mediaUrls": buffer.media,
                });
                if !suppress_broadcast {
                    out.push(BusEmit {
                        target: EmitTarget::Broadcast,
                        event: "chat",
                        payload: payload.clone(),
                    });
                }
                if let Some(key) = &session_key {
                    out.push(BusEmit {
                        target: EmitTarget::Session(key.clone()),
                        event: "chat",
                        payload,
                    });
                }
            }
        }

        // 6. Terminal lifecycle: final/error chat event, then cleanup.
        //    Aborted runs drain without a final.
        if matches!(
            evt.lifecycle_phase(),
            Some(LifecyclePhase::End | LifecyclePhase::Error)
        ) {
            let aborted = state.aborted.remove(&evt.run_id);
            let buffer = state.buffers.remove(&client_run_id).unwrap_or_default();

            if !aborted {
                let chat_state = match evt.lifecycle_phase() {
                    Some(LifecyclePhase::Error) => "error",
                    _ => "final",
                };
                let payload = serde_json::json!({
                    "state": chat_state,
                    "clientRunId": client_run_id,
                    "sessionKey": session_key,
                    "message": buffer.text,
                    "mediaUrls": buffer.media,
                });
                if !suppress_broadcast {
                    out.push(BusEmit {
                        target: EmitTarget::Broadcast,
                        event: "chat",
                        payload: payload.clone(),
                    });
                }
                if let Some(key) = &session_key {
                    out.push(BusEmit {
                        target: EmitTarget::Session(key.clone()),
                        event: "chat",
                        payload,
                    });
                }
            }

            // Remove the consumed chat link and the run's bookkeeping.
            if let Some(sid) = meta.session_id.as_ref() {
                if let Some(queue) = state.chat_links.get_mut(sid) {
                    queue.pop_front();
                    if queue.is_empty() {
                        state.chat_links.remove(sid);
                    }
                }
            }
            state.run_meta.remove(&evt.run_id);
            state.last_seq.remove(&evt.run_id);
        }

        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        crate::event::{AgentEvent, AgentStream},
    };

    fn event(run_id: &str, seq: u64, stream: AgentStream, data: Value) -> AgentEvent {
        AgentEvent {
            run_id: run_id.into(),
            stream,
            seq,
            ts: 0,
            session_key: None,
            data,
        }
    }

    fn assistant(run_id: &str, seq: u64, text: &str) -> AgentEvent {
        event(
            run_id,
            seq,
            AgentStream::Assistant,
            serde_json::json!({"text": text}),
        )
    }

    fn lifecycle(run_id: &str, seq: u64, phase: &str) -> AgentEvent {
        event(
            run_id,
            seq,
            AgentStream::Lifecycle,
            serde_json::json!({"phase": phase}),
        )
    }

    fn broadcasts<'a>(emits: &'a [BusEmit], name: &str) -> Vec<&'a BusEmit> {
        emits
            .iter()
            .filter(|e| e.event == name && e.target == EmitTarget::Broadcast)
            .collect()
    }

    fn linked_bus(run_id: &str) -> AgentEventBus {
        let bus = AgentEventBus::default();
        bus.register_run(run_id, RunMeta {
            session_id: Some("sid-1".into()),
            ..Default::default()
        });
        bus.register_chat_run("sid-1", ChatLink {
            session_key: "agent:main:webchat:dm:u1".into(),
            client_run_id: "cr-1".into(),
        });
        bus
    }

    #[test]
    fn seq_gap_emits_synthetic_error() {
        let bus = AgentEventBus::default();
        let mut agent_events = 0;
        let mut gap_errors = Vec::new();

        for seq in [1u64, 2, 4] {
            for emit in bus.handle_event(&assistant("r1", seq, "x")) {
                if emit.event != "agent" || emit.target != EmitTarget::Broadcast {
                    continue;
                }
                if emit.payload["data"]["reason"] == "seq gap" {
                    gap_errors.push(emit.payload.clone());
                } else {
                    agent_events += 1;
                }
            }
        }

        assert_eq!(agent_events, 3);
        assert_eq!(gap_errors.len(), 1);
        assert_eq!(gap_errors[0]["data"]["expected"], 3);
        assert_eq!(gap_errors[0]["data"]["received"], 4);

        // lastSeq advanced to 4: seq 5 is in order now.
        let emits = bus.handle_event(&assistant("r1", 5, "x"));
        assert!(
            emits
                .iter()
                .all(|e| e.payload["data"]["reason"] != "seq gap")
        );
    }

    #[test]
    fn delta_throttled_but_buffer_keeps_text() {
        let bus = linked_bus("r1");

        let first = bus.handle_event(&assistant("r1", 1, "he"));
        let second = bus.handle_event(&assistant("r1", 2, "hello"));

        let deltas =
            broadcasts(&first, "chat").len() + broadcasts(&second, "chat").len();
        assert!(deltas <= 1, "expected at most one delta, got {deltas}");

        // The final carries the full buffered text.
        let finals = bus.handle_event(&lifecycle("r1", 3, "end"));
        let final_chat = broadcasts(&finals, "chat");
        assert_eq!(final_chat.len(), 1);
        assert_eq!(final_chat[0].payload["state"], "final");
        assert_eq!(final_chat[0].payload["message"], "hello");
        assert_eq!(final_chat[0].payload["clientRunId"], "cr-1");
    }

    #[test]
    fn finals_are_never_throttled() {
        let bus = linked_bus("r1");
        bus.handle_event(&assistant("r1", 1, "hi"));
        let finals = bus.handle_event(&lifecycle("r1", 2, "end"));
        assert_eq!(broadcasts(&finals, "chat").len(), 1);
    }

    #[test]
    fn aborted_run_drains_without_final() {
        let bus = linked_bus("r1");
        bus.handle_event(&assistant("r1", 1, "partial"));
        bus.mark_aborted("r1");

        let emits = bus.handle_event(&lifecycle("r1", 2, "end"));
        assert!(broadcasts(&emits, "chat").is_empty());

        // Buffers cleared: a new run under the same client id starts fresh.
        bus.register_run("r2", RunMeta {
            session_id: Some("sid-1".into()),
            ..Default::default()
        });
        bus.register_chat_run("sid-1", ChatLink {
            session_key: "agent:main:webchat:dm:u1".into(),
            client_run_id: "cr-1".into(),
        });
        bus.handle_event(&assistant("r2", 1, "fresh"));
        let finals = bus.handle_event(&lifecycle("r2", 2, "end"));
        let final_chat = broadcasts(&finals, "chat");
        assert_eq!(final_chat[0].payload["message"], "fresh");
    }

    #[test]
    fn lifecycle_error_emits_error_state() {
        let bus = linked_bus("r1");
        bus.handle_event(&assistant("r1", 1, "oops"));
        let emits = bus.handle_event(&lifecycle("r1", 2, "error"));
        let chat = broadcasts(&emits, "chat");
        assert_eq!(chat[0].payload["state"], "error");
    }

    #[test]
    fn heartbeat_suppressed_from_broadcast_only() {
        let bus = AgentEventBus::new(BusSettings {
            show_heartbeat_ok: false,
            default_verbosity: "on".into(),
        });
        bus.register_run("hb-1", RunMeta {
            heartbeat: true,
            session_key: Some("agent:main:webchat:dm:u1".into()),
            ..Default::default()
        });

        let emits = bus.handle_event(&assistant("hb-1", 1, "ok"));
        assert!(broadcasts(&emits, "agent").is_empty());
        assert!(broadcasts(&emits, "chat").is_empty());
        assert!(
            emits
                .iter()
                .any(|e| matches!(&e.target, EmitTarget::Session(k) if k.contains("webchat")))
        );
    }

    #[test]
    fn heartbeat_visible_when_show_ok() {
        let bus = AgentEventBus::default();
        bus.register_run("hb-1", RunMeta {
            heartbeat: true,
            ..Default::default()
        });
        let emits = bus.handle_event(&assistant("hb-1", 1, "ok"));
        assert_eq!(broadcasts(&emits, "agent").len(), 1);
    }

    #[test]
    fn tool_events_gated_by_verbosity() {
        let bus = AgentEventBus::new(BusSettings {
            show_heartbeat_ok: true,
            default_verbosity: "off".into(),
        });
        let tool = event("r1", 1, AgentStream::Tool, serde_json::json!({"name": "exec"}));
        assert!(broadcasts(&bus.handle_event(&tool), "agent").is_empty());

        // Run-scope override wins over the default.
        bus.register_run("r2", RunMeta {
            verbosity: Some("on".into()),
            ..Default::default()
        });
        let tool = event("r2", 1, AgentStream::Tool, serde_json::json!({"name": "exec"}));
        assert_eq!(broadcasts(&bus.handle_event(&tool), "agent").len(), 1);
    }

    #[test]
    fn media_urls_deduplicated() {
        let bus = linked_bus("r1");
        bus.handle_event(&event(
            "r1",
            1,
            AgentStream::Assistant,
            serde_json::json!({"text": "a", "mediaUrls": ["https://x/1.png", " https://x/1.png "]}),
        ));
        bus.handle_event(&event(
            "r1",
            2,
            AgentStream::Assistant,
            serde_json::json!({"text": "ab", "images": [{"url": "https://x/1.png"}, {"imageUrl": "https://x/2.png"}]}),
        ));
        let finals = bus.handle_event(&lifecycle("r1", 3, "end"));
        let chat = broadcasts(&finals, "chat");
        assert_eq!(
            chat[0].payload["mediaUrls"],
            serde_json::json!(["https://x/1.png", "https://x/2.png"])
        );
    }

    #[test]
    fn chat_links_consumed_fifo() {
        let bus = AgentEventBus::default();
        bus.register_run("r1", RunMeta {
            session_id: Some("sid".into()),
            ..Default::default()
        });
        bus.register_run("r2", RunMeta {
            session_id: Some("sid".into()),
            ..Default::default()
        });
        bus.register_chat_run("sid", ChatLink {
            session_key: "k".into(),
            client_run_id: "first".into(),
        });
        bus.register_chat_run("sid", ChatLink {
            session_key: "k".into(),
            client_run_id: "second".into(),
        });

        bus.handle_event(&assistant("r1", 1, "a"));
        let finals = bus.handle_event(&lifecycle("r1", 2, "end"));
        assert_eq!(broadcasts(&finals, "chat")[0].payload["clientRunId"], "first");

        bus.handle_event(&assistant("r2", 1, "b"));
        let finals = bus.handle_event(&lifecycle("r2", 2, "end"));
        assert_eq!(broadcasts(&finals, "chat")[0].payload["clientRunId"], "second");
    }

    #[test]
    fn fallback_uses_event_session_key_and_run_id() {
        let bus = AgentEventBus::default();
        let mut evt = assistant("r9", 1, "hi");
        evt.session_key = Some("agent:main:slack:dm:u2".into());
        let emits = bus.handle_event(&evt);
        let delta = broadcasts(&emits, "chat");
        assert_eq!(delta[0].payload["clientRunId"], "r9");
        assert_eq!(delta[0].payload["sessionKey"], "agent:main:slack:dm:u2");
    }
}
