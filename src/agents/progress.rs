use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::selector::{SelectorProbe, TestOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Fetch,
    Analyze {
        iteration: u32,
        #[serde(rename = "maxIterations")]
        max_iterations: u32,
    },
    Validate,
}

/// Side-channel notification about a synthesis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status(Phase),
    #[serde(rename_all = "camelCase")]
    ToolCall {
        selector: String,
        context_selector: Option<String>,
        attr: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        selector: String,
        match_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        field_found: Option<String>,
        samples: Vec<String>,
    },
    AiText {
        text: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn tool_call(probe: &SelectorProbe) -> Self {
        ProgressEvent::ToolCall {
            selector: probe.selector.clone(),
            context_selector: probe.context_selector.clone(),
            attr: probe.attr.clone(),
        }
    }

    pub fn tool_result(probe: &SelectorProbe, outcome: &TestOutcome) -> Self {
        let field_found = match outcome {
            TestOutcome::Context { field_found, .. } => Some(field_found.clone()),
            _ => None,
        };
        ProgressEvent::ToolResult {
            selector: probe.selector.clone(),
            match_count: outcome.match_count(),
            field_found,
            samples: outcome.samples().to_vec(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Status(_) => "status",
            ProgressEvent::ToolCall { .. } => "tool_call",
            ProgressEvent::ToolResult { .. } => "tool_result",
            ProgressEvent::AiText { .. } => "ai_text",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// Render as one Server-Sent Events frame.
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}

/// Receives progress events. Delivery is best effort and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a bounded tokio channel, dropping them when the
/// receiver is full or gone.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Dropped progress event: {}", e);
        }
    }
}

/// A channel sink plus the stream its events arrive on.
pub fn channel(buffer: usize) -> (ChannelSink, ReceiverStream<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink::new(tx), ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_status_sse_frame() {
        let event = ProgressEvent::Status(Phase::Analyze {
            iteration: 1,
            max_iterations: 3,
        });
        let frame = event.to_sse();
        assert!(frame.starts_with("event: status\ndata: "));
        assert!(frame.ends_with("\n\n"));
        let data: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("event: status\ndata: ").trim_end()).unwrap();
        assert_eq!(
            data,
            serde_json::json!({ "phase": "analyze", "iteration": 1, "maxIterations": 3 })
        );
        assert_eq!(
            ProgressEvent::Status(Phase::Fetch).to_sse(),
            "event: status\ndata: {\"phase\":\"fetch\"}\n\n"
        );
    }

    #[test]
    fn test_tool_events_use_camel_case() {
        let probe = SelectorProbe::new("a").within(".item");
        let call = serde_json::to_value(ProgressEvent::tool_call(&probe)).unwrap();
        assert_eq!(call["event"], "tool_call");
        assert_eq!(call["data"]["contextSelector"], ".item");
        assert!(call["data"]["attr"].is_null());

        let outcome = TestOutcome::Context {
            context_matches: 4,
            field_found: "3/3".into(),
            samples: vec!["x".into()],
        };
        let result = serde_json::to_value(ProgressEvent::tool_result(&probe, &outcome)).unwrap();
        assert_eq!(result["data"]["matchCount"], 4);
        assert_eq!(result["data"]["fieldFound"], "3/3");

        let plain = TestOutcome::Matches {
            match_count: 0,
            samples: vec![],
        };
        let result = serde_json::to_value(ProgressEvent::tool_result(&probe, &plain)).unwrap();
        assert!(result["data"].get("fieldFound").is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_drops() {
        let (sink, mut stream) = channel(1);
        sink.emit(ProgressEvent::AiText { text: "one".into() });
        // full, dropped
        sink.emit(ProgressEvent::AiText { text: "two".into() });

        assert_eq!(
            stream.next().await,
            Some(ProgressEvent::AiText { text: "one".into() })
        );

        drop(stream);
        sink.emit(ProgressEvent::Error {
            message: "closed".into(),
        });
    }
}
