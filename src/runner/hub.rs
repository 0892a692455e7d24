// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Broadcast of live run output to any number of viewers.
//!
//! Publishing never waits. Slow viewers lag and skip events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::storage::now_ms;
use crate::types::LogKind;

const DEFAULT_CAPACITY: usize = 1024;

/// One normalized line of output, tagged like a task log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub task_id: Option<String>,
    pub kind: LogKind,
    pub line: String,
    pub ts: i64,
}

impl StreamEvent {
    pub fn new(task_id: Option<&str>, kind: LogKind, line: impl Into<String>) -> Self {
        Self {
            task_id: task_id.map(str::to_string),
            kind,
            line: line.into(),
            ts: now_ms(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputHub {
    tx: broadcast::Sender<StreamEvent>,
}

impl Default for OutputHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutputHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Send to current subscribers; returns how many received it.
    pub fn publish(&self, event: StreamEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_viewers() {
        let hub = OutputHub::new(4);
        assert_eq!(hub.publish(StreamEvent::new(None, LogKind::Stdout, "x")), 0);
    }

    #[tokio::test]
    async fn test_fan_out() {
        let hub = OutputHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.viewer_count(), 2);
        hub.publish(StreamEvent::new(Some("t1"), LogKind::Stderr, "warn"));
        assert_eq!(a.recv().await.unwrap().line, "warn");
        assert_eq!(b.recv().await.unwrap().kind, LogKind::Stderr);
    }
}
