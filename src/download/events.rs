//! Async event payloads emitted by the download manager.
//!
//! Events flow over a bounded `mpsc` channel consumed by the application
//! layer. Progress ticks are sent with `try_send` so a slow consumer can
//! never block the copy loop; terminal events always reach the channel.

use serde::Serialize;

/// Capacity of the event channel handed to the application layer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the content-delivery core.
///
/// Serialized with the wire names the frontend listens for
/// (`download-progress`, `download-complete`, `download-error`,
/// `local-server-started`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    /// Periodic progress from the copy loop.
    #[serde(rename = "download-progress")]
    Progress {
        /// Content identifier.
        content_id: String,
        /// Quality variant.
        quality: String,
        /// Bytes written so far.
        bytes: u64,
        /// Expected total bytes, when known.
        total: Option<u64>,
    },

    /// A download finalized successfully.
    #[serde(rename = "download-complete")]
    Completed {
        /// Content identifier.
        content_id: String,
        /// Quality variant.
        quality: String,
    },

    /// A download failed; the reason is user-presentable.
    #[serde(rename = "download-error")]
    Failed {
        /// Content identifier.
        content_id: String,
        /// Quality variant.
        quality: String,
        /// Failure description.
        reason: String,
    },

    /// The local streaming server is listening.
    #[serde(rename = "local-server-started")]
    ServerStarted {
        /// Loopback port the server bound to.
        port: u16,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_wire_name() {
        let event = DownloadEvent::Progress {
            content_id: "episode-42".to_string(),
            quality: "hd".to_string(),
            bytes: 1024,
            total: Some(4096),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "download-progress");
        assert_eq!(json["bytes"], 1024);
        assert_eq!(json["total"], 4096);
    }

    #[test]
    fn test_terminal_event_wire_names() {
        let completed = DownloadEvent::Completed {
            content_id: "ep".to_string(),
            quality: "hd".to_string(),
        };
        let failed = DownloadEvent::Failed {
            content_id: "ep".to_string(),
            quality: "hd".to_string(),
            reason: "network error".to_string(),
        };
        let started = DownloadEvent::ServerStarted { port: 4242 };

        assert_eq!(
            serde_json::to_value(&completed).unwrap()["type"],
            "download-complete"
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap()["type"],
            "download-error"
        );
        assert_eq!(
            serde_json::to_value(&started).unwrap()["type"],
            "local-server-started"
        );
    }
}
