//! HTTP/2 fingerprint: SETTINGS order, connection window, priorities and
//! pseudo-header order.

use serde::{Deserialize, Serialize};

/// SETTINGS identifiers (RFC 9113 §6.5.2, RFC 9218).
pub mod setting {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
    pub const NO_RFC7540_PRIORITIES: u16 = 0x9;
}

/// Default flow-control window before any SETTINGS/WINDOW_UPDATE.
pub const DEFAULT_WINDOW: u32 = 65_535;

/// Pseudo-header fields of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PseudoHeader {
    #[serde(rename = ":method")]
    Method,
    #[serde(rename = ":authority")]
    Authority,
    #[serde(rename = ":scheme")]
    Scheme,
    #[serde(rename = ":path")]
    Path,
}

impl PseudoHeader {
    pub fn name(self) -> &'static str {
        match self {
            Self::Method => ":method",
            Self::Authority => ":authority",
            Self::Scheme => ":scheme",
            Self::Path => ":path",
        }
    }

    fn letter(self) -> char {
        match self {
            Self::Method => 'm',
            Self::Authority => 'a',
            Self::Scheme => 's',
            Self::Path => 'p',
        }
    }
}

/// Stream dependency carried by a PRIORITY frame or a HEADERS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDependency {
    pub depends_on: u32,
    pub exclusive: bool,
    /// Wire weight (0..=255); effective weight is this plus one.
    pub weight: u8,
}

/// A PRIORITY frame sent right after the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFrame {
    pub stream_id: u32,
    #[serde(flatten)]
    pub dependency: StreamDependency,
}

/// HTTP/2 behaviour of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Http2Spec {
    /// SETTINGS in the exact order they are sent.
    pub settings: Vec<(u16, u32)>,
    /// Connection-level WINDOW_UPDATE increment sent after SETTINGS; 0 sends none.
    #[serde(default)]
    pub window_update: u32,
    #[serde(default)]
    pub priority_frames: Vec<PriorityFrame>,
    /// Priority attached to every request HEADERS frame.
    #[serde(default)]
    pub headers_priority: Option<StreamDependency>,
    pub pseudo_header_order: Vec<PseudoHeader>,
}

impl Http2Spec {
    /// Value of a SETTINGS entry this profile sends.
    pub fn setting(&self, id: u16) -> Option<u32> {
        self.settings.iter().find(|(i, _)| *i == id).map(|(_, v)| *v)
    }

    /// Stream-level receive window advertised to the peer.
    pub fn initial_window_size(&self) -> u32 {
        self.setting(setting::INITIAL_WINDOW_SIZE)
            .unwrap_or(DEFAULT_WINDOW)
    }

    /// Connection-level receive window after the initial WINDOW_UPDATE.
    pub fn connection_window(&self) -> u32 {
        DEFAULT_WINDOW.saturating_add(self.window_update)
    }

    pub fn header_table_size(&self) -> u32 {
        self.setting(setting::HEADER_TABLE_SIZE).unwrap_or(4096)
    }

    /// First client stream id usable for requests; PRIORITY frames may
    /// reserve lower odd ids as placeholder nodes.
    pub fn first_stream_id(&self) -> u32 {
        self.priority_frames
            .iter()
            .map(|p| p.stream_id)
            .filter(|id| id % 2 == 1)
            .max()
            .map(|id| id + 2)
            .unwrap_or(1)
    }

    /// Akamai-style summary: `settings|window_update|priorities|pseudo_order`.
    pub fn akamai_fingerprint(&self) -> String {
        let settings = self
            .settings
            .iter()
            .map(|(id, v)| format!("{id}:{v}"))
            .collect::<Vec<_>>()
            .join(";");
        let priorities = if self.priority_frames.is_empty() {
            "0".to_string()
        } else {
            self.priority_frames
                .iter()
                .map(|p| {
                    format!(
                        "{}:{}:{}:{}",
                        p.stream_id,
                        u8::from(p.dependency.exclusive),
                        p.dependency.depends_on,
                        u16::from(p.dependency.weight) + 1
                    )
                })
                .collect::<Vec<_>>()
                .join(",")
        };
        let order = self
            .pseudo_header_order
            .iter()
            .map(|p| p.letter().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let window = if self.window_update == 0 {
            "00".to_string()
        } else {
            self.window_update.to_string()
        };
        format!("{settings}|{window}|{priorities}|{order}")
    }
}
