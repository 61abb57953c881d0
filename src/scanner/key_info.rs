//! Per-key scan results

use std::fmt;

/// Redis value type as reported by TYPE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    String,
    List,
    Hash,
    Set,
    Zset,
    /// Stream, module types and anything newer
    Other(String),
}

impl KeyType {
    /// Parse a TYPE reply; "none" means the key is gone
    pub fn from_reply(reply: &str) -> Option<Self> {
        let kind = match reply {
            "none" | "" => return None,
            "string" => KeyType::String,
            "list" => KeyType::List,
            "hash" => KeyType::Hash,
            "set" => KeyType::Set,
            "zset" => KeyType::Zset,
            other => KeyType::Other(other.to_string()),
        };
        Some(kind)
    }

    /// Element-count probe for this type
    pub fn length_command(&self) -> Option<&'static str> {
        match self {
            KeyType::String => Some("STRLEN"),
            KeyType::List => Some("LLEN"),
            KeyType::Hash => Some("HLEN"),
            KeyType::Set => Some("SCARD"),
            KeyType::Zset => Some("ZCARD"),
            KeyType::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Hash => "hash",
            KeyType::Set => "set",
            KeyType::Zset => "zset",
            KeyType::Other(s) => s,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: String,
    pub key_type: KeyType,
    /// Keys with the same metric value that were not collected
    pub collisions: u64,
    pub length: i64,
    pub memory: i64,
    pub frequency: i64,
}

impl KeyInfo {
    pub fn new(key: &str, key_type: KeyType) -> Self {
        Self {
            key: key.to_string(),
            key_type,
            collisions: 0,
            length: 0,
            memory: 0,
            frequency: 0,
        }
    }

    pub fn with_frequency(mut self, frequency: i64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.length = length;
        self
    }

    pub fn with_memory(mut self, memory: i64) -> Self {
        self.memory = memory;
        self
    }
}
