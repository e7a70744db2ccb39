//! Event definitions
//!
//! Defines a single logged mutation and its text line encoding.

use crate::error::{LogError, Result};

/// Field separator inside a log line
pub const FIELD_DELIMITER: char = '\t';

/// A single entry in the transaction log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Sequence number - strictly increasing within one log
    pub sequence: u64,

    /// The mutation recorded by this event
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Put a key-value pair (the value may be empty)
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

/// Persisted code of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Put = 1,
    Delete = 2,
}

impl EventKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventKind::Put),
            2 => Some(EventKind::Delete),
            _ => None,
        }
    }
}

impl Operation {
    pub fn kind(&self) -> EventKind {
        match self {
            Operation::Put { .. } => EventKind::Put,
            Operation::Delete { .. } => EventKind::Delete,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }

    /// The value of a Put, `None` for a Delete
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Operation::Put { value, .. } => Some(value),
            Operation::Delete { .. } => None,
        }
    }

    /// Rebuild an operation from its kind code and already-decoded fields.
    ///
    /// A Put must carry a value, a Delete must not.
    pub fn from_parts(kind: EventKind, key: Vec<u8>, value: Option<Vec<u8>>) -> std::result::Result<Self, String> {
        match (kind, value) {
            (EventKind::Put, Some(value)) => Ok(Operation::Put { key, value }),
            (EventKind::Put, None) => Err("put event without a value".into()),
            (EventKind::Delete, None) => Ok(Operation::Delete { key }),
            (EventKind::Delete, Some(_)) => Err("delete event carries a value".into()),
        }
    }
}

impl Event {
    pub fn new(sequence: u64, operation: Operation) -> Self {
        Self { sequence, operation }
    }

    pub fn kind(&self) -> EventKind {
        self.operation.kind()
    }

    /// Encode as one log line, trailing newline included.
    ///
    /// ```text
    /// <sequence>\t<kind>\t<hex(key)>\t<hex(value)>\n
    /// ```
    /// The value field is always present; it is empty for a Delete and for
    /// an empty Put, the kind code tells them apart.
    pub fn encode_line(&self) -> String {
        let value = self.operation.value().map(hex::encode).unwrap_or_default();
        format!(
            "{seq}{d}{kind}{d}{key}{d}{value}\n",
            seq = self.sequence,
            kind = self.kind().code(),
            key = hex::encode(self.operation.key()),
            value = value,
            d = FIELD_DELIMITER,
        )
    }

    /// Decode one log line (with or without its trailing newline).
    ///
    /// `line_no` is only used for error reporting.
    pub fn decode_line(line: &str, line_no: u64) -> Result<Self> {
        let parse_err = |reason: String| LogError::Parse { line: line_no, reason };

        let line = line.strip_suffix('\n').unwrap_or(line);
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if fields.len() != 4 {
            return Err(parse_err(format!("expected 4 fields, found {}", fields.len())));
        }

        let sequence: u64 = fields[0]
            .parse()
            .map_err(|e| parse_err(format!("bad sequence {:?}: {}", fields[0], e)))?;
        let kind = fields[1]
            .parse::<u8>()
            .ok()
            .and_then(EventKind::from_code)
            .ok_or_else(|| parse_err(format!("unknown event type {:?}", fields[1])))?;
        let key = hex::decode(fields[2]).map_err(|e| parse_err(format!("bad key encoding: {}", e)))?;

        let value = match kind {
            EventKind::Put => Some(
                hex::decode(fields[3]).map_err(|e| parse_err(format!("bad value encoding: {}", e)))?,
            ),
            EventKind::Delete if fields[3].is_empty() => None,
            EventKind::Delete => return Err(parse_err("delete event carries a value".into())),
        };

        let operation = Operation::from_parts(kind, key, value).map_err(parse_err)?;
        Ok(Event { sequence, operation })
    }
}

/// Tracks the last sequence seen while replaying and rejects regressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceCheck {
    last: u64,
}

impl SequenceCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence` if it is strictly greater than everything seen so far
    pub fn observe(&mut self, sequence: u64) -> Result<()> {
        if sequence <= self.last {
            return Err(LogError::SequenceViolation {
                previous: self.last,
                found: sequence,
            });
        }
        self.last = sequence;
        Ok(())
    }

    /// Highest sequence accepted so far (0 if none)
    pub fn last(&self) -> u64 {
        self.last
    }
}
