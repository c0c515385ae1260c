//! Chunk File Framing
//!
//! Chunks are written incrementally: a prologue when the chunk opens, one
//! fragment per record, an epilogue when it closes. The first fragment has
//! no separator and every later one is prefixed with one, so the bytes on
//! disk form a valid document without re-reading the file.
//!
//! ## File Layout
//!
//! ```text
//! Keyed (JSON, key-mapped):  {"<uid1>":{...},"<uid2>":{...}}
//! Array (JSON):              [{...},{...}]
//! Lines (text):              {...}\n{...}\n
//! ```

use crate::record::Record;
use crate::store::StoreError;
use serde::{de, Deserialize, Serialize};
use serde_json::Value;

/// On-disk format of a collection's chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// A single JSON document per chunk
    #[default]
    Json,
    /// Newline-delimited JSON
    Text,
}

impl ChunkFormat {
    /// File extension used for chunk files
    pub fn extension(&self) -> &'static str {
        match self {
            ChunkFormat::Json => "json",
            ChunkFormat::Text => "txt",
        }
    }
}

/// Framing of one open chunk, fixed by the first append into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// JSON object keyed by a record field
    Keyed,
    /// JSON array
    Array,
    /// One JSON value per line
    Lines,
}

impl Framing {
    pub fn select(format: ChunkFormat, map_key_val: bool) -> Framing {
        match (format, map_key_val) {
            (ChunkFormat::Text, _) => Framing::Lines,
            (ChunkFormat::Json, true) => Framing::Keyed,
            (ChunkFormat::Json, false) => Framing::Array,
        }
    }

    pub fn prologue(&self) -> &'static [u8] {
        match self {
            Framing::Keyed => b"{",
            Framing::Array => b"[",
            Framing::Lines => b"",
        }
    }

    pub fn epilogue(&self) -> &'static [u8] {
        match self {
            Framing::Keyed => b"}",
            Framing::Array => b"]",
            Framing::Lines => b"",
        }
    }

    fn separator(&self) -> &'static [u8] {
        match self {
            Framing::Keyed | Framing::Array => b",",
            Framing::Lines => b"",
        }
    }

    /// Encode one record as the next fragment of a chunk.
    ///
    /// `first` is true for the first record written into the chunk.
    pub fn encode(&self, record: &Record, key_field: &str, first: bool) -> Result<Vec<u8>, StoreError> {
        let body = serde_json::to_vec(record)?;
        let mut fragment = Vec::with_capacity(body.len() + 64);
        if !first {
            fragment.extend_from_slice(self.separator());
        }

        match self {
            Framing::Keyed => {
                let key = record.get(key_field).and_then(key_string).ok_or_else(|| {
                    StoreError::MissingKey {
                        field: key_field.to_string(),
                    }
                })?;
                serde_json::to_writer(&mut fragment, &key)?;
                fragment.push(b':');
                fragment.extend_from_slice(&body);
            }
            Framing::Array => fragment.extend_from_slice(&body),
            Framing::Lines => {
                fragment.extend_from_slice(&body);
                fragment.push(b'\n');
            }
        }

        Ok(fragment)
    }
}

/// Key-mapped collections accept string or integer keys
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a finalized chunk into records, whatever its framing.
///
/// Every element must be a JSON object. Anything else fails the whole
/// chunk; a corrupt chunk is never read partially.
pub fn decode_chunk(format: ChunkFormat, data: &[u8]) -> Result<Vec<Record>, serde_json::Error> {
    match format {
        ChunkFormat::Json => {
            let value: Value = serde_json::from_slice(data)?;
            records_from_value(value)
        }
        ChunkFormat::Text => {
            let mut records = Vec::new();
            for (line_no, line) in data.split(|b| *b == b'\n').enumerate() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let value: Value = serde_json::from_slice(line)?;
                records.push(expect_record(value, || format!("line {}", line_no + 1))?);
            }
            Ok(records)
        }
    }
}

/// Flatten a keyed object or array chunk into its records
pub fn records_from_value(value: Value) -> Result<Vec<Record>, serde_json::Error> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| expect_record(v, || format!("element {}", i)))
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, v)| expect_record(v, || format!("key {:?}", key)))
            .collect(),
        other => Err(de::Error::custom(format!(
            "chunk is {}, expected an object or array",
            json_kind(&other)
        ))),
    }
}

fn expect_record(value: Value, at: impl FnOnce() -> String) -> Result<Record, serde_json::Error> {
    let kind = json_kind(&value);
    Record::from_value(value)
        .ok_or_else(|| de::Error::custom(format!("{} is {}, expected an object", at(), kind)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
