//! Generic durable record as exchanged with the remote record store

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::id::{RecordName, RoomId};
use crate::{Error, Result};

/// Record kinds this engine writes and understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    RoomDetails,
    NowPlayingSong,
    QueueSong,
    Share,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RoomDetails => "RoomDetails",
            Self::NowPlayingSong => "NowPlayingSong",
            Self::QueueSong => "QueueSong",
            Self::Share => "cloudkit.share",
        }
    }

    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "RoomDetails" => Some(Self::RoomDetails),
            "NowPlayingSong" => Some(Self::NowPlayingSong),
            "QueueSong" => Some(Self::QueueSong),
            "cloudkit.share" => Some(Self::Share),
            _ => None,
        }
    }
}

/// Binary attachment on a record.
///
/// Uploads reference a staged local file; downloads carry the bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    File(PathBuf),
    Data(Vec<u8>),
}

impl Asset {
    /// Read the attachment contents
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::File(path) => Ok(std::fs::read(path)?),
            Self::Data(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    DoubleList(Vec<f64>),
    StringList(Vec<String>),
    Asset(Asset),
}

/// One durable record inside a zone
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub zone: RoomId,
    pub name: RecordName,
    pub record_type: String,
    pub fields: BTreeMap<String, RecordValue>,
}

impl Record {
    #[must_use]
    pub fn new(zone: RoomId, name: RecordName, kind: RecordKind) -> Self {
        Self {
            zone,
            name,
            record_type: kind.as_str().to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: RecordValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn set(&mut self, key: &str, value: RecordValue) {
        self.fields.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_type_name(&self.record_type)
    }

    fn require(&self, key: &str) -> Result<&RecordValue> {
        self.fields.get(key).ok_or_else(|| {
            Error::decode(format!(
                "{} record `{}` is missing `{key}`",
                self.record_type, self.name
            ))
        })
    }

    fn mismatch(&self, key: &str, expected: &str) -> Error {
        Error::decode(format!(
            "{} record `{}` field `{key}` is not a {expected}",
            self.record_type, self.name
        ))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            RecordValue::String(s) => Ok(s),
            _ => Err(self.mismatch(key, "string")),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.require(key)? {
            RecordValue::Int(v) => Ok(*v),
            _ => Err(self.mismatch(key, "int")),
        }
    }

    pub fn get_double(&self, key: &str) -> Result<f64> {
        match self.require(key)? {
            RecordValue::Double(v) => Ok(*v),
            RecordValue::Int(v) => Ok(*v as f64),
            _ => Err(self.mismatch(key, "double")),
        }
    }

    pub fn get_bytes(&self, key: &str) -> Result<&[u8]> {
        match self.require(key)? {
            RecordValue::Bytes(v) => Ok(v),
            _ => Err(self.mismatch(key, "byte payload")),
        }
    }

    pub fn get_timestamp(&self, key: &str) -> Result<DateTime<Utc>> {
        match self.require(key)? {
            RecordValue::Timestamp(v) => Ok(*v),
            _ => Err(self.mismatch(key, "timestamp")),
        }
    }

    pub fn get_doubles(&self, key: &str) -> Result<&[f64]> {
        match self.require(key)? {
            RecordValue::DoubleList(v) => Ok(v),
            _ => Err(self.mismatch(key, "double list")),
        }
    }

    pub fn get_strings(&self, key: &str) -> Result<&[String]> {
        match self.require(key)? {
            RecordValue::StringList(v) => Ok(v),
            _ => Err(self.mismatch(key, "string list")),
        }
    }

    /// Optional string field
    #[must_use]
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(RecordValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Optional asset field, read into memory
    pub fn opt_asset(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.fields.get(key) {
            Some(RecordValue::Asset(asset)) => asset.read().map(Some),
            Some(RecordValue::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(self.mismatch(key, "asset")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_decode_error() {
        let record = Record::new(
            RoomId::from("zone"),
            RecordName::from("rec"),
            RecordKind::QueueSong,
        );
        let err = record.get_str("adderName").unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("adderName"));
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let record = Record::new(
            RoomId::from("zone"),
            RecordName::from("rec"),
            RecordKind::RoomDetails,
        )
        .with("activeFlag", RecordValue::String("yes".to_string()));
        assert!(record.get_int("activeFlag").unwrap_err().is_decode());
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            RecordKind::from_type_name("NowPlayingSong"),
            Some(RecordKind::NowPlayingSong)
        );
        assert_eq!(RecordKind::from_type_name("Unrelated"), None);
    }
}
