//! Push notification payloads announcing a newly created record

use serde::Deserialize;
use syncq_core::models::{RecordName, RoomId};

use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct Envelope {
    ck: StoreSection,
}

#[derive(Debug, Deserialize)]
struct StoreSection {
    qry: QuerySection,
}

#[derive(Debug, Deserialize)]
struct QuerySection {
    /// Record name
    rid: String,
    /// Zone name
    zid: String,
    /// Zone owner
    zoid: String,
}

/// Record reference carried by a subscription push
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushPayload {
    pub record: RecordName,
    pub zone: RoomId,
    pub zone_owner: String,
}

impl PushPayload {
    /// Parse `{"ck":{"qry":{"rid":..,"zid":..,"zoid":..}}}`, ignoring any
    /// other keys the push carries
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("push payload: {e}")))?;
        let query = envelope.ck.qry;
        if query.rid.is_empty() || query.zid.is_empty() {
            return Err(Error::Decode(
                "push payload has an empty record or zone name".to_string(),
            ));
        }
        Ok(Self {
            record: RecordName::from(query.rid),
            zone: RoomId::from(query.zid),
            zone_owner: query.zoid,
        })
    }
}
