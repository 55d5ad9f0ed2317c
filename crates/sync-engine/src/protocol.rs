// crates/sync-engine/src/protocol.rs
//! Wire format exchanged with the remote service
//!
//! Payloads are explicit, schema-tagged structs. Fees are parsed from their
//! decimal text so they never pass through floating point.

use crate::error::{SyncError, SyncResult};
use crate::types::EntryVersion;
use chrono::{DateTime, Utc};
use lotkeeper_core::{
    normalize_vehicle_number, EntryId, EntryStatus, Money, Origin, ParkingEntry, PaymentStatus,
    RemoteId, Timestamp,
};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Schema tag of [`RemotePayload`]
pub const ENTRY_SCHEMA: &str = "entry.v1";

/// Money on the wire: written as a decimal string, read from a JSON number or string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMoney(pub Money);

impl Serialize for WireMoney {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for WireMoney {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The raw token keeps the number's text exactly as sent
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let text = raw.get().trim();
        let decimal = if text.starts_with('"') {
            serde_json::from_str::<String>(text).map_err(de::Error::custom)?
        } else {
            text.to_string()
        };
        Money::parse_decimal(&decimal)
            .map(WireMoney)
            .map_err(de::Error::custom)
    }
}

/// A parking record as the remote service sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub schema: String,
    /// Remote id; absent on creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub transport_name: String,
    pub vehicle_type: String,
    pub vehicle_number: String,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub driver_phone: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    pub parking_fee: WireMoney,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub notes: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Records changed on the remote since a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChangeSet {
    #[serde(default)]
    pub entries: Vec<RemotePayload>,
    /// Marker to send with the next listing
    #[serde(default)]
    pub checkpoint: Option<String>,
}

fn to_wire_time(timestamp: Timestamp) -> SyncResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp.as_millis()).ok_or_else(|| {
        SyncError::invalid_data(format!("timestamp {} out of range", timestamp.as_millis()))
    })
}

fn from_wire_time(time: &DateTime<Utc>) -> Timestamp {
    Timestamp::from_millis(time.timestamp_millis())
}

impl RemotePayload {
    /// Snapshot of a local entry, carrying its remote id when linked
    pub fn from_entry(entry: &ParkingEntry) -> SyncResult<Self> {
        Ok(Self {
            schema: ENTRY_SCHEMA.to_string(),
            id: entry.remote_id.as_ref().map(|id| id.as_str().to_string()),
            transport_name: entry.transport_name.clone(),
            vehicle_type: entry.vehicle_type.clone(),
            vehicle_number: entry.vehicle_number.clone(),
            driver_name: entry.driver_name.clone(),
            driver_phone: entry.driver_phone.clone(),
            payment_type: entry.payment_type.clone(),
            entry_time: to_wire_time(entry.entry_time)?,
            exit_time: entry.exit_time.map(to_wire_time).transpose()?,
            status: entry.status,
            parking_fee: WireMoney(entry.parking_fee),
            payment_status: entry.payment_status,
            notes: entry.notes.clone(),
            last_modified: to_wire_time(entry.last_modified)?,
            deleted_at: entry.deleted_at.map(to_wire_time).transpose()?,
        })
    }

    pub fn remote_id(&self) -> Option<RemoteId> {
        self.id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(RemoteId::new)
    }

    /// Converts into a remote-origin entry with a fresh local id
    pub fn to_entry(&self) -> SyncResult<ParkingEntry> {
        if self.schema != ENTRY_SCHEMA {
            return Err(SyncError::invalid_data(format!(
                "unsupported payload schema '{}'",
                self.schema
            )));
        }

        Ok(ParkingEntry {
            id: EntryId::new(),
            remote_id: self.remote_id(),
            transport_name: self.transport_name.trim().to_string(),
            vehicle_type: self.vehicle_type.clone(),
            vehicle_number: normalize_vehicle_number(&self.vehicle_number),
            driver_name: self.driver_name.clone(),
            driver_phone: self.driver_phone.clone(),
            payment_type: self.payment_type.clone(),
            entry_time: from_wire_time(&self.entry_time),
            exit_time: self.exit_time.as_ref().map(from_wire_time),
            status: self.status,
            parking_fee: self.parking_fee.0,
            payment_status: self.payment_status,
            notes: self.notes.clone(),
            last_modified: from_wire_time(&self.last_modified),
            created_by: Origin::Remote,
            deleted_at: self.deleted_at.as_ref().map(from_wire_time),
        })
    }

    pub fn to_version(&self) -> SyncResult<EntryVersion> {
        Ok(EntryVersion::from_entry(self.to_entry()?))
    }
}
