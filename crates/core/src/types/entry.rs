//! Parking entry domain model

use crate::types::{Money, Timestamp, Validator, MILLIS_PER_HOUR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable local identifier for a parking entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random EntryId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an EntryId from a UUID string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Returns the EntryId as a string
    pub fn as_string(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the remote service; opaque to the core
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the vehicle is still on the lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    Parked,
    Exited,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parked => "Parked",
            Self::Exited => "Exited",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parked" => Ok(Self::Parked),
            "exited" => Ok(Self::Exited),
            other => Err(format!("unknown entry status '{}'", other)),
        }
    }
}

/// Payment state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Pending,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "Unpaid",
            Self::Paid => "Paid",
            Self::Pending => "Pending",
            Self::Refunded => "Refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "pending" => Ok(Self::Pending),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Where an entry was first created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    System,
    Remote,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::Remote => "Remote",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "System" => Ok(Self::System),
            "Remote" => Ok(Self::Remote),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// (vehicle number, entry time): matches a local record with its remote
/// counterpart before a remote id exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub vehicle_number: String,
    pub entry_time: Timestamp,
}

impl NaturalKey {
    pub fn new(vehicle_number: &str, entry_time: Timestamp) -> Self {
        Self {
            vehicle_number: normalize_vehicle_number(vehicle_number),
            entry_time,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vehicle_number, self.entry_time.as_millis())
    }
}

/// Trims surrounding whitespace and upper-cases a vehicle number
pub fn normalize_vehicle_number(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Business fields of an entry, used to describe differences between versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryField {
    TransportName,
    VehicleType,
    VehicleNumber,
    DriverName,
    DriverPhone,
    PaymentType,
    EntryTime,
    ExitTime,
    Status,
    ParkingFee,
    PaymentStatus,
    Notes,
}

impl fmt::Display for EntryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransportName => "transport_name",
            Self::VehicleType => "vehicle_type",
            Self::VehicleNumber => "vehicle_number",
            Self::DriverName => "driver_name",
            Self::DriverPhone => "driver_phone",
            Self::PaymentType => "payment_type",
            Self::EntryTime => "entry_time",
            Self::ExitTime => "exit_time",
            Self::Status => "status",
            Self::ParkingFee => "parking_fee",
            Self::PaymentStatus => "payment_status",
            Self::Notes => "notes",
        };
        f.write_str(name)
    }
}

/// A parking record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingEntry {
    pub id: EntryId,
    pub remote_id: Option<RemoteId>,
    pub transport_name: String,
    pub vehicle_type: String,
    pub vehicle_number: String,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub payment_type: Option<String>,
    pub entry_time: Timestamp,
    pub exit_time: Option<Timestamp>,
    pub status: EntryStatus,
    pub parking_fee: Money,
    pub payment_status: PaymentStatus,
    pub notes: String,
    pub last_modified: Timestamp,
    pub created_by: Origin,
    pub deleted_at: Option<Timestamp>, // Soft delete
}

impl ParkingEntry {
    /// Creates a new parked entry with required fields
    pub fn new(
        transport_name: impl Into<String>,
        vehicle_type: impl Into<String>,
        vehicle_number: &str,
        entry_time: Timestamp,
    ) -> Self {
        Self {
            id: EntryId::new(),
            remote_id: None,
            transport_name: transport_name.into().trim().to_string(),
            vehicle_type: vehicle_type.into(),
            vehicle_number: normalize_vehicle_number(vehicle_number),
            driver_name: None,
            driver_phone: None,
            payment_type: None,
            entry_time,
            exit_time: None,
            status: EntryStatus::Parked,
            parking_fee: Money::ZERO,
            payment_status: PaymentStatus::Unpaid,
            notes: String::new(),
            last_modified: Timestamp::now(),
            created_by: Origin::System,
            deleted_at: None,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            vehicle_number: self.vehicle_number.clone(),
            entry_time: self.entry_time,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Time on the lot up to the exit time, or up to `now` while parked
    pub fn duration_millis(&self, now: Timestamp) -> i64 {
        let end = self.exit_time.unwrap_or(now);
        (end.as_millis() - self.entry_time.as_millis()).max(0)
    }

    /// Hours on the lot, for display
    pub fn duration_hours(&self, now: Timestamp) -> f64 {
        self.duration_millis(now) as f64 / MILLIS_PER_HOUR as f64
    }

    /// Only parked entries can overstay
    pub fn is_overstayed(&self, now: Timestamp, max_hours: i64) -> bool {
        self.status == EntryStatus::Parked
            && self.duration_millis(now) > max_hours.saturating_mul(MILLIS_PER_HOUR)
    }

    /// Business fields that differ between two versions.
    ///
    /// Identity, remote id, origin, tombstone and last-modified are not business fields.
    pub fn differing_fields(&self, other: &ParkingEntry) -> Vec<EntryField> {
        let mut fields = Vec::new();
        if self.transport_name != other.transport_name {
            fields.push(EntryField::TransportName);
        }
        if self.vehicle_type != other.vehicle_type {
            fields.push(EntryField::VehicleType);
        }
        if self.vehicle_number != other.vehicle_number {
            fields.push(EntryField::VehicleNumber);
        }
        if self.driver_name != other.driver_name {
            fields.push(EntryField::DriverName);
        }
        if self.driver_phone != other.driver_phone {
            fields.push(EntryField::DriverPhone);
        }
        if self.payment_type != other.payment_type {
            fields.push(EntryField::PaymentType);
        }
        if self.entry_time != other.entry_time {
            fields.push(EntryField::EntryTime);
        }
        if self.exit_time != other.exit_time {
            fields.push(EntryField::ExitTime);
        }
        if self.status != other.status {
            fields.push(EntryField::Status);
        }
        if self.parking_fee != other.parking_fee {
            fields.push(EntryField::ParkingFee);
        }
        if self.payment_status != other.payment_status {
            fields.push(EntryField::PaymentStatus);
        }
        if self.notes != other.notes {
            fields.push(EntryField::Notes);
        }
        fields
    }

    pub fn business_eq(&self, other: &ParkingEntry) -> bool {
        self.differing_fields(other).is_empty()
    }
}

impl Validator for ParkingEntry {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let number = self.vehicle_number.trim();
        if number.is_empty() {
            errors.push("Vehicle number is required".to_string());
        } else {
            if number.chars().count() < 3 {
                errors.push("Vehicle number must be at least 3 characters".to_string());
            }
            if number.chars().filter(|c| c.is_alphanumeric()).count() < 3 {
                errors.push(
                    "Vehicle number must contain at least 3 letters or digits".to_string(),
                );
            }
        }

        if self.transport_name.trim().is_empty() {
            errors.push("Transport name is required".to_string());
        }

        if self.vehicle_type.trim().is_empty() {
            errors.push("Vehicle type is required".to_string());
        }

        match (self.status, self.exit_time) {
            (EntryStatus::Exited, None) => {
                errors.push("Exited entry must have an exit time".to_string());
            }
            (_, Some(exit)) if exit < self.entry_time => {
                errors.push("Exit time cannot be before entry time".to_string());
            }
            _ => {}
        }

        if self.parking_fee.minor() < 0 {
            errors.push("Parking fee cannot be negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Partial update of an entry. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub transport_name: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
    pub driver_name: Option<Option<String>>,
    pub driver_phone: Option<Option<String>>,
    pub payment_type: Option<Option<String>>,
    pub entry_time: Option<Timestamp>,
    pub exit_time: Option<Option<Timestamp>>,
    pub status: Option<EntryStatus>,
    pub parking_fee: Option<Money>,
    pub payment_status: Option<PaymentStatus>,
    pub notes: Option<String>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns a copy of `entry` with the patch applied. Does not touch
    /// identity or last-modified.
    pub fn apply(&self, entry: &ParkingEntry) -> ParkingEntry {
        let mut updated = entry.clone();
        if let Some(v) = &self.transport_name {
            updated.transport_name = v.trim().to_string();
        }
        if let Some(v) = &self.vehicle_type {
            updated.vehicle_type = v.clone();
        }
        if let Some(v) = &self.vehicle_number {
            updated.vehicle_number = normalize_vehicle_number(v);
        }
        if let Some(v) = &self.driver_name {
            updated.driver_name = v.clone();
        }
        if let Some(v) = &self.driver_phone {
            updated.driver_phone = v.clone();
        }
        if let Some(v) = &self.payment_type {
            updated.payment_type = v.clone();
        }
        if let Some(v) = self.entry_time {
            updated.entry_time = v;
        }
        if let Some(v) = self.exit_time {
            updated.exit_time = v;
        }
        if let Some(v) = self.status {
            updated.status = v;
        }
        if let Some(v) = self.parking_fee {
            updated.parking_fee = v;
        }
        if let Some(v) = self.payment_status {
            updated.payment_status = v;
        }
        if let Some(v) = &self.notes {
            updated.notes = v.clone();
        }
        updated
    }
}

/// Conjunctive filter for listing entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub status: Option<EntryStatus>,
    pub vehicle_type: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub vehicle_number: Option<String>,
    pub entry_from: Option<Timestamp>,
    pub entry_to: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParkingEntry {
        ParkingEntry::new("ABC Logistics", "Trailer", " mh12ab1234 ", Timestamp::from_millis(1_000))
    }

    #[test]
    fn test_new_normalizes_vehicle_number() {
        let entry = sample();
        assert_eq!(entry.vehicle_number, "MH12AB1234");
        assert_eq!(entry.status, EntryStatus::Parked);
        assert_eq!(entry.payment_status, PaymentStatus::Unpaid);
        assert_eq!(entry.created_by, Origin::System);
        assert!(entry.is_valid());
    }

    #[test]
    fn test_natural_key_text_form() {
        let entry = sample();
        assert_eq!(entry.natural_key().to_string(), "MH12AB1234:1000");
        assert_eq!(
            NaturalKey::new("mh12ab1234", Timestamp::from_millis(1_000)),
            entry.natural_key()
        );
    }

    #[test]
    fn test_validation_rejects_short_vehicle_number() {
        let mut entry = sample();
        entry.vehicle_number = "A-".to_string();
        let errors = entry.validate().unwrap_err();
        assert_eq!(errors.len(), 2);

        entry.vehicle_number = "A-B-".to_string();
        let errors = entry.validate().unwrap_err();
        assert!(errors[0].contains("at least 3 letters"));
    }

    #[test]
    fn test_validation_rejects_blank_transport() {
        let mut entry = sample();
        entry.transport_name = "   ".to_string();
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_exited_requires_exit_time_after_entry() {
        let mut entry = sample();
        entry.status = EntryStatus::Exited;
        assert!(!entry.is_valid());

        entry.exit_time = Some(Timestamp::from_millis(500));
        assert!(!entry.is_valid());

        entry.exit_time = Some(Timestamp::from_millis(2_000));
        assert!(entry.is_valid());
    }

    #[test]
    fn test_differing_fields_ignores_identity_and_modified() {
        let a = sample();
        let mut b = a.clone();
        b.id = EntryId::new();
        b.remote_id = Some(RemoteId::new("r-1"));
        b.last_modified = Timestamp::from_millis(99);
        assert!(a.business_eq(&b));

        b.parking_fee = Money::from_major(10);
        b.notes = "late".to_string();
        assert_eq!(
            a.differing_fields(&b),
            vec![EntryField::ParkingFee, EntryField::Notes]
        );
    }

    #[test]
    fn test_overstay_only_for_parked() {
        let mut entry = sample();
        let now = Timestamp::from_millis(1_000 + 25 * MILLIS_PER_HOUR);
        assert!(entry.is_overstayed(now, 24));
        assert!(!entry.is_overstayed(now, 48));

        entry.status = EntryStatus::Exited;
        entry.exit_time = Some(now);
        assert!(!entry.is_overstayed(now, 24));
        assert!((entry.duration_hours(now) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_patch_apply() {
        let entry = sample();
        let patch = EntryPatch {
            vehicle_number: Some("xy99zz".to_string()),
            driver_name: Some(Some("Ravi".to_string())),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        let updated = patch.apply(&entry);
        assert_eq!(updated.vehicle_number, "XY99ZZ");
        assert_eq!(updated.driver_name.as_deref(), Some("Ravi"));
        assert_eq!(updated.id, entry.id);

        let clear = EntryPatch {
            driver_name: Some(None),
            ..Default::default()
        };
        assert_eq!(clear.apply(&updated).driver_name, None);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("exited".parse::<EntryStatus>().unwrap(), EntryStatus::Exited);
        assert_eq!("Paid".parse::<PaymentStatus>().unwrap(), PaymentStatus::Paid);
        assert!("gone".parse::<EntryStatus>().is_err());
        assert_eq!("Remote".parse::<Origin>().unwrap(), Origin::Remote);
    }
}
