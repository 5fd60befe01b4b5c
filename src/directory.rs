//! Participant directory
//!
//! Participants are looked up once per report run. Two directories are
//! provided: the JSON export of the study's participant directory, and the
//! `allparticipants` warehouse table.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use tracing::debug;

use crate::error::ComplianceError;
use crate::source::{Query, TableName, TabularSource};
use crate::types::{CustomFields, Participant, RingVendor};

/// Read access to enrolled participants
pub trait ParticipantDirectory {
    /// Participant ids, optionally restricted to a segment
    fn list_participants(&self, segment: Option<&str>) -> Result<Vec<String>, ComplianceError>;

    /// Full record for one participant
    fn get_participant(&self, participant_id: &str) -> Result<Participant, ComplianceError>;
}

/// Render a custom field as text; numbers are kept in their JSON form.
fn field_text(fields: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match fields.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a participant from directory fields.
///
/// The ring vendor email falls back to the account email.
pub fn participant_from_fields(
    participant_id: &str,
    account_email: Option<&str>,
    fields: &Map<String, JsonValue>,
) -> Participant {
    let email = field_text(fields, "uh_email").or_else(|| {
        account_email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    });

    Participant {
        participant_id: participant_id.to_string(),
        email,
        ring_vendor: RingVendor::from_field(field_text(fields, "ring_vendor").as_deref()),
        custom_fields: CustomFields {
            edd_final: field_text(fields, "edd_final"),
            delivery_date: field_text(fields, "delivery_date"),
            postpartum_days: field_text(fields, "postpartum_days"),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryRecord {
    participant_identifier: String,
    #[serde(default)]
    account_email: Option<String>,
    #[serde(default)]
    segments: Vec<JsonValue>,
    #[serde(default)]
    custom_fields: Map<String, JsonValue>,
}

impl DirectoryRecord {
    fn in_segment(&self, segment: &str) -> bool {
        self.segments.iter().any(|s| match s {
            JsonValue::String(id) => id == segment,
            JsonValue::Object(obj) => ["segmentID", "segmentId", "id"]
                .iter()
                .filter_map(|k| obj.get(*k).and_then(JsonValue::as_str))
                .any(|id| id == segment),
            _ => false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryDocument {
    #[serde(default)]
    participants: Vec<DirectoryRecord>,
}

/// Directory backed by an exported JSON document
#[derive(Debug)]
pub struct JsonDirectory {
    records: Vec<DirectoryRecord>,
}

impl JsonDirectory {
    pub fn from_json(json: &str) -> Result<Self, ComplianceError> {
        let document: DirectoryDocument = serde_json::from_str(json)?;
        Ok(Self {
            records: document.participants,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ComplianceError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ParticipantDirectory for JsonDirectory {
    fn list_participants(&self, segment: Option<&str>) -> Result<Vec<String>, ComplianceError> {
        Ok(self
            .records
            .iter()
            .filter(|r| segment.map_or(true, |s| r.in_segment(s)))
            .map(|r| r.participant_identifier.clone())
            .collect())
    }

    fn get_participant(&self, participant_id: &str) -> Result<Participant, ComplianceError> {
        self.records
            .iter()
            .find(|r| r.participant_identifier == participant_id)
            .map(|r| {
                participant_from_fields(
                    &r.participant_identifier,
                    r.account_email.as_deref(),
                    &r.custom_fields,
                )
            })
            .ok_or_else(|| ComplianceError::ParticipantNotFound(participant_id.to_string()))
    }
}

/// Directory backed by the `allparticipants` table.
///
/// The table carries no segment membership, so listing ignores the segment.
pub struct TableDirectory<S: TabularSource> {
    source: S,
}

impl<S: TabularSource> TableDirectory<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: TabularSource> ParticipantDirectory for TableDirectory<S> {
    fn list_participants(&self, segment: Option<&str>) -> Result<Vec<String>, ComplianceError> {
        if let Some(segment) = segment {
            debug!(segment, "participant table has no segments; listing everyone");
        }
        let table = self.source.execute(&Query::select(
            TableName::AllParticipants,
            &["participantidentifier"],
        ))?;
        let mut ids: Vec<String> = table
            .rows
            .iter()
            .filter_map(|row| row.text("participantidentifier").map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn get_participant(&self, participant_id: &str) -> Result<Participant, ComplianceError> {
        let table = self.source.execute(
            &Query::select(TableName::AllParticipants, &["customfields"])
                .where_eq("participantidentifier", participant_id),
        )?;
        let row = table
            .rows
            .first()
            .ok_or_else(|| ComplianceError::ParticipantNotFound(participant_id.to_string()))?;

        let fields = match row.text("customfields") {
            Some(raw) => match serde_json::from_str::<JsonValue>(raw)? {
                JsonValue::Object(map) => map,
                _ => {
                    return Err(ComplianceError::ParseError(format!(
                        "custom fields of {participant_id} are not an object"
                    )))
                }
            },
            None => Map::new(),
        };
        Ok(participant_from_fields(participant_id, None, &fields))
    }
}
