//! Consultation lifecycle: request, accept (start of call), reject, end,
//! expire. One record per caller-generated consultation id.
//!
//! State machine: requested -> accepted -> ended, requested -> rejected,
//! requested -> expired. Terminal states never transition again; settling
//! an already-settled consultation is a no-op, not an error.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::delivery::SessionHandle;
use crate::error::CallError;
use crate::messages::{ConsultationType, PatientInfo};

pub const DEFAULT_REJECT_REASON: &str = "Doctor unavailable";

/// Deterministic room id for a consultation: type prefix + consultation id.
pub fn derive_room_id(consultation_type: ConsultationType, consultation_id: &str) -> String {
    format!("{}{}", consultation_type.room_prefix(), consultation_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Requested,
    Accepted,
    Rejected,
    Ended,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub consultation_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_info: Option<PatientInfo>,
    pub consultation_type: ConsultationType,
    pub status: ConsultationStatus,
    /// Stored once at accept time; leave/end lookups go through the room
    /// index instead of re-deriving prefixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Session that made the request, so accept/reject can target it even
    /// if the presence registry's record has changed since.
    #[serde(skip)]
    pub requester_session: Option<SessionHandle>,
    pub requested_at: DateTime<Utc>,
}

/// Outcome of an accept/reject call against the state machine.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The transition was applied by this call; notify interested parties.
    Applied(Consultation),
    /// The consultation was already settled; nothing changed and no
    /// duplicate notification may be emitted.
    AlreadySettled(Consultation),
}

#[derive(Default)]
pub struct ConsultationLedger {
    consultations: HashMap<String, Consultation>,
    /// room_id -> consultation_id, populated at accept time.
    by_room: HashMap<String, String>,
}

impl ConsultationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new consultation in `requested` state. The id is
    /// caller-generated and must be unused; a duplicate is a generation
    /// bug on the caller side.
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &mut self,
        consultation_id: &str,
        patient_id: &str,
        doctor_id: &str,
        patient_info: Option<PatientInfo>,
        consultation_type: ConsultationType,
        requester_session: Option<SessionHandle>,
        now: DateTime<Utc>,
    ) -> Result<&Consultation, CallError> {
        if self.consultations.contains_key(consultation_id) {
            return Err(CallError::DuplicateConsultationId(
                consultation_id.to_string(),
            ));
        }
        let consultation = Consultation {
            consultation_id: consultation_id.to_string(),
            patient_id: patient_id.to_string(),
            doctor_id: doctor_id.to_string(),
            patient_info,
            consultation_type,
            status: ConsultationStatus::Requested,
            room_id: None,
            reason: None,
            requester_session,
            requested_at: now,
        };
        Ok(self
            .consultations
            .entry(consultation_id.to_string())
            .or_insert(consultation))
    }

    /// Transitions to `accepted`, deriving and indexing the room id.
    pub fn accept(&mut self, consultation_id: &str) -> Result<Settlement, CallError> {
        let consultation = self
            .consultations
            .get_mut(consultation_id)
            .ok_or_else(|| CallError::UnknownConsultation(consultation_id.to_string()))?;
        if consultation.status != ConsultationStatus::Requested {
            return Ok(Settlement::AlreadySettled(consultation.clone()));
        }
        let room_id = derive_room_id(consultation.consultation_type, consultation_id);
        consultation.status = ConsultationStatus::Accepted;
        consultation.room_id = Some(room_id.clone());
        let settled = consultation.clone();
        self.by_room.insert(room_id, consultation_id.to_string());
        Ok(Settlement::Applied(settled))
    }

    /// Transitions to `rejected`, recording the reason (or a generic
    /// unavailability message).
    pub fn reject(
        &mut self,
        consultation_id: &str,
        reason: Option<String>,
    ) -> Result<Settlement, CallError> {
        let consultation = self
            .consultations
            .get_mut(consultation_id)
            .ok_or_else(|| CallError::UnknownConsultation(consultation_id.to_string()))?;
        if consultation.status != ConsultationStatus::Requested {
            return Ok(Settlement::AlreadySettled(consultation.clone()));
        }
        consultation.status = ConsultationStatus::Rejected;
        consultation.reason = Some(
            reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string()),
        );
        Ok(Settlement::Applied(consultation.clone()))
    }

    /// Marks the consultation owning `room_id` as ended. Returns the
    /// consultation id when this call performed the transition.
    pub fn end_by_room(&mut self, room_id: &str) -> Option<String> {
        let consultation_id = self.by_room.get(room_id)?.clone();
        let consultation = self.consultations.get_mut(&consultation_id)?;
        if consultation.status != ConsultationStatus::Accepted {
            return None;
        }
        consultation.status = ConsultationStatus::Ended;
        Some(consultation_id)
    }

    /// Transitions `requested` consultations older than `ttl` to
    /// `expired`. Returns the affected ids. The sweep bounds what would
    /// otherwise be an unbounded in-memory backlog of never-answered
    /// requests.
    pub fn expire_stale(&mut self, ttl: Duration, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for (id, consultation) in self.consultations.iter_mut() {
            if consultation.status == ConsultationStatus::Requested
                && now - consultation.requested_at > ttl
            {
                consultation.status = ConsultationStatus::Expired;
                expired.push(id.clone());
            }
        }
        expired
    }

    pub fn get(&self, consultation_id: &str) -> Option<&Consultation> {
        self.consultations.get(consultation_id)
    }

    /// All records (debug endpoint).
    pub fn all(&self) -> Vec<&Consultation> {
        self.consultations.values().collect()
    }
}
