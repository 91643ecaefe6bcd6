//! Wire vocabulary for the persistent-session surface.
//!
//! Messages are JSON objects tagged by a `type` field. The event names and
//! payload fields match what the dashboards already send and listen for, so
//! they must not be renamed. Signaling payloads (SDP blobs, ICE candidates,
//! report bodies) are carried as opaque JSON and never interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Doctor metadata. Free-form in practice; updates merge shallowly so a
/// partial `doctor_info_update` never wipes fields it does not mention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
}

impl DoctorInfo {
    /// Shallow merge: fields present in `partial` overwrite, absent fields
    /// keep their current value.
    pub fn merge_from(&mut self, partial: DoctorInfo) {
        if partial.name.is_some() {
            self.name = partial.name;
        }
        if partial.specialization.is_some() {
            self.specialization = partial.specialization;
        }
        if partial.experience.is_some() {
            self.experience = partial.experience;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsultationType {
    #[default]
    Video,
    Audio,
}

impl ConsultationType {
    /// Room-id prefix for this call type. The `audio_room_` prefix only
    /// changes how the dashboards render the call; signaling treats the
    /// room id as an opaque string.
    pub fn room_prefix(self) -> &'static str {
        match self {
            ConsultationType::Video => "room_",
            ConsultationType::Audio => "audio_room_",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// One entry of a `doctors_status` snapshot or the `/doctors/available`
/// listing: the doctor id annotated with its merged metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorSummary {
    pub doctor_id: String,
    pub online: bool,
    #[serde(flatten)]
    pub info: DoctorInfo,
}

/// Everything a client can send over its session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "doctor_online", rename_all = "camelCase")]
    DoctorOnline {
        doctor_id: String,
        #[serde(default)]
        doctor_info: DoctorInfo,
    },
    #[serde(rename = "doctor_offline", rename_all = "camelCase")]
    DoctorOffline { doctor_id: String },
    #[serde(rename = "doctor_info_update", rename_all = "camelCase")]
    DoctorInfoUpdate {
        doctor_id: String,
        #[serde(default)]
        doctor_info: DoctorInfo,
    },
    /// Binds a doctor's session without full presence info (used by the
    /// report views); creates the entry if the doctor never announced.
    #[serde(rename = "doctor_subscribe", rename_all = "camelCase")]
    DoctorSubscribe { doctor_id: String },
    #[serde(rename = "patient_subscribe", rename_all = "camelCase")]
    PatientSubscribe { patient_id: String },
    #[serde(rename = "consultation_request", rename_all = "camelCase")]
    ConsultationRequest {
        consultation_id: String,
        doctor_id: String,
        patient_id: String,
        #[serde(default)]
        patient_info: Option<PatientInfo>,
        #[serde(default)]
        consultation_type: ConsultationType,
    },
    /// Doctor accepts and is ready for signaling. The room id on the wire
    /// is advisory; the server derives the authoritative one from the
    /// consultation record.
    #[serde(rename = "start_call", rename_all = "camelCase")]
    StartCall {
        consultation_id: String,
        #[serde(default)]
        room_id: Option<String>,
    },
    #[serde(rename = "consultation_reject", rename_all = "camelCase")]
    ConsultationReject {
        consultation_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        user_type: Option<String>,
    },
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer { room_id: String, offer: Value },
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer { room_id: String, answer: Value },
    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate { room_id: String, candidate: Value },
    #[serde(rename = "end-call", rename_all = "camelCase")]
    EndCall { room_id: String },
    #[serde(rename = "leave-room", rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    #[serde(rename = "prescription_added")]
    PrescriptionAdded {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "medicine_taken_notification")]
    MedicineTakenNotification {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "user_report")]
    UserReport {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "admin_subscribe", rename_all = "camelCase")]
    AdminSubscribe { admin_id: String },
}

/// Everything the server can push to a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "doctors_status")]
    DoctorsStatus { doctors: Vec<DoctorSummary> },
    #[serde(rename = "doctor_status_changed", rename_all = "camelCase")]
    DoctorStatusChanged {
        doctor_id: String,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        doctor_info: Option<DoctorInfo>,
    },
    #[serde(rename = "doctor_info_updated", rename_all = "camelCase")]
    DoctorInfoUpdated {
        doctor_id: String,
        doctor_info: DoctorInfo,
    },
    /// Echo of a consultation request, delivered to the target doctor.
    #[serde(rename = "consultation_request", rename_all = "camelCase")]
    ConsultationRequest {
        consultation_id: String,
        doctor_id: String,
        patient_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        patient_info: Option<PatientInfo>,
        consultation_type: ConsultationType,
    },
    #[serde(rename = "move_to_call", rename_all = "camelCase")]
    MoveToCall {
        room_id: String,
        consultation_id: String,
    },
    #[serde(rename = "consultation_accepted", rename_all = "camelCase")]
    ConsultationAccepted {
        consultation_id: String,
        room_id: String,
    },
    /// Targeted rejection notice.
    #[serde(rename = "consultation_rejected", rename_all = "camelCase")]
    ConsultationRejected {
        consultation_id: String,
        reason: String,
    },
    /// Broadcast twin of the rejection notice; dashboards listen for both
    /// names, so both are emitted.
    #[serde(rename = "consultation_reject", rename_all = "camelCase")]
    ConsultationRejectFallback {
        consultation_id: String,
        reason: String,
    },
    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_type: Option<String>,
    },
    #[serde(rename = "offer")]
    Offer { offer: Value },
    #[serde(rename = "answer")]
    Answer { answer: Value },
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: Value },
    #[serde(rename = "call-ended")]
    CallEnded,
    #[serde(rename = "user-left")]
    UserLeft,
    #[serde(rename = "prescription_added")]
    PrescriptionAdded {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "medicine_taken")]
    MedicineTaken {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "user_report")]
    UserReport {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "new_report_submitted")]
    NewReportSubmitted {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "admin_reports_refresh")]
    AdminReportsRefresh {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "reports_global_update")]
    ReportsGlobalUpdate {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "report_status_updated")]
    ReportStatusUpdated {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
