use thiserror::Error;

/// Domain errors for the call server.
///
/// Not-found conditions map to 404 on the REST surface; the socket surface
/// swallows them so that a doctor going offline mid-flow never produces an
/// error toast on the other side. Duplicate consultation ids are a caller
/// bug and are signaled back instead of silently overwriting the record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Doctor not found: {0}")]
    UnknownDoctor(String),
    #[error("Consultation not found: {0}")]
    UnknownConsultation(String),
    #[error("Consultation id already in use: {0}")]
    DuplicateConsultationId(String),
}
