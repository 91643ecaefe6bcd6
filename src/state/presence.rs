//! Presence registry: doctor online/offline state and patient session
//! tracking for targeted delivery.

use std::collections::HashMap;

use crate::delivery::SessionHandle;
use crate::messages::{DoctorInfo, DoctorSummary};

#[derive(Debug, Clone)]
pub struct DoctorPresence {
    pub info: DoctorInfo,
    pub online: bool,
    /// Present only while online. The latest session wins: a doctor opening
    /// a second tab silently takes over presence.
    pub session: Option<SessionHandle>,
}

#[derive(Debug, Clone)]
pub struct PatientSession {
    pub session: SessionHandle,
    pub online: bool,
}

/// Everything marked offline because its transport session went away.
#[derive(Debug, Default)]
pub struct SessionCleanup {
    pub doctors_offline: Vec<String>,
    pub patients_offline: Vec<String>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    doctors: HashMap<String, DoctorPresence>,
    patients: HashMap<String, PatientSession>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a doctor entry: merge metadata, mark online, adopt the new
    /// session handle when one is given (the REST surface has none and
    /// leaves any existing handle in place). Returns the merged metadata
    /// for the presence broadcast.
    pub fn set_doctor_online(
        &mut self,
        doctor_id: &str,
        info: DoctorInfo,
        session: Option<SessionHandle>,
    ) -> DoctorInfo {
        let entry = self
            .doctors
            .entry(doctor_id.to_string())
            .or_insert_with(|| DoctorPresence {
                info: DoctorInfo::default(),
                online: false,
                session: None,
            });
        entry.info.merge_from(info);
        entry.online = true;
        if session.is_some() {
            entry.session = session;
        }
        entry.info.clone()
    }

    /// Marks the doctor offline if known. Metadata stays so a later
    /// `doctor_online` without info keeps the last-known name and
    /// specialization. Idempotent. Returns whether the entry existed.
    pub fn set_doctor_offline(&mut self, doctor_id: &str) -> bool {
        match self.doctors.get_mut(doctor_id) {
            Some(entry) => {
                entry.online = false;
                entry.session = None;
                true
            }
            None => false,
        }
    }

    /// Shallow-merges into existing metadata. Returns the merged info, or
    /// None when the doctor never announced presence (callers treat that
    /// as a silent no-op, not an error).
    pub fn update_doctor_info(
        &mut self,
        doctor_id: &str,
        partial: DoctorInfo,
    ) -> Option<DoctorInfo> {
        let entry = self.doctors.get_mut(doctor_id)?;
        entry.info.merge_from(partial);
        Some(entry.info.clone())
    }

    /// All online doctors, each annotated with its id and merged metadata.
    /// Answers a fresh patient subscription.
    pub fn snapshot_online_doctors(&self) -> Vec<DoctorSummary> {
        self.doctors
            .iter()
            .filter(|(_, d)| d.online)
            .map(|(doctor_id, d)| DoctorSummary {
                doctor_id: doctor_id.clone(),
                online: true,
                info: d.info.clone(),
            })
            .collect()
    }

    /// All doctor entries, online or not (debug endpoint).
    pub fn all_doctors(&self) -> Vec<DoctorSummary> {
        self.doctors
            .iter()
            .map(|(doctor_id, d)| DoctorSummary {
                doctor_id: doctor_id.clone(),
                online: d.online,
                info: d.info.clone(),
            })
            .collect()
    }

    /// The doctor's live session, if the doctor is online over one.
    pub fn doctor_session(&self, doctor_id: &str) -> Option<&SessionHandle> {
        self.doctors
            .get(doctor_id)
            .filter(|d| d.online)
            .and_then(|d| d.session.as_ref())
    }

    /// Sessions of every online doctor (medicine-taken fanout).
    pub fn online_doctor_sessions(&self) -> Vec<SessionHandle> {
        self.doctors
            .values()
            .filter(|d| d.online)
            .filter_map(|d| d.session.clone())
            .collect()
    }

    pub fn register_patient_session(&mut self, patient_id: &str, session: SessionHandle) {
        self.patients.insert(
            patient_id.to_string(),
            PatientSession {
                session,
                online: true,
            },
        );
    }

    pub fn patient_session(&self, patient_id: &str) -> Option<&SessionHandle> {
        self.patients
            .get(patient_id)
            .filter(|p| p.online)
            .map(|p| &p.session)
    }

    /// Connected patients with their online flag (debug endpoint).
    pub fn patient_ids(&self) -> Vec<(String, bool)> {
        self.patients
            .iter()
            .map(|(id, p)| (id.clone(), p.online))
            .collect()
    }

    /// Marks offline anything bound to a vanished transport session. A
    /// linear scan over both maps; n is the number of concurrently
    /// connected users, which stays small.
    pub fn cleanup_session(&mut self, conn_id: &str) -> SessionCleanup {
        let mut cleanup = SessionCleanup::default();
        for (doctor_id, d) in self.doctors.iter_mut() {
            if d.session.as_ref().map(|s| s.conn_id()) == Some(conn_id) {
                d.online = false;
                d.session = None;
                cleanup.doctors_offline.push(doctor_id.clone());
            }
        }
        for (patient_id, p) in self.patients.iter_mut() {
            if p.session.conn_id() == conn_id && p.online {
                p.online = false;
                cleanup.patients_offline.push(patient_id.clone());
            }
        }
        cleanup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_session;

    fn named(name: &str) -> DoctorInfo {
        DoctorInfo {
            name: Some(name.to_string()),
            ..DoctorInfo::default()
        }
    }

    #[test]
    fn online_doctor_appears_once_in_snapshot() {
        let mut registry = PresenceRegistry::new();
        registry.set_doctor_online("d1", named("Sharma"), None);
        registry.set_doctor_online("d1", named("Sharma"), None);

        let snapshot = registry.snapshot_online_doctors();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].doctor_id, "d1");
        assert!(snapshot[0].online);
        assert_eq!(snapshot[0].info.name.as_deref(), Some("Sharma"));
    }

    #[test]
    fn offline_doctor_leaves_snapshot_and_keeps_metadata() {
        let mut registry = PresenceRegistry::new();
        registry.set_doctor_online(
            "d1",
            DoctorInfo {
                name: Some("Sharma".into()),
                specialization: Some("Cardiology".into()),
                experience: None,
            },
            None,
        );
        assert!(registry.set_doctor_offline("d1"));
        assert!(registry.snapshot_online_doctors().is_empty());

        // Going online again without re-sending info keeps the old fields.
        let merged = registry.set_doctor_online("d1", DoctorInfo::default(), None);
        assert_eq!(merged.name.as_deref(), Some("Sharma"));
        assert_eq!(merged.specialization.as_deref(), Some("Cardiology"));
    }

    #[test]
    fn offline_is_idempotent() {
        let mut registry = PresenceRegistry::new();
        registry.set_doctor_online("d1", named("Sharma"), None);
        assert!(registry.set_doctor_offline("d1"));
        assert!(registry.set_doctor_offline("d1"));
        assert!(registry.snapshot_online_doctors().is_empty());
        assert!(!registry.set_doctor_offline("never-seen"));
    }

    #[test]
    fn info_update_for_unknown_doctor_is_a_no_op() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.update_doctor_info("ghost", named("Nobody")).is_none());
        assert!(registry.all_doctors().is_empty());
    }

    #[test]
    fn info_update_merges_shallowly() {
        let mut registry = PresenceRegistry::new();
        registry.set_doctor_online("d1", named("Sharma"), None);
        let merged = registry
            .update_doctor_info(
                "d1",
                DoctorInfo {
                    specialization: Some("Neurology".into()),
                    ..DoctorInfo::default()
                },
            )
            .unwrap();
        assert_eq!(merged.name.as_deref(), Some("Sharma"));
        assert_eq!(merged.specialization.as_deref(), Some("Neurology"));
    }

    #[test]
    fn latest_session_wins() {
        let mut registry = PresenceRegistry::new();
        let (first, _rx1) = test_session("conn-1");
        let (second, _rx2) = test_session("conn-2");
        registry.set_doctor_online("d1", named("Sharma"), Some(first));
        registry.set_doctor_online("d1", DoctorInfo::default(), Some(second));
        assert_eq!(
            registry.doctor_session("d1").map(|s| s.conn_id()),
            Some("conn-2")
        );
    }

    #[test]
    fn session_cleanup_marks_both_roles_offline() {
        let mut registry = PresenceRegistry::new();
        let (doctor_session, _rx1) = test_session("conn-1");
        let (patient_session, _rx2) = test_session("conn-2");
        registry.set_doctor_online("d1", named("Sharma"), Some(doctor_session));
        registry.register_patient_session("p1", patient_session);

        let cleanup = registry.cleanup_session("conn-1");
        assert_eq!(cleanup.doctors_offline, vec!["d1".to_string()]);
        assert!(cleanup.patients_offline.is_empty());
        assert!(registry.snapshot_online_doctors().is_empty());

        let cleanup = registry.cleanup_session("conn-2");
        assert_eq!(cleanup.patients_offline, vec!["p1".to_string()]);
        assert!(registry.patient_session("p1").is_none());
    }

    #[test]
    fn cleanup_of_unknown_session_reports_nothing() {
        let mut registry = PresenceRegistry::new();
        let cleanup = registry.cleanup_session("conn-unknown");
        assert!(cleanup.doctors_offline.is_empty());
        assert!(cleanup.patients_offline.is_empty());
    }
}
