//! Persistent-session surface: one WebSocket per dashboard.
//!
//! Each connection gets an unbounded outbound channel; a forwarding task
//! drains it into the socket. Handler failures are confined to the
//! offending message: the session gets a `type: "error"` frame and the
//! loop keeps running, so one malformed payload can never take down
//! unrelated sessions.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::delivery::{self, SessionHandle};
use crate::error::CallError;
use crate::messages::{ClientMessage, PresenceStatus, ServerMessage};
use crate::state::consultations::{Settlement, DEFAULT_REJECT_REASON};
use crate::state::SharedState;

pub async fn handle_connection(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    state: SharedState,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let conn_id = uuid::Uuid::new_v4().to_string();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = SessionHandle::new(conn_id.clone(), tx.clone());
    state
        .lock()
        .await
        .sessions
        .insert(conn_id.clone(), session.clone());
    info!("session {} connected", conn_id);

    // Forward queued outbound frames to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if let Err(e) = handle_message(msg, &session, &state).await {
                                    warn!("session {}: {}", conn_id, e);
                                    session.send(&ServerMessage::Error {
                                        message: e.to_string(),
                                    });
                                }
                            }
                            Err(e) => {
                                warn!("session {}: unparseable message: {}", conn_id, e);
                                session.send(&ServerMessage::Error {
                                    message: format!("Invalid message format: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("session {} closed", conn_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("session {}: websocket error: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => break,
        }
    }

    disconnect_cleanup(&conn_id, &state).await;
    send_task.abort();
    info!("session {} disconnected", conn_id);
}

/// Dispatch one client message. Errors bubble to the session loop, which
/// reports them to the offending session only. Not-found conditions are
/// swallowed here: the dashboards rely on no-op-on-unknown, not error
/// toasts, for the "doctor went offline mid-flow" race.
pub async fn handle_message(
    msg: ClientMessage,
    session: &SessionHandle,
    state: &SharedState,
) -> Result<(), CallError> {
    match msg {
        ClientMessage::DoctorOnline {
            doctor_id,
            doctor_info,
        } => {
            let mut st = state.lock().await;
            let merged =
                st.presence
                    .set_doctor_online(&doctor_id, doctor_info, Some(session.clone()));
            info!("doctor {} online on session {}", doctor_id, session.conn_id());
            st.broadcast(&ServerMessage::DoctorStatusChanged {
                doctor_id,
                status: PresenceStatus::Online,
                doctor_info: Some(merged),
            });
        }
        ClientMessage::DoctorOffline { doctor_id } => {
            let mut st = state.lock().await;
            st.presence.set_doctor_offline(&doctor_id);
            info!("doctor {} offline", doctor_id);
            st.broadcast(&ServerMessage::DoctorStatusChanged {
                doctor_id,
                status: PresenceStatus::Offline,
                doctor_info: None,
            });
        }
        ClientMessage::DoctorInfoUpdate {
            doctor_id,
            doctor_info,
        } => {
            let mut st = state.lock().await;
            if let Some(merged) = st.presence.update_doctor_info(&doctor_id, doctor_info) {
                st.broadcast(&ServerMessage::DoctorInfoUpdated {
                    doctor_id,
                    doctor_info: merged,
                });
            }
        }
        ClientMessage::DoctorSubscribe { doctor_id } => {
            let mut st = state.lock().await;
            st.presence.set_doctor_online(
                &doctor_id,
                Default::default(),
                Some(session.clone()),
            );
            info!("doctor {} subscribed on session {}", doctor_id, session.conn_id());
        }
        ClientMessage::PatientSubscribe { patient_id } => {
            let mut st = state.lock().await;
            st.presence
                .register_patient_session(&patient_id, session.clone());
            let doctors = st.presence.snapshot_online_doctors();
            info!(
                "patient {} subscribed on session {} ({} doctors online)",
                patient_id,
                session.conn_id(),
                doctors.len()
            );
            session.send(&ServerMessage::DoctorsStatus { doctors });
        }
        ClientMessage::ConsultationRequest {
            consultation_id,
            doctor_id,
            patient_id,
            patient_info,
            consultation_type,
        } => {
            let mut st = state.lock().await;
            st.consultations.request(
                &consultation_id,
                &patient_id,
                &doctor_id,
                patient_info.clone(),
                consultation_type,
                Some(session.clone()),
                Utc::now(),
            )?;
            match st.presence.doctor_session(&doctor_id) {
                Some(doctor_session) => {
                    doctor_session.send(&ServerMessage::ConsultationRequest {
                        consultation_id: consultation_id.clone(),
                        doctor_id,
                        patient_id,
                        patient_info,
                        consultation_type,
                    });
                    info!("consultation {} forwarded", consultation_id);
                }
                None => {
                    // Recorded but undeliverable; the patient UI owns any
                    // give-up timeout.
                    info!(
                        "consultation {} recorded, doctor {} not reachable",
                        consultation_id, doctor_id
                    );
                }
            }
        }
        ClientMessage::StartCall {
            consultation_id,
            room_id: advisory_room_id,
        } => {
            let mut st = state.lock().await;
            match st.consultations.accept(&consultation_id) {
                Ok(Settlement::Applied(c)) => {
                    if let Some(room_id) = c.room_id.clone() {
                        if let Some(sent) = advisory_room_id {
                            if sent != room_id {
                                warn!(
                                    "consultation {}: client sent room {}, using {}",
                                    consultation_id, sent, room_id
                                );
                            }
                        }
                        let registered = st.presence.patient_session(&c.patient_id).cloned();
                        let route = delivery::deliver_with_fallback(
                            &st.sessions,
                            c.requester_session.as_ref(),
                            registered.as_ref(),
                            &ServerMessage::MoveToCall {
                                room_id: room_id.clone(),
                                consultation_id: consultation_id.clone(),
                            },
                        );
                        info!(
                            "consultation {} accepted, room {}, move_to_call via {:?}",
                            consultation_id, room_id, route
                        );
                    }
                }
                Ok(Settlement::AlreadySettled(c)) => {
                    info!(
                        "start_call on settled consultation {} ({:?}) ignored",
                        consultation_id, c.status
                    );
                }
                Err(_) => {
                    info!("start_call for unknown consultation {}", consultation_id);
                }
            }
        }
        ClientMessage::ConsultationReject {
            consultation_id,
            reason,
        } => {
            let mut st = state.lock().await;
            match st.consultations.reject(&consultation_id, reason) {
                Ok(Settlement::Applied(c)) => {
                    let reason = c
                        .reason
                        .clone()
                        .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
                    let registered = st.presence.patient_session(&c.patient_id).cloned();
                    delivery::deliver_with_fallback(
                        &st.sessions,
                        c.requester_session.as_ref(),
                        registered.as_ref(),
                        &ServerMessage::ConsultationRejected {
                            consultation_id: consultation_id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    // The dashboards also listen for the broadcast twin.
                    st.broadcast(&ServerMessage::ConsultationRejectFallback {
                        consultation_id: consultation_id.clone(),
                        reason,
                    });
                    info!("consultation {} rejected", consultation_id);
                }
                Ok(Settlement::AlreadySettled(_)) | Err(_) => {}
            }
        }
        ClientMessage::JoinRoom { room_id, user_type } => {
            let mut st = state.lock().await;
            let existing = st.rooms.join(&room_id, session.clone(), user_type.clone());
            info!(
                "{} joined room {} ({} already there)",
                user_type.as_deref().unwrap_or("participant"),
                room_id,
                existing.len()
            );
            let notice = ServerMessage::UserJoined { user_type };
            for member in existing {
                member.send(&notice);
            }
        }
        ClientMessage::Offer { room_id, offer } => {
            relay_to_room(state, &room_id, session, ServerMessage::Offer { offer }).await;
        }
        ClientMessage::Answer { room_id, answer } => {
            relay_to_room(state, &room_id, session, ServerMessage::Answer { answer }).await;
        }
        ClientMessage::IceCandidate { room_id, candidate } => {
            relay_to_room(
                state,
                &room_id,
                session,
                ServerMessage::IceCandidate { candidate },
            )
            .await;
        }
        ClientMessage::EndCall { room_id } => {
            close_room(state, &room_id, session, &ServerMessage::CallEnded).await;
        }
        ClientMessage::LeaveRoom { room_id } => {
            close_room(state, &room_id, session, &ServerMessage::UserLeft).await;
        }
        ClientMessage::PrescriptionAdded { mut payload } => {
            payload.remove("type");
            let st = state.lock().await;
            let target = payload
                .get("patientId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let notice = ServerMessage::PrescriptionAdded { payload };
            if let Some(patient_session) =
                target.as_deref().and_then(|pid| st.presence.patient_session(pid))
            {
                patient_session.send(&notice);
            }
            // Unconditional broadcast fallback; consumers de-duplicate by
            // prescription id.
            st.broadcast(&notice);
        }
        ClientMessage::MedicineTakenNotification { mut payload } => {
            payload.remove("type");
            let st = state.lock().await;
            let notice = ServerMessage::MedicineTaken { payload };
            for doctor_session in st.presence.online_doctor_sessions() {
                doctor_session.send(&notice);
            }
            st.broadcast(&notice);
        }
        ClientMessage::UserReport { mut payload } => {
            payload.remove("type");
            let st = state.lock().await;
            st.broadcast(&ServerMessage::UserReport {
                payload: payload.clone(),
            });
            st.broadcast(&ServerMessage::NewReportSubmitted {
                payload: payload.clone(),
            });
            st.broadcast(&ServerMessage::AdminReportsRefresh {
                payload: payload.clone(),
            });
            st.broadcast(&ServerMessage::ReportsGlobalUpdate { payload });
        }
        ClientMessage::AdminSubscribe { admin_id } => {
            info!("admin {} subscribed on session {}", admin_id, session.conn_id());
        }
    }
    Ok(())
}

/// Forward a signaling payload to every other member of the room. Nothing
/// is buffered; with no other members the message is dropped.
async fn relay_to_room(
    state: &SharedState,
    room_id: &str,
    origin: &SessionHandle,
    msg: ServerMessage,
) {
    let st = state.lock().await;
    for member in st.rooms.others(room_id, origin.conn_id()) {
        member.send(&msg);
    }
}

/// Shared tail of `end-call` and `leave-room`: notify the remaining
/// members, drop membership, settle the owning consultation.
async fn close_room(
    state: &SharedState,
    room_id: &str,
    origin: &SessionHandle,
    notice: &ServerMessage,
) {
    let mut st = state.lock().await;
    for member in st.rooms.others(room_id, origin.conn_id()) {
        member.send(notice);
    }
    st.rooms.leave(room_id, origin.conn_id());
    if let Some(consultation_id) = st.consultations.end_by_room(room_id) {
        info!("consultation {} ended (room {})", consultation_id, room_id);
    }
}

/// Transport disconnect: not an application error. Presence goes offline,
/// rooms are told the user left, and matching consultations end. An
/// in-flight `requested` consultation is deliberately left alone; the
/// expiry sweep owns it.
async fn disconnect_cleanup(conn_id: &str, state: &SharedState) {
    let mut st = state.lock().await;
    st.sessions.remove(conn_id);

    let cleanup = st.presence.cleanup_session(conn_id);
    for doctor_id in cleanup.doctors_offline {
        info!("doctor {} offline (session {} gone)", doctor_id, conn_id);
        st.broadcast(&ServerMessage::DoctorStatusChanged {
            doctor_id,
            status: PresenceStatus::Offline,
            doctor_info: None,
        });
    }
    for patient_id in cleanup.patients_offline {
        info!("patient {} offline (session {} gone)", patient_id, conn_id);
    }

    for room_id in st.rooms.rooms_of(conn_id) {
        for member in st.rooms.others(&room_id, conn_id) {
            member.send(&ServerMessage::CallEnded);
            member.send(&ServerMessage::UserLeft);
        }
        st.rooms.leave(&room_id, conn_id);
        if let Some(consultation_id) = st.consultations.end_by_room(&room_id) {
            info!(
                "consultation {} ended (session {} gone from room {})",
                consultation_id, conn_id, room_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{recv_json, test_session};
    use crate::state::CallState;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(
        state: &SharedState,
        conn_id: &str,
    ) -> (SessionHandle, UnboundedReceiver<Message>) {
        let (session, rx) = test_session(conn_id);
        state
            .lock()
            .await
            .sessions
            .insert(conn_id.to_string(), session.clone());
        (session, rx)
    }

    async fn dispatch(state: &SharedState, session: &SessionHandle, json: &str) {
        let msg: ClientMessage = serde_json::from_str(json).expect("valid client message");
        handle_message(msg, session, state).await.expect("handled");
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Message::Text(json)) = rx.try_recv() {
            out.push(serde_json::from_str(&json).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn patient_subscription_gets_the_presence_snapshot() {
        let state = CallState::new_shared();
        let (doctor, mut doctor_rx) = connect(&state, "doc-conn").await;
        dispatch(
            &state,
            &doctor,
            r#"{"type":"doctor_online","doctorId":"d1","doctorInfo":{"name":"Sharma"}}"#,
        )
        .await;
        // The doctor session itself sees the presence broadcast.
        assert_eq!(recv_json(&mut doctor_rx)["type"], "doctor_status_changed");

        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        dispatch(&state, &patient, r#"{"type":"patient_subscribe","patientId":"p1"}"#).await;

        let snapshot = recv_json(&mut patient_rx);
        assert_eq!(snapshot["type"], "doctors_status");
        assert_eq!(
            snapshot["doctors"],
            serde_json::json!([{"doctorId": "d1", "online": true, "name": "Sharma"}])
        );
    }

    #[tokio::test]
    async fn request_flows_to_doctor_and_call_start_moves_the_patient() {
        let state = CallState::new_shared();
        let (doctor, mut doctor_rx) = connect(&state, "doc-conn").await;
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;

        dispatch(
            &state,
            &doctor,
            r#"{"type":"doctor_online","doctorId":"d1","doctorInfo":{"name":"Sharma"}}"#,
        )
        .await;
        dispatch(&state, &patient, r#"{"type":"patient_subscribe","patientId":"p1"}"#).await;
        drain(&mut doctor_rx);
        drain(&mut patient_rx);

        dispatch(
            &state,
            &patient,
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"d1",
                "patientId":"p1","patientInfo":{"id":"p1","name":"Asha"},
                "consultationType":"Video"}"#,
        )
        .await;
        let echoed = recv_json(&mut doctor_rx);
        assert_eq!(echoed["type"], "consultation_request");
        assert_eq!(echoed["consultationId"], "c1");
        assert_eq!(echoed["patientInfo"]["name"], "Asha");

        dispatch(
            &state,
            &doctor,
            r#"{"type":"start_call","consultationId":"c1","roomId":"room_c1"}"#,
        )
        .await;
        let moved = recv_json(&mut patient_rx);
        assert_eq!(moved["type"], "move_to_call");
        assert_eq!(moved["roomId"], "room_c1");
        assert_eq!(moved["consultationId"], "c1");
        // Targeted delivery, not broadcast: the doctor saw nothing.
        assert!(drain(&mut doctor_rx).is_empty());
    }

    #[tokio::test]
    async fn duplicate_consultation_id_is_signaled_to_the_requester() {
        let state = CallState::new_shared();
        let (patient, _patient_rx) = connect(&state, "pat-conn").await;
        dispatch(
            &state,
            &patient,
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"d1","patientId":"p1"}"#,
        )
        .await;

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"d1","patientId":"p1"}"#,
        )
        .unwrap();
        let err = handle_message(msg, &patient, &state).await.unwrap_err();
        assert_eq!(err, CallError::DuplicateConsultationId("c1".into()));
    }

    #[tokio::test]
    async fn offline_doctor_request_is_recorded_but_not_delivered() {
        let state = CallState::new_shared();
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        dispatch(
            &state,
            &patient,
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"ghost","patientId":"p1"}"#,
        )
        .await;
        assert!(drain(&mut patient_rx).is_empty());
        assert!(state.lock().await.consultations.get("c1").is_some());
    }

    #[tokio::test]
    async fn rejection_reaches_the_patient_once() {
        let state = CallState::new_shared();
        let (doctor, mut doctor_rx) = connect(&state, "doc-conn").await;
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        dispatch(
            &state,
            &doctor,
            r#"{"type":"doctor_online","doctorId":"d1","doctorInfo":{}}"#,
        )
        .await;
        dispatch(
            &state,
            &patient,
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"d1","patientId":"p1"}"#,
        )
        .await;
        drain(&mut doctor_rx);
        drain(&mut patient_rx);

        dispatch(
            &state,
            &doctor,
            r#"{"type":"consultation_reject","consultationId":"c1","reason":"busy"}"#,
        )
        .await;
        let received = drain(&mut patient_rx);
        let rejected: Vec<_> = received
            .iter()
            .filter(|m| m["type"] == "consultation_rejected")
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["reason"], "busy");
        // The broadcast twin also went out.
        assert!(received.iter().any(|m| m["type"] == "consultation_reject"));

        // Second reject: terminal state, nothing further is emitted.
        dispatch(
            &state,
            &doctor,
            r#"{"type":"consultation_reject","consultationId":"c1","reason":"very busy"}"#,
        )
        .await;
        assert!(drain(&mut patient_rx).is_empty());
    }

    #[tokio::test]
    async fn room_relay_reaches_everyone_but_the_origin() {
        let state = CallState::new_shared();
        let (a, mut a_rx) = connect(&state, "a").await;
        let (b, mut b_rx) = connect(&state, "b").await;

        dispatch(&state, &a, r#"{"type":"join-room","roomId":"room_c1","userType":"doctor"}"#)
            .await;
        dispatch(&state, &b, r#"{"type":"join-room","roomId":"room_c1","userType":"patient"}"#)
            .await;
        let joined = recv_json(&mut a_rx);
        assert_eq!(joined["type"], "user-joined");
        assert_eq!(joined["userType"], "patient");

        dispatch(
            &state,
            &a,
            r#"{"type":"offer","roomId":"room_c1","offer":{"sdp":"v=0"}}"#,
        )
        .await;
        let offer = recv_json(&mut b_rx);
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["offer"]["sdp"], "v=0");
        // No echo to the origin.
        assert!(drain(&mut a_rx).is_empty());

        dispatch(
            &state,
            &b,
            r#"{"type":"ice-candidate","roomId":"room_c1","candidate":{"sdpMid":"0"}}"#,
        )
        .await;
        let candidate = recv_json(&mut a_rx);
        assert_eq!(candidate["type"], "ice-candidate");
        assert_eq!(candidate["candidate"]["sdpMid"], "0");
    }

    #[tokio::test]
    async fn leaving_a_room_settles_the_consultation() {
        let state = CallState::new_shared();
        let (doctor, mut doctor_rx) = connect(&state, "doc-conn").await;
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        dispatch(
            &state,
            &doctor,
            r#"{"type":"doctor_online","doctorId":"d1","doctorInfo":{}}"#,
        )
        .await;
        dispatch(
            &state,
            &patient,
            r#"{"type":"consultation_request","consultationId":"c1","doctorId":"d1",
                "patientId":"p1","consultationType":"Audio"}"#,
        )
        .await;
        dispatch(&state, &doctor, r#"{"type":"start_call","consultationId":"c1"}"#).await;
        drain(&mut doctor_rx);
        drain(&mut patient_rx);

        dispatch(&state, &doctor, r#"{"type":"join-room","roomId":"audio_room_c1","userType":"doctor"}"#).await;
        dispatch(&state, &patient, r#"{"type":"join-room","roomId":"audio_room_c1","userType":"patient"}"#).await;
        drain(&mut doctor_rx);

        dispatch(&state, &patient, r#"{"type":"leave-room","roomId":"audio_room_c1"}"#).await;
        assert_eq!(recv_json(&mut doctor_rx)["type"], "user-left");

        let st = state.lock().await;
        assert_eq!(
            st.consultations.get("c1").unwrap().status,
            crate::state::consultations::ConsultationStatus::Ended
        );
    }

    #[tokio::test]
    async fn disconnect_cleans_presence_and_rooms() {
        let state = CallState::new_shared();
        let (doctor, _doctor_rx) = connect(&state, "doc-conn").await;
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        dispatch(
            &state,
            &doctor,
            r#"{"type":"doctor_online","doctorId":"d1","doctorInfo":{"name":"Sharma"}}"#,
        )
        .await;
        dispatch(&state, &doctor, r#"{"type":"join-room","roomId":"room_c9","userType":"doctor"}"#).await;
        dispatch(&state, &patient, r#"{"type":"join-room","roomId":"room_c9","userType":"patient"}"#).await;
        drain(&mut patient_rx);

        disconnect_cleanup("doc-conn", &state).await;

        let received = drain(&mut patient_rx);
        assert!(received
            .iter()
            .any(|m| m["type"] == "doctor_status_changed" && m["status"] == "offline"));
        assert!(received.iter().any(|m| m["type"] == "call-ended"));
        assert!(received.iter().any(|m| m["type"] == "user-left"));

        let st = state.lock().await;
        assert!(st.presence.snapshot_online_doctors().is_empty());
        assert!(st.rooms.rooms_of("doc-conn").is_empty());
        assert!(st.sessions.get("doc-conn").is_none());
    }

    #[tokio::test]
    async fn prescription_notice_is_targeted_and_broadcast() {
        let state = CallState::new_shared();
        let (patient, mut patient_rx) = connect(&state, "pat-conn").await;
        let (other, mut other_rx) = connect(&state, "other-conn").await;
        dispatch(&state, &patient, r#"{"type":"patient_subscribe","patientId":"p1"}"#).await;
        drain(&mut patient_rx);

        dispatch(
            &state,
            &other,
            r#"{"type":"prescription_added","prescriptionId":"rx9","patientId":"p1",
                "doctorName":"Sharma","medicines":[{"name":"Amoxicillin"}]}"#,
        )
        .await;

        // Target gets the direct copy plus the broadcast; de-duplication is
        // the consumer's contract.
        let at_patient = drain(&mut patient_rx);
        assert_eq!(at_patient.len(), 2);
        for notice in &at_patient {
            assert_eq!(notice["type"], "prescription_added");
            assert_eq!(notice["prescriptionId"], "rx9");
            assert_eq!(notice["medicines"][0]["name"], "Amoxicillin");
        }
        // Everyone else sees exactly the broadcast.
        assert_eq!(drain(&mut other_rx).len(), 1);
    }

    #[tokio::test]
    async fn user_report_fans_out_to_every_report_channel() {
        let state = CallState::new_shared();
        let (reporter, mut reporter_rx) = connect(&state, "rep-conn").await;
        dispatch(
            &state,
            &reporter,
            r#"{"type":"user_report","reportId":"r1","details":"spam"}"#,
        )
        .await;
        let received = drain(&mut reporter_rx);
        let types: Vec<&str> = received.iter().map(|m| m["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec![
                "user_report",
                "new_report_submitted",
                "admin_reports_refresh",
                "reports_global_update"
            ]
        );
        assert!(received.iter().all(|m| m["reportId"] == "r1"));
    }
}
