//! REST control surface for clients that poll instead of holding a
//! session. Same state and semantics as the socket surface, with one
//! asymmetry kept on purpose: unknown ids are 404 here but silent no-ops
//! there.

use chrono::Utc;
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{info, warn};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::delivery;
use crate::error::CallError;
use crate::messages::{ConsultationType, DoctorInfo, PresenceStatus, ServerMessage};
use crate::state::consultations::{Settlement, DEFAULT_REJECT_REASON};
use crate::state::signals::room_signal_key;
use crate::state::SharedState;

fn decode_path_segment(seg: &str) -> String {
    match urlencoding::decode(seg) {
        Ok(s) => s.into_owned(),
        Err(_) => seg.to_string(),
    }
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn ok_json<T: serde::Serialize>(value: &T) -> Response<Body> {
    json_response(
        StatusCode::OK,
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()),
    )
}

fn not_found(message: &str) -> Response<Body> {
    json_response(StatusCode::NOT_FOUND, json!({ "error": message }).to_string())
}

fn method_not_allowed() -> Response<Body> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        json!({"error": "Method not allowed"}).to_string(),
    )
}

fn endpoint_not_found() -> Response<Body> {
    not_found("API endpoint not found")
}

/// Parse a JSON body; an empty body reads as `{}` so endpoints with all
/// optional fields accept bare POSTs.
fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, Response<Body>> {
    let bytes = if bytes.is_empty() { b"{}" as &[u8] } else { bytes };
    serde_json::from_slice(bytes).map_err(|e| {
        warn!("invalid request body: {}", e);
        json_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("Invalid request body: {}", e) }).to_string(),
        )
    })
}

/// Millisecond timestamp plus a short random suffix, the same shape the
/// dashboards generate client-side.
fn generate_consultation_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!(
        "consultation_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoctorStatusBody {
    doctor_id: String,
    #[serde(default)]
    doctor_info: DoctorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsultationRequestBody {
    patient_id: String,
    doctor_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferBody {
    room_id: String,
    offer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerBody {
    room_id: String,
    answer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceCandidateBody {
    room_id: String,
    candidate: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportStatusBody {
    #[serde(default)]
    report_id: Option<Value>,
    #[serde(default)]
    reporter_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
}

pub async fn handle_api_request(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() < 2 || parts[0] != "api" {
        return Ok(endpoint_not_found());
    }
    match parts[1] {
        "calls" => calls_api(req, &parts[2..], state).await,
        "webrtc" => webrtc_api(req, &parts[2..], state).await,
        "prescription" if parts.get(2) == Some(&"notify") => {
            prescription_notify(req, state).await
        }
        "medicine" if parts.get(2) == Some(&"taken") => medicine_taken(req, state).await,
        "emit" if parts.get(2) == Some(&"report-status-update") => {
            report_status_update(req, state).await
        }
        _ => Ok(endpoint_not_found()),
    }
}

async fn calls_api(
    req: Request<Body>,
    parts: &[&str],
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    match (method, parts) {
        (Method::POST, ["doctor", "online"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: DoctorStatusBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            let merged = st
                .presence
                .set_doctor_online(&body.doctor_id, body.doctor_info, None);
            info!("doctor {} online via rest", body.doctor_id);
            st.broadcast(&ServerMessage::DoctorStatusChanged {
                doctor_id: body.doctor_id,
                status: PresenceStatus::Online,
                doctor_info: Some(merged),
            });
            Ok(ok_json(&json!({"message": "Doctor status updated to online"})))
        }
        (Method::POST, ["doctor", "offline"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: DoctorStatusBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            st.presence.set_doctor_offline(&body.doctor_id);
            st.broadcast(&ServerMessage::DoctorStatusChanged {
                doctor_id: body.doctor_id,
                status: PresenceStatus::Offline,
                doctor_info: None,
            });
            Ok(ok_json(&json!({"message": "Doctor status updated to offline"})))
        }
        (Method::POST, ["doctor", "update"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: DoctorStatusBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            match st.presence.update_doctor_info(&body.doctor_id, body.doctor_info) {
                Some(merged) => {
                    st.broadcast(&ServerMessage::DoctorInfoUpdated {
                        doctor_id: body.doctor_id,
                        doctor_info: merged,
                    });
                    Ok(ok_json(
                        &json!({"message": "Doctor information updated and broadcasted"}),
                    ))
                }
                None => Ok(not_found(
                    &CallError::UnknownDoctor(body.doctor_id).to_string(),
                )),
            }
        }
        (Method::GET, ["doctors", "available"]) => {
            let st = state.lock().await;
            Ok(ok_json(&st.presence.snapshot_online_doctors()))
        }
        (Method::GET, ["debug"]) => {
            let st = state.lock().await;
            let patients: Vec<Value> = st
                .presence
                .patient_ids()
                .into_iter()
                .map(|(patient_id, online)| json!({"patientId": patient_id, "online": online}))
                .collect();
            Ok(ok_json(&json!({
                "doctors": st.presence.all_doctors(),
                "patients": patients,
                "consultations": st.consultations.all(),
            })))
        }
        (Method::POST, ["consultation", "request"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: ConsultationRequestBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            let consultation_id = loop {
                let id = generate_consultation_id();
                match st.consultations.request(
                    &id,
                    &body.patient_id,
                    &body.doctor_id,
                    None,
                    ConsultationType::default(),
                    None,
                    Utc::now(),
                ) {
                    Ok(_) => break id,
                    // A generated id collided; try another.
                    Err(_) => continue,
                }
            };
            if let Some(doctor_session) = st.presence.doctor_session(&body.doctor_id) {
                doctor_session.send(&ServerMessage::ConsultationRequest {
                    consultation_id: consultation_id.clone(),
                    doctor_id: body.doctor_id.clone(),
                    patient_id: body.patient_id.clone(),
                    patient_info: None,
                    consultation_type: ConsultationType::default(),
                });
            }
            info!("consultation {} requested via rest", consultation_id);
            Ok(ok_json(
                &json!({"consultationId": consultation_id, "status": "requested"}),
            ))
        }
        (Method::POST, ["consultation", id, "accept"]) => {
            let consultation_id = decode_path_segment(id);
            let mut st = state.lock().await;
            match st.consultations.accept(&consultation_id) {
                Ok(Settlement::Applied(c)) => {
                    if let Some(room_id) = c.room_id.clone() {
                        st.broadcast(&ServerMessage::ConsultationAccepted {
                            consultation_id: c.consultation_id.clone(),
                            room_id,
                        });
                    }
                    Ok(ok_json(&json!({
                        "consultationId": c.consultation_id,
                        "roomId": c.room_id,
                        "status": c.status,
                    })))
                }
                Ok(Settlement::AlreadySettled(c)) => Ok(ok_json(&json!({
                    "consultationId": c.consultation_id,
                    "roomId": c.room_id,
                    "status": c.status,
                }))),
                Err(e) => Ok(not_found(&e.to_string())),
            }
        }
        (Method::POST, ["consultation", id, "reject"]) => {
            let consultation_id = decode_path_segment(id);
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: RejectBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            match st.consultations.reject(&consultation_id, body.reason) {
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
                            consultation_id: c.consultation_id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    st.broadcast(&ServerMessage::ConsultationRejectFallback {
                        consultation_id: c.consultation_id.clone(),
                        reason: reason.clone(),
                    });
                    Ok(ok_json(&json!({
                        "consultationId": c.consultation_id,
                        "status": c.status,
                        "reason": reason,
                    })))
                }
                Ok(Settlement::AlreadySettled(c)) => Ok(ok_json(&json!({
                    "consultationId": c.consultation_id,
                    "status": c.status,
                    "reason": c.reason,
                }))),
                Err(e) => Ok(not_found(&e.to_string())),
            }
        }
        _ => Ok(method_not_allowed()),
    }
}

async fn webrtc_api(
    req: Request<Body>,
    parts: &[&str],
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    match (method, parts) {
        (Method::POST, ["signal"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let mut body: Map<String, Value> = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let target = body
                .remove("targetUserId")
                .and_then(|v| v.as_str().map(str::to_string));
            if let Some(target) = target {
                let now = Utc::now();
                body.insert("timestamp".to_string(), json!(now.timestamp_millis()));
                let mut st = state.lock().await;
                st.signals.put(&target, Value::Object(body), now);
            }
            Ok(ok_json(&json!({"status": "Signal sent"})))
        }
        (Method::GET, ["signal", user_id]) => {
            let user_id = decode_path_segment(user_id);
            let mut st = state.lock().await;
            match st.signals.take(&user_id) {
                Some(signal) => Ok(ok_json(&signal)),
                None => Ok(ok_json(&json!({}))),
            }
        }
        (Method::POST, ["join-room"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: Map<String, Value> = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            // Polling clients have no session to place in a room; this is
            // an acknowledgment only.
            Ok(ok_json(&json!({
                "status": "joined",
                "roomId": body.get("roomId"),
                "userType": body.get("userType"),
            })))
        }
        (Method::POST, ["offer"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: OfferBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            st.signals
                .put(&room_signal_key(&body.room_id, "offer"), body.offer, Utc::now());
            Ok(ok_json(&json!({"status": "Offer sent"})))
        }
        (Method::POST, ["answer"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: AnswerBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            st.signals.put(
                &room_signal_key(&body.room_id, "answer"),
                body.answer,
                Utc::now(),
            );
            Ok(ok_json(&json!({"status": "Answer sent"})))
        }
        (Method::POST, ["ice-candidate"]) => {
            let bytes = hyper::body::to_bytes(req.into_body()).await?;
            let body: IceCandidateBody = match parse_json(&bytes) {
                Ok(b) => b,
                Err(resp) => return Ok(resp),
            };
            let mut st = state.lock().await;
            st.signals.put(
                &room_signal_key(&body.room_id, "ice"),
                body.candidate,
                Utc::now(),
            );
            Ok(ok_json(&json!({"status": "ICE candidate sent"})))
        }
        (Method::GET, ["room", room_id, "signals"]) => {
            let room_id = decode_path_segment(room_id);
            let mut st = state.lock().await;
            let mut signals = Map::new();
            if let Some(offer) = st.signals.take(&room_signal_key(&room_id, "offer")) {
                signals.insert("offer".to_string(), offer);
            }
            if let Some(answer) = st.signals.take(&room_signal_key(&room_id, "answer")) {
                signals.insert("answer".to_string(), answer);
            }
            Ok(ok_json(&Value::Object(signals)))
        }
        _ => Ok(method_not_allowed()),
    }
}

async fn prescription_notify(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::POST {
        return Ok(method_not_allowed());
    }
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    let payload: Map<String, Value> = match parse_json(&bytes) {
        Ok(b) => b,
        Err(resp) => return Ok(resp),
    };
    let st = state.lock().await;
    let target = payload
        .get("patientId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let notice = ServerMessage::PrescriptionAdded { payload };
    if let Some(patient_session) = target
        .as_deref()
        .and_then(|pid| st.presence.patient_session(pid))
    {
        patient_session.send(&notice);
    }
    st.broadcast(&notice);
    Ok(ok_json(&json!({"success": true, "message": "Notification sent"})))
}

async fn medicine_taken(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::POST {
        return Ok(method_not_allowed());
    }
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    let payload: Map<String, Value> = match parse_json(&bytes) {
        Ok(b) => b,
        Err(resp) => return Ok(resp),
    };
    let st = state.lock().await;
    let target = payload
        .get("doctorId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let notice = ServerMessage::MedicineTaken { payload };
    if let Some(doctor_session) = target
        .as_deref()
        .and_then(|did| st.presence.doctor_session(did))
    {
        doctor_session.send(&notice);
    }
    st.broadcast(&notice);
    Ok(ok_json(&json!({"success": true, "message": "Doctor notified"})))
}

async fn report_status_update(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::POST {
        return Ok(method_not_allowed());
    }
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    let body: ReportStatusBody = match parse_json(&bytes) {
        Ok(b) => b,
        Err(resp) => return Ok(resp),
    };
    let mut payload = Map::new();
    if let Some(report_id) = body.report_id {
        payload.insert("reportId".to_string(), report_id);
    }
    if let Some(reporter_id) = body.reporter_id {
        payload.insert("reporterId".to_string(), reporter_id);
    }
    let pending = body.status.as_deref() == Some("PENDING");
    if let Some(status) = body.status {
        payload.insert("status".to_string(), Value::String(status));
    }
    let st = state.lock().await;
    st.broadcast(&ServerMessage::ReportStatusUpdated {
        payload: payload.clone(),
    });
    st.broadcast(&ServerMessage::AdminReportsRefresh {
        payload: payload.clone(),
    });
    st.broadcast(&ServerMessage::ReportsGlobalUpdate {
        payload: payload.clone(),
    });
    if pending {
        st.broadcast(&ServerMessage::NewReportSubmitted { payload });
    }
    Ok(ok_json(&json!({"success": true})))
}
