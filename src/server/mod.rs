//! Attendance API receiving scans and managing the roster
//!
//! Routes:
//! - `POST /leer_qr`: mark the scanned student present
//! - `GET /alumnos[?asistencia=1]`: list the roster, optionally only present students
//! - `POST /alumnos`: register a student
//! - `POST /alumnos/csv`: bulk import from CSV text

pub mod errors;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::net::TcpListener;

use crate::client::SCAN_ENDPOINT;
use crate::config::ServerConfig;
use crate::store::{InsertOutcome, NewStudent, Roster, RosterFilter, StoreResult};
use errors::{AppError, AppResult};

/// Build the API router over a roster
pub fn create_app(roster: Arc<Roster>) -> Router {
    Router::new()
        .route(SCAN_ENDPOINT, post(leer_qr))
        .route("/alumnos", get(list_students).post(add_student))
        .route("/alumnos/csv", post(import_csv))
        .with_state(roster)
}

/// Open the configured roster and serve until `stop` is raised
pub async fn serve(config: &ServerConfig, stop: &'static AtomicBool) -> Result<()> {
    let roster = Roster::open(&config.database)
        .with_context(|| format!("Failed to open roster {}", config.database.display()))?;
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    log::info!("Attendance server listening on {}", listener.local_addr()?);

    serve_on(listener, Arc::new(roster), stop).await
}

/// Serve on an already bound listener
pub async fn serve_on(
    listener: TcpListener,
    roster: Arc<Roster>,
    stop: &'static AtomicBool,
) -> Result<()> {
    axum::serve(listener, create_app(roster))
        .with_graceful_shutdown(crate::signal::wait_for_stop(stop))
        .await
        .context("Attendance server failed")?;
    log::info!("Attendance server stopped");
    Ok(())
}

/// Run a roster operation off the async workers
async fn with_roster<T, F>(roster: &Arc<Roster>, f: F) -> AppResult<T>
where
    F: FnOnce(&Roster) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let roster = Arc::clone(roster);
    let result = tokio::task::spawn_blocking(move || f(&roster)).await?;
    Ok(result?)
}

/// Extract the control number from a scan body
fn scanned_control_number(body: &[u8]) -> AppResult<String> {
    let data: Value = match serde_json::from_slice(body) {
        Ok(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        _ => return Err(AppError::bad_request("No se recibieron datos")),
    };

    let numero_control = match data.get("qr_data") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if numero_control.is_empty() {
        return Err(AppError::bad_request("Número de control no proporcionado"));
    }
    Ok(numero_control)
}

async fn leer_qr(State(roster): State<Arc<Roster>>, body: Bytes) -> AppResult<impl IntoResponse> {
    let numero_control = scanned_control_number(&body)?;
    log::info!("QR code received: {}", numero_control);

    let lookup = numero_control.clone();
    let student = with_roster(&roster, move |r| {
        r.mark_attendance(&lookup, chrono::Utc::now())
    })
    .await?
    .ok_or_else(|| {
        AppError::not_found(format!(
            "Alumno con número de control {} no encontrado",
            numero_control
        ))
    })?;

    Ok(Json(json!({
        "status": "success",
        "message": "Asistencia registrada correctamente",
        "alumno": {
            "numero_control": student.numero_control,
            "nombre": student.nombre,
            "asistencia": i64::from(student.asistencia),
        }
    })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    asistencia: Option<u8>,
}

async fn list_students(
    State(roster): State<Arc<Roster>>,
    Query(params): Query<ListParams>,
) -> AppResult<impl IntoResponse> {
    let filter = match params.asistencia {
        Some(1) => RosterFilter::Present,
        _ => RosterFilter::All,
    };
    let students = with_roster(&roster, move |r| r.list(filter)).await?;
    Ok(Json(students))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StudentForm {
    #[serde(deserialize_with = "text_or_number")]
    numero_control: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    nombre: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    carrera: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    semestre: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    avance_reticular: Option<String>,
}

/// Form fields arrive as strings, though clients often send numbers for
/// `semestre` and friends
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected text or number, found {}",
            other
        ))),
    }
}

impl StudentForm {
    /// All fields present and non-blank, trimmed
    fn complete(self) -> Option<NewStudent> {
        let field = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(NewStudent {
            numero_control: field(self.numero_control)?,
            nombre: field(self.nombre)?,
            carrera: field(self.carrera)?,
            semestre: field(self.semestre)?,
            avance_reticular: field(self.avance_reticular)?,
        })
    }
}

async fn add_student(
    State(roster): State<Arc<Roster>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let form: StudentForm = if body.iter().all(u8::is_ascii_whitespace) {
        StudentForm::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("Datos inválidos: {}", e)))?
    };
    let student = form
        .complete()
        .ok_or_else(|| AppError::bad_request("Todos los campos son obligatorios"))?;

    let numero_control = student.numero_control.clone();
    match with_roster(&roster, move |r| r.insert(&student)).await? {
        InsertOutcome::Inserted => {
            log::info!("Registered student {}", numero_control);
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "status": "success",
                    "message": "Alumno registrado correctamente",
                    "numero_control": numero_control,
                })),
            ))
        }
        InsertOutcome::Duplicate => Err(AppError::conflict(format!(
            "El número de control {} ya existe",
            numero_control
        ))),
    }
}

async fn import_csv(State(roster): State<Arc<Roster>>, body: String) -> AppResult<impl IntoResponse> {
    if body.trim().is_empty() {
        return Err(AppError::bad_request("No se seleccionó ningún archivo"));
    }

    let summary = with_roster(&roster, move |r| r.import_csv(&body)).await?;
    Ok(Json(json!({
        "status": "success",
        "message": summary.message(),
        "insertados": summary.inserted,
        "duplicados": summary.duplicates,
        "errores": summary.errors,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    fn roster_with_students() -> Arc<Roster> {
        let roster = Roster::open_in_memory().unwrap();
        for (numero_control, nombre) in [("19210001", "Ana"), ("19210002", "Luis")] {
            roster
                .insert(&NewStudent {
                    numero_control: numero_control.to_string(),
                    nombre: nombre.to_string(),
                    carrera: "ISC".to_string(),
                    semestre: "5".to_string(),
                    avance_reticular: "60".to_string(),
                })
                .unwrap();
        }
        Arc::new(roster)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_marks_attendance() {
        let roster = roster_with_students();
        let app = create_app(roster.clone());

        let (status, body) = send(app, post_json("/leer_qr", r#"{"qr_data":"19210001"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Asistencia registrada correctamente");
        assert_eq!(body["alumno"]["numero_control"], "19210001");
        assert_eq!(body["alumno"]["nombre"], "Ana");
        assert_eq!(body["alumno"]["asistencia"], 1);
        assert!(roster.find("19210001").unwrap().unwrap().asistencia);
        assert!(!roster.find("19210002").unwrap().unwrap().asistencia);
    }

    #[tokio::test]
    async fn test_scan_unknown_student() {
        let app = create_app(roster_with_students());
        let (status, body) = send(app, post_json("/leer_qr", r#"{"qr_data":"99999999"}"#)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(
            body["message"],
            "Alumno con número de control 99999999 no encontrado"
        );
    }

    #[tokio::test]
    async fn test_scan_without_body() {
        for raw in ["", "{}", "not json", "[1,2]"] {
            let app = create_app(roster_with_students());
            let (status, body) = send(app, post_json("/leer_qr", raw)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", raw);
            assert_eq!(body["message"], "No se recibieron datos");
        }
    }

    #[tokio::test]
    async fn test_scan_without_control_number() {
        for raw in [r#"{"otro":"x"}"#, r#"{"qr_data":""}"#, r#"{"qr_data":null}"#] {
            let app = create_app(roster_with_students());
            let (status, body) = send(app, post_json("/leer_qr", raw)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", raw);
            assert_eq!(body["message"], "Número de control no proporcionado");
        }
    }

    #[tokio::test]
    async fn test_list_filters_present() {
        let roster = roster_with_students();
        roster
            .mark_attendance("19210002", chrono::Utc::now())
            .unwrap();

        let all = Request::builder().uri("/alumnos").body(Body::empty()).unwrap();
        let (status, body) = send(create_app(roster.clone()), all).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let present = Request::builder()
            .uri("/alumnos?asistencia=1")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(create_app(roster), present).await;
        let students = body.as_array().unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0]["numero_control"], "19210002");
    }

    #[tokio::test]
    async fn test_add_student() {
        let roster = roster_with_students();
        let form = r#"{"numero_control":" 19210003 ","nombre":"Eva","carrera":"ISC","semestre":"1","avance_reticular":"5"}"#;

        let (status, _) = send(create_app(roster.clone()), post_json("/alumnos", form)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(roster.find("19210003").unwrap().unwrap().nombre, "Eva");

        let (status, body) = send(create_app(roster), post_json("/alumnos", form)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "El número de control 19210003 ya existe");
    }

    #[tokio::test]
    async fn test_add_student_missing_field() {
        let form = r#"{"numero_control":"19210003","nombre":"Eva","carrera":"","semestre":"1"}"#;
        let (status, body) = send(
            create_app(roster_with_students()),
            post_json("/alumnos", form),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Todos los campos son obligatorios");
    }

    #[tokio::test]
    async fn test_add_student_numeric_fields() {
        let roster = roster_with_students();
        let form = r#"{"numero_control":19210003,"nombre":"Eva","carrera":"ISC","semestre":5,"avance_reticular":62.5}"#;

        let (status, body) = send(create_app(roster.clone()), post_json("/alumnos", form)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["numero_control"], "19210003");

        let eva = roster.find("19210003").unwrap().unwrap();
        assert_eq!(eva.semestre, "5");
        assert_eq!(eva.avance_reticular, "62.5");
    }

    #[tokio::test]
    async fn test_add_student_malformed_body() {
        for raw in ["not json", r#"{"numero_control":"1","semestre":[5]}"#] {
            let (status, body) = send(
                create_app(roster_with_students()),
                post_json("/alumnos", raw),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", raw);
            let message = body["message"].as_str().unwrap();
            assert!(message.starts_with("Datos inválidos: "), "{}", message);
        }

        let (status, body) = send(create_app(roster_with_students()), post_json("/alumnos", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Todos los campos son obligatorios");
    }

    #[tokio::test]
    async fn test_import_csv() {
        let roster = roster_with_students();
        let csv = "NUMERO_CONTROL,NOMBRE,CARRERA,SEMESTRE,AVANCE_RETICULAR\n\
                   19210001,Ana,ISC,5,60\n\
                   19210010,Rosa,IND,2,20\n";
        let request = Request::builder()
            .method("POST")
            .uri("/alumnos/csv")
            .header(header::CONTENT_TYPE, "text/csv")
            .body(Body::from(csv))
            .unwrap();

        let (status, body) = send(create_app(roster.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["insertados"], 1);
        assert_eq!(body["duplicados"], 1);
        assert_eq!(
            body["message"],
            "Se insertaron 1 registros correctamente. 1 registros duplicados fueron omitidos"
        );
        assert!(roster.find("19210010").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_csv_missing_columns() {
        let request = Request::builder()
            .method("POST")
            .uri("/alumnos/csv")
            .body(Body::from("NUMERO_CONTROL,NOMBRE\n1,Ana\n"))
            .unwrap();
        let (status, body) = send(create_app(roster_with_students()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "Faltan las siguientes columnas en el CSV: CARRERA, SEMESTRE, AVANCE_RETICULAR"
        );
    }

    #[tokio::test]
    async fn test_import_csv_empty_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/alumnos/csv")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(create_app(roster_with_students()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No se seleccionó ningún archivo");
    }
}
