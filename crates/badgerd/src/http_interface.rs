//! HTTP interface for the badger daemon.
//!
//! Thin translation layer: multipart photo uploads in, JSON decisions and
//! training summaries out. All recognition/training work happens on the
//! engine thread.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use badger_core::gallery::GalleryError;
use badger_core::trainer::{TrainError, TrainingReport};
use badger_core::{EmployeeId, MatchDecision};
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Build the API router.
pub fn router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/recognize", post(recognize))
        .route("/train", post(train_all))
        .route("/employees", get(list_employees))
        .route("/employees/:id/photos", post(enroll))
        .route("/employees/:id/train", post(train_one))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "badgerd" }))
}

async fn status(State(engine): State<EngineHandle>) -> Response {
    match engine.status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(err),
    }
}

/// Identify the person in an uploaded photo.
async fn recognize(State(engine): State<EngineHandle>, mut multipart: Multipart) -> Response {
    let image = match read_image_field(&mut multipart).await {
        Ok(image) => image,
        Err(response) => return response,
    };

    match engine.recognize(image).await {
        Ok(MatchDecision::Match {
            identity,
            confidence,
        }) => Json(json!({
            "identity": identity.to_string(),
            "confidence": confidence,
        }))
        .into_response(),
        Ok(MatchDecision::NoFaceDetected) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No face detected" })),
        )
            .into_response(),
        Ok(MatchDecision::NoMatchFound { best_confidence }) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "No match found",
                "best_confidence": best_confidence,
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Rebuild the model from the full gallery.
async fn train_all(State(engine): State<EngineHandle>) -> Response {
    match engine.train_all().await {
        Ok(report) => retrained_response(report),
        Err(err) => error_response(err),
    }
}

/// Enroll a reference photo (replacing prior ones) and retrain.
async fn enroll(
    State(engine): State<EngineHandle>,
    Path(external): Path<u32>,
    mut multipart: Multipart,
) -> Response {
    let Some(id) = EmployeeId::new(external) else {
        return invalid_employee_response();
    };
    let image = match read_image_field(&mut multipart).await {
        Ok(image) => image,
        Err(response) => return response,
    };

    match engine.enroll(id, image).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "message": format!("Photo enrolled for {id}, model retrained"),
                "training": report,
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Retrain triggered for one identity.
async fn train_one(State(engine): State<EngineHandle>, Path(external): Path<u32>) -> Response {
    let Some(id) = EmployeeId::new(external) else {
        return invalid_employee_response();
    };
    match engine.train_one(id).await {
        Ok(report) => retrained_response(report),
        Err(err) => error_response(err),
    }
}

/// Enrolled identities with photo counts.
async fn list_employees(State(engine): State<EngineHandle>) -> Response {
    match engine.list_gallery().await {
        Ok(entries) => {
            let employees: Vec<_> = entries
                .iter()
                .map(|(id, photos)| json!({ "identity": id.to_string(), "photos": photos }))
                .collect();
            Json(json!({ "count": employees.len(), "employees": employees })).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Extract the `image` multipart field.
async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, Response> {
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("image") {
                    return match field.bytes().await {
                        Ok(bytes) => Ok(bytes.to_vec()),
                        Err(err) => Err(bad_request(format!("Could not read image field: {err}"))),
                    };
                }
            }
            Ok(None) => return Err(bad_request("No image provided".to_string())),
            Err(err) => return Err(bad_request(format!("Malformed multipart body: {err}"))),
        }
    }
}

fn retrained_response(report: TrainingReport) -> Response {
    Json(json!({
        "message": "Model retrained",
        "training": report,
    }))
    .into_response()
}

fn invalid_employee_response() -> Response {
    bad_request("Employee ids are positive integers".to_string())
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn error_response(err: EngineError) -> Response {
    let (status, message) = match &err {
        EngineError::Decode(_) => (StatusCode::BAD_REQUEST, "Failed to decode image".to_string()),
        EngineError::Gallery(GalleryError::NotFound(id))
        | EngineError::Train(TrainError::Gallery(GalleryError::NotFound(id))) => {
            (StatusCode::NOT_FOUND, format!("{id} has no enrolled photos"))
        }
        EngineError::Train(TrainError::EmptyTrainingSet) => (
            StatusCode::CONFLICT,
            "No usable training images in the gallery".to_string(),
        ),
        EngineError::ModelNotTrained => (
            StatusCode::CONFLICT,
            "Model has not been trained yet".to_string(),
        ),
        _ => {
            tracing::error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn, EngineParts};
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use badger_core::mock::{MockFaceDetector, MockRecognizer};
    use badger_core::{
        DetectionParams, GalleryStore, MatchPolicy, Matcher, ModelStore,
        DEFAULT_CONFIDENCE_THRESHOLD,
    };
    use image::{GrayImage, Luma};
    use serde_json::Value;
    use std::path::PathBuf;

    struct TestContext {
        server: TestServer,
        model_path: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn setup() -> TestContext {
        let tmp = tempfile::tempdir().unwrap();
        let model_path = tmp.path().join("trained-model.json");
        let parts = EngineParts {
            detector: Box::new(MockFaceDetector),
            recognizer: Box::new(MockRecognizer),
            gallery: GalleryStore::new(tmp.path().join("photos")),
            store: ModelStore::new(model_path.clone()),
            matcher: Matcher::new(
                DEFAULT_CONFIDENCE_THRESHOLD,
                MatchPolicy::FirstAcceptable,
                DetectionParams::default(),
            ),
        };
        let engine = spawn(parts).unwrap();
        TestContext {
            server: TestServer::new(router(engine)).unwrap(),
            model_path,
            _tmp: tmp,
        }
    }

    fn png_bytes(image: &GrayImage) -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    /// Distinct "faces": bright on the right vs bright on the left.
    fn right_bright() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| Luma([if x >= 32 { 255 } else { 0 }]))
    }

    fn left_bright() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| Luma([if x < 32 { 255 } else { 0 }]))
    }

    fn flat() -> GrayImage {
        GrayImage::from_pixel(64, 64, Luma([90u8]))
    }

    fn image_form(bytes: Vec<u8>) -> MultipartForm {
        MultipartForm::new().add_part("image", Part::bytes(bytes).file_name("photo.png"))
    }

    #[tokio::test]
    async fn test_healthz() {
        let ctx = setup();
        let response = ctx.server.get("/healthz").await;
        assert_eq!(response.status_code(), 200);
    }

    #[tokio::test]
    async fn test_recognize_before_any_training() {
        let ctx = setup();
        let response = ctx
            .server
            .post("/recognize")
            .multipart(image_form(png_bytes(&right_bright())))
            .await;
        assert_eq!(response.status_code(), 409);
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_round_trip() {
        let ctx = setup();

        let response = ctx
            .server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await;
        assert_eq!(response.status_code(), 200);

        let response = ctx
            .server
            .post("/recognize")
            .multipart(image_form(png_bytes(&right_bright())))
            .await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        assert_eq!(body["identity"], "employee_1");
        assert!(body["confidence"].as_f64().unwrap() < 1.0);
    }

    #[tokio::test]
    async fn test_no_face_and_no_match_are_distinct() {
        let ctx = setup();
        ctx.server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await
            .assert_status_ok();

        let no_face = ctx
            .server
            .post("/recognize")
            .multipart(image_form(png_bytes(&flat())))
            .await;
        assert_eq!(no_face.status_code(), 404);
        let body: Value = no_face.json();
        assert_eq!(body["error"], "No face detected");

        let no_match = ctx
            .server
            .post("/recognize")
            .multipart(image_form(png_bytes(&left_bright())))
            .await;
        assert_eq!(no_match.status_code(), 404);
        let body: Value = no_match.json();
        assert_eq!(body["error"], "No match found");
        assert!(body["best_confidence"].as_f64().unwrap() > 100.0);
    }

    #[tokio::test]
    async fn test_enrollment_replaces_prior_reference_set() {
        let ctx = setup();
        ctx.server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await
            .assert_status_ok();

        // Re-enroll with a different reference; the old one is discarded.
        ctx.server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&left_bright())))
            .await
            .assert_status_ok();

        // A probe matching only the discarded reference no longer matches.
        let response = ctx
            .server
            .post("/recognize")
            .multipart(image_form(png_bytes(&right_bright())))
            .await;
        assert_eq!(response.status_code(), 404);
        let body: Value = response.json();
        assert_eq!(body["error"], "No match found");
    }

    #[tokio::test]
    async fn test_recognize_undecodable_image() {
        let ctx = setup();
        let response = ctx
            .server
            .post("/recognize")
            .multipart(image_form(b"definitely not an image".to_vec()))
            .await;
        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["error"], "Failed to decode image");
    }

    #[tokio::test]
    async fn test_recognize_without_image_field() {
        let ctx = setup();
        let form = MultipartForm::new().add_text("comment", "no photo here");
        let response = ctx.server.post("/recognize").multipart(form).await;
        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_train_on_empty_gallery_leaves_artifact_untouched() {
        let ctx = setup();
        let response = ctx.server.post("/train").await;
        assert_eq!(response.status_code(), 409);
        assert!(
            !ctx.model_path.exists(),
            "failed training must not create an artifact"
        );
    }

    #[tokio::test]
    async fn test_train_reports_summary() {
        let ctx = setup();
        ctx.server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await
            .assert_status_ok();

        let response = ctx.server.post("/train").await;
        assert_eq!(response.status_code(), 200);
        let body: Value = response.json();
        assert_eq!(body["message"], "Model retrained");
        assert_eq!(body["training"]["images"], 1);
        assert_eq!(body["training"]["identities"], 1);
        assert!(ctx.model_path.exists());
    }

    #[tokio::test]
    async fn test_train_one_unknown_employee() {
        let ctx = setup();
        ctx.server
            .post("/employees/1/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await
            .assert_status_ok();

        let response = ctx.server.post("/employees/7/train").await;
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_enroll_rejects_employee_zero() {
        let ctx = setup();
        let response = ctx
            .server
            .post("/employees/0/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await;
        assert_eq!(response.status_code(), 400);
    }

    #[tokio::test]
    async fn test_list_employees_and_status() {
        let ctx = setup();
        ctx.server
            .post("/employees/2/photos")
            .multipart(image_form(png_bytes(&right_bright())))
            .await
            .assert_status_ok();

        let response = ctx.server.get("/employees").await;
        assert_eq!(response.status_code(), 200);
        let body: Value = response.json();
        assert_eq!(body["count"], 1);
        assert_eq!(body["employees"][0]["identity"], "employee_2");
        assert_eq!(body["employees"][0]["photos"], 1);

        let response = ctx.server.get("/status").await;
        let body: Value = response.json();
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["model_classes"], 1);
        assert_eq!(body["enrolled_identities"], 1);
    }
}
