use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;

use crate::app::AppContext;
use crate::error::{Error, Result};
use crate::server::{log_failure, DetectionsResponse, ErrorResponse, PayloadLimits};

const UPLOAD_FIELD: &str = "file";

/// `POST /detect` with a multipart `file` field.
pub(crate) async fn detect(
    payload: Multipart,
    context: web::Data<AppContext>,
    limits: Option<web::Data<PayloadLimits>>,
) -> HttpResponse {
    let limits = limits.map(|l| **l).unwrap_or_default();
    let result = match read_upload(payload, limits.max_frame_bytes).await {
        Ok(bytes) => context.detect(bytes).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(detections) => {
            tracing::debug!(count = detections.len(), "detect request served");
            HttpResponse::Ok().json(DetectionsResponse {
                detections: &detections,
            })
        }
        Err(err) => {
            log_failure(&err, "detect request");
            HttpResponse::BadRequest().json(ErrorResponse::from(&err))
        }
    }
}

async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Vec<u8>> {
    let mut upload = None;
    while let Some(mut field) = payload.try_next().await.map_err(upload_err)? {
        let wanted = upload.is_none() && field.name() == Some(UPLOAD_FIELD);
        let mut bytes = Vec::new();
        // Other fields still have to be drained before the next one is readable.
        while let Some(chunk) = field.try_next().await.map_err(upload_err)? {
            if wanted {
                if bytes.len() + chunk.len() > max_bytes {
                    return Err(Error::Validation(format!("upload exceeds {max_bytes} bytes")));
                }
                bytes.extend_from_slice(&chunk);
            }
        }
        if wanted {
            upload = Some(bytes);
        }
    }

    match upload {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        Some(_) => Err(Error::Validation("uploaded file is empty".to_string())),
        None => Err(Error::Validation(format!("missing multipart field `{UPLOAD_FIELD}`"))),
    }
}

fn upload_err(err: actix_multipart::MultipartError) -> Error {
    Error::Validation(err.to_string())
}

#[cfg(test)]
mod tests {
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use serde_json::Value;

    use crate::app::AppContext;
    use crate::engine::testing::FakeEngine;
    use crate::engine::ConcurrencyGuard;
    use crate::media::tests::png_bytes;
    use crate::pipeline::{LabelIndex, Pipeline};
    use crate::server::{routes, PayloadLimits};

    const BOUNDARY: &str = "----detect-boundary";

    fn multipart(field: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"frame.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn context(engine: FakeEngine) -> web::Data<AppContext> {
        web::Data::new(AppContext::new(
            ConcurrencyGuard::new(engine),
            LabelIndex::from_pairs([(0, "person")]),
            Pipeline::default(),
        ))
    }

    async fn post(engine: FakeEngine, field: &str, bytes: &[u8]) -> (StatusCode, Value) {
        post_with_limits(engine, PayloadLimits::default(), field, bytes).await
    }

    async fn post_with_limits(
        engine: FakeEngine,
        limits: PayloadLimits,
        field: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(context(engine))
                .app_data(web::Data::new(limits))
                .configure(routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/detect")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart(field, bytes))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }

    #[actix_web::test]
    async fn upload_returns_detections() {
        let (status, body) = post(FakeEngine::new(), "file", &png_bytes(100, 100)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"detections": [{
                "ymin": 10, "xmin": 10, "ymax": 50, "xmax": 50,
                "label": "person", "confidence": 0.9
            }]})
        );
    }

    #[actix_web::test]
    async fn corrupt_image_is_bad_request() {
        let (status, body) = post(FakeEngine::new(), "file", b"not a png at all").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("could not decode image"));
    }

    #[actix_web::test]
    async fn missing_field_is_bad_request() {
        let (status, body) = post(FakeEngine::new(), "picture", &png_bytes(4, 4)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("`file`"));
    }

    #[actix_web::test]
    async fn engine_failure_is_bad_request() {
        let (status, body) = post(FakeEngine::new().failing(), "file", &png_bytes(4, 4)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("inference failed"));
    }

    #[actix_web::test]
    async fn oversized_upload_is_bad_request() {
        let image = png_bytes(64, 64);
        let limits = PayloadLimits {
            max_frame_bytes: image.len() - 1,
        };
        let (status, body) = post_with_limits(FakeEngine::new(), limits, "file", &image).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("exceeds"));

        let limits = PayloadLimits {
            max_frame_bytes: image.len(),
        };
        let (status, _) = post_with_limits(FakeEngine::new(), limits, "file", &image).await;
        assert_eq!(status, StatusCode::OK);
    }
}
