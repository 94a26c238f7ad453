use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use crate::config::AppConfig;
use crate::blob_store::not_found_or;
use crate::error::AppError;
use crate::form::{read_image_form, FormLimits};
use crate::query::SearchParams;
use crate::service::{Fetched, ImageService, ReplaceOutcome};

#[derive(Deserialize, Debug)]
struct FetchParams {
    #[serde(default)]
    details: bool,
}

#[derive(Deserialize, Debug)]
struct BulkDeleteRequest {
    image_ids: Vec<String>,
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(mime::TEXT_PLAIN_UTF_8)
        .body("Server is running \n")
}

async fn upload_image(
    req: HttpRequest,
    service: web::Data<ImageService>,
    limits: web::Data<FormLimits>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    log::debug!("Received upload request");
    let form = read_image_form(payload, *limits.get_ref()).await?;
    let record = service.upload(form).await?;

    let host = req.connection_info().host().to_string();
    Ok(HttpResponse::Ok().json(json!({
        "message": "Upload successful",
        "image_id": record.image_id,
        "image_path": format!("http://{}/{}", host, record.image_path),
    })))
}

async fn search_images(
    service: web::Data<ImageService>,
    query: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    log::debug!("Received search request with query: {:?}", query);
    let response = service.search(&query).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn replace_image(
    path: web::Path<String>,
    service: web::Data<ImageService>,
    limits: web::Data<FormLimits>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let image_id = path.into_inner();
    log::debug!("Received replace request for image: {}", image_id);
    let form = read_image_form(payload, *limits.get_ref()).await?;

    match service.replace(&image_id, form).await? {
        ReplaceOutcome::Replaced => Ok(HttpResponse::Ok().json(json!({
            "message": "Image replaced successfully",
        }))),
        ReplaceOutcome::NothingChanged => Ok(HttpResponse::NoContent().finish()),
    }
}

async fn get_image(
    req: HttpRequest,
    path: web::Path<String>,
    service: web::Data<ImageService>,
    params: web::Query<FetchParams>,
) -> Result<HttpResponse, AppError> {
    let image_name = path.into_inner();
    log::debug!("Received request for image: {} (details: {})", image_name, params.details);

    match service.fetch(&image_name, params.details).await? {
        Fetched::Details(record) => Ok(HttpResponse::Ok().json(record)),
        Fetched::Blob(blob_path) => {
            log::trace!("Streaming image from: {:?}", blob_path);
            let file = NamedFile::open_async(&blob_path).await.map_err(not_found_or)?;
            Ok(file.into_response(&req))
        }
    }
}

async fn delete_image(
    path: web::Path<String>,
    service: web::Data<ImageService>,
) -> Result<HttpResponse, AppError> {
    let image_id = path.into_inner();
    log::debug!("Received delete request for image: {}", image_id);
    service.delete(&image_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Image deleted successfully" })))
}

async fn delete_images(
    service: web::Data<ImageService>,
    body: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse, AppError> {
    log::debug!("Received bulk delete request for {} ids", body.image_ids.len());
    let deleted_count = service.delete_many(&body.image_ids).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Images deleted successfully",
        "deleted_count": deleted_count,
    })))
}

/// Registers every route; images live under `/{prefix}`.
pub fn routes(cfg: &mut web::ServiceConfig, prefix: &str, limits: FormLimits) {
    cfg.app_data(web::Data::new(limits))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::InvalidQuery(err.to_string()).into()
    }))
    .app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::InvalidQuery(err.to_string()).into()
    }))
    .route("/", web::get().to(health_check))
    .service(
        web::scope(&format!("/{}", prefix))
            .route("", web::delete().to(delete_images))
            .route("/upload", web::post().to(upload_image))
            .route("/search", web::get().to(search_images))
            .route("/{image_id}", web::put().to(replace_image))
            .route("/{image_name}", web::get().to(get_image))
            .route("/{image_id}", web::delete().to(delete_image)),
    );
}

pub async fn start_web_server(config: Arc<AppConfig>, service: ImageService) -> std::io::Result<()> {
    let port = config.web_port;
    let prefix = service.public_prefix().to_string();
    let limits = FormLimits { max_part_bytes: config.max_upload_bytes };
    let service_data = web::Data::new(service);

    log::info!("Starting web server on port: {}", port);
    log::debug!("Serving images under /{} (form parts up to {} bytes)", prefix, limits.max_part_bytes);

    HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .configure(|cfg| routes(cfg, &prefix, limits))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::FsBlobStore;
    use crate::query::SearchSettings;
    use crate::search_clients::memory::MemoryIndex;
    use actix_web::http::{header, StatusCode};
    use actix_web::test;
    use serde_json::Value;

    const BOUNDARY: &str = "----imagestoreboundary";

    struct Part<'a> {
        name: &'a str,
        file: Option<(&'a str, &'a str)>,
        body: &'a [u8],
    }

    fn text<'a>(name: &'a str, value: &'a str) -> Part<'a> {
        Part { name, file: None, body: value.as_bytes() }
    }

    fn multipart(parts: &[Part]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part.file {
                Some((file_name, content_type)) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            part.name, file_name, content_type
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
                    );
                }
            }
            body.extend_from_slice(part.body);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(method: actix_web::http::Method, uri: &str, parts: &[Part]) -> test::TestRequest {
        test::TestRequest::default()
            .method(method)
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart(parts))
    }

    macro_rules! app {
        ($dir:expr) => {
            app!($dir, 1024 * 1024)
        };
        ($dir:expr, $max_part_bytes:expr) => {{
            let service = ImageService::new(
                Arc::new(FsBlobStore::new($dir.path())),
                Arc::new(MemoryIndex::new()),
                SearchSettings::default(),
                "images",
            );
            test::init_service(
                App::new()
                    .app_data(web::Data::new(service))
                    .configure(|cfg| {
                        routes(cfg, "images", FormLimits { max_part_bytes: $max_part_bytes })
                    }),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn health_check_is_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body, "Server is running \n");
    }

    #[actix_web::test]
    async fn upload_fetch_search_delete_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[
                Part { name: "image", file: Some(("cat.png", "image/png")), body: b"\x89PNGdata" },
                text("title", "Peking Opera"),
                text("category", "men-traditional-chinese"),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Upload successful");
        let image_id = body["image_id"].as_str().unwrap().to_string();
        let image_path = body["image_path"].as_str().unwrap();
        assert!(image_path.starts_with("http://"));
        assert!(image_path.ends_with(&format!("/images/{}.png", image_id)));

        let req = test::TestRequest::get().uri(&format!("/images/{}.png", image_id)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(test::read_body(resp).await, &b"\x89PNGdata"[..]);

        let req = test::TestRequest::get()
            .uri(&format!("/images/{}?details=true", image_id))
            .to_request();
        let record: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(record["info"]["title"], "Peking Opera");
        assert_eq!(record["info"]["price"], "");

        let req = test::TestRequest::get()
            .uri("/images/search?title=opera&category=men-traditional-chinese")
            .to_request();
        let found: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found["total_count"], 1);
        assert_eq!(found["results"][0]["image_id"], image_id.as_str());

        let req = test::TestRequest::delete().uri(&format!("/images/{}", image_id)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/images/{}?details=true", image_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Image not found");
    }

    #[actix_web::test]
    async fn upload_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let req = multipart_request(actix_web::http::Method::POST, "/images/upload", &[text("title", "x")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file provided");

        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[Part { name: "image", file: Some(("notes.txt", "text/plain")), body: b"hi" }],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn oversized_parts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir, 16);

        let big = [0u8; 64];
        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[Part { name: "image", file: Some(("big.png", "image/png")), body: &big }],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Form part 'image' exceeds the 16 byte limit");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let long_title = "t".repeat(17);
        let req = multipart_request(
            actix_web::http::Method::PUT,
            "/images/anything",
            &[text("title", &long_title)],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[Part { name: "image", file: Some(("ok.png", "image/png")), body: &big[..16] }],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn blobs_are_streamed_with_range_support() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[Part { name: "image", file: Some(("cat.jpg", "image/jpeg")), body: b"0123456789" }],
        )
        .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let image_id = body["image_id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/images/{}.jpg", image_id))
            .insert_header((header::RANGE, "bytes=2-5"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
        assert_eq!(test::read_body(resp).await, &b"2345"[..]);

        for uri in ["/images/missing.jpg", "/images/..%2Fsecret.jpg"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn search_without_filters_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        for uri in ["/images/search", "/images/search?page_size=5&is_random=true&is_search_bar=true"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn extreme_paging_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);
        for uri in [
            "/images/search?title=a&page_size=9223372036854775807&is_random=true",
            "/images/search?title=a&page_number=-9223372036854775808&page_size=10",
        ] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn replace_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let req = multipart_request(actix_web::http::Method::PUT, "/images/missing", &[text("title", "")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = multipart_request(actix_web::http::Method::PUT, "/images/missing", &[text("title", "x")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = multipart_request(
            actix_web::http::Method::POST,
            "/images/upload",
            &[Part { name: "image", file: Some(("a.jpg", "image/jpeg")), body: b"jpeg" }],
        )
        .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let image_id = body["image_id"].as_str().unwrap().to_string();

        let req = multipart_request(
            actix_web::http::Method::PUT,
            &format!("/images/{}", image_id),
            &[text("price", "300"), text("status", "new")],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/images/{}?details=true", image_id))
            .to_request();
        let record: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(record["info"]["price"], "300");
        assert_eq!(record["info"]["status"], "new");
    }

    #[actix_web::test]
    async fn bulk_delete_counts_unique_records() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(dir);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let req = multipart_request(
                actix_web::http::Method::POST,
                "/images/upload",
                &[Part { name: "image", file: Some(("a.gif", "image/gif")), body: b"gif" }],
            )
            .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            ids.push(body["image_id"].as_str().unwrap().to_string());
        }

        let req = test::TestRequest::delete()
            .uri("/images")
            .set_json(json!({ "image_ids": [ids[0], ids[1], ids[0]] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted_count"], 2);

        let req = test::TestRequest::delete()
            .uri("/images")
            .set_json(json!({ "image_ids": [ids[0]] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
