//! HTTP routes.
//!
//! Query flags follow the `"1"` convention: `body=1` includes bodies,
//! `header=1` raw headers, `reverse=1` sorts newest first. Attachment
//! metadata is on unless `attachments=0`.

use std::sync::Arc;

use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use postbox_core::search::parse_search_date;
use postbox_core::{
    EmailList, EmailMessage, EmailQuery, Error, FolderList, MailService, SendChannel, SendRequest,
    SessionConnector,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::response::{ApiResult, Envelope};

type Service<C, T> = State<Arc<MailService<C, T>>>;

/// Query parameters shared by the read routes.
#[derive(Debug, Default, Deserialize)]
pub struct Params {
    folder: Option<String>,
    since: Option<String>,
    limit: Option<String>,
    reverse: Option<String>,
    body: Option<String>,
    header: Option<String>,
    attachments: Option<String>,
    #[serde(rename = "msgID")]
    msg_id: Option<String>,
    filename: Option<String>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn flag(value: Option<&String>) -> bool {
    present(value) == Some("1")
}

impl Params {
    fn email_query(&self) -> Result<EmailQuery, Error> {
        let defaults = EmailQuery::default();
        let since = present(self.since.as_ref())
            .map(parse_search_date)
            .transpose()?;
        let limit = present(self.limit.as_ref())
            .map(|limit| {
                limit
                    .parse::<usize>()
                    .map_err(|_| Error::Validation(format!("invalid limit '{limit}'")))
            })
            .transpose()?;
        Ok(EmailQuery {
            folder: present(self.folder.as_ref()).map_or(defaults.folder, str::to_string),
            since,
            limit,
            reverse: flag(self.reverse.as_ref()),
            body: flag(self.body.as_ref()),
            headers: flag(self.header.as_ref()),
            attachments: present(self.attachments.as_ref()) != Some("0"),
            msg_id: present(self.msg_id.as_ref()).map(str::to_string),
        })
    }

    fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or_default()
    }

    fn msg_id(&self) -> &str {
        self.msg_id.as_deref().unwrap_or_default()
    }
}

/// Builds the API router around `service`.
pub fn router<C, T>(service: MailService<C, T>, origin: HeaderValue) -> Router
where
    C: SessionConnector + 'static,
    T: SendChannel + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/getEmailFolders", get(list_folders::<C, T>))
        .route("/getEmails", get(list_emails::<C, T>))
        .route("/getEmail", get(get_email::<C, T>))
        .route("/getAttachments", get(get_attachment::<C, T>))
        .route("/sendEmail", post(send_email::<C, T>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(service))
}

async fn list_folders<C, T>(
    State(service): Service<C, T>,
) -> ApiResult<Json<Envelope<FolderList>>>
where
    C: SessionConnector,
    T: SendChannel,
{
    let folders = service.list_folders().await?;
    Ok(Envelope::new("Retrieved folders successfully!", folders))
}

async fn list_emails<C, T>(
    State(service): Service<C, T>,
    Query(params): Query<Params>,
) -> ApiResult<Json<Envelope<EmailList>>>
where
    C: SessionConnector,
    T: SendChannel,
{
    let emails = service.list_emails(params.email_query()?).await?;
    Ok(Envelope::new("Retrieved emails successfully!", emails))
}

async fn get_email<C, T>(
    State(service): Service<C, T>,
    Query(params): Query<Params>,
) -> ApiResult<Json<Envelope<Option<EmailMessage>>>>
where
    C: SessionConnector,
    T: SendChannel,
{
    let email = service
        .get_email(params.folder(), params.msg_id(), flag(params.body.as_ref()))
        .await?;
    Ok(Envelope::new("Retrieved email successfully!", email))
}

async fn get_attachment<C, T>(
    State(service): Service<C, T>,
    Query(params): Query<Params>,
) -> ApiResult<Response>
where
    C: SessionConnector,
    T: SendChannel,
{
    let download = service
        .get_attachment(
            params.folder(),
            params.msg_id(),
            params.filename.as_deref().unwrap_or_default(),
        )
        .await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        disposition_filename(&download.filename)
    );
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.data,
    )
        .into_response())
}

/// Keeps printable ASCII other than quotes and backslashes.
fn disposition_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn send_email<C, T>(
    State(service): Service<C, T>,
    request: Request,
) -> ApiResult<Json<Envelope<String>>>
where
    C: SessionConnector,
    T: SendChannel,
{
    let payload = send_payload(request).await?;
    let message_id = service.send_email(payload).await?;
    Ok(Envelope::new("Email sent successfully!", message_id))
}

/// Accepts a JSON or urlencoded send request.
async fn send_payload(request: Request) -> Result<SendRequest, Error> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        Form::<SendRequest>::from_request(request, &())
            .await
            .map(|Form(payload)| payload)
            .map_err(|rejection| Error::Validation(rejection.body_text()))
    } else {
        Json::<SendRequest>::from_request(request, &())
            .await
            .map(|Json(payload)| payload)
            .map_err(|rejection| Error::Validation(rejection.body_text()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::StatusCode;
    use postbox_core::testing::{FakeChannel, FakeConnector, FakeMessage};
    use postbox_core::{FolderEntry, StagingArea};
    use postbox_imap::{BodyStructure, Disposition, SinglePart};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn app(connector: FakeConnector, root: &std::path::Path) -> Router {
        let service = MailService::new(
            connector,
            FakeChannel::default(),
            StagingArea::new(root),
            Duration::from_secs(5),
        );
        router(service, HeaderValue::from_static("http://localhost:3000"))
    }

    async fn call(app: Router, request: axum::http::Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = axum::http::Request::get(uri).body(Body::empty()).unwrap();
        let (status, body) = call(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn dated(seq: u32, day: u32) -> FakeMessage {
        FakeMessage::new(
            seq,
            &format!(
                "Message-ID: <jan{day}@x>\r\nFrom: a@x\r\nTo: b@x\r\nSubject: day {day}\r\nDate: {day} Jan 2024 09:00:00 +0000\r\n\r\n"
            ),
        )
        .with_text("hello <b>there</b>")
    }

    #[tokio::test]
    async fn test_folders() {
        let root = tempfile::tempdir().unwrap();
        let connector = FakeConnector::default().with_folders(vec![
            FolderEntry::new("INBOX", Some('/')),
            FolderEntry::new("Work", Some('/')),
            FolderEntry::new("Work/Reports", Some('/')),
        ]);
        let (status, json) = get_json(app(connector, root.path()), "/getEmailFolders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Retrieved folders successfully!");
        assert_eq!(json["data"]["count"], 2);
        assert_eq!(json["data"]["folders"][1], "Work/Reports");
    }

    #[tokio::test]
    async fn test_emails_sorted_and_limited() {
        let root = tempfile::tempdir().unwrap();
        let connector =
            FakeConnector::default().with_messages(vec![dated(1, 1), dated(2, 2), dated(3, 3)]);
        let (status, json) = get_json(
            app(connector, root.path()),
            "/getEmails?limit=2&reverse=1&body=1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["count"], 2);
        assert_eq!(json["data"]["emails"][0]["msgID"], "<jan3@x>");
        assert_eq!(json["data"]["emails"][1]["msgID"], "<jan2@x>");
        assert_eq!(json["data"]["emails"][0]["body"], "hello there");
        assert!(json["data"]["emails"][0].get("headers").is_none());
    }

    #[tokio::test]
    async fn test_invalid_limit() {
        let root = tempfile::tempdir().unwrap();
        let (status, json) =
            get_json(app(FakeConnector::default(), root.path()), "/getEmails?limit=many").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], true);
    }

    #[tokio::test]
    async fn test_get_email_requires_msg_id() {
        let root = tempfile::tempdir().unwrap();
        let (status, json) =
            get_json(app(FakeConnector::default(), root.path()), "/getEmail?folder=INBOX").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("msgID"));
    }

    #[tokio::test]
    async fn test_get_email_missing_is_null() {
        let root = tempfile::tempdir().unwrap();
        let connector = FakeConnector::default()
            .with_messages(vec![dated(1, 1)])
            .with_matches(Vec::new());
        let (status, json) = get_json(
            app(connector, root.path()),
            "/getEmail?folder=INBOX&msgID=%3Cnone%40x%3E",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["data"].is_null());
    }

    #[tokio::test]
    async fn test_session_failure_is_bad_gateway() {
        let root = tempfile::tempdir().unwrap();
        let (status, json) =
            get_json(app(FakeConnector::default().refusing(), root.path()), "/getEmailFolders").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"], true);
    }

    #[tokio::test]
    async fn test_attachment_download() {
        let root = tempfile::tempdir().unwrap();
        let part = SinglePart {
            media_type: "application".to_string(),
            media_subtype: "pdf".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "base64".to_string(),
            size: 8,
            lines: None,
            disposition: Some(Disposition {
                kind: "attachment".to_string(),
                params: vec![("filename".to_string(), "r.pdf".to_string())],
            }),
        };
        let text = SinglePart {
            media_type: "text".to_string(),
            media_subtype: "plain".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "7bit".to_string(),
            size: 2,
            lines: Some(1),
            disposition: None,
        };
        let structure = BodyStructure::Multipart {
            parts: vec![BodyStructure::Single(text), BodyStructure::Single(part)],
            subtype: "mixed".to_string(),
            params: Vec::new(),
            disposition: None,
        };
        let connector = FakeConnector::default().with_messages(vec![
            FakeMessage::new(1, "Message-ID: <m@x>\r\n\r\n")
                .with_structure(structure)
                .with_part("2", b"JVBERi0x"),
        ]);

        let request = axum::http::Request::get("/getAttachments?folder=INBOX&msgID=%3Cm%40x%3E&filename=r.pdf")
            .body(Body::empty())
            .unwrap();
        let response = app(connector, root.path()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"r.pdf\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"%PDF-1");
    }

    #[tokio::test]
    async fn test_send_json_and_form() {
        let root = tempfile::tempdir().unwrap();
        let json = axum::http::Request::post("/sendEmail")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"from":"me@example.com","to":"you@example.org","subject":"hi","text":"plain"}"#,
            ))
            .unwrap();
        let (status, body) = call(app(FakeConnector::default(), root.path()), json).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Email sent successfully!");
        assert!(body["data"].as_str().unwrap().ends_with("@example.com>"));

        let form = axum::http::Request::post("/sendEmail")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("from=me%40example.com&to=you%40example.org&html=%3Cp%3Ehi%3C%2Fp%3E"))
            .unwrap();
        let (status, _) = call(app(FakeConnector::default(), root.path()), form).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_without_recipient() {
        let root = tempfile::tempdir().unwrap();
        let request = axum::http::Request::post("/sendEmail")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"from":"me@example.com"}"#))
            .unwrap();
        let (status, _) = call(app(FakeConnector::default(), root.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(disposition_filename("a \"b\".pdf"), "a _b_.pdf");
        assert_eq!(disposition_filename("résumé.pdf"), "r_sum_.pdf");
    }
}
