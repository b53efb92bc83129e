// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error,
    api::{
        AnnotationBackend, AnnotationPayload, AssigneePatch, DataMeta, JobId, JobInfo,
        TaskCreateParams, TaskId, TaskInfo, User,
    },
    config::ConnectionConfig,
    poll::{PollPolicy, log_poll_configuration},
};
use log::{Level, debug, error, log_enabled, trace};
use reqwest::{
    Body, Method, RequestBuilder, StatusCode,
    multipart::{Form, Part},
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs::File;
use tokio_util::codec::{BytesCodec, FramedRead};

const USER_AGENT: &str = "cvat-sync";
const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";
const USERS_PAGE_SIZE: u32 = 100;

#[derive(serde::Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// Client for the CVAT REST API.
///
/// The session established by [`Client::connect`] is kept in the cookie
/// store of the underlying HTTP client. When the server hands out a CSRF
/// cookie its value accompanies every subsequent request.
///
/// Every non-2xx response is returned as [`Error::HttpStatus`] carrying the
/// status code, URL and response body. Requests are never retried here.
///
/// # Examples
///
/// ```rust,no_run
/// use cvat_sync::{Client, ConnectionConfig};
///
/// # async fn example() -> Result<(), cvat_sync::Error> {
/// let config = ConnectionConfig::new("localhost")
///     .with_port(8080)
///     .with_tls(false)
///     .with_credentials("admin", "secret");
/// let client = Client::connect(config).await?;
///
/// for user in client.users().await? {
///     println!("{} ({})", user.username, user.id);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ConnectionConfig,
    api_url: String,
    csrf_token: Option<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_url", &self.api_url)
            .field("has_csrf_token", &self.csrf_token.is_some())
            .finish()
    }
}

impl Client {
    /// Creates an unauthenticated client for the configured server.
    pub fn new(config: ConnectionConfig) -> Result<Self, Error> {
        log_poll_configuration(&PollPolicy::from_env());

        let timeout_secs = std::env::var("CVAT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .cookie_store(true)
            .build()?;

        let api_url = url::Url::parse(&config.api_url())?;
        if api_url.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidParameters(format!("server url {} has no host", config.url)));
        }

        Ok(Client {
            http,
            api_url: api_url.as_str().trim_end_matches('/').to_owned(),
            config,
            csrf_token: None,
        })
    }

    /// Creates a client and logs in with the configured credentials.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, Error> {
        let mut client = Client::new(config)?;
        client.login().await?;
        Ok(client)
    }

    async fn login(&mut self) -> Result<(), Error> {
        let credentials = self.config.credentials.clone().ok_or_else(|| {
            Error::InvalidParameters("username and password are required to log in".to_owned())
        })?;

        debug!("Logging in to {} as {}", self.api_url, credentials.username);
        let resp = self
            .request(Method::POST, "auth/login")
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        self.csrf_token = resp
            .cookies()
            .find(|cookie| cookie.name() == CSRF_COOKIE)
            .map(|cookie| cookie.value().to_owned());

        check_status(resp).await?;
        Ok(())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_url(method, &self.endpoint(path))
    }

    fn request_url(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);
        match &self.csrf_token {
            Some(token) => req.header(CSRF_HEADER, token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Vec<u8>, Error> {
        let resp = check_status(req.send().await?).await?;
        let body = resp.bytes().await?;

        if log_enabled!(Level::Trace) {
            trace!("Response: {}", String::from_utf8_lossy(&body));
        }

        Ok(body.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let body = self.send(req).await?;
        match serde_json::from_slice(&body) {
            Ok(value) => Ok(value),
            Err(err) => {
                error!("Invalid JSON Response: {}", String::from_utf8_lossy(&body));
                Err(err.into())
            }
        }
    }

    fn with_json<B: Serialize>(req: RequestBuilder, body: &B) -> Result<RequestBuilder, Error> {
        if log_enabled!(Level::Trace) {
            trace!("Request: {}", serde_json::to_string_pretty(body)?);
        }
        Ok(req.json(body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.send_json(self.request(Method::GET, path)).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let req = Self::with_json(self.request(Method::POST, path), body)?;
        self.send_json(req).await
    }

    async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let req = Self::with_json(self.request(Method::PUT, path), body)?;
        self.send_json(req).await
    }

    async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<(), Error> {
        let req = Self::with_json(self.request(Method::PATCH, path), body)?;
        self.send(req).await?;
        Ok(())
    }

    /// Every user of the server, following pagination.
    pub async fn users(&self) -> Result<Vec<User>, Error> {
        let mut users = vec![];
        let first = self.endpoint(&format!("users?page_size={}", USERS_PAGE_SIZE));
        let mut url = Some(first);

        while let Some(next) = url {
            let page: Page<User> = self.send_json(self.request_url(Method::GET, &next)).await?;
            users.extend(page.results);
            url = page.next;
        }

        debug!("Found {} users", users.len());
        Ok(users)
    }

    pub async fn create_task(&self, params: &TaskCreateParams) -> Result<TaskInfo, Error> {
        let task: TaskInfo = self.post("tasks", params).await?;
        debug!("Created task {} '{}'", task.id, task.name);
        Ok(task)
    }

    pub async fn patch_task(&self, task_id: TaskId, patch: &AssigneePatch) -> Result<(), Error> {
        self.patch(&format!("tasks/{}", task_id), patch).await
    }

    /// Streams the media files to the task as `client_files[i]` parts.
    pub async fn upload_media(
        &self,
        task_id: TaskId,
        paths: &[PathBuf],
        image_quality: u8,
    ) -> Result<(), Error> {
        let mut form = Form::new().text("image_quality", image_quality.to_string());

        for (index, path) in paths.iter().enumerate() {
            form = form.part(format!("client_files[{}]", index), file_part(path).await?);
        }

        debug!("Uploading {} files to task {}", paths.len(), task_id);
        let req = self
            .request(Method::POST, &format!("tasks/{}/data", task_id))
            .multipart(form);
        self.send(req).await?;
        Ok(())
    }

    pub async fn jobs(&self, task_id: TaskId) -> Result<Vec<JobInfo>, Error> {
        self.get(&format!("tasks/{}/jobs", task_id)).await
    }

    pub async fn patch_job(&self, job_id: JobId, patch: &AssigneePatch) -> Result<(), Error> {
        self.patch(&format!("jobs/{}", job_id), patch).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<TaskInfo, Error> {
        self.get(&format!("tasks/{}", task_id)).await
    }

    pub async fn annotations(&self, task_id: TaskId) -> Result<AnnotationPayload, Error> {
        self.get(&format!("tasks/{}/annotations", task_id)).await
    }

    pub async fn put_annotations(
        &self,
        task_id: TaskId,
        payload: &AnnotationPayload,
    ) -> Result<AnnotationPayload, Error> {
        self.put(&format!("tasks/{}/annotations", task_id), payload)
            .await
    }

    pub async fn data_meta(&self, task_id: TaskId) -> Result<DataMeta, Error> {
        self.get(&format!("tasks/{}/data/meta", task_id)).await
    }

    /// Deletes a task. A task that no longer exists counts as deleted.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), Error> {
        let resp = self
            .request(Method::DELETE, &format!("tasks/{}", task_id))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("Task {} does not exist", task_id);
            return Ok(());
        }

        check_status(resp).await?;
        debug!("Deleted task {}", task_id);
        Ok(())
    }

    pub async fn delete_tasks(&self, task_ids: &[TaskId]) -> Result<(), Error> {
        for task_id in task_ids {
            self.delete_task(*task_id).await?;
        }
        Ok(())
    }
}

/// Turns a non-2xx response into [`Error::HttpStatus`] with its body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    error!("{} {}: {}", status, url, body);
    Err(Error::HttpStatus {
        status: status.as_u16(),
        url,
        body,
    })
}

async fn file_part(path: &Path) -> Result<Part, Error> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidParameters(format!("not a file path: {}", path.display())))?;
    let length = path.metadata()?.len();
    let mime = infer::get_from_path(path)?
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    let file = File::open(path).await?;
    let body = Body::wrap_stream(FramedRead::new(file, BytesCodec::new()));
    Ok(Part::stream_with_length(body, length)
        .file_name(file_name)
        .mime_str(mime)?)
}

impl AnnotationBackend for Client {
    async fn users(&self) -> Result<Vec<User>, Error> {
        Client::users(self).await
    }

    async fn create_task(&self, params: &TaskCreateParams) -> Result<TaskInfo, Error> {
        Client::create_task(self, params).await
    }

    async fn patch_task(&self, task_id: TaskId, patch: &AssigneePatch) -> Result<(), Error> {
        Client::patch_task(self, task_id, patch).await
    }

    async fn upload_media(
        &self,
        task_id: TaskId,
        paths: &[PathBuf],
        image_quality: u8,
    ) -> Result<(), Error> {
        Client::upload_media(self, task_id, paths, image_quality).await
    }

    async fn jobs(&self, task_id: TaskId) -> Result<Vec<JobInfo>, Error> {
        Client::jobs(self, task_id).await
    }

    async fn patch_job(&self, job_id: JobId, patch: &AssigneePatch) -> Result<(), Error> {
        Client::patch_job(self, job_id, patch).await
    }

    async fn task(&self, task_id: TaskId) -> Result<TaskInfo, Error> {
        Client::task(self, task_id).await
    }

    async fn annotations(&self, task_id: TaskId) -> Result<AnnotationPayload, Error> {
        Client::annotations(self, task_id).await
    }

    async fn put_annotations(
        &self,
        task_id: TaskId,
        payload: &AnnotationPayload,
    ) -> Result<AnnotationPayload, Error> {
        Client::put_annotations(self, task_id, payload).await
    }

    async fn data_meta(&self, task_id: TaskId) -> Result<DataMeta, Error> {
        Client::data_meta(self, task_id).await
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), Error> {
        Client::delete_task(self, task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn local_client() -> Client {
        let config = ConnectionConfig::new("localhost")
            .with_port(8080)
            .with_tls(false);
        Client::new(config).unwrap()
    }

    /// Serves every connection with the status `respond` picks for the
    /// request line, recording the request lines.
    async fn serve(respond: fn(&str) -> u16) -> (ConnectionConfig, Arc<Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(vec![]));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut head: Vec<u8> = vec![];
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let line = head.lines().next().unwrap_or_default().to_owned();
                let status = respond(&line);
                seen.lock().unwrap().push(line);

                let resp = match status {
                    204 => "HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n".to_owned(),
                    status => format!(
                        "HTTP/1.1 {} Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        status
                    ),
                };
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        let config = ConnectionConfig::new("127.0.0.1")
            .with_port(port)
            .with_tls(false);
        (config, requests)
    }

    #[test]
    fn test_endpoint_urls() {
        let client = local_client();
        assert_eq!(client.api_url(), "http://localhost:8080/api/v1");
        assert_eq!(
            client.endpoint("tasks/3/annotations"),
            "http://localhost:8080/api/v1/tasks/3/annotations"
        );
        assert_eq!(
            client.endpoint("/users"),
            "http://localhost:8080/api/v1/users"
        );
    }

    #[test]
    fn test_rejects_malformed_host() {
        let err = Client::new(ConnectionConfig::new("bad host")).unwrap_err();
        assert!(matches!(err, Error::UrlParseError(_)));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = ConnectionConfig::new("cvat.example.com").with_credentials("admin", "s3cret");
        let client = Client::new(config).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("https://cvat.example.com/api/v1"));
        assert!(!debug.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_delete_tasks_skips_missing_tasks() {
        let (config, requests) = serve(|line| {
            if line.starts_with("DELETE /api/v1/tasks/1 ") {
                404
            } else {
                204
            }
        })
        .await;
        let client = Client::new(config).unwrap();

        client
            .delete_tasks(&[TaskId::from(1), TaskId::from(2)])
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("DELETE /api/v1/tasks/2 "));
    }

    #[tokio::test]
    async fn test_delete_task_keeps_other_errors() {
        let (config, requests) = serve(|_| 500).await;
        let client = Client::new(config).unwrap();

        let err = client
            .delete_tasks(&[TaskId::from(1), TaskId::from(2)])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let result = Client::connect(ConnectionConfig::new("localhost")).await;
        assert!(matches!(result, Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_user_page_deserializes() {
        let page: Page<User> = serde_json::from_str(
            r#"{"count": 2, "next": null, "previous": null,
                "results": [{"id": 1, "username": "admin", "email": "a@b.c"},
                            {"id": 4, "username": "annotator"}]}"#,
        )
        .unwrap();
        assert!(page.next.is_none());
        assert_eq!(page.results[1].username, "annotator");
        assert_eq!(page.results[1].id.value(), 4);
    }
}
