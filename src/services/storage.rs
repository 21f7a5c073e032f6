use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

const STORAGE_API_VERSION: &str = "2021-08-06";

/// Characters escaped inside a blob path ('/' stays literal)
const BLOB_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped inside a query parameter value
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'=')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One blob as reported by the container listing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Store `content` under `key`, reporting cumulative bytes through `on_progress`.
    /// The final callback always carries the full content length.
    async fn put_object(
        &self,
        key: &str,
        content: Bytes,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<()>;

    async fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<RemoteObject>>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Ok(None) when the blob does not exist
    async fn get_object(&self, key: &str) -> Result<Option<Bytes>>;

    async fn health_check(&self) -> bool;
}

/// Azure Blob Storage client speaking the REST API with SAS authentication.
///
/// Content up to `block_size` goes out as one Put Blob request; anything
/// larger is staged as blocks and committed with a block list, which is what
/// feeds intermediate progress callbacks.
pub struct AzureBlobStorage {
    client: reqwest::Client,
    endpoint: String,
    container: String,
    sas_token: String,
    block_size: usize,
}

impl AzureBlobStorage {
    pub fn new(endpoint: String, container: String, sas_token: String, block_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            container,
            sas_token: sas_token.trim_start_matches('?').to_string(),
            block_size: block_size.max(1),
        }
    }

    fn blob_url(&self, key: &str, extra_query: &str) -> String {
        let path = utf8_percent_encode(key, BLOB_PATH);
        if extra_query.is_empty() {
            format!(
                "{}/{}/{}?{}",
                self.endpoint, self.container, path, self.sas_token
            )
        } else {
            format!(
                "{}/{}/{}?{}&{}",
                self.endpoint, self.container, path, extra_query, self.sas_token
            )
        }
    }

    fn container_url(&self, query: &str) -> String {
        format!(
            "{}/{}?{}&{}",
            self.endpoint, self.container, query, self.sas_token
        )
    }

    async fn service_error(&self, operation: &str, response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_xml(&body);
        anyhow!(
            "Azure Blob {} failed ({}): {}",
            operation,
            code.unwrap_or_else(|| status.to_string()),
            message.unwrap_or_else(|| "no detail returned".to_string())
        )
    }

    async fn put_single(
        &self,
        key: &str,
        content: Bytes,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<()> {
        let total = content.len() as u64;

        let response = self
            .client
            .put(self.blob_url(key, ""))
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(self.service_error("Put Blob", response).await);
        }

        on_progress(total);
        Ok(())
    }

    async fn put_blocks(
        &self,
        key: &str,
        content: Bytes,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<()> {
        let mut block_ids = Vec::new();
        let mut staged = 0u64;

        for (index, chunk) in content.chunks(self.block_size).enumerate() {
            let id = block_id(index);
            let url = self.blob_url(
                key,
                &format!("comp=block&blockid={}", utf8_percent_encode(&id, QUERY_VALUE)),
            );

            let response = self
                .client
                .put(url)
                .header("x-ms-version", STORAGE_API_VERSION)
                .body(content.slice_ref(chunk))
                .send()
                .await?;

            if response.status() != StatusCode::CREATED {
                return Err(self.service_error("Put Block", response).await);
            }

            staged += chunk.len() as u64;
            on_progress(staged);
            block_ids.push(id);
        }

        let mut manifest = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
        for id in &block_ids {
            manifest.push_str("<Latest>");
            manifest.push_str(id);
            manifest.push_str("</Latest>");
        }
        manifest.push_str("</BlockList>");

        let response = self
            .client
            .put(self.blob_url(key, "comp=blocklist"))
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(CONTENT_TYPE, "application/xml")
            .body(manifest)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(self.service_error("Put Block List", response).await);
        }

        Ok(())
    }
}

#[async_trait]
impl StorageService for AzureBlobStorage {
    async fn put_object(
        &self,
        key: &str,
        content: Bytes,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<()> {
        if content.len() <= self.block_size {
            self.put_single(key, content, on_progress).await
        } else {
            self.put_blocks(key, content, on_progress).await
        }
    }

    async fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = String::from("restype=container&comp=list");
            if let Some(p) = prefix {
                query.push_str(&format!("&prefix={}", utf8_percent_encode(p, QUERY_VALUE)));
            }
            if let Some(m) = &marker {
                query.push_str(&format!("&marker={}", utf8_percent_encode(m, QUERY_VALUE)));
            }

            let response = self
                .client
                .get(self.container_url(&query))
                .header("x-ms-version", STORAGE_API_VERSION)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(self.service_error("List Blobs", response).await);
            }

            let xml = response.text().await?;
            let (page, next_marker) = parse_list_page(&xml)?;
            objects.extend(page);

            match next_marker {
                Some(m) if !m.is_empty() => marker = Some(m),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.blob_url(key, ""))
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(self.service_error("Delete Blob", response).await);
        }

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(self.blob_url(key, ""))
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(self.service_error("Get Blob", response).await),
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.container_url("restype=container"))
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Uniform-length block ids; Azure requires every id in a blob to match in size
fn block_id(index: usize) -> String {
    BASE64.encode(format!("{:08}", index))
}

fn parse_list_page(xml: &str) -> Result<(Vec<RemoteObject>, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut objects = Vec::new();
    let mut next_marker: Option<String> = None;

    let mut current_tag = String::new();
    let mut in_blob = false;
    let mut name = String::new();
    let mut size = 0u64;
    let mut last_modified: Option<DateTime<Utc>> = None;
    let mut content_type: Option<String> = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if current_tag == "Blob" {
                    in_blob = true;
                    name.clear();
                    size = 0;
                    last_modified = None;
                    content_type = None;
                }
            }
            Ok(Event::Text(e)) => {
                let txt = String::from_utf8_lossy(e.as_ref()).to_string();
                let txt = quick_xml::escape::unescape(&txt)
                    .map(|v| v.into_owned())
                    .unwrap_or(txt);

                if in_blob {
                    match current_tag.as_str() {
                        "Name" => name = txt,
                        "Last-Modified" => {
                            last_modified = DateTime::parse_from_rfc2822(&txt)
                                .ok()
                                .map(|dt| dt.with_timezone(&Utc));
                        }
                        "Content-Length" => size = txt.parse().unwrap_or(0),
                        "Content-Type" => {
                            if !txt.is_empty() {
                                content_type = Some(txt);
                            }
                        }
                        _ => {}
                    }
                } else if current_tag == "NextMarker" && !txt.is_empty() {
                    next_marker = Some(txt);
                }
            }
            Ok(Event::End(e)) => {
                if in_blob && e.name().as_ref() == b"Blob" {
                    in_blob = false;
                    if !name.is_empty() {
                        objects.push(RemoteObject {
                            key: std::mem::take(&mut name),
                            size,
                            last_modified: last_modified.take(),
                            content_type: content_type.take(),
                        });
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("Malformed blob listing XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok((objects, next_marker))
}

fn parse_error_xml(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut code = None;
    let mut message = None;
    let mut current_tag = String::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
            }
            Ok(Event::Text(e)) => {
                let txt = String::from_utf8_lossy(e.as_ref()).to_string();
                match current_tag.as_str() {
                    "Code" => code = Some(txt),
                    // Azure appends RequestId and Time on extra lines
                    "Message" => message = txt.lines().next().map(|line| line.trim().to_string()),
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (code, message)
}
