//! HTTP access to a node's transfer endpoints.

use crate::{ClientConfig, ClientError, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, SET_COOKIE};
use reqwest::{Client, Response};
use std::io::Write;
use tably_protocol::protocol::{
    self, parse_acks, parse_advertisement, parse_receive_pack_reply, ReceivePackReply,
};
use tably_protocol::{ProtocolError, UploadPackReply, UploadPackTransport};
use tably_storage::Sum;

/// Client for one remote node.
#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: String,
    config: ClientConfig,
}

impl RemoteClient {
    /// Creates a client for the node at `base_url`.
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches the node's ref advertisement.
    pub async fn list_refs(&self) -> Result<Vec<(String, Sum)>> {
        let response = self
            .http
            .get(format!("{}/info/refs/", self.base_url))
            .send()
            .await?;
        let body = success(response).await?.bytes().await?;
        let refs = parse_advertisement(body.as_ref())?;
        tracing::debug!(refs = refs.len(), remote = %self.base_url, "Read ref advertisement");
        Ok(refs)
    }

    /// Starts an upload-pack conversation. Each conversation keeps its own
    /// session cookie.
    pub fn upload_pack(&self) -> HttpUploadPack<'_> {
        HttpUploadPack {
            remote: self,
            cookie: None,
        }
    }

    /// Sends one receive-pack request, gzip-compressed.
    ///
    /// `cookie` carries the session id between requests and is cleared
    /// when the node finishes the session.
    pub async fn receive_pack(
        &self,
        body: &[u8],
        cookie: &mut Option<String>,
    ) -> Result<ReceivePackReply> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(body)?;
        let compressed = encoder.finish()?;

        let mut request = self
            .http
            .post(format!("{}/receive-pack/", self.base_url))
            .header(CONTENT_TYPE, protocol::RECEIVE_PACK_REQUEST)
            .header(CONTENT_ENCODING, "gzip")
            .body(compressed);
        if let Some(id) = cookie.as_deref() {
            request = request.header(
                reqwest::header::COOKIE,
                format!("{}={}", protocol::RECEIVE_PACK_COOKIE, id),
            );
        }

        let response = success(request.send().await?).await?;
        *cookie = session_cookie(response.headers(), protocol::RECEIVE_PACK_COOKIE);
        let body = response.bytes().await?;
        Ok(parse_receive_pack_reply(body.as_ref())?)
    }
}

/// Fails with [`ClientError::Status`] unless the response succeeded.
async fn success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Extracts a session id from `Set-Cookie` headers. A cleared cookie
/// (empty value or `Max-Age=0`) yields `None`.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let mut attrs = cookie.split(';').map(str::trim);
            let (key, value) = attrs.next()?.split_once('=')?;
            if key != name || value.is_empty() {
                return None;
            }
            let cleared = attrs.any(|attr| attr.eq_ignore_ascii_case("max-age=0"));
            (!cleared).then(|| value.to_string())
        })
}

/// Upload-pack transport over HTTP that threads the session cookie.
pub struct HttpUploadPack<'a> {
    remote: &'a RemoteClient,
    cookie: Option<String>,
}

impl HttpUploadPack<'_> {
    /// The current session id, if the node handed one out.
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    async fn send(&mut self, body: Vec<u8>) -> Result<UploadPackReply> {
        let mut request = self
            .remote
            .http
            .post(format!("{}/upload-pack/", self.remote.base_url))
            .header(CONTENT_TYPE, protocol::UPLOAD_PACK_REQUEST)
            .body(body);
        if let Some(id) = self.cookie.as_deref() {
            request = request.header(
                reqwest::header::COOKIE,
                format!("{}={}", protocol::UPLOAD_PACK_COOKIE, id),
            );
        }

        let response = success(request.send().await?).await?;
        self.cookie = session_cookie(response.headers(), protocol::UPLOAD_PACK_COOKIE);
        let is_packfile = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(protocol::PACKFILE));
        let more = response
            .headers()
            .get(protocol::PACKFILE_MORE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let body = response.bytes().await?;

        if is_packfile {
            Ok(UploadPackReply::Packfile {
                data: body.to_vec(),
                more,
            })
        } else {
            Ok(UploadPackReply::Acks(parse_acks(body.as_ref())?))
        }
    }
}

#[async_trait]
impl<'a> UploadPackTransport for HttpUploadPack<'a> {
    async fn upload_pack(&mut self, body: Vec<u8>) -> tably_protocol::Result<UploadPackReply> {
        self.send(body).await.map_err(|e| match e {
            ClientError::Protocol(e) => e,
            other => ProtocolError::Io(std::io::Error::other(other.to_string())),
        })
    }
}
