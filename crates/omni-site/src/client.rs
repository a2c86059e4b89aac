//! Typed HTTP client for the hub API.

use std::time::Duration;

use omni_proto::{
    ActionDone, CanonicalXmlRequest, CanonicalXmlResponse, ClaimRequest, ContentCommand,
    ContentCommandAck, ErrorBody, HashCheckRequest, HashCheckResponse, HeartbeatRequest,
    InventoryReport, PendingTransfer, RegisterTorrentRequest, RegisterTorrentResponse,
    RegistrationRequest, RegistrationResponse, ServerAction, StatusReport, TransferCommand,
    TransferCommandAck,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{SiteError, SiteResult};

/// Header carrying the server row identifier.
const HEADER_SERVER_ID: &str = "x-server-id";
/// Header carrying the MAC address.
const HEADER_MAC_ADDRESS: &str = "x-mac-address";

/// Default request timeout; metadata batches get a longer one.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for bulk metadata endpoints (inventory, registration blobs).
const BATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed client for the hub API, carrying the site's identity headers.
#[derive(Clone)]
pub struct HubClient {
    client: Client,
    base_url: String,
    mac: String,
    server_id: Option<Uuid>,
}

impl HubClient {
    /// Build a client for the given hub base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(base_url: &str, mac: &str) -> SiteResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| SiteError::Http {
                operation: "client.build",
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mac: mac.to_string(),
            server_id: None,
        })
    }

    /// Record the server id assigned at registration; subsequent calls
    /// authenticate with it.
    pub fn set_server_id(&mut self, server_id: Uuid) {
        self.server_id = Some(server_id);
    }

    /// The server id, once registered.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::NotReady`] before registration.
    pub fn server_id(&self) -> SiteResult<Uuid> {
        self.server_id.ok_or(SiteError::NotReady {
            reason: "not_registered",
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn identified(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(HEADER_MAC_ADDRESS, &self.mac);
        match self.server_id {
            Some(id) => builder.header(HEADER_SERVER_ID, id.to_string()),
            None => builder,
        }
    }

    async fn expect_json<T: DeserializeOwned>(
        operation: &'static str,
        url: String,
        result: Result<Response, reqwest::Error>,
    ) -> SiteResult<T> {
        let response = result.map_err(|source| SiteError::Http {
            operation,
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|source| SiteError::Http {
                operation,
                url,
                source,
            });
        }
        Err(refusal(operation, status, response).await)
    }

    async fn expect_ok(
        operation: &'static str,
        url: String,
        result: Result<Response, reqwest::Error>,
    ) -> SiteResult<()> {
        let response = result.map_err(|source| SiteError::Http {
            operation,
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(refusal(operation, status, response).await)
    }

    /// `POST /api/v1/servers/register`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> SiteResult<RegistrationResponse> {
        let url = self.url("/api/v1/servers/register");
        let result = self
            .client
            .post(&url)
            .timeout(BATCH_TIMEOUT)
            .json(request)
            .send()
            .await;
        Self::expect_json("register", url, result).await
    }

    /// `POST /api/v1/servers/{id}/heartbeat`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn heartbeat(&self, body: &HeartbeatRequest) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/heartbeat"));
        let result = self.identified(self.client.post(&url)).json(body).send().await;
        Self::expect_ok("heartbeat", url, result).await
    }

    /// `GET /api/v1/servers/{id}/auth-status`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn auth_status(&self) -> SiteResult<bool> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/auth-status"));
        let result = self.identified(self.client.get(&url)).send().await;
        let value: serde_json::Value = Self::expect_json("auth_status", url, result).await?;
        Ok(value
            .get("is_authorized")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    /// `POST /api/v1/servers/{id}/inventory`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn post_inventory(&self, report: &InventoryReport) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/inventory"));
        let result = self
            .identified(self.client.post(&url))
            .timeout(BATCH_TIMEOUT)
            .json(report)
            .send()
            .await;
        Self::expect_ok("post_inventory", url, result).await
    }

    /// `POST /api/v1/servers/{id}/torrent-status`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn post_report(&self, report: &StatusReport) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/torrent-status"));
        let result = self.identified(self.client.post(&url)).json(report).send().await;
        Self::expect_ok("post_report", url, result).await
    }

    /// `POST /api/v1/servers/{id}/hash-check`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn hash_check(&self, request: &HashCheckRequest) -> SiteResult<HashCheckResponse> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/hash-check"));
        let result = self.identified(self.client.post(&url)).json(request).send().await;
        Self::expect_json("hash_check", url, result).await
    }

    /// `POST /api/v1/servers/{id}/torrent-queue/claim`; a lost race
    /// surfaces as a conflict error.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal (409 on loss).
    pub async fn claim_generation(&self, package_id: Uuid) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/torrent-queue/claim"));
        let result = self
            .identified(self.client.post(&url))
            .json(&ClaimRequest { package_id })
            .send()
            .await;
        Self::expect_ok("claim_generation", url, result).await
    }

    /// `POST /api/v1/torrents`: torrent registration.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn register_torrent(
        &self,
        request: &RegisterTorrentRequest,
    ) -> SiteResult<RegisterTorrentResponse> {
        let url = self.url("/api/v1/torrents");
        let result = self
            .identified(self.client.post(&url))
            .timeout(BATCH_TIMEOUT)
            .json(request)
            .send()
            .await;
        Self::expect_json("register_torrent", url, result).await
    }

    /// `GET /api/v1/torrents/{info_hash}/file`: announce already
    /// rewritten for this hub.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn fetch_torrent_file(&self, info_hash: &str) -> SiteResult<Vec<u8>> {
        let url = self.url(&format!("/api/v1/torrents/{info_hash}/file"));
        let result = self.identified(self.client.get(&url)).send().await;
        let response = result.map_err(|source| SiteError::Http {
            operation: "fetch_torrent_file",
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(refusal("fetch_torrent_file", status, response).await);
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|source| SiteError::Http {
                operation: "fetch_torrent_file",
                url,
                source,
            })
    }

    /// `POST /api/v1/servers/{id}/canonical-xml`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn canonical_xml(&self, cpl_uuid: Uuid) -> SiteResult<CanonicalXmlResponse> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/canonical-xml"));
        let result = self
            .identified(self.client.post(&url))
            .timeout(BATCH_TIMEOUT)
            .json(&CanonicalXmlRequest { cpl_uuid })
            .send()
            .await;
        Self::expect_json("canonical_xml", url, result).await
    }

    /// `GET /api/v1/servers/{id}/pending-action`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn pending_action(&self) -> SiteResult<Option<ServerAction>> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/pending-action"));
        let result = self.identified(self.client.get(&url)).send().await;
        Self::expect_json("pending_action", url, result).await
    }

    /// `GET /api/v1/servers/{id}/pending-transfers`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn pending_transfers(&self) -> SiteResult<Vec<PendingTransfer>> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/pending-transfers"));
        let result = self.identified(self.client.get(&url)).send().await;
        Self::expect_json("pending_transfers", url, result).await
    }

    /// `GET /api/v1/servers/{id}/transfer-commands`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn transfer_commands(&self) -> SiteResult<Vec<TransferCommand>> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/transfer-commands"));
        let result = self.identified(self.client.get(&url)).send().await;
        Self::expect_json("transfer_commands", url, result).await
    }

    /// `GET /api/v1/servers/{id}/content-commands`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn content_commands(&self) -> SiteResult<Vec<ContentCommand>> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/content-commands"));
        let result = self.identified(self.client.get(&url)).send().await;
        Self::expect_json("content_commands", url, result).await
    }

    /// `POST /api/v1/servers/{id}/transfer-command-ack`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn ack_transfer_command(&self, ack: &TransferCommandAck) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/transfer-command-ack"));
        let result = self.identified(self.client.post(&url)).json(ack).send().await;
        Self::expect_ok("ack_transfer_command", url, result).await
    }

    /// `POST /api/v1/servers/{id}/content-command-ack`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn ack_content_command(&self, ack: &ContentCommandAck) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/content-command-ack"));
        let result = self.identified(self.client.post(&url)).json(ack).send().await;
        Self::expect_ok("ack_content_command", url, result).await
    }

    /// `POST /api/v1/servers/{id}/action-done`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or refusal.
    pub async fn action_done(&self, done: &ActionDone) -> SiteResult<()> {
        let id = self.server_id()?;
        let url = self.url(&format!("/api/v1/servers/{id}/action-done"));
        let result = self.identified(self.client.post(&url)).json(done).send().await;
        Self::expect_ok("action_done", url, result).await
    }
}

async fn refusal(operation: &'static str, status: StatusCode, response: Response) -> SiteError {
    let body: Option<ErrorBody> = response.json().await.ok();
    SiteError::HubStatus {
        operation,
        status: status.as_u16(),
        error: body.as_ref().map(|b| b.error.clone()),
        message: body.map(|b| b.message),
    }
}
