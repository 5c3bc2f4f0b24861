//! Typed client for the master's RPC surface

use crate::common::{
    ChunkHandle, Error, ErrorBody, FileInfo, HeartbeatArgs, LeaseInfo, MasterRequest,
    MasterResponse, PathEntry, Result, ServerAddress,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base: String,
}

fn unexpected(method: &str, response: MasterResponse) -> Error {
    Error::Internal(format!("unexpected reply to {}: {:?}", method, response))
}

impl MasterClient {
    /// `addr` is `host:port` or a full `http://` URL
    pub fn new(addr: &str) -> Result<Self> {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Send one request; an error reply becomes [`Error::Remote`]
    pub async fn call(&self, request: &MasterRequest) -> Result<MasterResponse> {
        let resp = self
            .http
            .post(format!("{}/rpc", self.base))
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(body.into()),
            Err(_) => Err(Error::Internal(format!(
                "{} failed with status {}",
                request.method(),
                status
            ))),
        }
    }

    pub async fn heartbeat(&self, args: HeartbeatArgs) -> Result<()> {
        match self.call(&MasterRequest::Heartbeat(args)).await? {
            MasterResponse::Heartbeat => Ok(()),
            other => Err(unexpected("Heartbeat", other)),
        }
    }

    pub async fn get_primary_and_secondaries(&self, handle: ChunkHandle) -> Result<LeaseInfo> {
        match self
            .call(&MasterRequest::GetPrimaryAndSecondaries { handle })
            .await?
        {
            MasterResponse::GetPrimaryAndSecondaries(lease) => Ok(lease),
            other => Err(unexpected("GetPrimaryAndSecondaries", other)),
        }
    }

    pub async fn extend_lease(
        &self,
        handle: ChunkHandle,
        address: ServerAddress,
    ) -> Result<Option<DateTime<Utc>>> {
        match self
            .call(&MasterRequest::ExtendLease { handle, address })
            .await?
        {
            MasterResponse::ExtendLease { expire } => Ok(expire),
            other => Err(unexpected("ExtendLease", other)),
        }
    }

    pub async fn get_replicas(&self, handle: ChunkHandle) -> Result<Vec<ServerAddress>> {
        match self.call(&MasterRequest::GetReplicas { handle }).await? {
            MasterResponse::GetReplicas { locations } => Ok(locations),
            other => Err(unexpected("GetReplicas", other)),
        }
    }

    pub async fn create_file(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        match self.call(&MasterRequest::CreateFile { path }).await? {
            MasterResponse::CreateFile => Ok(()),
            other => Err(unexpected("CreateFile", other)),
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        match self.call(&MasterRequest::Mkdir { path }).await? {
            MasterResponse::Mkdir => Ok(()),
            other => Err(unexpected("Mkdir", other)),
        }
    }

    pub async fn list(&self, path: &str) -> Result<Vec<PathEntry>> {
        let path = path.to_string();
        match self.call(&MasterRequest::List { path }).await? {
            MasterResponse::List { entries } => Ok(entries),
            other => Err(unexpected("List", other)),
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        match self.call(&MasterRequest::Delete { path }).await? {
            MasterResponse::Delete => Ok(()),
            other => Err(unexpected("Delete", other)),
        }
    }

    pub async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let path = path.to_string();
        match self.call(&MasterRequest::GetFileInfo { path }).await? {
            MasterResponse::GetFileInfo(info) => Ok(info),
            other => Err(unexpected("GetFileInfo", other)),
        }
    }

    pub async fn get_chunk_handle(&self, path: &str, index: u64) -> Result<ChunkHandle> {
        let path = path.to_string();
        match self
            .call(&MasterRequest::GetChunkHandle { path, index })
            .await?
        {
            MasterResponse::GetChunkHandle { handle } => Ok(handle),
            other => Err(unexpected("GetChunkHandle", other)),
        }
    }

    /// Raw `/admin/status` document
    pub async fn status(&self) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{}/admin/status", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}
