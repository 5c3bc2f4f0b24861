//! Calls the master issues to chunkservers
//!
//! Only two operations are needed: materialize an empty chunk, and push a full copy of a
//! chunk to another server. Both are `POST http://<server>/rpc` with a [`ChunkServerRequest`].

use crate::common::{ChunkHandle, ChunkServerRequest, Error, Result, ServerAddress};
use std::future::Future;
use std::time::Duration;

/// Storage-node RPC contract the coordinator depends on
pub trait ChunkServerClient: Send + Sync + 'static {
    /// Ask `server` to create an empty chunk `handle`
    fn create_chunk(
        &self,
        server: &ServerAddress,
        handle: ChunkHandle,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Ask `source` to copy chunk `handle` to `destination`
    fn send_copy(
        &self,
        source: &ServerAddress,
        handle: ChunkHandle,
        destination: &ServerAddress,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// JSON-over-HTTP chunkserver client
#[derive(Clone)]
pub struct HttpChunkServerClient {
    http: reqwest::Client,
}

impl HttpChunkServerClient {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn call(&self, server: &ServerAddress, request: &ChunkServerRequest) -> Result<()> {
        let url = format!("http://{}/rpc", server);
        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::downstream(server, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::downstream(server, format!("{}: {}", status, body.trim())))
    }
}

impl ChunkServerClient for HttpChunkServerClient {
    async fn create_chunk(&self, server: &ServerAddress, handle: ChunkHandle) -> Result<()> {
        tracing::debug!(%server, %handle, "CreateChunk");
        self.call(server, &ChunkServerRequest::CreateChunk { handle })
            .await
    }

    async fn send_copy(
        &self,
        source: &ServerAddress,
        handle: ChunkHandle,
        destination: &ServerAddress,
    ) -> Result<()> {
        tracing::debug!(%source, %handle, %destination, "SendCopy");
        self.call(
            source,
            &ChunkServerRequest::SendCopy {
                handle,
                destination: destination.clone(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_downstream_failure() {
        let client = HttpChunkServerClient::new(Duration::from_millis(200)).unwrap();
        // nothing listens on port 1 of localhost
        let err = client
            .create_chunk(&ServerAddress::from("127.0.0.1:1"), ChunkHandle(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownstreamFailure { .. }));
        assert!(err.is_retryable());
    }
}
