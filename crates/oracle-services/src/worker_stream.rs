//! Work RPC over a byte stream.
//!
//! One request, one response, per stream. The requester writes a JSON
//! `WorkRequest` and half-closes; the worker reads to EOF, runs the work,
//! writes a JSON `WorkResponse` and closes. Both sides read until EOF, so
//! a response may span any number of reads.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use oracle_core::wire::{PeerId, WorkRequest, WorkResponse};

use crate::dispatcher::execute_local;
use crate::handlers::WorkHandlerRegistry;
use crate::transport::{TransportError, WorkStream};

/// Largest message either side will buffer.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Read until EOF, failing once more than `limit` bytes arrive.
pub async fn read_to_end_capped<S>(stream: &mut S, limit: usize) -> Result<BytesMut, TransportError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        if buf.len() > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        buf.reserve(8 * 1024);
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(buf);
        }
    }
}

/// Requester side: send `request`, collect the single response. The stream
/// is consumed and dropped on every path.
pub async fn send_request(
    mut stream: Box<dyn WorkStream>,
    request: &WorkRequest,
) -> Result<WorkResponse, TransportError> {
    let bytes = request.to_bytes()?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;

    let raw = read_to_end_capped(&mut stream, MAX_MESSAGE_BYTES).await?;
    Ok(WorkResponse::from_slice(&raw)?)
}

/// Worker side: serve one inbound stream from `from`.
pub async fn handle_worker_stream(
    mut stream: Box<dyn WorkStream>,
    from: PeerId,
    self_id: PeerId,
    handlers: Arc<WorkHandlerRegistry>,
    worker_timeout: Duration,
) {
    let raw = match read_to_end_capped(&mut stream, MAX_MESSAGE_BYTES).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(peer = %from.short(), error = %e, "failed to read work request");
            return;
        }
    };

    let mut response = match WorkRequest::from_slice(&raw) {
        Ok(request) => {
            tracing::debug!(
                peer = %from.short(),
                work_type = %request.work_type,
                request_id = %request.request_id,
                "work request received"
            );
            match execute_local(&handlers, &request, worker_timeout).await {
                Ok(resp) => resp,
                Err(e) => WorkResponse::failed(e.to_string()),
            }
        }
        Err(e) => {
            tracing::warn!(peer = %from.short(), error = %e, "malformed work request");
            WorkResponse::failed(e.to_string())
        }
    };
    if !response.is_success() {
        tracing::warn!(peer = %from.short(), error = %response.error, "work failed for remote requester");
    }
    response.worker_peer_id = Some(self_id);

    let bytes = match response.to_bytes() {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode work response");
            return;
        }
    };
    if let Err(e) = stream.write_all(&bytes).await {
        tracing::warn!(peer = %from.short(), error = %e, "failed to write work response");
        return;
    }
    let _ = stream.shutdown().await;
}
