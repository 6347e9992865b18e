//! Connection handler for the JSON-lines request protocol
//!
//! Each line read from the client is one [`GatewayRequest`]; each request is
//! answered with exactly one line:
//! ```text
//! {"code":200,"body":{"data":[{"id":1}]}}
//! ```

use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::gateway::{Envelope, Gateway, GatewayRequest, Response, Status};

/// Longest request line accepted
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// One response line
#[derive(Debug, Serialize)]
pub struct WireResponse<'a> {
    pub code: u16,
    pub body: &'a Envelope,
}

fn decode(line: &[u8]) -> Result<GatewayRequest, Response> {
    serde_json::from_slice(line).map_err(|e| {
        Response::new(
            Status::BadRequest,
            Envelope::message(format!("Bad request: {}", e)),
        )
    })
}

async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let wire = WireResponse {
        code: response.code(),
        body: &response.body,
    };
    let mut line = serde_json::to_vec(&wire).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

async fn serve(stream: TcpStream, gateway: &Gateway, connection_id: u32) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if line.len() > MAX_REQUEST_BYTES {
            let response = Response::new(
                Status::BadRequest,
                Envelope::message("Bad request: request line too long"),
            );
            write_response(&mut writer, &response).await?;
            return Ok(());
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match decode(&line) {
            Ok(request) => {
                debug!(connection_id, op = request.op(), "Request");
                gateway.handle(request).await
            }
            Err(response) => response,
        };
        write_response(&mut writer, &response).await?;
    }
}

/// Handle a client connection until it closes
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: u32,
    gateway: Gateway,
) {
    info!(%peer_addr, connection_id, "Client connected");

    if let Err(e) = serve(stream, &gateway, connection_id).await {
        error!(%peer_addr, connection_id, error = %e, "Connection error");
    }

    info!(%peer_addr, connection_id, "Client disconnected");
}
