//! Connection supervision for the MD5 pipeline variant: for each accepted
//! client, open the upstream connection, build a fresh `Pipeline`, and
//! run two read loops that feed it — one per direction — writing
//! whatever it produces straight to the matching socket. Grounded on
//! `original_source/app.py`'s `handle_client`/`on_read`.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::errors::ProxyError;
use crate::pipeline::PipelineOutput;
use crate::processors::{md5_pipeline, Md5AuthConfig};

/// Bytes read per socket read call. Messages can be larger than this;
/// the framer buffers across reads.
const READ_CHUNK: usize = 16384;

pub async fn run_md5_connection(
    client: TcpStream,
    upstream_address: SocketAddr,
    auth: Md5AuthConfig,
) -> Result<(), ProxyError> {
    let server = TcpStream::connect(upstream_address).await?;

    let (mut client_read, client_write) = client.into_split();
    let (mut server_read, server_write) = server.into_split();

    let client_write = Arc::new(Mutex::new(client_write));
    let server_write = Arc::new(Mutex::new(server_write));
    let pipeline = Arc::new(Mutex::new(md5_pipeline(auth)));

    let c2s = {
        let pipeline = pipeline.clone();
        let client_write = client_write.clone();
        let server_write = server_write.clone();
        async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = client_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                let output = {
                    let mut pipeline = pipeline.lock().await;
                    pipeline.c2s_from_outside(Bytes::copy_from_slice(&buf[..n]))?
                };
                write_output(&output, &client_write, &server_write).await?;
            }
            Ok::<(), ProxyError>(())
        }
    };

    let s2c = {
        let pipeline = pipeline.clone();
        let client_write = client_write.clone();
        let server_write = server_write.clone();
        async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = server_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                let output = {
                    let mut pipeline = pipeline.lock().await;
                    pipeline.s2c_from_outside(Bytes::copy_from_slice(&buf[..n]))?
                };
                write_output(&output, &client_write, &server_write).await?;
            }
            Ok::<(), ProxyError>(())
        }
    };

    let result = tokio::try_join!(c2s, s2c).map(|_| ());

    let _ = client_write.lock().await.shutdown().await;
    let _ = server_write.lock().await.shutdown().await;

    result
}

async fn write_output(
    output: &PipelineOutput,
    client_write: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    server_write: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
) -> Result<(), ProxyError> {
    if !output.to_server.is_empty() {
        let mut server_write = server_write.lock().await;
        for chunk in &output.to_server {
            server_write.write_all(chunk).await?;
        }
    }
    if !output.to_client.is_empty() {
        let mut client_write = client_write.lock().await;
        for chunk in &output.to_client {
            client_write.write_all(chunk).await?;
        }
    }
    Ok(())
}
