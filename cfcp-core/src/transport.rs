//! # transport: getting a file onto an application instance
//!
//! Two [`Transport`](crate::contract::Transport) implementations are provided:
//! - [`SshTransport`] talks SSH itself and drives a remote `scp -t` sink.
//! - [`ScpCommandTransport`] runs the system `scp` under `sshpass`, feeding the
//!   auth code through stdin.
//!
//! The SCP sink protocol used by [`SshTransport`] lives here so it can be
//! exercised against an in-memory stream.

mod scp;
mod ssh;

pub use scp::ScpCommandTransport;
pub use ssh::SshTransport;

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::TransferError;

/// Which transport the CLI should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,
    Scp,
}

/// Metadata announced in the `C` record of the sink protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl FileHeader {
    pub async fn for_path(path: &Path) -> Result<Self, TransferError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| TransferError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::Protocol(format!("{} has no file name", path.display())))?;
        Ok(Self {
            mode: file_mode(&meta),
            size: meta.len(),
            name,
        })
    }

    fn record(&self) -> String {
        format!("C{:04o} {} {}\n", self.mode, self.size, self.name)
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Push one file through a stream connected to a remote `scp -t <target>`.
///
/// The stream is shut down afterwards so the remote side sees EOF.
pub async fn send_file<S, R>(
    stream: S,
    header: &FileHeader,
    mut content: R,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut stream = BufReader::new(stream);
    read_ack(&mut stream).await?;

    write(&mut stream, header.record().as_bytes()).await?;
    read_ack(&mut stream).await?;

    let copied = tokio::io::copy(&mut (&mut content).take(header.size), stream.get_mut())
        .await
        .map_err(protocol_io)?;
    if copied != header.size {
        return Err(TransferError::Protocol(format!(
            "{} shrank while copying: sent {copied} of {} bytes",
            header.name, header.size
        )));
    }
    write(&mut stream, b"\0").await?;
    read_ack(&mut stream).await?;

    stream.get_mut().shutdown().await.map_err(protocol_io)?;
    Ok(())
}

async fn write<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    bytes: &[u8],
) -> Result<(), TransferError> {
    let inner = stream.get_mut();
    inner.write_all(bytes).await.map_err(protocol_io)?;
    inner.flush().await.map_err(protocol_io)
}

/// 0 is OK; 1 and 2 are followed by a message line.
async fn read_ack<S: AsyncRead + Unpin>(stream: &mut BufReader<S>) -> Result<(), TransferError> {
    let code = stream.read_u8().await.map_err(protocol_io)?;
    if code == 0 {
        return Ok(());
    }
    let mut message = String::new();
    stream.read_line(&mut message).await.map_err(protocol_io)?;
    let message = message.trim().to_owned();
    match code {
        1 | 2 => Err(TransferError::RemoteExit {
            status: u32::from(code),
            message,
        }),
        other => Err(TransferError::Protocol(format!(
            "unexpected acknowledgement byte {other:#04x}"
        ))),
    }
}

fn protocol_io(e: std::io::Error) -> TransferError {
    TransferError::Protocol(e.to_string())
}

/// Quote a remote path for the remote shell.
pub(crate) fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn header(size: u64) -> FileHeader {
        FileHeader {
            mode: 0o644,
            size,
            name: "app.properties".into(),
        }
    }

    /// Plays the remote `scp -t` side and returns what it received.
    async fn sink<S: AsyncRead + AsyncWrite + Unpin>(stream: S, reject_header: bool) -> (String, Vec<u8>) {
        let mut stream = BufReader::new(stream);
        stream.get_mut().write_all(b"\0").await.unwrap();
        let mut record = String::new();
        stream.read_line(&mut record).await.unwrap();
        if reject_header {
            stream
                .get_mut()
                .write_all(b"\x01scp: /nope: Permission denied\n")
                .await
                .unwrap();
            return (record, Vec::new());
        }
        stream.get_mut().write_all(b"\0").await.unwrap();
        let size: usize = record.split(' ').nth(1).unwrap().parse().unwrap();
        let mut body = vec![0u8; size + 1];
        if stream.read_exact(&mut body).await.is_err() {
            return (record, Vec::new());
        }
        stream.get_mut().write_all(b"\0").await.unwrap();
        (record, body)
    }

    #[tokio::test]
    async fn sends_header_payload_and_terminator() {
        let (client, server) = duplex(1024);
        let remote = tokio::spawn(sink(server, false));
        send_file(client, &header(5), &b"hello"[..]).await.expect("send should succeed");
        let (record, body) = remote.await.unwrap();
        assert_eq!(record, "C0644 5 app.properties\n");
        assert_eq!(body, b"hello\0");
    }

    #[tokio::test]
    async fn remote_rejection_is_surfaced_with_message() {
        let (client, server) = duplex(1024);
        let remote = tokio::spawn(sink(server, true));
        let err = send_file(client, &header(5), &b"hello"[..]).await.unwrap_err();
        remote.await.unwrap();
        match err {
            TransferError::RemoteExit { status, message } => {
                assert_eq!(status, 1);
                assert_eq!(message, "scp: /nope: Permission denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_content_is_a_protocol_error() {
        let (client, server) = duplex(1024);
        let _remote = tokio::spawn(sink(server, false));
        let err = send_file(client, &header(10), &b"hello"[..]).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)), "{err:?}");
    }

    #[tokio::test]
    async fn header_is_read_from_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let header = FileHeader::for_path(&path).await.unwrap();
        assert_eq!(header.size, 3);
        assert_eq!(header.name, "data.bin");
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("/tmp/it's"), r"'/tmp/it'\''s'");
    }
}
