pub mod capability;
pub mod command;
pub mod flags;
pub mod flow;
pub mod mail_view;
pub mod mailbox_view;
pub mod request;
pub mod response;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use imap_codec::imap_types::response::Status;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use letterbox_mail::mailstore::ArcMailstore;

use crate::imap::command::CommandRegistry;
use crate::imap::response::{continuation, encode_line, greeting, Body};
use crate::imap::session::Instance;

/// Longest literal accepted from a client, in bytes.
const MAX_LITERAL_SIZE: u32 = 32 * 1024 * 1024;
/// Longest command line, literals excluded.
const MAX_LINE_SIZE: usize = 64 * 1024;

/// Accepts IMAP connections and runs one [`Instance`] per connection.
pub struct Server {
    bind_addr: SocketAddr,
    idle_timeout: Duration,
    mailstore: ArcMailstore,
    registry: Arc<CommandRegistry>,
}

struct ClientContext {
    stream: TcpStream,
    addr: SocketAddr,
    idle_timeout: Duration,
    mailstore: ArcMailstore,
    registry: Arc<CommandRegistry>,
    must_exit: watch::Receiver<bool>,
}

pub fn new(bind_addr: SocketAddr, idle_timeout: Duration, mailstore: ArcMailstore) -> Server {
    Server {
        bind_addr,
        idle_timeout,
        mailstore,
        registry: Arc::new(CommandRegistry::imap4rev1()),
    }
}

impl Server {
    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("IMAP server listening on {:#}", self.bind_addr);

        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("IMAP: accepted connection from {}", remote_addr);

            let client = ClientContext {
                stream: socket,
                addr: remote_addr,
                idle_timeout: self.idle_timeout,
                mailstore: self.mailstore.clone(),
                registry: self.registry.clone(),
                must_exit: must_exit.clone(),
            };
            let conn = tokio::spawn(client_wrapper(client));
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("IMAP server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}

async fn client_wrapper(ctx: ClientContext) {
    let addr = ctx.addr;
    match client(ctx).await {
        Ok(()) => {
            tracing::info!("closing successful session for {:?}", addr);
        }
        Err(e) => {
            tracing::error!("closing errored session for {:?}: {}", addr, e);
        }
    }
}

enum Event {
    Line(Vec<u8>),
    Closed,
    Idle,
    Shutdown,
}

async fn client(mut ctx: ClientContext) -> Result<()> {
    let (read, mut write) = ctx.stream.into_split();
    let mut reader = BufReader::new(read);
    let mut session = Instance::new(ctx.registry, ctx.mailstore);

    write.write_all(&greeting(session.capabilities())?).await?;

    loop {
        let event = tokio::select! {
            res = tokio::time::timeout(ctx.idle_timeout, read_command(&mut reader, &mut write)) => {
                match res {
                    Err(_) => Event::Idle,
                    Ok(Ok(Some(line))) => Event::Line(line),
                    Ok(Ok(None)) => Event::Closed,
                    Ok(Err(e)) => return Err(e),
                }
            },
            _ = ctx.must_exit.changed() => Event::Shutdown,
        };

        let line = match event {
            Event::Line(line) => line,
            Event::Closed => break,
            Event::Idle => {
                tracing::info!(addr=%ctx.addr, "idle timeout");
                let bye = Status::bye(None, "Autologout; idle for too long")?;
                write.write_all(&encode_line(&Body::Status(bye))).await?;
                break;
            }
            Event::Shutdown => {
                let bye = Status::bye(None, "Server is being shutdown")?;
                write.write_all(&encode_line(&Body::Status(bye))).await?;
                break;
            }
        };
        tracing::trace!(addr=%ctx.addr, line=%String::from_utf8_lossy(&line).trim_end(), "recv");

        let response = session.command(&line).await?;
        for l in response.lines() {
            tracing::trace!(addr=%ctx.addr, line=%l, "send");
        }
        write.write_all(&response.encode()).await?;

        if session.is_logged_out() {
            break;
        }
    }

    write.shutdown().await?;
    Ok(())
}

/// Read one command line, inlining the literals it announces. `None` once
/// the client closed the connection, even in the middle of a line.
///
/// At most `MAX_LINE_SIZE` bytes outside of literals are buffered: a longer
/// line is an error, whether or not its end was received.
async fn read_command<R, W>(reader: &mut R, writer: &mut W) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = vec![];
    let mut literals = 0usize;
    loop {
        let budget = (MAX_LINE_SIZE + 1).saturating_sub(line.len() - literals);
        if (&mut *reader)
            .take(budget as u64)
            .read_until(b'\n', &mut line)
            .await?
            == 0
        {
            return Ok(None);
        }
        if line.len() - literals > MAX_LINE_SIZE {
            bail!("command line too long");
        }
        if !line.ends_with(b"\n") {
            return Ok(None);
        }

        let size = match request::literal_announcement(&line) {
            Some(size) => size,
            None => return Ok(Some(line)),
        };
        if size > MAX_LITERAL_SIZE {
            bail!("literal of {} bytes is too large", size);
        }
        writer
            .write_all(&encode_line(&continuation("Ready for literal data")?))
            .await?;
        writer.flush().await?;

        let start = line.len();
        line.resize(start + size as usize, 0);
        reader.read_exact(&mut line[start..]).await?;
        literals += size as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_command_with_literal() {
        let input = b"A1 LOGIN {4}\r\nuser pass\r\nA2 NOOP\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let mut out = vec![];

        let line = read_command(&mut reader, &mut out).await.unwrap().unwrap();
        assert_eq!(line, b"A1 LOGIN {4}\r\nuser pass\r\n".to_vec());
        assert_eq!(out, b"+ Ready for literal data\r\n".to_vec());

        let line = read_command(&mut reader, &mut out).await.unwrap().unwrap();
        assert_eq!(line, b"A2 NOOP\r\n".to_vec());

        assert!(read_command(&mut reader, &mut out).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_command_bounds_the_line() {
        // no line feed at all: reading stops at the limit
        let input = vec![b'a'; MAX_LINE_SIZE * 4];
        let mut reader = BufReader::new(&input[..]);
        let mut out = vec![];
        let err = read_command(&mut reader, &mut out).await.unwrap_err();
        assert_eq!(err.to_string(), "command line too long");

        // the limit leaves out literal data
        let mut input = format!("A1 APPEND INBOX {{{}}}\r\n", MAX_LINE_SIZE + 10).into_bytes();
        input.extend(vec![b'x'; MAX_LINE_SIZE + 10]);
        input.extend_from_slice(b"\r\n");
        let mut reader = BufReader::new(&input[..]);
        let line = read_command(&mut reader, &mut out).await.unwrap().unwrap();
        assert_eq!(line.len(), input.len());
    }

    #[tokio::test]
    async fn test_read_command_unterminated_line() {
        let input = b"A1 NOOP".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let mut out = vec![];
        assert!(read_command(&mut reader, &mut out).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_command_rejects_huge_literal() {
        let input = b"A1 APPEND INBOX {4294967295}\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let mut out = vec![];
        assert!(read_command(&mut reader, &mut out).await.is_err());
        assert!(out.is_empty());
    }
}
