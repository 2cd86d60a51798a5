use crate::bridge::api::MailApi;
use crate::bridge::imap::ImapSession;
use crate::bridge::uid_store::UidStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

/// State shared by every IMAP connection
pub struct BridgeContext {
    pub api: Arc<dyn MailApi>,
    pub uid_store: Arc<UidStore>,
    /// Name shown in the greeting and BYE
    pub server_name: String,
}

impl BridgeContext {
    fn session(&self) -> ImapSession {
        ImapSession::new(self.api.clone(), self.uid_store.clone(), &self.server_name)
    }
}

/// Accept IMAP connections forever, one task per connection
pub async fn run_imap_listener(listener: TcpListener, ctx: Arc<BridgeContext>) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("IMAP listener started on {}", addr);
    }

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept IMAP connection: {}", e);
                continue;
            }
        };
        tracing::debug!("New IMAP connection from {}", addr);

        let ctx = ctx.clone();
        let span = tracing::info_span!("imap", peer = %addr);
        tokio::spawn(
            async move {
                if let Err(e) = handle_imap_connection(socket, addr, &ctx).await {
                    tracing::debug!("Connection ended with error: {}", e);
                }
            }
            .instrument(span),
        );
    }
}

/// Drive one connection: greeting, then read/process/write until the
/// client logs out or goes away
async fn handle_imap_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    ctx: &BridgeContext,
) -> std::io::Result<()> {
    let mut session = ctx.session();
    socket.write_all(&session.greeting()).await?;

    let mut buf = vec![0u8; 8192];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let (response, close) = session.process_input(&buf[..n]).await;
        if !response.is_empty() {
            socket.write_all(&response).await?;
        }
        if close {
            break;
        }
    }

    tracing::debug!("IMAP connection from {} closed", addr);
    Ok(())
}
