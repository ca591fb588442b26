use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use letterbox_mail::loader::load_tree;
use letterbox_mail::memory::{MemUser, MemoryMailstore};
use letterbox_proto::imap;

use crate::config::{Config, StorageDriver, UserList};

pub struct Server {
    imap_server: imap::Server,
}

impl Server {
    pub async fn from_config(config: Config) -> Result<Self> {
        let mailstore = build_mailstore(config.users).await?;
        Ok(Self {
            imap_server: imap::new(
                config.imap.bind_addr,
                Duration::from_secs(config.imap.idle_timeout),
                Arc::new(mailstore),
            ),
        })
    }

    /// Local listener with the demo account, for development only.
    pub async fn dev() -> Result<Self> {
        let mailstore = MemoryMailstore::demo().await?;
        Ok(Self {
            imap_server: imap::new(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1143),
                Duration::from_secs(30 * 60),
                Arc::new(mailstore),
            ),
        })
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting Letterbox...");

        let (exit_signal, _provoke_exit) = watch_ctrl_c();
        self.imap_server.run(exit_signal).await?;

        tracing::info!("Server exiting");
        Ok(())
    }
}

async fn build_mailstore(users: UserList) -> Result<MemoryMailstore> {
    let mut store = MemoryMailstore::new();
    for (username, entry) in users {
        let mut user = MemUser::new(username.as_str());
        match &entry.storage {
            StorageDriver::Filesystem(fs) => {
                let count = load_tree(&mut user, &fs.root).await?;
                tracing::info!(user=%username, root=%fs.root.display(), count, "storage.filesystem");
            }
            StorageDriver::InMemory => {
                tracing::info!(user=%username, "storage.memory");
            }
        }
        store.add_user(user, entry.password);
    }
    Ok(store)
}

pub fn watch_ctrl_c() -> (watch::Receiver<bool>, Arc<watch::Sender<bool>>) {
    let (send_cancel, watch_cancel) = watch::channel(false);
    let send_cancel = Arc::new(send_cancel);
    let send_cancel_2 = send_cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install CTRL+C signal handler: {}", e);
            return;
        }
        tracing::info!("Received CTRL+C, shutting down.");
        let _ = send_cancel.send(true);
    });
    (watch_cancel, send_cancel_2)
}
