use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub users: UserList,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapConfig {
    pub bind_addr: SocketAddr,
    /// Seconds of inactivity before a client is logged out.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

pub type UserList = HashMap<String, UserEntry>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserEntry {
    /// argon2 hash, see `letterbox tools password-hash`
    pub password: String,

    #[serde(flatten)]
    pub storage: StorageDriver,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "storage_driver")]
pub enum StorageDriver {
    Filesystem(FilesystemConfig),
    InMemory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FilesystemConfig {
    pub root: PathBuf,
}

pub fn read_config(config_file: PathBuf) -> Result<Config> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

fn default_idle_timeout() -> u64 {
    // RFC 3501 asks for at least 30 minutes
    30 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
[imap]
bind_addr = "[::1]:1143"

[users.alice]
password = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"
storage_driver = "Filesystem"
root = "/var/mail/alice"

[users.bob]
password = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"
storage_driver = "InMemory"
"#,
        )
        .unwrap();

        assert_eq!(config.imap.bind_addr.port(), 1143);
        assert_eq!(config.imap.idle_timeout, 1800);
        assert_eq!(
            config.users["alice"].storage,
            StorageDriver::Filesystem(FilesystemConfig {
                root: "/var/mail/alice".into()
            })
        );
        assert_eq!(config.users["bob"].storage, StorageDriver::InMemory);
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let res: Result<Config, _> = toml::from_str(
            r#"
[imap]
bind_addr = "127.0.0.1:1143"
idle_timeout = 60

[users.carol]
password = "x"
storage_driver = "Garage"
"#,
        );
        assert!(res.is_err());
    }
}
