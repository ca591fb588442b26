use anyhow::{anyhow, Result};
use imap_codec::imap_types::auth::AuthMechanism;
use imap_codec::imap_types::response::{Capability, Code, Data};

#[derive(Debug, Clone)]
pub struct ServerCapability {
    auth_plain: bool,
}

impl Default for ServerCapability {
    fn default() -> Self {
        Self { auth_plain: true }
    }
}

impl ServerCapability {
    pub fn to_vec(&self) -> Vec<Capability<'static>> {
        let mut acc = vec![Capability::Imap4Rev1];
        if self.auth_plain {
            acc.push(Capability::Auth(AuthMechanism::Plain));
        }
        acc
    }

    pub fn to_data(&self) -> Result<Data<'static>> {
        Ok(Data::Capability(
            self.to_vec()
                .try_into()
                .map_err(|_| anyhow!("empty capability list"))?,
        ))
    }

    /// `[CAPABILITY ...]` for the greeting.
    pub fn to_code(&self) -> Result<Code<'static>> {
        Ok(Code::Capability(
            self.to_vec()
                .try_into()
                .map_err(|_| anyhow!("empty capability list"))?,
        ))
    }
}
