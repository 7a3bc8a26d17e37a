//! The identity store: every durable artifact of an issuance lives as a plain file in one work
//! directory.
//!
//! | File                    | Content                                   |
//! |-------------------------|-------------------------------------------|
//! | `account.key`           | PEM account private key                   |
//! | `order.uri`             | order location, plain text                |
//! | `<top>-key.pem`         | certificate private key, PEM              |
//! | `<top>-chain.pem`       | issued certificate chain, PEM             |
//! | `<top>.pfx`             | password-protected PKCS#12 archive        |
//! | `<top>.pfx.pass`        | password of the archive                   |
//!
//! `<top>` is the top domain of the order. Everything except the chain is written with mode
//! 0600 on Unix. The `.pfx.pass` file keeps the archive password next to the archive, so the
//! directory itself must be protected.

use crate::acme::client::AccountKey;
use crate::dns::name::DnsName;
use crate::error::{IssuanceError, IssueResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

mod lock;

pub use lock::WorkDirLock;

pub const ACCOUNT_KEY_FILE: &str = "account.key";
pub const ORDER_LOCATION_FILE: &str = "order.uri";

#[derive(Debug, Clone)]
pub struct IdentityStore {
    work_dir: PathBuf,
}

impl IdentityStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub async fn create_work_dir(&self) -> IssueResult<()> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| IssuanceError::storage(&self.work_dir, e))
    }

    pub fn account_key_path(&self) -> PathBuf {
        self.work_dir.join(ACCOUNT_KEY_FILE)
    }

    pub fn order_location_path(&self) -> PathBuf {
        self.work_dir.join(ORDER_LOCATION_FILE)
    }

    pub fn certificate_key_path(&self, top_domain: &DnsName) -> PathBuf {
        self.work_dir.join(format!("{}-key.pem", top_domain.as_ascii()))
    }

    pub fn chain_path(&self, top_domain: &DnsName) -> PathBuf {
        self.work_dir.join(format!("{}-chain.pem", top_domain.as_ascii()))
    }

    pub fn pfx_path(&self, top_domain: &DnsName) -> PathBuf {
        self.work_dir.join(format!("{}.pfx", top_domain.as_ascii()))
    }

    pub fn pfx_password_path(&self, top_domain: &DnsName) -> PathBuf {
        self.work_dir.join(format!("{}.pfx.pass", top_domain.as_ascii()))
    }

    pub async fn save_account_key(&self, key: &AccountKey) -> IssueResult<PathBuf> {
        let path = self.account_key_path();
        write_file(&path, key.as_pem().as_bytes(), Secrecy::Secret).await?;
        Ok(path)
    }

    pub async fn has_account_key(&self) -> IssueResult<bool> {
        let path = self.account_key_path();
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| IssuanceError::storage(&path, e))
    }

    pub async fn load_account_key(&self) -> IssueResult<AccountKey> {
        let path = self.account_key_path();
        let pem = read_to_string(&path, "account key").await?;
        AccountKey::from_pem(pem)
            .map_err(|e| IssuanceError::crypto("stored account key is unusable", e))
    }

    pub async fn save_order_location(&self, location: &Url) -> IssueResult<PathBuf> {
        let path = self.order_location_path();
        write_file(&path, location.as_str().as_bytes(), Secrecy::Public).await?;
        Ok(path)
    }

    /// The stored order location, or `None` if no order was stored yet.
    pub async fn load_order_location(&self) -> IssueResult<Option<Url>> {
        let path = self.order_location_path();
        let location = match read_to_string(&path, "order location").await {
            Ok(location) => location,
            Err(IssuanceError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Url::parse(location.trim()).map(Some).map_err(|e| {
            IssuanceError::Configuration(format!(
                "{} does not contain an order URL: {e}",
                path.display()
            ))
        })
    }

    pub async fn save_certificate_key(
        &self,
        top_domain: &DnsName,
        pem: &str,
    ) -> IssueResult<PathBuf> {
        let path = self.certificate_key_path(top_domain);
        write_file(&path, pem.as_bytes(), Secrecy::Secret).await?;
        Ok(path)
    }

    pub async fn load_certificate_key(&self, top_domain: &DnsName) -> IssueResult<String> {
        read_to_string(&self.certificate_key_path(top_domain), "certificate key").await
    }

    pub async fn save_chain(&self, top_domain: &DnsName, pem: &str) -> IssueResult<PathBuf> {
        let path = self.chain_path(top_domain);
        write_file(&path, pem.as_bytes(), Secrecy::Public).await?;
        Ok(path)
    }

    pub async fn save_pfx(&self, top_domain: &DnsName, der: &[u8]) -> IssueResult<PathBuf> {
        let path = self.pfx_path(top_domain);
        write_file(&path, der, Secrecy::Secret).await?;
        Ok(path)
    }

    pub async fn save_pfx_password(
        &self,
        top_domain: &DnsName,
        password: &str,
    ) -> IssueResult<PathBuf> {
        let path = self.pfx_password_path(top_domain);
        write_file(&path, password.as_bytes(), Secrecy::Secret).await?;
        Ok(path)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Secrecy {
    Public,
    Secret,
}

async fn read_to_string(path: &Path, what: &'static str) -> IssueResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => IssuanceError::NotFound {
                what,
                path: path.to_path_buf(),
            },
            _ => IssuanceError::storage(path, e),
        })
}

async fn write_file(path: &Path, content: &[u8], secrecy: Secrecy) -> IssueResult<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        if secrecy == Secrecy::Secret {
            options.mode(0o600);
        }
    }
    let mut file = options
        .open(path)
        .await
        .map_err(|e| IssuanceError::storage(path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| IssuanceError::storage(path, e))?;
    file.flush()
        .await
        .map_err(|e| IssuanceError::storage(path, e))?;
    // The mode only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if secrecy == Secrecy::Secret {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| IssuanceError::storage(path, e))?;
        }
    }
    debug!("Wrote {}", path.display());
    Ok(())
}
