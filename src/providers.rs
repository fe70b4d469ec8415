//! Compute provider interface used by the replicate action.
//!
//! A provider allocates an isolated sandbox for a child agent and can
//! request initial funding for it. The local provider backs both with the
//! filesystem so replication is exercisable without any external service.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("sandbox allocation failed: {0}")]
    Allocation(String),
    #[error("funding request failed: {0}")]
    Funding(String),
}

/// A provisioned sandbox for a child agent.
#[derive(Debug, Clone)]
pub struct SandboxAllocation {
    pub id: String,
    pub root_dir: PathBuf,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn allocate_sandbox(&self, name: &str) -> Result<SandboxAllocation, ProviderError>;

    /// Request funding for a child address. Returns a settlement reference.
    async fn request_funding(
        &self,
        address: &str,
        amount_usdc: &str,
    ) -> Result<String, ProviderError>;
}

/// Filesystem-backed provider: sandboxes are directories under
/// `<data_dir>/sandboxes` and funding requests settle instantly with a
/// synthetic reference.
pub struct LocalComputeProvider {
    base_dir: PathBuf,
}

impl LocalComputeProvider {
    pub fn new(data_dir: &Path) -> Self {
        LocalComputeProvider {
            base_dir: data_dir.join("sandboxes"),
        }
    }
}

#[async_trait]
impl ComputeProvider for LocalComputeProvider {
    async fn allocate_sandbox(&self, name: &str) -> Result<SandboxAllocation, ProviderError> {
        let id = format!("sbx-{}", uuid::Uuid::new_v4());
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        let root_dir = self.base_dir.join(format!("{}-{}", sanitized, id));
        std::fs::create_dir_all(&root_dir).map_err(|e| ProviderError::Allocation(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root_dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| ProviderError::Allocation(e.to_string()))?;
        }
        Ok(SandboxAllocation { id, root_dir })
    }

    async fn request_funding(
        &self,
        address: &str,
        amount_usdc: &str,
    ) -> Result<String, ProviderError> {
        log::info!(
            "[COMPUTE] local funding request of {} USDC for {}",
            amount_usdc,
            address
        );
        Ok(format!("local-fund-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_sandbox_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalComputeProvider::new(dir.path());
        let sandbox = provider.allocate_sandbox("aethernet child!").await.unwrap();
        assert!(sandbox.root_dir.is_dir());
        assert!(sandbox.id.starts_with("sbx-"));
        // Names are sanitized into the directory name.
        assert!(!sandbox.root_dir.to_string_lossy().contains('!'));
    }
}
