use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::fs;

const NODE_DATA_FILE: &str = "node_data.json";

/// On-disk schema of `node_data.json`. The node id is the only state the
/// node ever persists.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct NodeData {
    node_id: Option<u64>,
}

/// Write-once store for the ledger-assigned node identity. The file is
/// created at registration and never rewritten or deleted afterwards; a
/// node that finds an id here must not re-register.
pub struct NodeDataStore {
    path: PathBuf,
    data: NodeData,
}

impl NodeDataStore {
    /// Open the store under `data_dir`, creating the directory if needed
    /// and loading any previously assigned identity.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)
                .await
                .with_context(|| format!("creating data directory {}", data_dir.display()))?;
            info!("Created data directory: {}", data_dir.display());
        }

        let path = data_dir.join(NODE_DATA_FILE);
        let data = if path.exists() {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            NodeData::default()
        };

        if let Some(id) = data.node_id {
            debug!("Loaded cached node id {id} from {}", path.display());
        }

        Ok(Self { path, data })
    }

    pub fn node_id(&self) -> Option<u64> {
        self.data.node_id
    }

    /// Persist the identity returned by registration. A second assignment
    /// for the same store is a protocol violation and is refused.
    pub async fn record_node_id(&mut self, node_id: u64) -> Result<()> {
        if let Some(existing) = self.data.node_id {
            bail!("node id already recorded as {existing}; refusing to overwrite with {node_id}");
        }

        self.data.node_id = Some(node_id);
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        info!("Saved node id {node_id} to {}", self.path.display());
        Ok(())
    }
}
