use orbit::env;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 5555;

#[derive(Serialize, Deserialize)]
pub struct Server {
    /// The name this node appears under in the overlay description.
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub max_write_queue_size: usize,
}

#[derive(Serialize, Deserialize)]
pub struct Query {
    pub deadline_secs: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Storage {
    /// Block storage root; falls back to `GALILEO_STORAGE_ROOT`.
    pub root: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct NodeConfig {
    pub server: Server,
    pub query: Query,
    pub storage: Storage,
}

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            server: Server {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
                pool_size: 4,
                max_write_queue_size: 64,
            },
            query: Query { deadline_secs: 30 },
            storage: Storage { root: None },
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NodeConfig {
        serdeconv::from_toml_file(path).expect("Error loading node configuration file")
    }

    /// The block storage root: config first, `GALILEO_STORAGE_ROOT` second,
    /// `storage/` under the installation root last.
    pub fn storage_root(&self) -> String {
        if let Some(root) = &self.storage.root {
            return root.clone();
        }

        let root = env::var_or(env::STORAGE_ROOT, "");
        if !root.is_empty() {
            return root;
        }

        let install = env::var_or(env::INSTALL_DIR, ".");
        Path::new(&install)
            .join("storage")
            .to_string_lossy()
            .into_owned()
    }
}
