use crate::dht::data::{Block, Metadata};
use crate::fs::{FileSystem, FsError};
use crate::serial;
use orbit::choose;
use orbit::logging;
use orbit::time::timestamp_millis;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// File suffix for serialized blocks.
pub const BLOCK_SUFFIX: &str = "gblock";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// A parsed `<feature><op><number>` expression.
struct Predicate {
    feature: String,
    op: Op,
    value: f64,
}

impl Predicate {
    fn parse(expression: &str) -> Result<Predicate, FsError> {
        const OPS: [(&str, Op); 6] = [
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("!=", Op::Ne),
            ("<", Op::Lt),
            (">", Op::Gt),
            ("=", Op::Eq),
        ];

        for (pattern, op) in &OPS {
            if let Some(split) = expression.find(pattern) {
                let feature = expression[..split].trim();
                let value = expression[split + pattern.len()..].trim();

                if feature.is_empty() {
                    return Err(FsError::BadQuery(expression.to_string()));
                }

                let value: f64 = value
                    .parse()
                    .map_err(|_| FsError::BadQuery(expression.to_string()))?;

                return Ok(Predicate {
                    feature: feature.to_string(),
                    op: *op,
                    value,
                });
            }
        }

        Err(FsError::BadQuery(expression.to_string()))
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        let observed = match metadata.feature(&self.feature) {
            Some(value) => value,
            None => return false,
        };

        match self.op {
            Op::Lt => observed < self.value,
            Op::Le => observed <= self.value,
            Op::Gt => observed > self.value,
            Op::Ge => observed >= self.value,
            Op::Eq => (observed - self.value).abs() < f64::EPSILON,
            Op::Ne => (observed - self.value).abs() >= f64::EPSILON,
        }
    }
}

/// On-disk block storage with an in-memory metadata index. Blocks land under
/// the storage root as `*.gblock` files; recovery rescans the root and
/// rebuilds the index. Read-only mode is entered automatically when the root
/// lacks write permission.
pub struct DiskFs {
    root: PathBuf,
    read_only: bool,
    index: Mutex<Vec<(PathBuf, Metadata)>>,
    sequence: AtomicU64,
    log: logging::Logger,
}

impl DiskFs {
    pub fn open<P: Into<PathBuf>>(root: P, log: &logging::Logger) -> Result<DiskFs, FsError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let read_only = fs::metadata(&root)?.permissions().readonly();

        let disk = DiskFs {
            root,
            read_only,
            index: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            log: log.new(logging::o!()),
        };

        disk.recover()?;

        logging::info!(disk.log, "storage opened";
                       "root" => %disk.root.display(),
                       "read_only" => disk.read_only,
                       "blocks" => disk.index.lock().expect("Lock poisoned").len());

        Ok(disk)
    }

    /// Rebuilds the metadata index from the block files under the root.
    fn recover(&self) -> Result<(), FsError> {
        let mut found = Vec::new();
        Self::scan(&self.root, &mut found)?;

        let mut index = self.index.lock().expect("Lock poisoned");

        for path in found {
            match self.read_block(&path) {
                Ok(block) => index.push((path, block.metadata)),
                Err(err) => {
                    logging::warn!(self.log, "skipping unreadable block";
                                   "path" => %path.display(),
                                   "error" => %err);
                }
            }
        }

        Ok(())
    }

    fn scan(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), FsError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::scan(&path, found)?;
            } else if path.extension().map_or(false, |ext| ext == BLOCK_SUFFIX) {
                found.push(path);
            }
        }

        Ok(())
    }

    fn read_block(&self, path: &Path) -> Result<Block, FsError> {
        let data = fs::read(path)?;

        serial::from_bytes(&data).map_err(|_| FsError::Corrupt(path.display().to_string()))
    }

    fn block_file_name(&self, block: &Block) -> String {
        let safe: String = block
            .metadata
            .name
            .chars()
            .map(|chr| choose!(chr.is_ascii_alphanumeric() || chr == '-' || chr == '_' => chr, '-'))
            .collect();

        format!(
            "{}-{}-{}.{}",
            safe,
            timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed),
            BLOCK_SUFFIX
        )
    }
}

impl FileSystem for DiskFs {
    fn store_block(&self, block: &Block) -> Result<PathBuf, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }

        let path = self.root.join(self.block_file_name(block));
        let data = serial::to_bytes(block)
            .map_err(|err| FsError::Corrupt(format!("serialization failed: {:?}", err)))?;

        fs::write(&path, &data)?;

        self.index
            .lock()
            .expect("Lock poisoned")
            .push((path.clone(), block.metadata.clone()));

        logging::debug!(self.log, "block stored";
                        "path" => %path.display(),
                        "bytes" => data.len());

        Ok(path)
    }

    fn query(&self, expression: &str) -> Result<Vec<Metadata>, FsError> {
        let predicate = Predicate::parse(expression)?;

        let index = self.index.lock().expect("Lock poisoned");
        let results = index
            .iter()
            .filter(|(_, metadata)| predicate.matches(metadata))
            .map(|(_, metadata)| metadata.clone())
            .collect();

        Ok(results)
    }

    fn load_metadata(&self, path: &Path) -> Result<Metadata, FsError> {
        Ok(self.read_block(path)?.metadata)
    }

    fn load_block(&self, path: &Path) -> Result<Block, FsError> {
        self.read_block(path)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn shutdown(&self) {
        logging::info!(self.log, "storage shut down"; "root" => %self.root.display());
    }
}
