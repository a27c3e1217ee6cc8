use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

const DB_PATH_KEY: &str = "CATALOG_DB_PATH";
const BUSY_TIMEOUT_KEY: &str = "CATALOG_BUSY_TIMEOUT_MS";
const REQUEST_TIMEOUT_KEY: &str = "CATALOG_REQUEST_TIMEOUT_MS";
const SEED_DIR_KEY: &str = "CATALOG_SEED_DIR";

const KEYS: &[&str] = &[DB_PATH_KEY, BUSY_TIMEOUT_KEY, REQUEST_TIMEOUT_KEY, SEED_DIR_KEY];

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub db_path: PathBuf,
    /// How long a connection waits on a lock held by another connection.
    pub busy_timeout: Duration,
    /// How long a caller waits for the writer to answer.
    pub request_timeout: Duration,
    pub seed_dir: Option<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("portfolio.db"),
            busy_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            seed_dir: None,
        }
    }
}

impl CatalogConfig {
    /// Defaults, then the key file (if it exists), then the process
    /// environment. CLI flags are applied on top by the caller.
    pub fn load(env_file: &Path) -> Result<Self> {
        let mut config = Self::default();

        if env_file.exists() {
            config.apply_env_file(env_file)?;
            info!("Loaded catalog settings from {:?}", env_file);
        }

        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                config.apply(key, &value)?;
            }
        }
        Ok(config)
    }

    fn apply_env_file(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.apply(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            DB_PATH_KEY => self.db_path = PathBuf::from(value),
            BUSY_TIMEOUT_KEY => self.busy_timeout = parse_millis(key, value)?,
            REQUEST_TIMEOUT_KEY => self.request_timeout = parse_millis(key, value)?,
            SEED_DIR_KEY if value.is_empty() => self.seed_dir = None,
            SEED_DIR_KEY => self.seed_dir = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    /// Override the request timeout with the same checks as the key file.
    pub fn set_request_timeout_ms(&mut self, millis: u64) -> Result<()> {
        self.request_timeout = nonzero_millis(REQUEST_TIMEOUT_KEY, millis)?;
        Ok(())
    }

    pub fn save_to_env(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path).context("Failed to create settings file")?;
        writeln!(file, "{}={}", DB_PATH_KEY, self.db_path.display())?;
        writeln!(file, "{}={}", BUSY_TIMEOUT_KEY, self.busy_timeout.as_millis())?;
        writeln!(file, "{}={}", REQUEST_TIMEOUT_KEY, self.request_timeout.as_millis())?;
        if let Some(seed_dir) = &self.seed_dir {
            writeln!(file, "{}={}", SEED_DIR_KEY, seed_dir.display())?;
        }
        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis: u64 = value
        .parse()
        .map_err(|_| anyhow!("{} must be a whole number of milliseconds, got {:?}", key, value))?;
    nonzero_millis(key, millis)
}

fn nonzero_millis(key: &str, millis: u64) -> Result<Duration> {
    if millis == 0 {
        return Err(anyhow!("{} must be greater than zero", key));
    }
    Ok(Duration::from_millis(millis))
}
