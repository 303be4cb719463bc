use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DB_ENV_VAR: &str = "POTLUCK_DB";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the database location: `--db`, then `POTLUCK_DB`, then the
    /// platform data directory.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let explicit = db_override.or_else(|| {
            std::env::var_os(DB_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });

        if let Some(db_path) = explicit {
            let data_dir = db_path
                .parent()
                .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
            return Ok(Config { db_path, data_dir });
        }

        let proj_dirs =
            ProjectDirs::from("", "", "potluck").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("potluck.db");

        Ok(Config { db_path, data_dir })
    }
}

/// A fresh 256-bit API token, hex encoded.
pub fn generate_token() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}
