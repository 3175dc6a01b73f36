use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

fn default_obsolete_age() -> i64 {
    30 * 24 * 60 * 60
}

fn default_grace_window() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory holding the content-addressed blobs.
    pub datastore_dir: String,
    /// Directory holding `packages.db`.
    pub database_dir: String,
    /// Seconds an unstarred version survives before it becomes obsolete.
    #[serde(default = "default_obsolete_age")]
    pub obsolete_age: i64,
    /// Seconds a freshly written blob is protected from GC regardless of
    /// whether its file row has been committed yet.
    #[serde(default = "default_grace_window")]
    pub grace_window: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            datastore_dir: "datastore".to_owned(),
            database_dir: "database".to_owned(),
            obsolete_age: default_obsolete_age(),
            grace_window: default_grace_window(),
        }
    }
}

impl Settings {
    /// Loads settings from an optional config file, then applies
    /// `TEMPSTORE_*` environment overrides on top of the compiled-in
    /// defaults.
    pub fn new(config_path: Option<&str>) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("datastore_dir", defaults.datastore_dir)?
            .set_default("database_dir", defaults.database_dir)?
            .set_default("obsolete_age", defaults.obsolete_age)?
            .set_default("grace_window", defaults.grace_window)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
        }

        let s = builder
            .add_source(Environment::with_prefix("TEMPSTORE"))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}
