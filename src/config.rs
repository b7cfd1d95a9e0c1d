use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Output path used when neither a flag nor the environment names one
pub const DEFAULT_OUTPUT: &str = "data/torrance_votes_smart_consolidated.json";

/// Environment variable consulted for the output path
pub const OUTPUT_ENV: &str = "VOTES_OUTPUT";

/// Configuration for one import run
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Where backups go; defaults to `backups/` next to the output
    pub backup_dir: Option<PathBuf>,
    pub create_backup: bool,
    pub dry_run: bool,
    /// Persist even when validation reports errors
    pub force: bool,
    /// Fold the current output back in so earlier imports are kept
    pub merge_existing: bool,
    pub estimate_timestamps: bool,
    /// Where the JSON import report is written, if anywhere
    pub report: Option<PathBuf>,
    pub video_metadata: Option<PathBuf>,
    pub summaries: Option<PathBuf>,
}

impl ImportConfig {
    /// Create a new default configuration
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.into(),
            backup_dir: None,
            create_backup: true,
            dry_run: false,
            force: false,
            merge_existing: true,
            estimate_timestamps: false,
            report: None,
            video_metadata: None,
            summaries: None,
        }
    }

    /// Directory backups are written to
    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .output
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
                .join("backups"),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::Config("At least one input path is required".to_string()));
        }

        for input in &self.inputs {
            if !input.exists() {
                return Err(Error::Config(format!(
                    "Input path does not exist: {}",
                    input.display()
                )));
            }
        }

        if self.output.as_os_str().is_empty() {
            return Err(Error::Config("Output path is empty".to_string()));
        }

        if self.output.is_dir() {
            return Err(Error::Config(format!(
                "Output path is a directory: {}",
                self.output.display()
            )));
        }

        for (name, path) in [
            ("video metadata", &self.video_metadata),
            ("summaries", &self.summaries),
        ] {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(Error::Config(format!(
                        "The {} file does not exist: {}",
                        name,
                        path.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT)
    }
}

/// Settings read from a YAML config file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub backup: Option<bool>,
    pub merge_existing: Option<bool>,
    pub estimate_timestamps: Option<bool>,
    pub report: Option<PathBuf>,
    pub video_metadata: Option<PathBuf>,
    pub summaries: Option<PathBuf>,
}

impl FileConfig {
    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// Builder for creating configurations
#[derive(Debug, Clone, Default)]
pub struct ImportConfigBuilder {
    config: ImportConfig,
}

impl ImportConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from values read from a config file.
    ///
    /// Call this first; later builder calls override what the file set.
    pub fn apply_file(mut self, file: FileConfig) -> Self {
        if !file.inputs.is_empty() {
            self.config.inputs = file.inputs;
        }
        if let Some(output) = file.output {
            self.config.output = output;
        }
        if file.backup_dir.is_some() {
            self.config.backup_dir = file.backup_dir;
        }
        if let Some(backup) = file.backup {
            self.config.create_backup = backup;
        }
        if let Some(merge) = file.merge_existing {
            self.config.merge_existing = merge;
        }
        if let Some(estimate) = file.estimate_timestamps {
            self.config.estimate_timestamps = estimate;
        }
        if file.report.is_some() {
            self.config.report = file.report;
        }
        if file.video_metadata.is_some() {
            self.config.video_metadata = file.video_metadata;
        }
        if file.summaries.is_some() {
            self.config.summaries = file.summaries;
        }
        self
    }

    /// Add an input file or directory
    pub fn add_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.config.inputs.push(input.into());
        self
    }

    /// Replace the input paths
    pub fn inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.config.inputs = inputs;
        self
    }

    /// Set the output path
    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.config.output = output.into();
        self
    }

    /// Set the backup directory
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = Some(dir.into());
        self
    }

    /// Skip the backup of an existing output
    pub fn no_backup(mut self) -> Self {
        self.config.create_backup = false;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn merge_existing(mut self, merge: bool) -> Self {
        self.config.merge_existing = merge;
        self
    }

    pub fn estimate_timestamps(mut self, estimate: bool) -> Self {
        self.config.estimate_timestamps = estimate;
        self
    }

    /// Write the JSON import report to this path
    pub fn report(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.report = Some(path.into());
        self
    }

    pub fn video_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.video_metadata = Some(path.into());
        self
    }

    pub fn summaries(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.summaries = Some(path.into());
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<ImportConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
