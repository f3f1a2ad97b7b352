// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Pipeline configuration
//!
//! Defines the schema for teleflow.yaml. All knobs are named, validated
//! fields; secrets are resolved from the environment at connect time and
//! never stored in the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::{TeleflowError, TeleflowResult};
use crate::pipeline::StageName;
use crate::stage::CommandSpec;

/// Top-level configuration from teleflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeleflowConfig {
    /// Warehouse schema/namespace the loaders write into
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Root directory the collaborators write artifacts under
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Directory run summaries are persisted to (defaults to the platform
    /// data dir)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Channels the scraper ingests
    pub channels: Vec<String>,

    /// Warehouse connection parameters
    pub database: DatabaseConfig,

    /// External collaborator commands and timeouts
    #[serde(default)]
    pub stages: StagesConfig,

    /// Loader tuning
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Image-category classifier labels
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Daily schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_schema() -> String {
    "raw".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data/raw")
}

/// Warehouse connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    pub dbname: String,

    pub user: String,

    /// Name of the environment variable holding the password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Upper bound on pooled connections so a stuck load cannot starve
    /// other warehouse consumers
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_db_port() -> u16 {
    5432
}

fn default_password_env() -> String {
    "TELEFLOW_DB_PASSWORD".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

impl DatabaseConfig {
    /// Build the connection URL, resolving the password from the environment.
    pub fn url(&self) -> TeleflowResult<String> {
        let password =
            std::env::var(&self.password_env).map_err(|_| TeleflowError::MissingEnv {
                var: self.password_env.clone(),
            })?;

        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, password, self.host, self.port, self.dbname
        ))
    }
}

/// One external collaborator invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, relative to the process cwd
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Per-stage override of `stages.timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

/// dbt collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbtConfig {
    #[serde(default = "default_dbt_program")]
    pub program: String,

    pub project_dir: PathBuf,

    /// Model selector for the post-enrichment refresh
    #[serde(default = "default_refresh_select")]
    pub refresh_select: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_dbt_program() -> String {
    "dbt".to_string()
}

fn default_refresh_select() -> String {
    "fct_image_detections".to_string()
}

/// External collaborator commands and shared stage limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Default per-stage timeout
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap on captured stage output (tail is kept)
    #[serde(default = "default_capture_limit_bytes")]
    pub capture_limit_bytes: usize,

    #[serde(default = "default_scrape_command")]
    pub scrape: CollaboratorCommand,

    #[serde(default = "default_detect_command")]
    pub detect: CollaboratorCommand,

    #[serde(default = "default_dbt_config")]
    pub dbt: DbtConfig,
}

fn default_stage_timeout_secs() -> u64 {
    3600
}

fn default_capture_limit_bytes() -> usize {
    64 * 1024
}

fn default_scrape_command() -> CollaboratorCommand {
    CollaboratorCommand {
        program: "python3".into(),
        args: vec!["src/scraper.py".into()],
        working_dir: default_working_dir(),
        timeout_secs: None,
    }
}

fn default_detect_command() -> CollaboratorCommand {
    CollaboratorCommand {
        program: "python3".into(),
        args: vec!["src/yolo_detect.py".into()],
        working_dir: default_working_dir(),
        timeout_secs: None,
    }
}

fn default_dbt_config() -> DbtConfig {
    DbtConfig {
        program: default_dbt_program(),
        project_dir: PathBuf::from("medical_warehouse"),
        refresh_select: default_refresh_select(),
        timeout_secs: None,
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_stage_timeout_secs(),
            capture_limit_bytes: default_capture_limit_bytes(),
            scrape: default_scrape_command(),
            detect: default_detect_command(),
            dbt: default_dbt_config(),
        }
    }
}

/// Loader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Fraction of malformed records an artifact tolerates before the whole
    /// artifact fails
    #[serde(default = "default_malformed_threshold")]
    pub malformed_threshold: f64,
}

fn default_malformed_threshold() -> f64 {
    0.2
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            malformed_threshold: default_malformed_threshold(),
        }
    }
}

/// Classifier labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_person_class")]
    pub person_class: String,

    #[serde(default = "default_product_classes")]
    pub product_classes: Vec<String>,
}

fn default_person_class() -> String {
    "person".to_string()
}

fn default_product_classes() -> Vec<String> {
    vec!["bottle".into(), "cup".into(), "vase".into()]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            person_class: default_person_class(),
            product_classes: default_product_classes(),
        }
    }
}

/// Daily schedule: local time of day at a fixed UTC offset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Time of day, "HH:MM"
    #[serde(default = "default_schedule_time")]
    pub time: String,

    /// Timezone as a whole-hour UTC offset
    #[serde(default)]
    pub utc_offset_hours: i8,
}

fn default_schedule_time() -> String {
    "02:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: default_schedule_time(),
            utc_offset_hours: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn time_of_day(&self) -> TeleflowResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.time, "%H:%M").map_err(|e| {
            TeleflowError::InvalidConfig {
                reason: format!("schedule.time '{}' is not HH:MM: {}", self.time, e),
                help: Some("Example: \"02:00\"".into()),
            }
        })
    }

    pub fn offset(&self) -> TeleflowResult<FixedOffset> {
        FixedOffset::east_opt(i32::from(self.utc_offset_hours) * 3600).ok_or_else(|| {
            TeleflowError::InvalidConfig {
                reason: format!(
                    "schedule.utc_offset_hours {} is out of range",
                    self.utc_offset_hours
                ),
                help: Some("Offsets must be within -12..=14 hours".into()),
            }
        })
    }
}

impl TeleflowConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> TeleflowResult<Self> {
        if !path.exists() {
            return Err(TeleflowError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| TeleflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> TeleflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Where the scraper drops per-channel message batches
    pub fn messages_root(&self) -> PathBuf {
        self.data_root.join("telegram_messages")
    }

    /// Where the detector drops per-day detection batches
    pub fn detections_root(&self) -> PathBuf {
        self.data_root.join("yolo_detections")
    }

    /// Run-summary directory: configured, or the platform data dir
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }

        directories::ProjectDirs::from("", "", "teleflow")
            .map(|dirs| dirs.data_dir().join("runs"))
            .unwrap_or_else(|| PathBuf::from(".teleflow/runs"))
    }

    /// Effective timeout for a stage, honoring per-stage overrides
    pub fn timeout_for(&self, stage: StageName) -> std::time::Duration {
        let secs = match stage {
            StageName::Scrape => self.stages.scrape.timeout_secs,
            StageName::Detect => self.stages.detect.timeout_secs,
            StageName::Transform | StageName::SelectiveRefresh => self.stages.dbt.timeout_secs,
            _ => None,
        }
        .unwrap_or(self.stages.timeout_secs);

        std::time::Duration::from_secs(secs)
    }

    /// Environment exported to every collaborator
    fn collaborator_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("TELEFLOW_SCHEMA".into(), self.schema.clone());
        env.insert(
            "TELEFLOW_DATA_ROOT".into(),
            self.data_root.to_string_lossy().into_owned(),
        );
        env.insert("TELEFLOW_CHANNELS".into(), self.channels.join(","));
        env
    }

    pub fn scrape_command(&self) -> CommandSpec {
        CommandSpec {
            program: self.stages.scrape.program.clone(),
            args: self.stages.scrape.args.clone(),
            working_dir: self.stages.scrape.working_dir.clone(),
            env: self.collaborator_env(),
        }
    }

    pub fn detect_command(&self) -> CommandSpec {
        CommandSpec {
            program: self.stages.detect.program.clone(),
            args: self.stages.detect.args.clone(),
            working_dir: self.stages.detect.working_dir.clone(),
            env: self.collaborator_env(),
        }
    }

    /// A dbt invocation (`run`, `test`) against the configured project
    pub fn dbt_command(&self, subcommand: &str, select: Option<&str>) -> CommandSpec {
        let project = self.stages.dbt.project_dir.to_string_lossy().into_owned();

        let mut args = vec![
            subcommand.to_string(),
            "--project-dir".to_string(),
            project.clone(),
            "--profiles-dir".to_string(),
            project,
        ];
        if let Some(select) = select {
            args.push("--select".to_string());
            args.push(select.to_string());
        }

        let mut env = self.collaborator_env();
        env.insert("DBT_SCHEMA".into(), self.schema.clone());

        CommandSpec {
            program: self.stages.dbt.program.clone(),
            args,
            working_dir: self.stages.dbt.project_dir.clone(),
            env,
        }
    }

    /// Validate the configuration before any run is triggered
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.channels.is_empty() {
            result.add_error("channels: at least one channel is required");
        }

        let schema_re = regex::Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static regex");
        if !schema_re.is_match(&self.schema) {
            result.add_error(&format!(
                "schema: '{}' is not a valid identifier (lowercase letters, digits, underscores)",
                self.schema
            ));
        }

        if !(0.0..=1.0).contains(&self.loader.malformed_threshold) {
            result.add_error(&format!(
                "loader.malformed_threshold: {} must be within [0, 1]",
                self.loader.malformed_threshold
            ));
        }

        if self.stages.timeout_secs == 0 {
            result.add_error("stages.timeout_secs: must be greater than zero");
        }

        if self.stages.capture_limit_bytes < 1024 {
            result.add_warning(
                "stages.capture_limit_bytes: very small caps make failure output useless",
            );
        }

        if self.classifier.person_class.is_empty() {
            result.add_error("classifier.person_class: must not be empty");
        }

        if self.classifier.product_classes.is_empty() {
            result.add_warning(
                "classifier.product_classes: empty set means no image is ever promotional",
            );
        }

        if let Err(e) = self.schedule.time_of_day() {
            result.add_error(&e.to_string());
        }
        if let Err(e) = self.schedule.offset() {
            result.add_error(&e.to_string());
        }

        if self.database.max_connections == 0 {
            result.add_error("database.max_connections: must be greater than zero");
        }

        result
    }
}

/// Result of configuration validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
