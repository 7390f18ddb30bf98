//! RRM App Configuration
//!
//! Layered with the `config` crate: built-in defaults, then the TOML file,
//! then `RRM_APP__` environment variables. Command line flags are applied on
//! top by the caller.

use common::types::{ControlAction, Direction, Mcs, RrcTrigger, SchedulerFunction, SliceCount, SliceId};
use rrm::policy::{PolicyDocument, PolicyFormat};
use rrm::RrmError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RRM_APP";

/// Complete application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub control_loop: ControlLoopConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Named slice presets, merged over the built-in ones
    #[serde(default)]
    pub slice_templates: HashMap<String, SliceTemplate>,
    /// Preset applied to the policy template at start-up
    #[serde(default)]
    pub slice_template: Option<String>,
    /// RRC measurement trigger sent once at start-up
    #[serde(default)]
    pub rrc_trigger: Option<RrcTrigger>,
    /// Scheduler delegation calls sent once at start-up
    #[serde(default)]
    pub delegation: Vec<DelegationConfig>,
}

/// Controller connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout of every controller request in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `test` (fixtures, logged requests) or `sdk` (live HTTP)
    #[serde(default = "default_op_mode")]
    pub op_mode: String,
}

fn default_url() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    9999
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_op_mode() -> String {
    "test".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            op_mode: default_op_mode(),
        }
    }
}

impl ControllerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Control loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlLoopConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Run this many cycles then exit; unbounded when unset
    #[serde(default)]
    pub cycles: Option<u64>,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_initial_delay_secs() -> u64 {
    3
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            cycles: None,
        }
    }
}

/// Policy template and persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Template file; the built-in default policy is used when unset
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_basename")]
    pub basename: String,
    #[serde(default)]
    pub format: PolicyFormat,
    /// Write every applied policy to `output_dir`
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_basename() -> String {
    "enb_scheduling_policy".to_string()
}

fn default_persist() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            template: None,
            output_dir: default_output_dir(),
            basename: default_basename(),
            format: PolicyFormat::default(),
            persist: default_persist(),
        }
    }
}

/// Simulation mode inputs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_stats_fixture")]
    pub stats_fixture: PathBuf,
}

fn default_stats_fixture() -> PathBuf {
    PathBuf::from("fixtures/all_stats.json")
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            stats_fixture: default_stats_fixture(),
        }
    }
}

/// One scheduler delegation call
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DelegationConfig {
    pub function: SchedulerFunction,
    pub action: ControlAction,
}

/// Slice preset: slice count and per-slice MCS caps
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SliceTemplate {
    pub slices: u8,
    #[serde(default)]
    pub dl_max_mcs: Vec<u8>,
    #[serde(default)]
    pub ul_max_mcs: Vec<u8>,
}

impl SliceTemplate {
    fn new(slices: u8, dl_max_mcs: &[u8], ul_max_mcs: &[u8]) -> Self {
        Self {
            slices,
            dl_max_mcs: dl_max_mcs.to_vec(),
            ul_max_mcs: ul_max_mcs.to_vec(),
        }
    }

    /// Presets shipped with the app
    pub fn builtin() -> HashMap<String, SliceTemplate> {
        HashMap::from([
            ("embb".to_string(), Self::new(1, &[28], &[16])),
            ("urllc".to_string(), Self::new(1, &[12], &[10])),
            ("mmtc".to_string(), Self::new(1, &[9], &[6])),
            ("mixed".to_string(), Self::new(3, &[28, 12, 9], &[16, 10, 6])),
        ])
    }

    /// Write the preset into a policy document, returning its slice count
    pub fn apply(&self, doc: &mut PolicyDocument) -> Result<SliceCount, RrmError> {
        let count = SliceCount::try_from(self.slices)?;

        for (dir, caps) in [(Direction::Dl, &self.dl_max_mcs), (Direction::Ul, &self.ul_max_mcs)] {
            doc.set_num_slices(dir, count)?;
            for (id, &mcs) in caps.iter().enumerate() {
                let slice = SliceId::try_from(u8::try_from(id).unwrap_or(u8::MAX))?;
                doc.set_slice_max_mcs(slice, Mcs::try_from(mcs)?, dir)?;
            }
        }

        Ok(count)
    }
}

impl AppConfig {
    /// Load the configuration; a missing file leaves the defaults in place
    pub fn load(path: &Path) -> Result<Self, ::config::ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::new(&path.to_string_lossy(), ::config::FileFormat::Toml).required(false),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: AppConfig = settings.try_deserialize()?;

        let mut templates = SliceTemplate::builtin();
        templates.extend(app.slice_templates.drain());
        app.slice_templates = templates;

        Ok(app)
    }

    /// Selected slice preset, if any
    pub fn selected_template(&self) -> Result<Option<&SliceTemplate>, String> {
        match &self.slice_template {
            None => Ok(None),
            Some(name) => self
                .slice_templates
                .get(name)
                .map(Some)
                .ok_or_else(|| format!("Unknown slice template: {}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load(Path::new("/nonexistent/rrm_app.toml")).unwrap();
        assert_eq!(config.controller.url, "http://localhost");
        assert_eq!(config.controller.port, 9999);
        assert_eq!(config.controller.timeout(), Duration::from_secs(5));
        assert_eq!(config.control_loop.interval_secs, 10);
        assert_eq!(config.control_loop.cycles, None);
        assert_eq!(config.policy.format, PolicyFormat::Yaml);
        assert!(config.slice_templates.contains_key("mixed"));
        assert!(config.delegation.is_empty());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
slice_template = "video"
rrc_trigger = "event_driven"

[controller]
port = 8080
op_mode = "sdk"

[control_loop]
cycles = 4

[policy]
format = "json"

[[delegation]]
function = "ul_sched"
action = "pull"

[slice_templates.video]
slices = 2
dl_max_mcs = [28, 20]
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.controller.port, 8080);
        assert_eq!(config.controller.url, "http://localhost");
        assert_eq!(config.controller.op_mode, "sdk");
        assert_eq!(config.control_loop.cycles, Some(4));
        assert_eq!(config.policy.format, PolicyFormat::Json);
        assert_eq!(config.rrc_trigger, Some(RrcTrigger::EventDriven));
        assert_eq!(config.delegation[0].function, SchedulerFunction::UlSched);
        assert_eq!(config.delegation[0].action, ControlAction::Pull);

        let video = config.selected_template().unwrap().unwrap();
        assert_eq!(video.slices, 2);
        assert!(config.slice_templates.contains_key("embb"));
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("rrm_app.toml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.slice_template.as_deref(), Some("mixed"));
        assert!(config.selected_template().unwrap().is_some());
        assert_eq!(config.rrc_trigger, Some(RrcTrigger::Periodic));
    }

    #[test]
    fn test_unknown_template() {
        let mut config = AppConfig::load(Path::new("/nonexistent/rrm_app.toml")).unwrap();
        config.slice_template = Some("gaming".to_string());
        assert!(config.selected_template().is_err());
    }

    #[test]
    fn test_apply_slice_template() {
        let mut doc = PolicyDocument::default();
        let count = SliceTemplate::builtin()["mixed"].apply(&mut doc).unwrap();

        assert_eq!(count.value(), 3);
        assert_eq!(doc.num_slices(Direction::Ul).unwrap().value(), 3);
        assert_eq!(doc.slice_max_mcs(SliceId::new(1).unwrap(), Direction::Dl).unwrap().value(), 12);
        assert_eq!(doc.slice_max_mcs(SliceId::new(2).unwrap(), Direction::Ul).unwrap().value(), 6);
    }

    #[test]
    fn test_invalid_slice_template() {
        let mut doc = PolicyDocument::default();
        assert!(SliceTemplate::new(5, &[], &[]).apply(&mut doc).is_err());
        assert!(SliceTemplate::new(1, &[29], &[]).apply(&mut doc).is_err());
        assert!(SliceTemplate::new(4, &[28; 6], &[]).apply(&mut doc).is_err());
    }
}
