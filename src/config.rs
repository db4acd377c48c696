use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

// ── Profile ───────────────────────────────────────────────────────────────────

/// A conversation profile. Stored as YAML in the profiles directory, embedded
/// verbatim in conversation snapshots so a restored session keeps the
/// parameters it was recorded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "ProfileName")]
    pub profile_name: String,
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "AutoSave")]
    pub auto_save: bool,
    #[serde(rename = "Summarize")]
    pub summarize: bool,
    #[serde(rename = "SystemContext")]
    pub system_context: String,
    /// OpenAI completion format, either "text" or "json_object". Profiles
    /// written before this field existed get "text".
    #[serde(rename = "ResponseFormat", default = "default_response_format")]
    pub response_format: String,
    /// Messages appended after the system seed when a fresh conversation starts.
    #[serde(rename = "Messages", default)]
    pub messages: Vec<PreMessage>,
    /// Optional `"<N>d<S>"` expression. When set, every appended message gets
    /// a roll-result line added to its content.
    #[serde(rename = "DiceRoll", default, skip_serializing_if = "String::is_empty")]
    pub dice_roll: String,
    #[serde(rename = "CustomParameters", default)]
    pub custom_parameters: CustomParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreMessage {
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "Content")]
    pub content: String,
}

/// Sampling parameters forwarded to the OpenAI backend when non-zero.
/// The Anthropic backend ignores these; it sends model + max_tokens only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomParameters {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "is_zero_f32")]
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_f32")]
    pub presence_penalty: f32,
    #[serde(default, skip_serializing_if = "is_zero_f32")]
    pub frequency_penalty: f32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub logit_bias: HashMap<String, i32>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

fn default_response_format() -> String {
    "text".to_string()
}

impl Default for Profile {
    fn default() -> Self {
        // Keep only characters the validator accepts; login names can carry
        // dots and dashes that UserName does not allow.
        let user_name: String = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(16)
            .collect();
        let user_name = if user_name.is_empty() {
            "plait".to_string()
        } else {
            user_name
        };
        Self {
            profile_name: "Default".to_string(),
            user_name,
            model: "gpt-4o".to_string(),
            auto_save: true,
            summarize: false,
            system_context: "You are a kind and helpful chat AI. Sometimes you may say things \
                             that are incorrect, but that is unavoidable."
                .to_string(),
            response_format: default_response_format(),
            messages: Vec::new(),
            dice_roll: String::new(),
            custom_parameters: CustomParameters::default(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Startup-fatal checks. A profile that fails here never reaches the loop.
pub fn validate_profile(profile: &Profile) -> Result<()> {
    if profile.profile_name.is_empty() {
        bail!("ProfileName must not be empty");
    }
    if profile.user_name.is_empty()
        || profile.user_name.len() > 16
        || !profile
            .user_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '\\')
    {
        bail!("UserName must be alphanumeric and no more than 16 characters");
    }
    if profile.system_context.is_empty() {
        bail!("SystemContext must not be empty");
    }
    if profile.model.is_empty() {
        bail!("Model must not be empty");
    }
    if profile.response_format != "text" && profile.response_format != "json_object" {
        bail!("ResponseFormat must be either json_object or text");
    }
    for message in &profile.messages {
        if message.role.is_empty() {
            bail!("message Role must not be empty");
        }
        if message.content.is_empty() {
            bail!("message Content must not be empty");
        }
    }
    if !profile.dice_roll.is_empty() {
        crate::util::parse_dice(&profile.dice_roll)?;
    }
    validate_custom_parameters(&profile.custom_parameters)
}

pub fn validate_custom_parameters(params: &CustomParameters) -> Result<()> {
    if params.temperature != 0.0 && !(0.0..=2.0).contains(&params.temperature) {
        bail!("temperature must be between 0 and 2");
    }
    if params.top_p != 0.0 && !(0.0..=1.0).contains(&params.top_p) {
        bail!("top_p must be between 0 and 1");
    }
    if params.stop.len() > 4 {
        bail!("stop can contain up to 4 sequences");
    }
    if params.presence_penalty != 0.0 && !(-2.0..=2.0).contains(&params.presence_penalty) {
        bail!("presence_penalty must be between -2 and 2");
    }
    if params.frequency_penalty != 0.0 && !(-2.0..=2.0).contains(&params.frequency_penalty) {
        bail!("frequency_penalty must be between -2 and 2");
    }
    for bias in params.logit_bias.values() {
        if *bias != 0 && !(-100..=100).contains(bias) {
            bail!("logit_bias values must be between -100 and 100");
        }
    }
    Ok(())
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "OpenAIAPIKey", default)]
    pub openai_api_key: String,
    #[serde(rename = "AnthropicAPIKey", default)]
    pub anthropic_api_key: String,
    /// Profile filename used when no `--profile` override is given.
    #[serde(rename = "CurrentProfile", default = "default_profile_file")]
    pub current_profile: String,
}

fn default_profile_file() -> String {
    "default.yaml".to_string()
}

// Hand-written so current_profile gets the same value the serde default
// supplies for an absent field. A derived Default would leave it empty, and
// the first-run config written from it would then resolve to the profiles
// directory itself instead of a file.
impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
            current_profile: default_profile_file(),
        }
    }
}

impl Config {
    /// Load from disk, writing a starter config + default profile on first run.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            write_initial_files()?;
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read config file at {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("cannot parse config file at {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }
}

/// Resolve and load the active profile.
///
/// With no override, the `CurrentProfile` entry from the config file is used.
/// An override is tried as a literal path first, then (when it contains no
/// separator) against the profiles directory with `.yaml`/`.yml` appended.
pub fn load_profile(cfg: &Config, overload: &str) -> Result<Profile> {
    let dir = profiles_dir();
    if !dir.join(default_profile_file()).exists() {
        write_initial_files()?;
    }

    let candidates = profile_search_paths(&dir, cfg, overload);
    for path in &candidates {
        if !path.exists() {
            continue;
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read profile file at {}", path.display()))?;
        let profile: Profile = serde_yaml::from_str(&raw)
            .with_context(|| format!("cannot parse profile file at {}", path.display()))?;
        validate_profile(&profile)
            .with_context(|| format!("invalid profile {}", path.display()))?;
        debug!(path = %path.display(), name = %profile.profile_name, "profile loaded");
        return Ok(profile);
    }

    bail!(
        "profile file not found, tried: {}",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn profile_search_paths(dir: &std::path::Path, cfg: &Config, overload: &str) -> Vec<PathBuf> {
    if overload.is_empty() {
        return vec![dir.join(&cfg.current_profile)];
    }

    let mut paths = vec![PathBuf::from(overload)];
    if !overload.contains('/') && !overload.contains('\\') {
        if overload.ends_with(".yaml") || overload.ends_with(".yml") {
            paths.push(dir.join(overload));
        } else {
            paths.push(dir.join(format!("{overload}.yaml")));
            paths.push(dir.join(format!("{overload}.yml")));
        }
    }
    paths
}

fn write_initial_files() -> Result<()> {
    let dir = profiles_dir();
    fs::create_dir_all(&dir)?;

    let config_file = config_path();
    if !config_file.exists() {
        fs::write(&config_file, serde_yaml::to_string(&Config::default())?)?;
    }

    let default_profile = dir.join(default_profile_file());
    if !default_profile.exists() {
        fs::write(&default_profile, serde_yaml::to_string(&Profile::default())?)?;
    }
    Ok(())
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plait")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

pub fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

pub fn history_dir() -> PathBuf {
    config_dir().join("history")
}

/// Open the config directory in the OS file manager. Best effort.
pub fn open_config_dir() -> Result<()> {
    let dir = config_dir();
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    Command::new(opener)
        .arg(&dir)
        .spawn()
        .with_context(|| format!("cannot open {} with {opener}", dir.display()))?;
    Ok(())
}
