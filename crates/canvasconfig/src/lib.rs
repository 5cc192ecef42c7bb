use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanvasConfig {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f32>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    #[default]
    Unbounded,
    Lifetime,
    Window,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub mode: BudgetMode,
    #[serde(default)]
    pub frames: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub window: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuConfig {
    #[serde(default)]
    pub power: PowerSetting,
    #[serde(default = "default_latency")]
    pub latency: u32,
    #[serde(default = "default_vsync")]
    pub vsync: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            power: PowerSetting::default(),
            latency: default_latency(),
            vsync: default_vsync(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterName {
    AsciiArt,
    CrossHatch,
    EdgeDetection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterSection {
    pub variant: FilterName,
    #[serde(default)]
    pub param: f32,
    /// Packed `0xAARRGGBB`.
    #[serde(
        default,
        deserialize_with = "deserialize_color_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub background: Option<u32>,
}

fn default_latency() -> u32 {
    2
}

fn default_vsync() -> bool {
    true
}

/// Budget windows: `"250ms"`, `"1s"` or a plain number of seconds.
fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawWindow {
        Text(String),
        Seconds(f64),
    }

    match Option::<RawWindow>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawWindow::Text(raw)) => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|err| de::Error::custom(format!("invalid budget window '{raw}': {err}"))),
        Some(RawWindow::Seconds(secs)) if secs.is_finite() && secs >= 0.0 => {
            Ok(Some(Duration::from_secs_f64(secs)))
        }
        Some(RawWindow::Seconds(secs)) => Err(de::Error::custom(format!(
            "budget window must be a non-negative number of seconds, got {secs}"
        ))),
    }
}

fn deserialize_color_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    let result = match helper {
        None => None,
        Some(Helper::Str(raw)) => Some(parse_color(&raw).map_err(de::Error::custom)?),
        Some(Helper::Num(value)) => {
            if !(0..=i64::from(u32::MAX)).contains(&value) {
                return Err(de::Error::custom(
                    "background color must fit in a packed 32-bit ARGB value",
                ));
            }
            Some(value as u32)
        }
    };
    Ok(result)
}

/// Parses `#RRGGBB`, `#RRGGBBAA` (or the same without `#`, or `0xAARRGGBB`)
/// into a packed `0xAARRGGBB` value. Six-digit colors are fully opaque.
pub fn parse_color(raw: &str) -> Result<u32, String> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16)
            .map_err(|err| format!("invalid packed color '{raw}': {err}"));
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let value = u32::from_str_radix(hex, 16)
        .map_err(|err| format!("invalid color '{raw}': {err}"))?;
    match hex.len() {
        6 => Ok(0xFF00_0000 | value),
        8 => {
            let rgb = value >> 8;
            let alpha = value & 0xFF;
            Ok((alpha << 24) | rgb)
        }
        _ => Err(format!(
            "invalid color '{raw}'; expected #RRGGBB, #RRGGBBAA or 0xAARRGGBB"
        )),
    }
}

impl CanvasConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CanvasConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor.unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if let Some(scale) = self.scale_factor {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ConfigError::Invalid(
                    "scale_factor must be a positive number".into(),
                ));
            }
        }

        match self.budget.mode {
            BudgetMode::Unbounded => {}
            BudgetMode::Lifetime => match self.budget.frames {
                Some(frames) if frames > 0 => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "budget.frames must be > 0 for a lifetime budget".into(),
                    ))
                }
            },
            BudgetMode::Window => {
                match self.budget.frames {
                    Some(frames) if frames > 0 => {}
                    _ => {
                        return Err(ConfigError::Invalid(
                            "budget.frames must be > 0 for a window budget".into(),
                        ))
                    }
                }
                match self.budget.window {
                    Some(window) if !window.is_zero() => {}
                    _ => {
                        return Err(ConfigError::Invalid(
                            "budget.window must be a non-zero duration for a window budget"
                                .into(),
                        ))
                    }
                }
            }
        }

        if self.gpu.latency == 0 {
            return Err(ConfigError::Invalid("gpu.latency must be >= 1".into()));
        }

        if let Some(filter) = &self.filter {
            if !filter.param.is_finite() {
                return Err(ConfigError::Invalid(
                    "filter.param must be a finite number".into(),
                ));
            }
        }

        Ok(())
    }
}
