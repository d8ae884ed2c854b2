use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every persisted setting. The serialized names are the storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    PishockUsername,
    PishockApiKey,
    PishockCode,
    PishockClientId,
    PishockShockerId,
    ShockOnTestFail,
    ShockOnFinalFail,
    InitialShockIntensity,
    InitialShockDuration,
    VibrateIntensity,
    VibrateDuration,
    ShockIntervalSeconds,
    IncrementalIntensityStep,
    IncrementalDurationStep,
    MaxIntensity,
    MaxDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Flag,
    Number,
}

impl SettingKey {
    pub const ALL: [SettingKey; 16] = [
        SettingKey::PishockUsername,
        SettingKey::PishockApiKey,
        SettingKey::PishockCode,
        SettingKey::PishockClientId,
        SettingKey::PishockShockerId,
        SettingKey::ShockOnTestFail,
        SettingKey::ShockOnFinalFail,
        SettingKey::InitialShockIntensity,
        SettingKey::InitialShockDuration,
        SettingKey::VibrateIntensity,
        SettingKey::VibrateDuration,
        SettingKey::ShockIntervalSeconds,
        SettingKey::IncrementalIntensityStep,
        SettingKey::IncrementalDurationStep,
        SettingKey::MaxIntensity,
        SettingKey::MaxDuration,
    ];

    /// Keys whose change invalidates the broker connection.
    pub const CREDENTIALS: [SettingKey; 2] = [SettingKey::PishockUsername, SettingKey::PishockApiKey];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::PishockUsername => "pishockUsername",
            SettingKey::PishockApiKey => "pishockApiKey",
            SettingKey::PishockCode => "pishockCode",
            SettingKey::PishockClientId => "pishockClientId",
            SettingKey::PishockShockerId => "pishockShockerId",
            SettingKey::ShockOnTestFail => "shockOnTestFail",
            SettingKey::ShockOnFinalFail => "shockOnFinalFail",
            SettingKey::InitialShockIntensity => "initialShockIntensity",
            SettingKey::InitialShockDuration => "initialShockDuration",
            SettingKey::VibrateIntensity => "vibrateIntensity",
            SettingKey::VibrateDuration => "vibrateDuration",
            SettingKey::ShockIntervalSeconds => "shockIntervalSeconds",
            SettingKey::IncrementalIntensityStep => "incrementalIntensityStep",
            SettingKey::IncrementalDurationStep => "incrementalDurationStep",
            SettingKey::MaxIntensity => "maxIntensity",
            SettingKey::MaxDuration => "maxDuration",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            SettingKey::PishockUsername
            | SettingKey::PishockApiKey
            | SettingKey::PishockCode
            | SettingKey::PishockClientId
            | SettingKey::PishockShockerId => ValueKind::Text,
            SettingKey::ShockOnTestFail | SettingKey::ShockOnFinalFail => ValueKind::Flag,
            _ => ValueKind::Number,
        }
    }

    /// Only the shock interval may be absent; absence disables timed shocks.
    pub fn is_optional(&self) -> bool {
        matches!(self, SettingKey::ShockIntervalSeconds)
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, SettingKey::PishockApiKey)
    }

    /// Inclusive clamp range applied when the settings form saves.
    pub fn range(&self) -> Option<(f64, f64)> {
        match self {
            SettingKey::InitialShockIntensity
            | SettingKey::VibrateIntensity
            | SettingKey::MaxIntensity => Some((1.0, 100.0)),
            SettingKey::InitialShockDuration
            | SettingKey::VibrateDuration
            | SettingKey::MaxDuration => Some((0.1, 15.0)),
            SettingKey::ShockIntervalSeconds => Some((10.0, f64::INFINITY)),
            SettingKey::IncrementalIntensityStep => Some((0.0, 25.0)),
            SettingKey::IncrementalDurationStep => Some((0.0, 2.0)),
            _ => None,
        }
    }

    /// Parse user input (CLI or form field) into a value of this key's kind.
    pub fn parse_value(&self, raw: &str) -> Result<SettingValue, SettingsError> {
        let raw = raw.trim();
        match self.kind() {
            ValueKind::Text => Ok(SettingValue::Text(raw.to_string())),
            ValueKind::Flag => parse_flag(raw)
                .map(SettingValue::Flag)
                .ok_or_else(|| self.invalid(raw, "true or false")),
            ValueKind::Number => raw
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(SettingValue::Number)
                .ok_or_else(|| self.invalid(raw, "a number")),
        }
    }

    fn invalid(&self, value: &str, expected: &'static str) -> SettingsError {
        SettingsError::InvalidValue {
            key: self.as_str(),
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    /// Accepts the storage key as well as kebab/snake spellings
    /// (`shock-on-test-fail`, `shock_on_test_fail`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_key(s);
        SettingKey::ALL
            .iter()
            .copied()
            .find(|key| normalize_key(key.as_str()) == wanted)
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

fn normalize_key(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// A single persisted scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Flag(b) => write!(f, "{}", b),
            SettingValue::Number(n) => write!(f, "{}", format_number(*n)),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

/// Integral values print without a fractional part (`30`, not `30.0`).
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Fields that route a command to one shocker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub share_code: String,
    pub client_id: String,
    pub shocker_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub pishock_username: String,
    pub pishock_api_key: String,
    pub pishock_code: String,
    pub pishock_client_id: String,
    pub pishock_shocker_id: String,
    pub shock_on_test_fail: bool,
    pub shock_on_final_fail: bool,
    pub initial_shock_intensity: f64,
    pub initial_shock_duration: f64,
    pub vibrate_intensity: f64,
    pub vibrate_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shock_interval_seconds: Option<f64>,
    pub incremental_intensity_step: f64,
    pub incremental_duration_step: f64,
    pub max_intensity: f64,
    pub max_duration: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pishock_username: String::new(),
            pishock_api_key: String::new(),
            pishock_code: String::new(),
            pishock_client_id: String::new(),
            pishock_shocker_id: String::new(),
            shock_on_test_fail: false,
            shock_on_final_fail: false,
            initial_shock_intensity: 30.0,
            initial_shock_duration: 1.0,
            vibrate_intensity: 25.0,
            vibrate_duration: 1.0,
            shock_interval_seconds: Some(120.0),
            incremental_intensity_step: 5.0,
            incremental_duration_step: 0.5,
            max_intensity: 100.0,
            max_duration: 5.0,
        }
    }
}

impl Settings {
    /// Build settings from persisted entries. Keys that are absent take their
    /// default, except the shock interval whose absence means "disabled".
    /// Entries of the wrong shape are skipped and reported back.
    pub fn from_entries<I>(entries: I) -> (Settings, Vec<SettingsError>)
    where
        I: IntoIterator<Item = (SettingKey, SettingValue)>,
    {
        let mut settings = Settings {
            shock_interval_seconds: None,
            ..Settings::default()
        };
        let mut errors = Vec::new();
        for (key, value) in entries {
            if let Err(e) = settings.apply(key, Some(value)) {
                errors.push(e);
            }
        }
        (settings, errors)
    }

    /// Every key with its current value; `None` only for a disabled interval.
    pub fn entries(&self) -> Vec<(SettingKey, Option<SettingValue>)> {
        SettingKey::ALL
            .iter()
            .map(|key| (*key, self.get(*key)))
            .collect()
    }

    pub fn get(&self, key: SettingKey) -> Option<SettingValue> {
        use SettingValue::{Flag, Number, Text};
        let value = match key {
            SettingKey::PishockUsername => Text(self.pishock_username.clone()),
            SettingKey::PishockApiKey => Text(self.pishock_api_key.clone()),
            SettingKey::PishockCode => Text(self.pishock_code.clone()),
            SettingKey::PishockClientId => Text(self.pishock_client_id.clone()),
            SettingKey::PishockShockerId => Text(self.pishock_shocker_id.clone()),
            SettingKey::ShockOnTestFail => Flag(self.shock_on_test_fail),
            SettingKey::ShockOnFinalFail => Flag(self.shock_on_final_fail),
            SettingKey::InitialShockIntensity => Number(self.initial_shock_intensity),
            SettingKey::InitialShockDuration => Number(self.initial_shock_duration),
            SettingKey::VibrateIntensity => Number(self.vibrate_intensity),
            SettingKey::VibrateDuration => Number(self.vibrate_duration),
            SettingKey::ShockIntervalSeconds => return self.shock_interval_seconds.map(Number),
            SettingKey::IncrementalIntensityStep => Number(self.incremental_intensity_step),
            SettingKey::IncrementalDurationStep => Number(self.incremental_duration_step),
            SettingKey::MaxIntensity => Number(self.max_intensity),
            SettingKey::MaxDuration => Number(self.max_duration),
        };
        Some(value)
    }

    /// Set one key. `None` resets the key to its default (for the interval:
    /// disabled). Numbers stored under text keys are accepted and formatted,
    /// numeric text under number keys is parsed.
    pub fn apply(&mut self, key: SettingKey, value: Option<SettingValue>) -> Result<(), SettingsError> {
        let Some(value) = value else {
            self.reset(key);
            return Ok(());
        };

        match key.kind() {
            ValueKind::Text => {
                let text = match value {
                    SettingValue::Text(s) => s,
                    SettingValue::Number(n) => format_number(n),
                    SettingValue::Flag(b) => return Err(key.invalid(&b.to_string(), "text")),
                };
                *self.text_mut(key) = text;
            }
            ValueKind::Flag => {
                let flag = match value {
                    SettingValue::Flag(b) => b,
                    SettingValue::Text(s) => {
                        parse_flag(&s).ok_or_else(|| key.invalid(&s, "true or false"))?
                    }
                    SettingValue::Number(n) => return Err(key.invalid(&format_number(n), "true or false")),
                };
                match key {
                    SettingKey::ShockOnTestFail => self.shock_on_test_fail = flag,
                    _ => self.shock_on_final_fail = flag,
                }
            }
            ValueKind::Number => {
                let number = match value {
                    SettingValue::Number(n) => n,
                    SettingValue::Text(s) => match key.parse_value(&s)? {
                        SettingValue::Number(n) => n,
                        _ => return Err(key.invalid(&s, "a number")),
                    },
                    SettingValue::Flag(b) => return Err(key.invalid(&b.to_string(), "a number")),
                };
                if key == SettingKey::ShockIntervalSeconds {
                    self.shock_interval_seconds = Some(number);
                } else {
                    *self.number_mut(key) = number;
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self, key: SettingKey) {
        if key.is_optional() {
            self.shock_interval_seconds = None;
            return;
        }
        let defaults = Settings::default();
        // Defaults always carry a value for non-optional keys.
        let _ = self.apply(key, defaults.get(key));
    }

    fn text_mut(&mut self, key: SettingKey) -> &mut String {
        match key {
            SettingKey::PishockUsername => &mut self.pishock_username,
            SettingKey::PishockApiKey => &mut self.pishock_api_key,
            SettingKey::PishockCode => &mut self.pishock_code,
            SettingKey::PishockClientId => &mut self.pishock_client_id,
            _ => &mut self.pishock_shocker_id,
        }
    }

    fn number_mut(&mut self, key: SettingKey) -> &mut f64 {
        match key {
            SettingKey::InitialShockIntensity => &mut self.initial_shock_intensity,
            SettingKey::InitialShockDuration => &mut self.initial_shock_duration,
            SettingKey::VibrateIntensity => &mut self.vibrate_intensity,
            SettingKey::VibrateDuration => &mut self.vibrate_duration,
            SettingKey::IncrementalIntensityStep => &mut self.incremental_intensity_step,
            SettingKey::IncrementalDurationStep => &mut self.incremental_duration_step,
            SettingKey::MaxIntensity => &mut self.max_intensity,
            _ => &mut self.max_duration,
        }
    }

    /// Copy with every numeric field clamped to its documented range.
    pub fn clamped(&self) -> Settings {
        let mut out = self.clone();
        for key in SettingKey::ALL {
            let Some((min, max)) = key.range() else {
                continue;
            };
            if key == SettingKey::ShockIntervalSeconds {
                out.shock_interval_seconds = out.shock_interval_seconds.map(|n| clamp(n, min, max));
            } else {
                let slot = out.number_mut(key);
                *slot = clamp(*slot, min, max);
            }
        }
        out
    }

    /// Keys whose values differ between `self` and `other`.
    pub fn changed_keys(&self, other: &Settings) -> Vec<SettingKey> {
        SettingKey::ALL
            .iter()
            .copied()
            .filter(|key| self.get(*key) != other.get(*key))
            .collect()
    }

    pub fn has_credentials(&self) -> bool {
        !self.pishock_username.is_empty() && !self.pishock_api_key.is_empty()
    }

    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        if self.pishock_code.is_empty()
            || self.pishock_client_id.is_empty()
            || self.pishock_shocker_id.is_empty()
        {
            return None;
        }
        Some(DeviceIdentity {
            share_code: self.pishock_code.clone(),
            client_id: self.pishock_client_id.clone(),
            shocker_id: self.pishock_shocker_id.clone(),
        })
    }
}

/// Non-finite input clamps to the minimum.
pub fn clamp(num: f64, min: f64, max: f64) -> f64 {
    if !num.is_finite() {
        return min;
    }
    num.max(min).min(max)
}
