// magchess_host/src/configfile.rs
// Reads rig calibration from an INI-style file.
//
//   [calibration]
//   steps_per_square = 7100
//   x_offset: -1250      # either separator works
//
// Missing sections and options fall back to the reference rig.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;
use magchess_mcu::Calibration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Syntax(usize, String), // line number, message
    ParseError(String, String, String), // option, value, type_expected
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Unable to read config: {}", msg),
            ConfigError::Syntax(line, msg) => write!(f, "Line {}: {}", line, msg),
            ConfigError::ParseError(o, v, t) => write!(f, "Failed to parse option '{}' value '{}' as {}", o, v, t),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Default, Clone)]
pub struct Configfile {
    // section -> { option -> raw value }, names lowercased
    data: HashMap<String, HashMap<String, String>>,
}

impl Configfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::new();
        config.parse(&text)?;
        Ok(config)
    }

    /// Parses `[section]` headers and `key = value` / `key: value` lines.
    /// `#` and `;` start comments.
    pub fn parse(&mut self, content: &str) -> Result<(), ConfigError> {
        self.data.clear();
        let mut section: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = match raw.find(|c| c == '#' || c == ';') {
                Some(i) => &raw[..i],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_lowercase();
                if name.is_empty() {
                    return Err(ConfigError::Syntax(line_no, "empty section name".to_string()));
                }
                self.data.entry(name.clone()).or_default();
                section = Some(name);
                continue;
            }

            let Some(ref name) = section else {
                return Err(ConfigError::Syntax(line_no, format!("option outside of a section: {}", raw)));
            };
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                return Err(ConfigError::Syntax(line_no, format!("malformed line in [{}]: {}", name, raw)));
            };
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(ConfigError::Syntax(line_no, format!("empty key in [{}]", name)));
            }
            self.data.entry(name.clone()).or_default().insert(key, value.trim().to_string());
        }
        Ok(())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.data.contains_key(&section.to_lowercase())
    }

    pub fn get_str(&self, section: &str, option: &str) -> Option<&str> {
        self.data
            .get(&section.to_lowercase())?
            .get(&option.to_lowercase())
            .map(String::as_str)
    }

    /// Integer option with a default for a missing section or option and
    /// optional inclusive bounds.
    pub fn getint(
        &self,
        section: &str,
        option: &str,
        default: i64,
        minval: Option<i64>,
        maxval: Option<i64>,
    ) -> Result<i64, ConfigError> {
        let Some(raw) = self.get_str(section, option) else {
            return Ok(default);
        };
        let value = raw
            .parse::<i64>()
            .map_err(|_| ConfigError::ParseError(option.to_string(), raw.to_string(), "integer".to_string()))?;
        if let Some(min) = minval {
            if value < min {
                return Err(ConfigError::ValidationError(format!(
                    "Option '{}' in section '[{}]' ({}) must be >= {}",
                    option, section, value, min
                )));
            }
        }
        if let Some(max) = maxval {
            if value > max {
                return Err(ConfigError::ValidationError(format!(
                    "Option '{}' in section '[{}]' ({}) must be <= {}",
                    option, section, value, max
                )));
            }
        }
        Ok(value)
    }
}

// --- Calibration ---

fn get_i32(cfg: &Configfile, section: &str, option: &str, default: i32, minval: Option<i64>) -> Result<i32, ConfigError> {
    let value = cfg.getint(section, option, default as i64, minval, Some(i32::MAX as i64))?;
    i32::try_from(value).map_err(|_| ConfigError::ParseError(option.to_string(), value.to_string(), "i32".to_string()))
}

fn get_u32(cfg: &Configfile, section: &str, option: &str, default: u32, minval: i64) -> Result<u32, ConfigError> {
    let value = cfg.getint(section, option, default as i64, Some(minval), Some(u32::MAX as i64))?;
    Ok(value as u32)
}

fn get_u8(cfg: &Configfile, section: &str, option: &str, default: u8, minval: i64) -> Result<u8, ConfigError> {
    let value = cfg.getint(section, option, default as i64, Some(minval), Some(u8::MAX as i64))?;
    Ok(value as u8)
}

/// Builds a validated `Calibration`, taking reference values for anything the
/// file leaves out.
pub fn calibration_from_config(cfg: &Configfile) -> Result<Calibration, ConfigError> {
    let reference = Calibration::REFERENCE;
    let cal = Calibration {
        steps_per_square: get_i32(cfg, "calibration", "steps_per_square", reference.steps_per_square, Some(1))?,
        steps_min: get_i32(cfg, "calibration", "steps_min", reference.steps_min, None)?,
        steps_max: get_i32(cfg, "calibration", "steps_max", reference.steps_max, None)?,
        half_square: get_i32(cfg, "calibration", "half_square", reference.half_square, Some(0))?,
        steps_extra: get_i32(cfg, "calibration", "steps_extra", reference.steps_extra, Some(0))?,
        x_offset: get_i32(cfg, "calibration", "x_offset", reference.x_offset, None)?,
        y_offset: get_i32(cfg, "calibration", "y_offset", reference.y_offset, None)?,
        x_zero_offset: get_i32(cfg, "calibration", "x_zero_offset", reference.x_zero_offset, None)?,
        y_zero_offset: get_i32(cfg, "calibration", "y_zero_offset", reference.y_zero_offset, None)?,

        step_interval_us: get_u32(cfg, "timing", "step_interval_us", reference.step_interval_us, 1)?,
        homing_interval_us: get_u32(cfg, "timing", "homing_interval_us", reference.homing_interval_us, 1)?,
        pulse_width_us: get_u32(cfg, "timing", "pulse_width_us", reference.pulse_width_us, 1)?,
        magnet_settle_ms: get_u32(cfg, "timing", "magnet_settle_ms", reference.magnet_settle_ms, 0)?,
        poll_interval_ms: get_u32(cfg, "timing", "poll_interval_ms", reference.poll_interval_ms, 1)?,
        homing_attempts: get_u8(cfg, "timing", "homing_attempts", reference.homing_attempts, 1)?,

        slot_columns: get_u8(cfg, "holding_slots", "columns", reference.slot_columns, 1)?,
        slot_rows: get_u8(cfg, "holding_slots", "rows", reference.slot_rows, 1)?,
    };
    cal.validate().map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    debug!("Loaded calibration: {:?}", cal);
    Ok(cal)
}

/// Reads and validates the calibration file at `path`.
pub fn load_calibration(path: &Path) -> Result<Calibration, ConfigError> {
    calibration_from_config(&Configfile::read(path)?)
}
