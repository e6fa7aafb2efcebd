use crate::error::{DemuxError, Result};
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_PROBE_SIZE: u64 = 2_000_000;
pub const DEFAULT_MAX_SYNC_SCAN: usize = 65_535;
pub const DEFAULT_AUDIO_ONLY_PROBE_LIMIT: u64 = 64 * 1024;
pub const DEFAULT_MAX_QUEUED_UNITS: usize = 1024;
pub const DEFAULT_MAX_SECTION_SIZE: usize = 65_535;

/// How the caller wants one stream kind selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidRequest {
    /// Let the prober pick the first suitable PID.
    #[default]
    Auto,
    /// Use exactly this PID.
    Pid(u16),
    /// Do not expose this stream kind at all.
    Disabled,
}

impl PidRequest {
    /// Parses `auto`, `none`/`off`, or a decimal / `0x` hex PID.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match value.to_ascii_lowercase().as_str() {
            "" | "auto" | "-1" => Ok(PidRequest::Auto),
            "none" | "off" | "disabled" | "-2" => Ok(PidRequest::Disabled),
            _ => parse_u16(value).map(PidRequest::Pid),
        }
    }

    pub fn is_disabled(self) -> bool {
        self == PidRequest::Disabled
    }
}

/// Demuxer tunables.
///
/// Defaults come from [`DemuxConfig::default`]; [`DemuxConfig::new`] layers
/// `TSDEMUX_*` environment variables and an optional `tsdemux.toml` on top.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Bytes the prober may read at open time.
    pub probe_size: u64,
    /// Bytes scanned for a sync byte before giving up.
    pub max_sync_scan: usize,
    /// Audio-only bytes after which the prober stops looking for video.
    pub audio_only_probe_limit: u64,
    pub video: PidRequest,
    pub audio: PidRequest,
    /// Restrict selection to this program number.
    pub program: Option<u16>,
    /// Deliver units whose start was never seen instead of dropping them.
    pub keep_broken: bool,
    /// Drop PAT/PMT sections whose CRC does not match.
    pub check_crc: bool,
    /// Ready units kept per stream kind before the oldest is dropped.
    pub max_queued_units: usize,
    pub max_section_size: usize,
    /// Fallback bitrate in bytes per second for time based seeks.
    pub default_bitrate: Option<u64>,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            probe_size: DEFAULT_PROBE_SIZE,
            max_sync_scan: DEFAULT_MAX_SYNC_SCAN,
            audio_only_probe_limit: DEFAULT_AUDIO_ONLY_PROBE_LIMIT,
            video: PidRequest::Auto,
            audio: PidRequest::Auto,
            program: None,
            keep_broken: false,
            check_crc: false,
            max_queued_units: DEFAULT_MAX_QUEUED_UNITS,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
            default_bitrate: None,
        }
    }
}

impl DemuxConfig {
    /// Defaults, then `./tsdemux.toml` if present, then environment variables.
    pub fn new() -> Self {
        let mut config = Self::default();

        for path in ["./tsdemux.toml", "./tsdemux_config.toml"] {
            if Path::new(path).exists() {
                if let Err(e) = config.load_file(path) {
                    log::warn!("ignoring config file {}: {}", path, e);
                }
            }
        }

        config.apply_env();
        config
    }

    /// Applies `TSDEMUX_<KEY>` variables; invalid values are logged and ignored.
    pub fn apply_env(&mut self) {
        for key in KEYS {
            let var = format!("TSDEMUX_{}", key.to_ascii_uppercase());
            if let Ok(value) = env::var(&var) {
                if let Err(e) = self.set(key, &value) {
                    log::warn!("ignoring {}: {}", var, e);
                }
            }
        }
    }

    /// Reads `key = value` lines; `#` starts a comment.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let content = fs::read_to_string(path)?;
        self.load_str(&content)
    }

    pub fn load_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| DemuxError::InvalidData(format!("expected key = value: {}", line)))?;
            self.set(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Sets one option by its file/environment key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "probe_size" => self.probe_size = parse_u64(value)?,
            "max_sync_scan" => self.max_sync_scan = parse_u64(value)? as usize,
            "audio_only_probe_limit" => self.audio_only_probe_limit = parse_u64(value)?,
            "video_pid" => self.video = PidRequest::parse(value)?,
            "audio_pid" => self.audio = PidRequest::parse(value)?,
            "program" => {
                self.program = match value {
                    "" | "auto" => None,
                    v => Some(parse_u16(v)?),
                }
            }
            "keep_broken" => self.keep_broken = parse_bool(value)?,
            "check_crc" => self.check_crc = parse_bool(value)?,
            "max_queued_units" => self.max_queued_units = parse_u64(value)? as usize,
            "max_section_size" => self.max_section_size = parse_u64(value)? as usize,
            "default_bitrate" => {
                self.default_bitrate = match parse_u64(value)? {
                    0 => None,
                    b => Some(b),
                }
            }
            other => {
                return Err(DemuxError::InvalidData(format!("unknown config key: {}", other)));
            }
        }
        Ok(())
    }
}

const KEYS: [&str; 11] = [
    "probe_size",
    "max_sync_scan",
    "audio_only_probe_limit",
    "video_pid",
    "audio_pid",
    "program",
    "keep_broken",
    "check_crc",
    "max_queued_units",
    "max_section_size",
    "default_bitrate",
];

fn parse_u64(value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|e| DemuxError::InvalidData(format!("bad number {:?}: {}", value, e)))
}

fn parse_u16(value: &str) -> Result<u16> {
    let n = parse_u64(value)?;
    u16::try_from(n).map_err(|_| DemuxError::InvalidData(format!("{} out of range", n)))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DemuxError::InvalidData(format!("bad boolean: {}", value))),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# tsdemux configuration
# Every key may also be set through TSDEMUX_<KEY> in the environment.

# Bytes read while probing for audio/video streams
probe_size = 2000000

# auto, none, or a PID (decimal or 0x hex)
video_pid = "auto"
audio_pid = "auto"

# Deliver units whose start was lost (e.g. right after a seek)
keep_broken = false

# Drop PAT/PMT sections with a bad CRC
check_crc = false
"#;
        fs::write(path, template)?;
    }
    Ok(())
}
