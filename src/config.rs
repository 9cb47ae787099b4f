use std::env::VarError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable \"{key}\"\n\tMessage: {message}")]
    Missing { key: String, message: String },
    #[error("Could not parse environment variable: {key}\n\tGot: {value}\n\tMessage: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },
}

pub trait Var {
    const NAME: &'static str;
    type Type;

    fn from_env() -> Result<Self::Type, ConfigError>;
}

/// Read an optional variable, falling back to `default` when it is unset.
fn optional<T, F>(name: &'static str, default: T, parse: F) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<T, String>,
{
    match std::env::var(name) {
        Ok(raw) => parse(raw.trim()).map_err(|message| ConfigError::Invalid {
            key: name.to_string(),
            value: raw,
            message,
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(err) => Err(ConfigError::Missing {
            key: name.to_string(),
            message: err.to_string(),
        }),
    }
}

pub struct MaxUploadSizeMb;
pub struct EnableGpu;
pub struct GpuMemoryLimitMb;
pub struct ModelSaveDir;

impl Var for MaxUploadSizeMb {
    const NAME: &'static str = "MAX_UPLOAD_SIZE";
    type Type = u64;

    fn from_env() -> Result<u64, ConfigError> {
        optional(Self::NAME, 10, |raw| {
            raw.parse::<u64>().map_err(|err| err.to_string())
        })
    }
}

impl Var for EnableGpu {
    const NAME: &'static str = "ENABLE_GPU";
    type Type = bool;

    fn from_env() -> Result<bool, ConfigError> {
        optional(Self::NAME, false, |raw| {
            match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(format!("expected \"true\" or \"false\", got \"{}\"", other)),
            }
        })
    }
}

impl Var for GpuMemoryLimitMb {
    const NAME: &'static str = "GPU_MEMORY_LIMIT";
    type Type = u64;

    fn from_env() -> Result<u64, ConfigError> {
        optional(Self::NAME, 4096, |raw| {
            raw.parse::<u64>().map_err(|err| err.to_string())
        })
    }
}

impl Var for ModelSaveDir {
    const NAME: &'static str = "MODEL_SAVE_DIR";
    type Type = PathBuf;

    fn from_env() -> Result<PathBuf, ConfigError> {
        optional(Self::NAME, std::env::temp_dir(), |raw| Ok(PathBuf::from(raw)))
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Upper bound for a single uploaded table, in bytes.
    pub max_upload_bytes: u64,
    pub enable_gpu: bool,
    pub gpu_memory_limit_mb: u64,
    pub model_save_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_upload_mb = MaxUploadSizeMb::from_env()?;
        let enable_gpu = EnableGpu::from_env()?;
        let gpu_memory_limit_mb = GpuMemoryLimitMb::from_env()?;
        let model_save_dir = ModelSaveDir::from_env()?;

        tracing::info!(
            message = "Configuration loaded",
            max_upload_mb = max_upload_mb,
            enable_gpu = enable_gpu,
            gpu_memory_limit_mb = gpu_memory_limit_mb,
            model_save_dir = %model_save_dir.display(),
        );

        Ok(RuntimeConfig {
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            enable_gpu,
            gpu_memory_limit_mb,
            model_save_dir,
        })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_upload_bytes: 10 * 1024 * 1024,
            enable_gpu: false,
            gpu_memory_limit_mb: 4096,
            model_save_dir: std::env::temp_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        // Environment variables are process-global, so only assert on the
        // default constructor here.
        let config = RuntimeConfig::default();
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(!config.enable_gpu);
        assert_eq!(config.gpu_memory_limit_mb, 4096);
    }
}
