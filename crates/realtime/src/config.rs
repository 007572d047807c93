//! Command-line and environment configuration.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use portal_realtime::paths::DataPaths;

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Data directory (default ~/.portal)
    #[arg(long, env = "PORTAL_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Backend base URL for directory lookups
    #[arg(long, env = "PORTAL_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Project API key sent with directory lookups
    #[arg(long, env = "PORTAL_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub stderr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub paths: DataPaths,
    pub log_to_stderr: bool,
    backend_url: Option<String>,
    api_key: Option<String>,
}

impl PortalConfig {
    pub fn from_args(args: &GlobalArgs) -> anyhow::Result<Self> {
        Ok(Self {
            paths: DataPaths::resolve(args.data_dir.as_deref())?,
            log_to_stderr: args.stderr,
            backend_url: args.backend_url.clone().filter(|v| !v.trim().is_empty()),
            api_key: args.api_key.clone().filter(|v| !v.trim().is_empty()),
        })
    }

    /// Backend settings, required only by commands that talk to it.
    pub fn backend(&self) -> anyhow::Result<BackendConfig> {
        let url = self
            .backend_url
            .clone()
            .context("backend URL not set; pass --backend-url or PORTAL_BACKEND_URL")?;
        let api_key = self
            .api_key
            .clone()
            .context("API key not set; pass --api-key or PORTAL_API_KEY")?;
        Ok(BackendConfig { url, api_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &std::path::Path) -> GlobalArgs {
        GlobalArgs {
            data_dir: Some(dir.to_path_buf()),
            ..GlobalArgs::default()
        }
    }

    #[test]
    fn backend_requires_url_and_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut global = args(tmp.path());

        let config = PortalConfig::from_args(&global).expect("config");
        let err = config.backend().expect_err("missing url");
        assert!(err.to_string().contains("--backend-url"));

        global.backend_url = Some("https://example.test".to_string());
        global.api_key = Some("  ".to_string());
        let config = PortalConfig::from_args(&global).expect("config");
        let err = config.backend().expect_err("blank key");
        assert!(err.to_string().contains("--api-key"));

        global.api_key = Some("anon".to_string());
        let config = PortalConfig::from_args(&global).expect("config");
        assert_eq!(
            config.backend().expect("backend"),
            BackendConfig {
                url: "https://example.test".to_string(),
                api_key: "anon".to_string(),
            }
        );
    }

    #[test]
    fn data_dir_flows_into_paths() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = PortalConfig::from_args(&args(tmp.path())).expect("config");
        assert_eq!(config.paths.root(), tmp.path());
        assert!(!config.log_to_stderr);
    }
}
