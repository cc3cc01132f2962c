use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the conductor worker and CLI.
///
/// Built once at startup from the environment (after `dotenvy` has loaded
/// `.env`) and passed explicitly into the components that need it — the core
/// never reads environment variables itself.
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent CLI binary to invoke (name or absolute path).
    pub agent_cmd: String,
    /// Base directory under which per-task session workspaces are created.
    pub session_base_dir: PathBuf,
    /// Wall-clock limit for one agent process. `None` disables the limit.
    pub task_timeout: Option<Duration>,
    /// Upper bound on concurrently running tasks in worker mode.
    pub max_concurrent_tasks: usize,
    /// Access token injected into https clone URLs when present.
    pub git_token: Option<String>,
    /// Committer identity applied to cloned repositories.
    pub git_user_name: String,
    pub git_user_email: String,
    /// Directory for the rolling log file. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_MAX_CONCURRENT: usize = 5;

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_cmd: "claude".to_string(),
            session_base_dir: std::env::temp_dir().join("conductor-sessions"),
            task_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT,
            git_token: None,
            git_user_name: "Conductor Agent".to_string(),
            git_user_email: "agent@conductor.invalid".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Build a Config from the process environment, falling back to defaults
    /// for anything unset. A `TASK_TIMEOUT_SECONDS` of 0 disables the
    /// per-task timeout.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(cmd) = std::env::var("AGENT_CMD") {
            config.agent_cmd = cmd;
        }
        if let Ok(dir) = std::env::var("SESSION_BASE_DIR") {
            config.session_base_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("TASK_TIMEOUT_SECONDS")
            && let Ok(secs) = secs.parse::<u64>()
        {
            config.task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(n) = std::env::var("MAX_CONCURRENT_TASKS")
            && let Ok(n) = n.parse::<usize>()
            && n > 0
        {
            config.max_concurrent_tasks = n;
        }
        if let Ok(token) = std::env::var("GH_TOKEN")
            && !token.is_empty()
        {
            config.git_token = Some(token);
        }
        if let Ok(name) = std::env::var("GIT_USER_NAME") {
            config.git_user_name = name;
        }
        if let Ok(email) = std::env::var("GIT_USER_EMAIL") {
            config.git_user_email = email;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }

        config
    }
}
