use std::{env, fs, path::Path, thread, time::Duration};

use crate::{errors::Error, pool::Backpressure, Result};

/// Engine settings: how handler work is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: 256,
            backpressure: Backpressure::Block,
        }
    }
}

/// Typed process configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: String,

    // Long polling
    pub poll_timeout: Duration,
    pub poll_limit: u32,
    pub allowed_updates: Vec<String>,
    pub poll_retry_delay: Duration,
    pub initial_offset: Option<u64>,

    // Handler execution
    pub dispatcher: DispatcherConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_api_url = env_str("TELEGRAM_API_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://api.telegram.org".to_string());

        let poll_timeout = Duration::from_secs(env_u64("POLL_TIMEOUT_SECS").unwrap_or(30));
        // Bot API accepts 1..=100.
        let poll_limit = env_u32("POLL_LIMIT").unwrap_or(100).clamp(1, 100);
        let allowed_updates = parse_csv_lower(env_str("ALLOWED_UPDATES"));
        let poll_retry_delay =
            Duration::from_millis(env_u64("POLL_RETRY_DELAY_MS").unwrap_or(1000));
        let initial_offset = env_u64("INITIAL_OFFSET");

        let workers = env_usize("WORKER_COUNT")
            .unwrap_or_else(default_workers)
            .max(1);
        let queue_capacity = env_usize("QUEUE_CAPACITY").unwrap_or(256).max(1);
        let backpressure = match env_str("QUEUE_POLICY").and_then(non_empty) {
            Some(s) => s.parse()?,
            None => Backpressure::Block,
        };

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            poll_timeout,
            poll_limit,
            allowed_updates,
            poll_retry_delay,
            initial_offset,
            dispatcher: DispatcherConfig {
                workers,
                queue_capacity,
                backpressure,
            },
        })
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(v: &str) -> &str {
    let quoted = v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')));
    if quoted {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_is_trimmed_and_lowercased() {
        assert_eq!(
            parse_csv_lower(Some(" Message, callback_query ,,".to_string())),
            vec!["message", "callback_query"]
        );
        assert!(parse_csv_lower(None).is_empty());
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("x"), "x");
    }

    #[test]
    fn dotenv_does_not_override_existing_vars() {
        let dir = env::temp_dir().join(format!("tgd-dotenv-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        fs::write(
            &path,
            "# comment\nTGD_TEST_DOTENV_NEW=\"fresh\"\nTGD_TEST_DOTENV_SET=from-file\nnot a pair\n",
        )
        .unwrap();

        env::set_var("TGD_TEST_DOTENV_SET", "from-env");
        load_dotenv_if_present(&path);

        assert_eq!(env::var("TGD_TEST_DOTENV_NEW").unwrap(), "fresh");
        assert_eq!(env::var("TGD_TEST_DOTENV_SET").unwrap(), "from-env");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn dispatcher_default_has_at_least_one_worker() {
        let cfg = DispatcherConfig::default();
        assert!(cfg.workers >= 1);
        assert_eq!(cfg.queue_capacity, 256);
        assert_eq!(cfg.backpressure, Backpressure::Block);
    }
}
