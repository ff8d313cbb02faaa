//! Process configuration read from the environment

use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEV_JWT_SECRET: &str = "udoconnect-dev-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    /// Bot token; without it outbound Telegram messages are only logged
    pub telegram_token: Option<String>,
    pub telegram_api_base: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("SUPPORT_BOT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".support-bot").join("support.db")
            },
            PathBuf::from,
        );

        let port = var("SUPPORT_BOT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        Self {
            db_path,
            port,
            telegram_token: var("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_api_base: var("TELEGRAM_API_BASE")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            jwt_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/ana")]);
        assert_eq!(config.db_path, PathBuf::from("/home/ana/.support-bot/support.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.telegram_token, None);
        assert_eq!(config.telegram_api_base, "https://api.telegram.org");
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SUPPORT_BOT_DB_PATH", "/var/lib/bot.db"),
            ("SUPPORT_BOT_PORT", "8080"),
            ("TELEGRAM_TOKEN", "123:abc"),
            ("JWT_SECRET", "s3cret"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/bot.db"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
        assert_eq!(config.jwt_secret, "s3cret");
    }

    #[test]
    fn test_invalid_port_falls_back() {
        assert_eq!(config(&[("SUPPORT_BOT_PORT", "puerto")]).port, 3000);
    }
}
