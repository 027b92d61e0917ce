use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_WEBHOOK_SECRET: &str = "secret123";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 10000;

const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
const ENV_WEBHOOK_SECRET: &str = "WH_SECRET";
const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_SECRET_TOKEN: &str = "TG_SECRET_TOKEN";
const ENV_PUBLIC_URL: &str = "PUBLIC_URL";

/// Process-wide settings, resolved once at startup.
#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    /// Path segment that gates `/webhook/{secret}`.
    pub webhook_secret: String,
    pub host: String,
    pub port: u16,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header, if any.
    pub secret_token: Option<String>,
    /// Public base URL; when set the webhook is registered with Telegram on startup.
    pub public_url: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_token", &self.secret_token.as_ref().map(|_| "<redacted>"))
            .field("public_url", &self.public_url)
            .finish()
    }
}

/// Optional TOML file layer. Every key may be omitted.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    bot_token: Option<String>,
    #[serde(default)]
    webhook_secret: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    secret_token: Option<String>,
    #[serde(default)]
    public_url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load settings from the optional config file, then let environment
    /// variables override each key.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(bot_token) = non_blank(env(ENV_BOT_TOKEN)).or(non_blank(file.bot_token)) else {
            bail!("{} is not set; refusing to start without a bot token", ENV_BOT_TOKEN);
        };

        let webhook_secret = non_blank(env(ENV_WEBHOOK_SECRET))
            .or(non_blank(file.webhook_secret))
            .unwrap_or_else(|| DEFAULT_WEBHOOK_SECRET.to_string());

        let host = non_blank(env(ENV_HOST))
            .or(non_blank(file.host))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match non_blank(env(ENV_PORT)) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid {} value: {:?}", ENV_PORT, raw))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let secret_token = non_blank(env(ENV_SECRET_TOKEN)).or(non_blank(file.secret_token));
        let public_url = non_blank(env(ENV_PUBLIC_URL))
            .or(non_blank(file.public_url))
            .map(|url| url.trim_end_matches('/').to_string());

        Ok(Self {
            bot_token,
            webhook_secret,
            host,
            port,
            secret_token,
            public_url,
        })
    }

    /// Socket address the webhook server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full webhook URL Telegram should call, when a public URL is known.
    pub fn webhook_url(&self) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{}/webhook/{}", base, self.webhook_secret))
    }
}
