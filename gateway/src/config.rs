use std::str::FromStr;

use anyhow::{bail, Context, Result};

const DEFAULT_PORT: u16 = 8080;

/// Which request/response convention the HTTP surface follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiStyle {
    /// `GET /ping` → "pong", `POST /invoke` → `{completion}`.
    #[default]
    Basic,
    /// `GET /ping` → `{status:"Healthy"}`, `POST /invocations` → `{response, status}`.
    Managed,
}

impl FromStr for ApiStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ApiStyle::Basic),
            "managed" => Ok(ApiStyle::Managed),
            other => bail!("API_STYLE must be 'basic' or 'managed', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub api_style: ApiStyle,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", raw))?,
            None => DEFAULT_PORT,
        };
        let api_style = match lookup("API_STYLE") {
            Some(raw) => raw.parse()?,
            None => ApiStyle::default(),
        };
        Ok(Self { port, api_style })
    }
}
