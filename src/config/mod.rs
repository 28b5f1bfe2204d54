use crate::cli::Args;
use std::time::Duration;
use url::Url;

/// The two backends every request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Main,
    Ai,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub name: &'static str,
}

impl ServiceConfig {
    /// Joins a route onto the base URL without doubling slashes.
    pub fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), route.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub main: ServiceConfig,
    pub ai: ServiceConfig,
}

impl ServicesConfig {
    pub fn from_args(args: &Args) -> Result<Self, url::ParseError> {
        Url::parse(&args.api_base_url)?;
        Url::parse(&args.ai_base_url)?;
        Ok(Self {
            main: ServiceConfig {
                base_url: args.api_base_url.clone(),
                timeout: Duration::from_secs(args.api_timeout_secs),
                name: "main service",
            },
            ai: ServiceConfig {
                base_url: args.ai_base_url.clone(),
                timeout: Duration::from_secs(args.ai_timeout_secs),
                name: "AI service",
            },
        })
    }

    pub fn get(&self, service: ServiceType) -> &ServiceConfig {
        match service {
            ServiceType::Main => &self.main,
            ServiceType::Ai => &self.ai,
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            main: ServiceConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
                timeout: Duration::from_secs(30),
                name: "main service",
            },
            ai: ServiceConfig {
                base_url: "http://127.0.0.1:8081/ai".to_string(),
                timeout: Duration::from_secs(60),
                name: "AI service",
            },
        }
    }
}
