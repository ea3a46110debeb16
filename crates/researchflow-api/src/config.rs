use anyhow::{Result, bail};
use std::env;

/// Process-level settings for the HTTP service, read from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_MAX_CONCURRENCY: usize = 5;

    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("RESEARCHFLOW_API_ADDR")
            .unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = match env::var("RESEARCHFLOW_MAX_CONCURRENT_RUNS") {
            Ok(value) => match value.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => bail!("RESEARCHFLOW_MAX_CONCURRENT_RUNS must be a positive integer"),
            },
            Err(_) => Self::DEFAULT_MAX_CONCURRENCY,
        };

        Ok(Self {
            listen_addr,
            max_concurrency,
        })
    }
}
