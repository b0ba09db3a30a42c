//! Configuration loading and management

/// TCP listen address. Fixed, like the rest of the transport surface.
pub const LISTEN_HOST: &str = "0.0.0.0";
pub const LISTEN_PORT: u16 = 10300;

/// Environment variable carrying the webhook endpoint
pub const WEBHOOK_URL_ENV: &str = "STT_WEBHOOK_URL";

/// Stand-in value when the variable is unset; requests against it fail, so
/// seeing it in the config is the misconfiguration signal.
pub const WEBHOOK_URL_PLACEHOLDER: &str = "YOUR_WEBHOOK_URL_HERE";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Webhook endpoint that receives the WAV upload
    pub webhook_url: String,
}

impl Config {
    /// Load configuration from the environment
    pub fn load() -> Self {
        let webhook_url = std::env::var(WEBHOOK_URL_ENV)
            .unwrap_or_else(|_| WEBHOOK_URL_PLACEHOLDER.to_string());

        Self { webhook_url }
    }

    /// True when the webhook URL still carries the placeholder value
    pub fn is_placeholder(&self) -> bool {
        self.webhook_url == WEBHOOK_URL_PLACEHOLDER
    }

    /// Address the Wyoming server binds to
    pub fn listen_addr(&self) -> String {
        format!("{LISTEN_HOST}:{LISTEN_PORT}")
    }
}
