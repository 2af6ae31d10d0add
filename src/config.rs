use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public base URL of this service, used to build the provider's
    /// notification_url.
    pub base_url: String,
    /// MercadoPago access token. Creation fails without it; polling still
    /// degrades gracefully.
    pub access_token: String,
    /// Shared secret for webhook signature verification. Unset = accept
    /// unsigned notifications (the reconciler re-verifies against the
    /// provider API anyway).
    pub webhook_secret: Option<String>,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("QRTILL_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "qrtill.db".to_string()),
            base_url,
            access_token: env::var("MP_ACCESS_TOKEN").unwrap_or_default(),
            webhook_secret: env::var("MP_WEBHOOK_SECRET").ok(),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn notification_url(&self) -> String {
        format!("{}/webhook/mercadopago", self.base_url.trim_end_matches('/'))
    }
}
