use std::env;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    pub queue_type: String,
    pub nats_url: String,

    pub enable_stripe: bool,
    pub enable_razorpay: bool,
    pub enable_mock: bool,
    pub stripe_secret_key: Option<String>,
    pub razorpay_key_id: Option<String>,
    pub razorpay_key_secret: Option<String>,

    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,

    pub webhook_timeout_ms: u64,
    pub webhook_max_retries: i32,

    pub mock_success_rate: f64,
    pub mock_average_latency_ms: u64,
    pub mock_enable_chaos: bool,
    pub mock_chaos_rate: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let queue_type = env::var("QUEUE_TYPE").unwrap_or_else(|_| "inmemory".to_string());
        if queue_type != "inmemory" && queue_type != "nats" {
            return Err(format!(
                "Invalid QUEUE_TYPE: {}. Must be 'inmemory' or 'nats'",
                queue_type
            ));
        }
        let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let enable_stripe = env_bool("ENABLE_STRIPE", false)?;
        let enable_razorpay = env_bool("ENABLE_RAZORPAY", false)?;
        let enable_mock = env_bool("ENABLE_MOCK", true)?;
        if !enable_stripe && !enable_razorpay && !enable_mock {
            return Err("At least one gateway must be enabled".to_string());
        }

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").ok();
        if enable_stripe && stripe_secret_key.is_none() {
            return Err("STRIPE_SECRET_KEY must be set when ENABLE_STRIPE=true".to_string());
        }

        let razorpay_key_id = env::var("RAZORPAY_KEY_ID").ok();
        let razorpay_key_secret = env::var("RAZORPAY_KEY_SECRET").ok();
        if enable_razorpay && (razorpay_key_id.is_none() || razorpay_key_secret.is_none()) {
            return Err(
                "RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET must be set when ENABLE_RAZORPAY=true"
                    .to_string(),
            );
        }

        let rate_limit_max = env_parse("RATE_LIMIT_MAX", 100u32)?;
        let rate_limit_window_ms = env_parse("RATE_LIMIT_WINDOW_MS", 60_000u64)?;

        let webhook_timeout_ms = env_parse("WEBHOOK_TIMEOUT_MS", 30_000u64)?;
        let webhook_max_retries = env_parse("WEBHOOK_MAX_RETRIES", 10i32)?;
        if webhook_max_retries < 1 {
            return Err("WEBHOOK_MAX_RETRIES must be >= 1".to_string());
        }

        let mock_success_rate = env_parse("MOCK_GATEWAY_SUCCESS_RATE", 1.0f64)?;
        if !(0.0..=1.0).contains(&mock_success_rate) {
            return Err("MOCK_GATEWAY_SUCCESS_RATE must be within [0, 1]".to_string());
        }
        let mock_average_latency_ms = env_parse("MOCK_GATEWAY_AVERAGE_LATENCY_MS", 100u64)?;
        let mock_enable_chaos = env_bool("MOCK_GATEWAY_ENABLE_CHAOS", false)?;
        let mock_chaos_rate = env_parse("MOCK_GATEWAY_CHAOS_RATE", 0.1f64)?;
        if !(0.0..=1.0).contains(&mock_chaos_rate) {
            return Err("MOCK_GATEWAY_CHAOS_RATE must be within [0, 1]".to_string());
        }

        Ok(Config {
            database_url,
            host,
            port,
            queue_type,
            nats_url,
            enable_stripe,
            enable_razorpay,
            enable_mock,
            stripe_secret_key,
            razorpay_key_id,
            razorpay_key_secret,
            rate_limit_max,
            rate_limit_window_ms,
            webhook_timeout_ms,
            webhook_max_retries,
            mock_success_rate,
            mock_average_latency_ms,
            mock_enable_chaos,
            mock_chaos_rate,
        })
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, String> {
    match env::var(name) {
        Ok(v) => v
            .parse::<bool>()
            .map_err(|_| format!("{} must be 'true' or 'false'", name)),
        Err(_) => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(v) => v.parse::<T>().map_err(|_| format!("{} is invalid", name)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "DATABASE_URL",
            "QUEUE_TYPE",
            "ENABLE_STRIPE",
            "ENABLE_RAZORPAY",
            "ENABLE_MOCK",
            "STRIPE_SECRET_KEY",
            "MOCK_GATEWAY_SUCCESS_RATE",
            "WEBHOOK_MAX_RETRIES",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn requires_database_url() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_apply() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.queue_type, "inmemory");
        assert!(cfg.enable_mock);
        assert!(!cfg.enable_stripe);
        assert_eq!(cfg.webhook_max_retries, 10);
        assert_eq!(cfg.webhook_timeout_ms, 30_000);
        assert_eq!(cfg.mock_success_rate, 1.0);
        clear_env();
    }

    #[test]
    #[serial]
    fn stripe_requires_secret_key() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("ENABLE_STRIPE", "true");
        assert!(Config::from_env().is_err());
        env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        assert!(Config::from_env().is_ok());
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_out_of_range_success_rate() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("MOCK_GATEWAY_SUCCESS_RATE", "1.5");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
