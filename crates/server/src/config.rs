use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub media_path: String,
    pub public_url: String,
    pub jwt_secret: String,
    pub admin_emails: Vec<String>,
    /// Seconds between background expiry sweeps; 0 leaves sweeping to list loads only.
    pub sweep_interval_secs: u64,
    pub stripe: StripeConfig,
}

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/artisthive.db?mode=rwc".to_string()),
            media_path: env::var("MEDIA_PATH").unwrap_or_else(|_| "./data/media".to_string()),
            public_url: env::var("PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            admin_emails: env::var("ADMIN_EMAILS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            stripe: StripeConfig {
                secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
                api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                success_url: env::var("CHECKOUT_SUCCESS_URL")
                    .unwrap_or_else(|_| "https://www.google.com/?success=true".to_string()),
                cancel_url: env::var("CHECKOUT_CANCEL_URL")
                    .unwrap_or_else(|_| "https://www.google.com/?canceled=true".to_string()),
            },
        }
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email.trim()))
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_ignores_blanks_and_case() {
        let mut config = Config::from_env();
        config.admin_emails = parse_list(" ops@artisthive.ro, ,Root@Example.com ");
        assert_eq!(config.admin_emails.len(), 2);
        assert!(config.is_admin_email("root@example.com"));
        assert!(!config.is_admin_email("someone@example.com"));
    }
}
