use shop_events::config::{env_lookup, parse_or, string_or, ConfigError};

/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@shop.local";

/// HTTP server configuration for the health endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8002`).
    pub port: u16,
}

impl ServerConfig {
    /// | Env Var | Default   |
    /// |---------|-----------|
    /// | `HOST`  | `0.0.0.0` |
    /// | `PORT`  | `8002`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: string_or(&lookup, "HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 8002)?,
        })
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl SmtpConfig {
    /// Load SMTP settings from the environment.
    ///
    /// Returns `Ok(None)` when `SMTP_HOST` is not set: mail delivery is not
    /// configured and mail is logged instead of sent.
    ///
    /// | Variable        | Required | Default              |
    /// |-----------------|----------|----------------------|
    /// | `SMTP_HOST`     | yes      |                      |
    /// | `SMTP_PORT`     | no       | `587`                |
    /// | `SMTP_FROM`     | no       | `noreply@shop.local` |
    /// | `SMTP_USER`     | no       |                      |
    /// | `SMTP_PASSWORD` | no       |                      |
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Option<Self>, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let Some(host) = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) else {
            return Ok(None);
        };

        let user = lookup("SMTP_USER").filter(|v| !v.is_empty());
        let password = lookup("SMTP_PASSWORD").filter(|v| !v.is_empty());
        if user.is_some() != password.is_some() {
            return Err(ConfigError::Missing {
                key: if user.is_some() { "SMTP_PASSWORD" } else { "SMTP_USER" },
            });
        }

        Ok(Some(Self {
            host: host.trim().to_string(),
            port: parse_or(&lookup, "SMTP_PORT", DEFAULT_SMTP_PORT)?,
            from_address: string_or(&lookup, "SMTP_FROM", DEFAULT_FROM_ADDRESS),
            user,
            password,
        }))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8002);
    }

    #[test]
    fn smtp_is_optional() {
        assert!(SmtpConfig::from_lookup(|_| None).unwrap().is_none());
    }

    #[test]
    fn smtp_defaults_apply() {
        let config = SmtpConfig::from_lookup(|key| (key == "SMTP_HOST").then(|| "mail.local".into()))
            .unwrap()
            .unwrap();
        assert_eq!(config.host, "mail.local");
        assert_eq!(config.port, DEFAULT_SMTP_PORT);
        assert_eq!(config.from_address, DEFAULT_FROM_ADDRESS);
        assert!(config.user.is_none());
    }

    #[test]
    fn smtp_user_requires_password() {
        let result = SmtpConfig::from_lookup(|key| match key {
            "SMTP_HOST" => Some("mail.local".into()),
            "SMTP_USER" => Some("mailer".into()),
            _ => None,
        });
        assert_matches!(result, Err(ConfigError::Missing { key: "SMTP_PASSWORD" }));
    }
}
