// cli.rs
use clap::Parser;
use clap::builder::BoolishValueParser;
use std::path::PathBuf;

use crate::config::Settings;

/// Positional process arguments, in the order the light server passes them.
#[derive(Debug, Parser)]
#[command(name = "home-dashboard", version, about = "Home automation web gateway")]
pub struct Cli {
    /// Port to listen on
    pub port: Option<u16>,
    /// Locale code for page texts
    pub locale: Option<String>,
    /// Whether the light server expects an encrypted connection
    #[arg(value_parser = BoolishValueParser::new())]
    pub ssl: Option<bool>,
    /// TLS key file (only with ssl)
    pub key_file: Option<PathBuf>,
    /// TLS certificate file (only with ssl)
    pub cert_file: Option<PathBuf>,
}

impl Cli {
    /// Folds the arguments into the loaded settings.
    pub fn apply(&self, settings: &mut Settings) -> anyhow::Result<()> {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(locale) = &self.locale {
            settings.locale.default = locale.clone();
        }
        if self.ssl.unwrap_or(false) {
            if self.key_file.is_none() || self.cert_file.is_none() {
                anyhow::bail!("ssl requires both a key file and a cert file");
            }
            anyhow::bail!(
                "TLS termination is not built into the gateway; run it behind a TLS proxy with ssl=false"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_override_settings() {
        let cli = Cli::try_parse_from(["home-dashboard", "9000", "fr", "false"]).unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.locale.default, "fr");
    }

    #[test]
    fn no_arguments_keep_settings() {
        let cli = Cli::try_parse_from(["home-dashboard"]).unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.locale.default, "en");
    }

    #[test]
    fn ssl_needs_key_and_cert() {
        let cli = Cli::try_parse_from(["home-dashboard", "443", "en", "true"]).unwrap();
        let err = cli.apply(&mut Settings::default()).unwrap_err();
        assert!(err.to_string().contains("key file"));

        let cli = Cli::try_parse_from(["home-dashboard", "443", "en", "true", "k.pem", "c.pem"])
            .unwrap();
        assert!(cli.apply(&mut Settings::default()).is_err());
    }
}
