use std::path::Path;

use anyhow::{Context, bail};

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.server.health.enabled && !config.server.health.path.starts_with('/') {
        bail!("Health endpoint path '{}' must start with '/'", config.server.health.path);
    }

    let warnings = config.server.rate_limit.validate()?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use crate::Config;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_file() {
        let file = write_config(indoc! {r#"
            [server.rate_limit]
            enabled = true
            window = "30s"
            limit = 10
        "#});

        let config = Config::load(file.path()).unwrap();

        assert!(config.server.rate_limit.enabled);
        assert_eq!(config.server.rate_limit.limit, 10);
        assert_eq!(config.server.rate_limit.window.as_secs(), 30);
    }

    #[test]
    fn rejects_invalid_values_on_load() {
        let file = write_config(indoc! {r#"
            [server.rate_limit]
            enabled = true
            window = "0s"
        "#});

        let error = Config::load(file.path()).unwrap_err();

        insta::assert_snapshot!(error.to_string(), @"Rate limit window must be greater than zero");
    }

    #[test]
    fn rejects_relative_health_path() {
        let config: Config = toml::from_str(indoc! {r#"
            [server.health]
            path = "health"
        "#})
        .unwrap();

        let error = config.validate().unwrap_err();

        insta::assert_snapshot!(error.to_string(), @"Health endpoint path 'health' must start with '/'");
    }

    #[test]
    fn missing_file_reports_path() {
        let error = Config::load("/definitely/not/here.toml").unwrap_err();

        insta::assert_snapshot!(error.to_string(), @"Failed to read configuration file /definitely/not/here.toml");
    }
}
