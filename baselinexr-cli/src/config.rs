use std::fs;
use std::path::Path;

use anyhow::Result;
use baselinexr_core::SessionConfig;

/// Loads the session tunables. Without a path the built-in defaults are used,
/// a path that does not exist yet gets the defaults written to it.
pub fn load_session_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };

    if !path.exists() {
        let config = SessionConfig::default();
        save_session_config(path, &config)?;
        log::info!("wrote default session config to {:?}", path);
        return Ok(config);
    }

    let config_str = fs::read_to_string(path)?;
    let config = toml::from_str(&config_str)?;
    Ok(config)
}

pub fn save_session_config(path: &Path, config: &SessionConfig) -> Result<()> {
    let config_str = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, config_str)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use baselinexr_core::EstimatorKind;

    use super::*;

    #[test]
    fn defaults_are_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");

        let config = load_session_config(Some(&path)).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(path.exists());
        assert_eq!(load_session_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(
            &path,
            "estimator = \"simple\"\n\n[classifier]\ndeploy_threshold = 0.8\n",
        )
        .unwrap();

        let config = load_session_config(Some(&path)).unwrap();
        assert_eq!(config.estimator, EstimatorKind::Simple);
        assert_eq!(config.classifier.deploy_threshold, 0.8);
        assert_eq!(config.kalman, SessionConfig::default().kalman);
    }
}
