//! Configuration files
//!
//! Alarm configs and track filters live in two text files, by default in
//! the platform configuration directory. Both are read at startup and
//! written back on shutdown.

use directories::ProjectDirs;
use log::{debug, info};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracksentry_core::Engine;

use crate::error::ServerError;
use crate::Cli;

const ALARM_CONFIG_FILE: &str = "alarms.cfg";
const FILTER_CONFIG_FILE: &str = "filters.cfg";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tracksentry", "tracksentry")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFiles {
    pub alarms: Option<PathBuf>,
    pub filters: Option<PathBuf>,
}

impl ConfigFiles {
    pub fn from_args(args: &Cli) -> Self {
        let dir = get_project_dirs().map(|d| d.config_dir().to_owned());
        let default = |name: &str| dir.as_ref().map(|d| d.join(name));
        ConfigFiles {
            alarms: args.alarm_config.clone().or_else(|| default(ALARM_CONFIG_FILE)),
            filters: args.filter_config.clone().or_else(|| default(FILTER_CONFIG_FILE)),
        }
    }

    /// Filters load first so configs can refer to the same shapes and
    /// track groups.
    pub fn load(&self, engine: &mut Engine, now_ms: u64) -> Result<(), ServerError> {
        if let Some(path) = &self.filters {
            if let Some(text) = read_optional(path)? {
                let n = engine
                    .load_filter_config(&text, false, now_ms)
                    .map_err(|source| ServerError::Config {
                        path: path.clone(),
                        source,
                    })?;
                info!("Loaded {} filters from {}", n, path.display());
            }
        }
        if let Some(path) = &self.alarms {
            if let Some(text) = read_optional(path)? {
                let n = engine
                    .load_alarm_config(&text, false)
                    .map_err(|source| ServerError::Config {
                        path: path.clone(),
                        source,
                    })?;
                info!("Loaded {} alarm configs from {}", n, path.display());
            }
        }
        Ok(())
    }

    pub fn save(&self, engine: &Engine) -> Result<(), ServerError> {
        let alarms = self.alarms.as_ref().ok_or(ServerError::NoConfigDir)?;
        let filters = self.filters.as_ref().ok_or(ServerError::NoConfigDir)?;
        write_file(alarms, &engine.save_alarm_config(false))?;
        write_file(filters, &engine.save_filter_config(false))?;
        info!("Saved configuration to {}", alarms.display());
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ServerError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No configuration file {}, starting empty", path.display());
            Ok(None)
        }
        Err(source) => Err(ServerError::Io {
            path: path.to_owned(),
            source,
        }),
    }
}

fn write_file(path: &Path, text: &str) -> Result<(), ServerError> {
    let io = |source| ServerError::Io {
        path: path.to_owned(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, text).map_err(io)?;
    debug!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksentry_core::condition::{ConditionType, Operator};

    fn files(dir: &Path) -> ConfigFiles {
        ConfigFiles {
            alarms: Some(dir.join("nested").join(ALARM_CONFIG_FILE)),
            filters: Some(dir.join("nested").join(FILTER_CONFIG_FILE)),
        }
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new();
        files(dir.path()).load(&mut engine, 0).unwrap();
        assert_eq!(engine.alarms().configs().count(), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());

        let mut engine = Engine::new();
        let config = engine.with_alarms(|a| a.create_config("Slow", false));
        engine
            .edit_config(config, 0, |c| {
                let id = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
                c.group_mut().update_condition(id, |c| {
                    let op = c.set_arg_operator(Operator::LessThan)?;
                    Ok(op | c.set_arg_value(1.0)?)
                })
            })
            .unwrap();
        files.save(&engine).unwrap();

        let mut loaded = Engine::new();
        files.load(&mut loaded, 0).unwrap();
        let names: Vec<_> = loaded
            .alarms()
            .configs()
            .map(|c| c.group().display_name().to_string())
            .collect();
        assert_eq!(names, vec!["Slow".to_string()]);
    }

    #[test]
    fn test_bad_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());
        let path = files.alarms.clone().unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "AlarmConfig\n").unwrap();

        let mut engine = Engine::new();
        match files.load(&mut engine, 0) {
            Err(ServerError::Config { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }
}
