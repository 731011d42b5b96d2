use crate::config::schema::{parse_flag, CrawlConfig, OutputConfig};
use crate::error::{Error, Result};
use crate::output::{console::ConsoleOutput, json::JsonOutput, OutputHandler};
use crate::spider::GenericSpider;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

const ENV_PREFIX: &str = "CRAWLERA_FETCH_";

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CrawlConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        let mut config = Self::load_with_inheritance(path, &mut visited)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_with_inheritance(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<CrawlConfig> {
        let document = Self::load_document(path, visited)?;
        Ok(serde_json::from_value(document)?)
    }

    /// Reads a config file and the chain it extends into one merged document.
    ///
    /// Documents are merged before typed parsing: a key the child writes
    /// replaces the parent's value, even when it equals the default.
    fn load_document(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<Value> {
        let path = fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("{}: {}", path.display(), e))
        })?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let mut document = Self::load_file(&path)?;
        let Value::Object(fields) = &mut document else {
            return Err(Error::Config(format!(
                "{}: expected a table of settings at the top level",
                path.display()
            )));
        };

        match fields.remove("extends") {
            Some(Value::String(parent_path_str)) => {
                let parent_path = path.parent()
                    .ok_or_else(|| Error::Config(format!(
                        "Cannot determine parent directory for {}",
                        path.display()
                    )))?
                    .join(parent_path_str);

                let mut parent = Self::load_document(&parent_path, visited)?;
                merge_documents(&mut parent, document);
                Ok(parent)
            }
            Some(Value::Null) | None => Ok(document),
            Some(other) => Err(Error::Config(format!(
                "{}: extends must be a path, got {}",
                path.display(),
                other
            ))),
        }
    }

    fn load_file(path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    /// Lets deployment secrets live outside the config file.
    pub fn apply_env_overrides<F>(config: &mut CrawlConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(raw) = var("ENABLED") {
            config.fetch.enabled = parse_flag(&raw).ok_or_else(|| {
                Error::Config(format!("{}ENABLED: invalid boolean {:?}", ENV_PREFIX, raw))
            })?;
        }
        if let Some(apikey) = var("APIKEY") {
            config.fetch.apikey = Some(apikey);
        }
        if let Some(apipass) = var("APIPASS") {
            config.fetch.apipass = Some(apipass);
        }
        if let Some(url) = var("URL") {
            config.fetch.url = Some(url);
        }
        Ok(())
    }

    pub fn create_spider(
        config: &CrawlConfig,
        multi: Option<Arc<indicatif::MultiProgress>>,
    ) -> Result<GenericSpider> {
        let handler: Box<dyn OutputHandler> = match &config.output {
            Some(OutputConfig::Json { path }) => Box::new(JsonOutput::new(PathBuf::from(path))?),
            Some(OutputConfig::Console) | None => Box::new(ConsoleOutput::new(multi)),
        };

        Ok(GenericSpider::new(
            config.name.clone(),
            config.start_urls.clone(),
            config.request_args.clone(),
            handler,
        ))
    }
}

/// Tables merge key by key; any other child value replaces the parent's.
fn merge_documents(parent: &mut Value, child: Value) {
    match (parent, child) {
        (Value::Object(parent), Value::Object(child)) => {
            for (key, value) in child {
                match parent.get_mut(&key) {
                    Some(existing) => merge_documents(existing, value),
                    None => {
                        parent.insert(key, value);
                    }
                }
            }
        }
        (parent, child) => *parent = child,
    }
}
