use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use keel_trust::TrustConfig;
use toml_edit::{DocumentMut, Item, Table, value};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the trust config file, keeping any values already set
    Init,
    /// Prints the effective config, defaults included
    Show,
}

impl CmdConfig {
    pub fn run(self, config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
        match self {
            Self::Init => init(config_file, local_data_dir),
            Self::Show => {
                let config = crate::cmd::load_config(&config_file)?;
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}

fn init(config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
    let mut doc = if config_file.exists() {
        fs::read_to_string(&config_file)?
    } else {
        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        "".to_owned()
    }
    .parse::<DocumentMut>()
    .context("could not parse trust config file")?;

    let defaults = TrustConfig::in_dir(local_data_dir);
    let path_value = |path: &Path| -> anyhow::Result<Item> {
        let path = path
            .to_str()
            .with_context(|| format!("path {path:?} is not valid UTF-8"))?;
        Ok(value(path))
    };
    if !doc.contains_key("repository_path") {
        doc.insert("repository_path", path_value(&defaults.repository_path)?);
    }
    if !doc.contains_key("keys_path") {
        doc.insert("keys_path", path_value(&defaults.keys_path)?);
    }
    if !doc.contains_key("consistent_snapshot") {
        doc.insert("consistent_snapshot", value(defaults.consistent_snapshot));
    }

    let thresholds = doc
        .entry("thresholds")
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .context("`thresholds` must be a table")?;
    for (key, threshold) in [
        ("root", defaults.thresholds.root),
        ("targets", defaults.thresholds.targets),
    ] {
        thresholds
            .entry(key)
            .or_insert(value(i64::from(threshold)));
    }

    let expiry = doc
        .entry("expiry")
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .context("`expiry` must be a table")?;
    for (key, secs) in [
        ("root", defaults.expiry.root),
        ("targets", defaults.expiry.targets),
        ("snapshot", defaults.expiry.snapshot),
        ("timestamp", defaults.expiry.timestamp),
    ] {
        expiry
            .entry(key)
            .or_insert(value(i64::try_from(secs).context("expiry out of range")?));
    }

    // parse what we are about to write so a broken file never lands
    let config: TrustConfig =
        toml::from_str(&doc.to_string()).context("generated config does not parse")?;
    config.validate()?;

    info!("writing to config file {config_file:?}");

    let tmp_path = config_file.with_extension("tmp");
    let mut tmp = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp.write_all(doc.to_string().as_bytes())?;
    tmp.sync_all()?;
    std::fs::rename(&tmp_path, config_file)?;
    Ok(())
}
