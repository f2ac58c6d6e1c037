use argh::FromArgs;
use color_eyre::{eyre::eyre, Report};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::flag::{FlagConfig, FlagSource};
use crate::store::Tag;
use crate::survey::{ExtraFields, Selector};

#[derive(FromArgs)]
/// Forpost
pub struct Args {
    /// path to toml configuration file
    #[argh(positional)]
    pub toml: String,

    /// enable debug logging
    #[argh(switch)]
    pub debug: bool,
}

impl Args {
    pub fn get_config(&self) -> Result<Root, Report> {
        let toml = std::fs::read_to_string(&self.toml)?;
        Ok(toml::from_str(&toml)?)
    }

    pub fn setup_logging(&self) -> Result<(), Report> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if self.debug {
                "debug,hyper=info"
            } else {
                "info"
            }
            .into()
        });

        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Root {
    pub gateway: Gateway,
    pub event: Event,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gateway {
    /// address the front door binds, ex. "0.0.0.0:8080"
    pub listen: String,
    /// origin of the upstream scoreboard, ex. "http://127.0.0.1:8000"
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub title: String,
    #[serde(default)]
    pub flags: Vec<FlagEntry>,
    pub survey: Option<Survey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagEntry {
    pub tag: String,
    #[serde(rename = "static")]
    pub static_value: Option<String>,
    pub env: Option<String>,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

impl FlagEntry {
    pub fn to_flag_config(&self) -> Result<FlagConfig, Report> {
        let tag: Tag = self.tag.parse()?;

        let source = match (&self.static_value, &self.env) {
            (Some(value), None) => FlagSource::Static(value.clone()),
            (None, Some(name)) => FlagSource::Env(name.clone()),
            _ => {
                return Err(eyre!(
                    "flag {} must set exactly one of static/env",
                    self.tag
                ))
            }
        };

        Ok(FlagConfig { tag, source })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Survey {
    pub title: String,
    pub rows: Vec<Vec<SelectorEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorEntry {
    pub label: String,
    pub name: String,
    pub options: Vec<String>,
}

impl Survey {
    pub fn to_extra_fields(&self) -> ExtraFields {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|s| Selector::new(&s.label, &s.name, s.options.clone()))
                    .collect()
            })
            .collect();

        ExtraFields::new(&self.title, rows)
    }
}
