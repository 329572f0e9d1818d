pub mod classify;
pub mod config;
pub mod engine;
pub mod features;
pub mod flow;
pub mod frame;
pub mod models;
pub mod store;
pub mod vxlan;

use anyhow::Result;

pub use classify::{Classifier, RateClassifier};
pub use config::Config;
pub use engine::{Sensor, StatsSnapshot};
pub use flow::{FlowKey, TenantMapper, VniTenantMapper};
pub use models::{Detection, FeatureRecord, Observation, Verdict, VerdictLabel};
pub use store::{DetectionStore, SqliteStore};

/// Build a sensor wired with the built-in collaborators: the rate
/// classifier and the SQLite detection store from the configuration.
/// Callers with a real model or a different sink construct
/// [`Sensor`] directly.
pub fn build_sensor(config: Config) -> Result<Sensor> {
    let store = SqliteStore::open(config.db_path())?;
    let classifier = RateClassifier::new(config.classifier.bps_threshold);
    Ok(Sensor::new(config, Box::new(classifier), Box::new(store)))
}
