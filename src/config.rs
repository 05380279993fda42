use std::{cmp::Ordering, collections::HashMap, env, fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_Q_TABLE_PATH: &str = "q_table_model.json";
const DEFAULT_HISTORICAL_BEST_PATH: &str = "historical_best.json";

/// One row of the historical fallback file, keyed by schedule name in the JSON.
#[derive(Debug, Clone, Deserialize)]
struct HistoricalRecord {
    #[serde(rename = "Persentase Efektif (%)")]
    persentase_efektif: f64,
}

#[derive(Debug, Clone)]
pub struct HistoricalEntry {
    pub jadwal: String,
    pub effectiveness_percent: f64,
}

/// Offline-trained recommendation artifacts, loaded once at startup and shared
/// read-only for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct RecommendationModel {
    value_table: HashMap<String, HashMap<String, f64>>,
    historical_ranking: Vec<HistoricalEntry>,
}

impl RecommendationModel {
    pub fn from_env() -> Result<Self> {
        let q_table_path =
            env::var("Q_TABLE_PATH").unwrap_or_else(|_| DEFAULT_Q_TABLE_PATH.to_string());
        let historical_path = env::var("HISTORICAL_BEST_PATH")
            .unwrap_or_else(|_| DEFAULT_HISTORICAL_BEST_PATH.to_string());

        Self::load(Path::new(&q_table_path), Path::new(&historical_path))
    }

    pub fn load(q_table_path: &Path, historical_path: &Path) -> Result<Self> {
        let raw = fs::read(q_table_path)
            .with_context(|| format!("failed to read value table at {}", q_table_path.display()))?;
        let value_table: HashMap<String, HashMap<String, f64>> = serde_json::from_slice(&raw)
            .with_context(|| {
                format!("failed to parse value table at {}", q_table_path.display())
            })?;

        let historical_ranking = match fs::read(historical_path) {
            Ok(raw) => {
                let records: HashMap<String, HistoricalRecord> = serde_json::from_slice(&raw)
                    .with_context(|| {
                        format!(
                            "failed to parse historical ranking at {}",
                            historical_path.display()
                        )
                    })?;

                let mut entries: Vec<HistoricalEntry> = records
                    .into_iter()
                    .map(|(jadwal, record)| HistoricalEntry {
                        jadwal,
                        effectiveness_percent: record.persentase_efektif,
                    })
                    .collect();

                // Highest percentage first; equal percentages fall back to the
                // schedule name so the ranking is stable across restarts.
                entries.sort_by(|a, b| {
                    b.effectiveness_percent
                        .partial_cmp(&a.effectiveness_percent)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.jadwal.cmp(&b.jadwal))
                });

                entries
            }
            Err(err) => {
                warn!(
                    ?err,
                    path = %historical_path.display(),
                    "historical ranking file missing; fallback recommendations disabled"
                );
                Vec::new()
            }
        };

        info!(
            states = value_table.len(),
            ranking_entries = historical_ranking.len(),
            "recommendation model loaded"
        );

        Ok(Self {
            value_table,
            historical_ranking,
        })
    }

    pub fn actions_for_state(&self, state: &str) -> Option<&HashMap<String, f64>> {
        self.value_table.get(state)
    }

    pub fn historical_ranking(&self) -> &[HistoricalEntry] {
        &self.historical_ranking
    }

    pub fn effectiveness_for(&self, jadwal: &str) -> Option<f64> {
        self.historical_ranking
            .iter()
            .find(|entry| entry.jadwal == jadwal)
            .map(|entry| entry.effectiveness_percent)
    }

    /// Distinct kesibukan prefixes of the known states: everything before the
    /// last underscore of each key. Keys without an underscore carry no
    /// kesibukan component and are skipped.
    pub fn kesibukan_options(&self) -> Vec<String> {
        let mut options: Vec<String> = self
            .value_table
            .keys()
            .filter_map(|state| state.rsplit_once('_'))
            .map(|(kesibukan, _)| kesibukan.to_string())
            .collect();

        options.sort();
        options.dedup();
        options
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        value_table: HashMap<String, HashMap<String, f64>>,
        historical_ranking: Vec<HistoricalEntry>,
    ) -> Self {
        Self {
            value_table,
            historical_ranking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_sorts_ranking_by_percent_then_name() {
        let dir = tempdir().expect("temp dir");
        let q_table = dir.path().join("q_table_model.json");
        let historical = dir.path().join("historical_best.json");

        fs::write(&q_table, r#"{"sibuk_baru": {"Subuh": 0.4, "Malam": 0.7}}"#)
            .expect("write q table");
        fs::write(
            &historical,
            r#"{
                "Subuh": {"Persentase Efektif (%)": 75.0},
                "Malam": {"Persentase Efektif (%)": 90.0},
                "Dzuhur": {"Persentase Efektif (%)": 90.0}
            }"#,
        )
        .expect("write historical");

        let model = RecommendationModel::load(&q_table, &historical).expect("load model");

        let ranking: Vec<&str> = model
            .historical_ranking()
            .iter()
            .map(|entry| entry.jadwal.as_str())
            .collect();
        assert_eq!(ranking, vec!["Dzuhur", "Malam", "Subuh"]);
        assert_eq!(model.effectiveness_for("Subuh"), Some(75.0));
        assert_eq!(model.effectiveness_for("Ashar"), None);
    }

    #[test]
    fn missing_historical_file_leaves_ranking_empty() {
        let dir = tempdir().expect("temp dir");
        let q_table = dir.path().join("q_table_model.json");
        fs::write(&q_table, r#"{"sibuk_baru": {"Subuh": 0.4}}"#).expect("write q table");

        let model = RecommendationModel::load(&q_table, &dir.path().join("absent.json"))
            .expect("load model");

        assert!(model.historical_ranking().is_empty());
        assert!(model.actions_for_state("sibuk_baru").is_some());
    }

    #[test]
    fn corrupt_historical_file_fails_load() {
        let dir = tempdir().expect("temp dir");
        let q_table = dir.path().join("q_table_model.json");
        let historical = dir.path().join("historical_best.json");
        fs::write(&q_table, r#"{}"#).expect("write q table");
        fs::write(&historical, "not json").expect("write historical");

        assert!(RecommendationModel::load(&q_table, &historical).is_err());
    }

    #[test]
    fn missing_value_table_fails_load() {
        let dir = tempdir().expect("temp dir");
        let result = RecommendationModel::load(
            &dir.path().join("absent.json"),
            &dir.path().join("also_absent.json"),
        );

        assert!(result.is_err());
    }

    #[test]
    fn kesibukan_options_are_distinct_sorted_prefixes() {
        let mut value_table = HashMap::new();
        value_table.insert("sibuk_pemula".to_string(), HashMap::new());
        value_table.insert("sibuk_lancar".to_string(), HashMap::new());
        value_table.insert("santai_pemula".to_string(), HashMap::new());
        value_table.insert("nounderscore".to_string(), HashMap::new());
        value_table.insert("sangat_sibuk_pemula".to_string(), HashMap::new());

        let model = RecommendationModel::from_parts(value_table, Vec::new());

        assert_eq!(
            model.kesibukan_options(),
            vec![
                "sangat_sibuk".to_string(),
                "santai".to_string(),
                "sibuk".to_string()
            ]
        );
    }
}
