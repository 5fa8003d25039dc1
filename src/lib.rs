//! # name_curate 🌍📇
//!
//! Curate per-country name-popularity statistics into one bounded, ranked
//! dataset per name category (first names, last names).
//!
//! Five country-keyed tables go in (name counts by country, gender
//! distribution by first name, country affinity by name) and one JSON
//! document per category comes out, mapping every retained name to its
//! normalized gender and country distributions and its rank in each of its
//! countries.
//!
//! ## Pipeline
//! - **Merge**: fold every country's counts into one [`NameRecord`] per name,
//!   remembering the top-N names of each country (the keep-set)
//! - **Truncate & normalize**: keep the K strongest affinity countries per
//!   name, restrict popularity to them, rescale distributions to sum to 1
//! - **Rank**: rank names per country by popularity, then drop the counts
//!   and every name outside the keep-set
//!
//! ## Example
//! ```no_run
//! use std::path::PathBuf;
//! use name_curate::{run, CurateConfig};
//!
//! let config = CurateConfig::new(PathBuf::from("data/curate"), PathBuf::from("out"));
//! run(&config)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Label (gender, country code, name) to weight, in source document order.
pub type Distribution = IndexMap<String, f64>;

/// Country code to a name-to-count mapping.
pub type PopularityTable = IndexMap<String, Distribution>;

/// Name to a distribution over gender labels or country codes.
pub type NameTable = IndexMap<String, Distribution>;

/// Maximum names kept per country when no threshold is configured.
pub const DEFAULT_TRUNC_NAMES_COUNT: usize = 100_000;

/// Maximum countries kept per name when no cap is configured.
pub const DEFAULT_MAX_COUNTRIES_PER_NAME: usize = 10;

const UNKNOWN_GENDER: &str = "";
const MALFORMED_NAME: &str = "";

/// Name category; each one is curated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    First,
    Last,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::First, Category::Last];

    pub fn output_file_name(self) -> &'static str {
        match self {
            Category::First => "first_names.json",
            Category::Last => "last_names.json",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::First => f.write_str("first names"),
            Category::Last => f.write_str("last names"),
        }
    }
}

/// Run parameters for a full curation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurateConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub trunc_first_names_count: usize,
    pub trunc_last_names_count: usize,
    pub max_countries_per_name: usize,
}

impl CurateConfig {
    /// Config with the default thresholds.
    pub fn new(input_dir: PathBuf, output_dir: PathBuf) -> Self {
        CurateConfig {
            input_dir,
            output_dir,
            trunc_first_names_count: DEFAULT_TRUNC_NAMES_COUNT,
            trunc_last_names_count: DEFAULT_TRUNC_NAMES_COUNT,
            max_countries_per_name: DEFAULT_MAX_COUNTRIES_PER_NAME,
        }
    }

    /// Number of names each country contributes to the keep-set.
    pub fn trunc_count(&self, category: Category) -> usize {
        match category {
            Category::First => self.trunc_first_names_count,
            Category::Last => self.trunc_last_names_count,
        }
    }

    pub fn output_path(&self, category: Category) -> PathBuf {
        self.output_dir.join(category.output_file_name())
    }
}

/// Merged statistics for one name, before ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameRecord {
    pub gender: Distribution,
    pub country: Distribution,
    /// Raw count per country, accumulated across every country table.
    pub popularity: Distribution,
}

impl NameRecord {
    pub fn normalize(&mut self, rules: &NormalizationRules) {
        normalize_distribution(&mut self.gender, rules.gender);
        normalize_distribution(&mut self.country, rules.country);
        normalize_distribution(&mut self.popularity, rules.popularity);
    }
}

/// Final per-name output. Fields are declared in key order so that the
/// serialized object comes out sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub country: BTreeMap<String, f64>,
    pub gender: BTreeMap<String, f64>,
    pub rank: BTreeMap<String, usize>,
}

/// How one sub-mapping of a [`NameRecord`] is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    /// Decimal places kept after rounding.
    pub decimals: i32,
    /// Whether values are divided by their sum before rounding.
    pub rescale: bool,
}

/// Per-field normalization of a [`NameRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizationRules {
    pub gender: FieldRule,
    pub country: FieldRule,
    pub popularity: FieldRule,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        NormalizationRules {
            gender: FieldRule {
                decimals: 3,
                rescale: true,
            },
            country: FieldRule {
                decimals: 3,
                rescale: true,
            },
            // Counts only feed the ranking; rescaling then rounding could tie them.
            popularity: FieldRule {
                decimals: 6,
                rescale: false,
            },
        }
    }
}

/// Rescales `dist` to sum to 1 (when the rule asks for it) and rounds every
/// value. Empty and zero-sum distributions are never divided.
pub fn normalize_distribution(dist: &mut Distribution, rule: FieldRule) {
    if dist.is_empty() {
        return;
    }
    let total: f64 = dist.values().sum();
    let rescale = rule.rescale && total != 0.0;
    for value in dist.values_mut() {
        if rescale {
            *value /= total;
        }
        *value = round_to(*value, rule.decimals);
    }
}

/// Rounds the exact binary value half to even, so 0.0625 becomes 0.062.
fn round_to(value: f64, decimals: i32) -> f64 {
    let precision = usize::try_from(decimals).unwrap_or(0);
    format!("{value:.precision$}").parse().unwrap_or(value)
}

/// Orders entries by value, highest first. Equal values keep their input
/// order: the sort key is (value descending, input position ascending).
fn sorted_desc<'a>(entries: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<(&'a str, f64)> {
    let mut indexed: Vec<(usize, &str, f64)> = entries
        .into_iter()
        .enumerate()
        .map(|(i, (key, value))| (i, key, value))
        .collect();
    indexed.sort_unstable_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    indexed
        .into_iter()
        .map(|(_, key, value)| (key, value))
        .collect()
}

fn entries(dist: &Distribution) -> impl Iterator<Item = (&str, f64)> {
    dist.iter().map(|(key, &value)| (key.as_str(), value))
}

/// All names of one category merged across countries, plus the keep-set.
#[derive(Debug, Clone, Default)]
pub struct MergedNames {
    /// Records in order of first appearance across the country tables.
    pub names: IndexMap<String, NameRecord>,
    /// Names ranked within the top `trunc_values` of at least one country.
    pub keep: HashSet<String>,
}

impl MergedNames {
    /// Folds every (country, name, count) triple into one record per name.
    ///
    /// Gender and affinity are name-level data, looked up once when a name
    /// is first seen. Popularity accumulates one entry per country. The
    /// empty name left behind by malformed source rows is dropped.
    pub fn merge(
        by_country: &PopularityTable,
        gender_by: &NameTable,
        country_by: &NameTable,
        trunc_values: usize,
    ) -> Self {
        let mut merged = by_country.iter().fold(
            MergedNames::default(),
            |mut merged, (country_code, names)| {
                let ordered = sorted_desc(entries(names));
                merged.keep.extend(
                    ordered
                        .iter()
                        .take(trunc_values)
                        .map(|(name, _)| (*name).to_owned()),
                );
                for (name, count) in ordered {
                    merged
                        .names
                        .entry(name.to_owned())
                        .or_insert_with(|| NameRecord {
                            gender: gender_by.get(name).cloned().unwrap_or_default(),
                            country: country_by.get(name).cloned().unwrap_or_default(),
                            popularity: Distribution::new(),
                        })
                        .popularity
                        .insert(country_code.clone(), count);
                }
                merged
            },
        );
        merged.names.shift_remove(MALFORMED_NAME);
        merged
    }

    /// Caps each name to its `max_countries_per_name` strongest affinity
    /// countries, restricts popularity to those countries, drops the unknown
    /// gender bucket and normalizes the three distributions.
    pub fn truncate_and_normalize(
        &mut self,
        max_countries_per_name: usize,
        rules: &NormalizationRules,
    ) {
        for record in self.names.values_mut() {
            let country: Distribution = sorted_desc(entries(&record.country))
                .into_iter()
                .take(max_countries_per_name)
                .map(|(code, weight)| (code.to_owned(), weight))
                .collect();
            let popularity: Distribution = country
                .keys()
                .filter_map(|code| {
                    record
                        .popularity
                        .get(code)
                        .map(|&count| (code.clone(), count))
                })
                .collect();
            record.country = country;
            record.popularity = popularity;
            record.gender.shift_remove(UNKNOWN_GENDER);
            record.normalize(rules);
        }
    }

    /// Ranks every name within each of its countries (1 = most popular),
    /// then keeps only the names of the keep-set.
    ///
    /// Ranks are computed over all merged names, so a kept name's rank
    /// counts the names that were filtered out too.
    pub fn rank(self) -> CuratedNames {
        let mut scores_by_country: IndexMap<&str, Vec<(&str, f64)>> = IndexMap::new();
        for (name, record) in &self.names {
            for (country, score) in entries(&record.popularity) {
                scores_by_country
                    .entry(country)
                    .or_default()
                    .push((name.as_str(), score));
            }
        }

        let mut ranks_by_name: HashMap<String, BTreeMap<String, usize>> = HashMap::new();
        for (country, scores) in scores_by_country {
            for (position, (name, _)) in sorted_desc(scores).into_iter().enumerate() {
                ranks_by_name
                    .entry(name.to_owned())
                    .or_default()
                    .insert(country.to_owned(), position + 1);
            }
        }

        let MergedNames { names, keep } = self;
        let records = names
            .into_iter()
            .filter(|(name, _)| keep.contains(name))
            .map(|(name, record)| {
                let rank = ranks_by_name.remove(&name).unwrap_or_default();
                let ranked = RankedRecord {
                    country: record.country.into_iter().collect(),
                    gender: record.gender.into_iter().collect(),
                    rank,
                };
                (name, ranked)
            })
            .collect();
        CuratedNames { records }
    }
}

/// The curated dataset of one category, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CuratedNames {
    pub records: BTreeMap<String, RankedRecord>,
}

impl CuratedNames {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RankedRecord> {
        self.records.get(name)
    }

    /// Pretty JSON, 2-space indent, sorted keys, non-ASCII kept literal.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize curated names")
    }

    /// Writes the dataset to `path`, replacing any existing file.
    ///
    /// The JSON goes to a sibling `.tmp` file first and is renamed into
    /// place, so a crash never leaves a truncated document at `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let tmp = temporary_path(path);
        if let Err(err) = self.write_synced(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err)
                .with_context(|| format!("Failed to move output into {}", path.display()));
        }
        Ok(())
    }

    fn write_synced(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
        writer
            .into_inner()
            .map_err(|err| err.into_error())
            .and_then(|file| file.sync_all())
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        Ok(())
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().map(OsString::from).unwrap_or_default();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

/// The five source tables of a run.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub first_by_country: PopularityTable,
    pub last_by_country: PopularityTable,
    pub gender_by_first: NameTable,
    pub country_by_first: NameTable,
    pub country_by_last: NameTable,
}

impl SourceTables {
    pub const FIRST_BY_COUNTRY: &'static str = "first_by_country.json";
    pub const LAST_BY_COUNTRY: &'static str = "last_by_country.json";
    pub const GENDER_BY_FIRST: &'static str = "gender_by_first.json";
    pub const COUNTRY_BY_FIRST: &'static str = "country_by_first.json";
    pub const COUNTRY_BY_LAST: &'static str = "country_by_last.json";

    /// Loads every table from `input_dir`; any missing or malformed file
    /// aborts the load.
    pub fn load(input_dir: &Path) -> Result<Self> {
        let gender_by_first = load_json(&input_dir.join(Self::GENDER_BY_FIRST))?;
        let country_by_first = load_json(&input_dir.join(Self::COUNTRY_BY_FIRST))?;
        let first_by_country = load_json(&input_dir.join(Self::FIRST_BY_COUNTRY))?;
        let last_by_country = load_json(&input_dir.join(Self::LAST_BY_COUNTRY))?;
        let country_by_last = load_json(&input_dir.join(Self::COUNTRY_BY_LAST))?;
        Ok(SourceTables {
            first_by_country,
            last_by_country,
            gender_by_first,
            country_by_first,
            country_by_last,
        })
    }
}

/// Reads and parses one JSON document, keeping object key order.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;
    info!("📥 Loaded {}", path.display());
    Ok(value)
}

/// Runs merge, truncation/normalization and ranking for one category.
pub fn curate(
    by_country: &PopularityTable,
    gender_by: &NameTable,
    country_by: &NameTable,
    trunc_values: usize,
    max_countries_per_name: usize,
) -> CuratedNames {
    let mut merged = MergedNames::merge(by_country, gender_by, country_by, trunc_values);
    info!(
        "📊 Merged {} names from {} countries, {} in keep-set",
        merged.names.len(),
        by_country.len(),
        merged.keep.len()
    );
    merged.truncate_and_normalize(max_countries_per_name, &NormalizationRules::default());
    merged.rank()
}

/// Curates one category and writes it to `output_path`.
pub fn generate(
    by_country: &PopularityTable,
    gender_by: &NameTable,
    country_by: &NameTable,
    trunc_values: usize,
    max_countries_per_name: usize,
    output_path: &Path,
) -> Result<CuratedNames> {
    info!("🧮 Generating {}", output_path.display());
    let curated = curate(
        by_country,
        gender_by,
        country_by,
        trunc_values,
        max_countries_per_name,
    );
    info!("💾 Saving {} names to {}", curated.len(), output_path.display());
    curated.save_to_file(output_path)?;
    Ok(curated)
}

/// Curates both categories from `config.input_dir` into `config.output_dir`.
///
/// Categories are independent: a failure in one is logged and the other
/// still runs. The run fails if any category failed.
pub fn run(config: &CurateConfig) -> Result<()> {
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    let sources = SourceTables::load(&config.input_dir)?;
    let no_gender = NameTable::new();

    let mut failed = Vec::new();
    for category in Category::ALL {
        let (by_country, gender_by, country_by) = match category {
            Category::First => (
                &sources.first_by_country,
                &sources.gender_by_first,
                &sources.country_by_first,
            ),
            Category::Last => (
                &sources.last_by_country,
                &no_gender,
                &sources.country_by_last,
            ),
        };
        let result = generate(
            by_country,
            gender_by,
            country_by,
            config.trunc_count(category),
            config.max_countries_per_name,
            &config.output_path(category),
        );
        if let Err(err) = result {
            error!("❌ Failed to curate {category}: {err:#}");
            failed.push(category.to_string());
        }
    }

    if !failed.is_empty() {
        bail!("Curation failed for {}", failed.join(", "));
    }
    Ok(())
}
