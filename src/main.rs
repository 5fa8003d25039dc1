use clap::Parser;
use log::info;
use name_curate::{
    CurateConfig, DEFAULT_MAX_COUNTRIES_PER_NAME, DEFAULT_TRUNC_NAMES_COUNT, run,
};
use std::path::PathBuf;

/// Curate per-country name statistics into ranked first/last name datasets.
#[derive(Debug, Parser)]
#[command(name = "name-curate", version)]
struct Args {
    /// Directory holding the five source JSON tables.
    #[arg(long, alias = "input_dir")]
    input_dir: PathBuf,

    /// Directory receiving first_names.json and last_names.json (created if absent).
    #[arg(long, alias = "output_dir")]
    output_dir: PathBuf,

    /// Top first names kept per country.
    #[arg(long, alias = "trunc_first_names_count", default_value_t = DEFAULT_TRUNC_NAMES_COUNT)]
    trunc_first_names_count: usize,

    /// Top last names kept per country.
    #[arg(long, alias = "trunc_last_names_count", default_value_t = DEFAULT_TRUNC_NAMES_COUNT)]
    trunc_last_names_count: usize,

    /// Countries kept per name, by affinity.
    #[arg(long, alias = "max_countries_per_name", default_value_t = DEFAULT_MAX_COUNTRIES_PER_NAME)]
    max_countries_per_name: usize,
}

impl From<Args> for CurateConfig {
    fn from(args: Args) -> Self {
        CurateConfig {
            input_dir: args.input_dir,
            output_dir: args.output_dir,
            trunc_first_names_count: args.trunc_first_names_count,
            trunc_last_names_count: args.trunc_last_names_count,
            max_countries_per_name: args.max_countries_per_name,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CurateConfig::from(Args::parse());
    run(&config)?;

    info!("✅ Curated names written to {}", config.output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        let args = Args::parse_from(["name-curate", "--input-dir", "in", "--output-dir", "out"]);
        let config = CurateConfig::from(args);
        assert_eq!(config, CurateConfig::new(PathBuf::from("in"), PathBuf::from("out")));
    }

    #[test]
    fn snake_case_flags_are_accepted() {
        let args = Args::parse_from([
            "name-curate",
            "--input_dir",
            "in",
            "--output_dir",
            "out",
            "--trunc_first_names_count",
            "5",
            "--max_countries_per_name",
            "3",
        ]);
        assert_eq!(args.trunc_first_names_count, 5);
        assert_eq!(args.trunc_last_names_count, DEFAULT_TRUNC_NAMES_COUNT);
        assert_eq!(args.max_countries_per_name, 3);
    }
}
