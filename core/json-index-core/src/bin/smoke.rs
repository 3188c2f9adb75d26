use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _, Result};
use json_index_core::{
    load_path, Algorithm, ContentResolver, Context, IndexSettings, IndexStats, JsonAlgorithm,
    LoadOptions, Scope,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const DEFAULT_INDEX_DIR: &str = "/tmp/json-index";
const DEFAULT_LIMIT: usize = 20;
const DEFAULT_WRITER_MEM_MB: usize = 128;
const BENCH_RUNS: usize = 5;

/// Serves local files: the search string is the path to read.
struct FileResolver;

impl ContentResolver for FileResolver {
    fn resolve(&self, search: &str) -> json_index_core::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(search)?))
    }
}

#[derive(Debug)]
struct Args {
    index_dir: PathBuf,
    resources: Option<PathBuf>,
    loads: Vec<(String, PathBuf)>,
    queries: Vec<(String, String)>,
    pattern: String,
    limit: usize,
    reindex: bool,
    writer_threads: Option<usize>,
    writer_mem_mb: usize,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            resources: None,
            loads: Vec::new(),
            queries: Vec::new(),
            pattern: LoadOptions::default().pattern,
            limit: DEFAULT_LIMIT,
            reindex: false,
            writer_threads: None,
            writer_mem_mb: DEFAULT_WRITER_MEM_MB,
        }
    }
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = env::args_os();
        let _program = args.next();
        let mut config = Args::default();

        while let Some(arg) = args.next() {
            let arg_str = arg.to_string_lossy();
            match arg_str.as_ref() {
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--index-dir" => {
                    let value = next_value(&mut args, "--index-dir")?;
                    config.index_dir = PathBuf::from(value);
                }
                "--resources" => {
                    let value = next_value(&mut args, "--resources")?;
                    config.resources = Some(PathBuf::from(value));
                }
                "--load" => {
                    let value = next_value(&mut args, "--load")?;
                    let (resource, path) = split_pair(&value, '=', "--load")?;
                    config.loads.push((resource, PathBuf::from(path)));
                }
                "--q" => {
                    let value = next_value(&mut args, "--q")?;
                    config.queries.push(split_pair(&value, ':', "--q")?);
                }
                "--pattern" => {
                    let value = next_value(&mut args, "--pattern")?;
                    config.pattern = value.to_string_lossy().to_string();
                }
                "--limit" => {
                    let value = next_value(&mut args, "--limit")?;
                    config.limit = parse_usize(&value, "--limit")?;
                }
                "--reindex" => {
                    config.reindex = true;
                }
                "--threads" => {
                    let value = next_value(&mut args, "--threads")?;
                    config.writer_threads = Some(parse_usize(&value, "--threads")?);
                }
                "--writer-mem-mb" => {
                    let value = next_value(&mut args, "--writer-mem-mb")?;
                    config.writer_mem_mb = parse_usize(&value, "--writer-mem-mb")?;
                }
                unknown => {
                    return Err(format!("unknown argument: {}", unknown));
                }
            }
        }

        if config.resources.is_none() {
            return Err("--resources must be provided".into());
        }

        if config.limit == 0 {
            return Err("--limit must be greater than 0".into());
        }

        Ok(config)
    }
}

fn next_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<OsString, String> {
    args.next()
        .ok_or_else(|| format!("missing value for {}", flag))
}

fn parse_usize(value: &OsString, flag: &str) -> Result<usize, String> {
    value
        .to_string_lossy()
        .parse::<usize>()
        .map_err(|_| format!("{} expects an integer", flag))
}

/// Split `<resource><sep><rest>` at the first separator.
fn split_pair(value: &OsString, separator: char, flag: &str) -> Result<(String, String), String> {
    let value = value.to_string_lossy();
    value
        .split_once(separator)
        .map(|(resource, rest)| (resource.trim().to_string(), rest.trim().to_string()))
        .filter(|(resource, _)| !resource.is_empty())
        .ok_or_else(|| format!("{} expects <resource>{}<value>", flag, separator))
}

fn print_usage() {
    eprintln!("json-index-core smoke test");
    eprintln!("\nUsage:");
    eprintln!("  cargo run -p json-index-core --bin smoke -- --resources <path> [options]\n");
    eprintln!("Options:");
    eprintln!("  --index-dir <path>          Index directory (default: /tmp/json-index)");
    eprintln!("  --resources <path>          .j2l resource definition file or directory");
    eprintln!("  --load <resource>=<path>    JSON file or directory to index (repeatable)");
    eprintln!("  --q <resource>:<query>      Query to benchmark (repeatable)");
    eprintln!("  --pattern <glob>            Payload file pattern for directories (default *.json)");
    eprintln!("  --threads <N>               Tantivy writer threads (default num_cpus, max 8)");
    eprintln!("  --writer-mem-mb <MB>        Tantivy writer memory in MB (default 128)");
    eprintln!("  --limit <N>                 Max documents per query (default 20)");
    eprintln!("  --reindex                   Remove index directory before indexing");
    eprintln!("  --help                      Show this message");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse().unwrap_or_else(|err| {
        eprintln!("error: {err}");
        eprintln!("Use --help to see available options.");
        std::process::exit(1);
    });

    run(args)
}

fn run(args: Args) -> Result<()> {
    if args.reindex && args.index_dir.exists() {
        tracing::info!(dir = %args.index_dir.display(), "removing existing index dir");
        fs::remove_dir_all(&args.index_dir)
            .with_context(|| format!("failed to remove {}", args.index_dir.display()))?;
    }

    let context = Context::new();
    context.register_algorithm("json", || Arc::new(JsonAlgorithm) as Arc<dyn Algorithm>);
    context.register_resolver("file", || Arc::new(FileResolver) as Arc<dyn ContentResolver>);

    let resources_path = args
        .resources
        .as_deref()
        .ok_or_else(|| anyhow!("--resources must be provided"))?;
    let registered = context
        .register_resources(resources_path)
        .with_context(|| format!("failed to register {}", resources_path.display()))?;
    if registered.is_empty() {
        bail!("no resource definitions found in {}", resources_path.display());
    }

    let settings = IndexSettings {
        writer_threads: args.writer_threads.unwrap_or(0),
        writer_heap_bytes: args.writer_mem_mb.saturating_mul(1024 * 1024),
        max_results: args.limit,
    };
    let indexer = context
        .open_indexer(&args.index_dir, settings)
        .with_context(|| format!("failed to open index at {}", args.index_dir.display()))?;

    println!(
        "[CONFIG] resources={} threads={} writer_mem_mb={} limit={} docs={}",
        registered.len(),
        settings.effective_writer_threads(),
        args.writer_mem_mb,
        args.limit,
        indexer.num_docs()
    );

    let options = LoadOptions {
        pattern: args.pattern.clone(),
    };
    for (name, path) in &args.loads {
        let resource = context
            .resource(name)
            .ok_or_else(|| anyhow!("unknown resource `{name}`"))?;
        let start = Instant::now();
        let stats = load_path(&indexer, &resource, path, &options)
            .with_context(|| format!("failed to load {} into `{name}`", path.display()))?;
        println!("{}", load_summary(name, stats, start.elapsed()));
    }

    if args.queries.is_empty() {
        return Ok(());
    }

    println!("[INFO] running query benchmarks (limit {})", args.limit);
    for (name, query) in &args.queries {
        let resource = context
            .resource(name)
            .ok_or_else(|| anyhow!("unknown resource `{name}`"))?;

        let mut durations = Vec::with_capacity(BENCH_RUNS);
        let mut last_results = Vec::new();

        for _ in 0..BENCH_RUNS {
            let query_start = Instant::now();
            let results = indexer.get_objects(query, Scope::Resource(&resource))?;
            durations.push(query_start.elapsed());
            last_results = results;
        }

        let p50 = percentile(&durations, 0.50);
        let p95 = percentile(&durations, 0.95);

        println!(
            "resource=\"{}\" query=\"{}\" hits={} p50={}ms p95={}ms",
            name,
            query,
            last_results.len(),
            p50,
            p95
        );

        for object in last_results.into_iter().take(5) {
            match object.downcast::<Value>() {
                Ok(value) => println!("  • {}", preview(&value)),
                Err(_) => println!("  • <{}>", resource.target_type()),
            }
        }
    }

    Ok(())
}

fn load_summary(name: &str, stats: IndexStats, elapsed: Duration) -> String {
    format!(
        "[INFO] resource={} added={} updated={} elapsed={} s throughput={:.1} docs/min",
        name,
        stats.added,
        stats.updated,
        format_seconds(elapsed),
        docs_per_minute(stats.total(), elapsed)
    )
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(120) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text,
    }
}

fn percentile(durations: &[Duration], percentile: f64) -> u128 {
    if durations.is_empty() {
        return 0;
    }
    let mut samples: Vec<u128> = durations.iter().map(|d| d.as_micros()).collect();
    samples.sort_unstable();
    let rank = percentile.clamp(0.0, 1.0) * (samples.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return samples[lower] / 1000;
    }
    let weight = rank - lower as f64;
    let interpolated = samples[lower] as f64 * (1.0 - weight) + samples[upper] as f64 * weight;
    (interpolated / 1000.0) as u128
}

fn format_seconds(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}

fn docs_per_minute(indexed: usize, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() == 0.0 {
        return 0.0;
    }
    (indexed as f64 * 60.0) / elapsed.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::{load_summary, percentile};
    use json_index_core::IndexStats;
    use std::time::Duration;

    #[test]
    fn load_summary_reports_elapsed_time() {
        let stats = IndexStats {
            added: 30,
            updated: 30,
        };
        let line = load_summary("Patient", stats, Duration::from_secs(2));
        assert!(line.contains("added=30 updated=30 elapsed=2.00 s"));
        assert!(line.contains("throughput=1800.0 docs/min"));
    }

    #[test]
    fn percentile_interpolates_between_samples() {
        let samples: Vec<_> = [10, 20, 30, 40].map(Duration::from_millis).to_vec();
        assert_eq!(percentile(&samples, 0.0), 10);
        assert_eq!(percentile(&samples, 0.5), 25);
        assert_eq!(percentile(&samples, 1.0), 40);
    }
}
