use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walkdir::WalkDir;

use safemig_core::{Configuration, Issue, MigrationSet, PartialConfiguration, Report, Severity};
use safemig_engine::{Analyzer, Baseline};
use safemig_graph::GraphReport;
use safemig_rules::{RuleRegistry, StaticRuleLoader};

/// Settings file looked up in the working directory
const DEFAULT_CONFIG: &str = "safemig.toml";

/// Baseline written by `--generate-baseline` when no path is given
const DEFAULT_BASELINE: &str = ".safemig-baseline.json";

/// safemig - catch deployment-unsafe database migrations
#[derive(Parser)]
#[command(name = "safemig")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: safemig.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check migration sets for unsafe operations
    Check {
        /// Migration set files, or directories of *.json migration sets
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target database dialect (postgresql, mysql, sqlite, oracle)
        #[arg(long)]
        dialect: Option<String>,

        /// Rule ids to disable (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        disable: Vec<String>,

        /// Exit non-zero on warnings too
        #[arg(long)]
        fail_on_warning: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,

        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Drop issues recorded in this baseline file
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Record current issues as the baseline instead of reporting them
        #[arg(long)]
        generate_baseline: bool,

        /// Input is a selected subset of migrations (skip leaf detection)
        #[arg(long)]
        partial: bool,
    },

    /// List available rules
    ListRules {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Console,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check {
            paths,
            dialect,
            disable,
            fail_on_warning,
            format,
            output,
            baseline,
            generate_baseline,
            partial,
        } => {
            let overrides = PartialConfiguration {
                dialect,
                fail_on_warning: fail_on_warning.then_some(true),
                ..Default::default()
            };

            let options = CheckOptions {
                format,
                output,
                baseline,
                generate_baseline,
                partial,
            };

            check_command(cli.config.as_deref(), &paths, overrides, &disable, &options)
        }
        Commands::ListRules { format } => list_rules_command(format),
    }
}

/// Logs go to stderr so JSON on stdout stays clean
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct CheckOptions {
    format: OutputFormat,
    output: Option<PathBuf>,
    baseline: Option<PathBuf>,
    generate_baseline: bool,
    partial: bool,
}

/// Check command - analyze migration sets
fn check_command(
    config_path: Option<&Path>,
    paths: &[PathBuf],
    overrides: PartialConfiguration,
    disable: &[String],
    options: &CheckOptions,
) -> Result<()> {
    let set = load_migrations(paths)?;
    tracing::debug!("Loaded {} migration(s) from {} path(s)", set.migrations.len(), paths.len());

    let mut config = resolve_config(config_path, set.dialect.clone(), overrides)?;
    config.disabled_rules.extend(disable.iter().cloned());

    let mut registry = RuleRegistry::with_builtin_rules();
    let failures = registry.load_extra(&config.extra_rules, &StaticRuleLoader::new())?;
    for failure in &failures {
        eprintln!("{} {}", "warning:".yellow().bold(), failure);
    }

    let analysis = Analyzer::new(&registry, &config)
        .partial_selection(options.partial)
        .analyze(&set.migrations);

    if options.generate_baseline {
        let path = options
            .baseline
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASELINE));

        match Baseline::load_or_empty(&path) {
            Ok(previous) if !previous.is_empty() => {
                tracing::info!("Replacing baseline with {} fingerprint(s)", previous.len())
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Overwriting unreadable baseline: {}", e),
        }

        let baseline = Baseline::generate(&analysis.issues);
        baseline.save(&path)?;

        println!(
            "{} {} issue(s) recorded in {}",
            "Baseline:".green().bold(),
            baseline.len(),
            path.display()
        );
        return Ok(());
    }

    let analysis = match &options.baseline {
        Some(path) => analysis.apply_baseline(&Baseline::load(path)?),
        None => analysis,
    };

    if options.format == OutputFormat::Console {
        print_graph_notes(&analysis.graph);
    }

    let report = analysis.into_report();

    match options.format {
        OutputFormat::Console => print_report(&report),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    if let Some(output) = &options.output {
        report.save_to_file(output)?;
        tracing::info!("Report saved to {}", output.display());
    }

    let code = report.summary.exit_code(config.fail_on_warning);
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Read migration sets from files and directories (sorted, recursive)
fn load_migrations(paths: &[PathBuf]) -> Result<MigrationSet> {
    let mut set = MigrationSet::default();

    for path in paths {
        if !path.exists() {
            return Err(anyhow::anyhow!("Migration set not found: {}", path.display()));
        }

        let files: Vec<PathBuf> = if path.is_dir() {
            let mut files: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "json"))
                .map(|entry| entry.into_path())
                .collect();
            files.sort();
            files
        } else {
            vec![path.clone()]
        };

        for file in files {
            tracing::debug!("Reading {}", file.display());
            set.extend(MigrationSet::from_file(&file)?);
        }
    }

    Ok(set)
}

/// defaults < loader-detected dialect < settings file < CLI flags
fn resolve_config(
    config_path: Option<&Path>,
    detected_dialect: Option<String>,
    overrides: PartialConfiguration,
) -> Result<Configuration> {
    let mut config = Configuration::default().layered(PartialConfiguration {
        dialect: detected_dialect,
        ..Default::default()
    });

    let default_path = Path::new(DEFAULT_CONFIG);
    let file = match config_path {
        Some(path) => Some(path),
        None if default_path.exists() => Some(default_path),
        None => None,
    };

    match file {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            config = config.layered(PartialConfiguration::from_file(path)?);
        }
        None => tracing::debug!("No config file found, using defaults"),
    }

    Ok(config.layered(overrides))
}

fn print_graph_notes(graph: &GraphReport) {
    for cycle in &graph.cycles {
        eprintln!("{} {}", "error:".red().bold(), cycle);
    }

    if !graph.partial_apps.is_empty() {
        let apps: Vec<&str> = graph.partial_apps.iter().map(String::as_str).collect();
        eprintln!(
            "{} leaf detection skipped for partial apps: {}",
            "note:".cyan().bold(),
            apps.join(", ")
        );
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warning => "WARN".yellow().bold(),
        Severity::Info => "INFO".cyan(),
    }
}

/// `app.migration` plus `file:line` when known
fn issue_origin(issue: &Issue) -> String {
    let mut origin = match &issue.migration {
        Some(migration) => format!("{}.{}", issue.app, migration),
        None => issue.app.clone(),
    };

    if let Some(loc) = &issue.location {
        match (loc.file.is_empty(), loc.line) {
            (false, Some(line)) => origin.push_str(&format!(" ({}:{})", loc.file, line)),
            (false, None) => origin.push_str(&format!(" ({})", loc.file)),
            (true, Some(line)) => origin.push_str(&format!(" (line {})", line)),
            (true, None) => {}
        }
    }

    origin
}

/// Print report to stdout
fn print_report(report: &Report) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Migration Safety Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    if report.issues.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        for issue in &report.issues {
            println!("[{}] {} {}", severity_label(issue.severity), issue.rule_id.bold(), issue_origin(issue));
            println!("    {}", issue.message);

            if let Some(suggestion) = &issue.suggestion {
                for line in suggestion.lines() {
                    println!("    {}", line.dimmed());
                }
            }
            println!();
        }
    }

    println!("{}", "Summary:".bold());
    println!("  Migrations checked: {}", report.summary.migrations_checked);
    println!("  Total issues: {}", report.summary.total);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", report.summary.errors.to_string().red().bold());
    } else {
        println!("  Errors:   {}", report.summary.errors.to_string().green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", report.summary.warnings.to_string().yellow());
    } else {
        println!("  Warnings: {}", report.summary.warnings.to_string().green());
    }

    println!("  Info:     {}", report.summary.info);

    if !report.summary.by_rule.is_empty() {
        let by_rule: Vec<String> = report
            .summary
            .by_rule
            .iter()
            .map(|(rule, count)| format!("{}={}", rule, count))
            .collect();
        println!("  By rule:  {}", by_rule.join(", "));
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

/// List-rules command - print the rule catalogue
fn list_rules_command(format: OutputFormat) -> Result<()> {
    let catalogue = RuleRegistry::with_builtin_rules().catalogue();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&catalogue)?),
        OutputFormat::Console => {
            for info in &catalogue {
                println!(
                    "{} [{}] {}",
                    info.rule_id.bold(),
                    severity_label(info.severity),
                    info.description
                );
                println!(
                    "      categories: {}  dialects: {}",
                    info.categories.join(", ").dimmed(),
                    info.dialects.join(", ").dimmed()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemig_core::Location;
    use tempfile::TempDir;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_check_flags() {
        let cli = Cli::try_parse_from([
            "safemig",
            "check",
            "migrations",
            "--disable",
            "SM001,SM002",
            "--format",
            "json",
            "--partial",
        ])
        .unwrap();

        match cli.command {
            Commands::Check { paths, disable, format, partial, .. } => {
                assert_eq!(paths, vec![PathBuf::from("migrations")]);
                assert_eq!(disable, vec!["SM001".to_string(), "SM002".to_string()]);
                assert_eq!(format, OutputFormat::Json);
                assert!(partial);
            }
            Commands::ListRules { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn loads_json_sets_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("blog.json"),
            r#"{"dialect": "mysql", "migrations": [{"app": "blog", "name": "0001_initial"}]}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested").join("shop.json"),
            r#"{"migrations": [{"app": "shop", "name": "0001_initial"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration set").unwrap();

        let set = load_migrations(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(set.migrations.len(), 2);
        assert_eq!(set.dialect.as_deref(), Some("mysql"));
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_migrations(&[dir.path().join("absent.json")]).is_err());
    }

    #[test]
    fn config_layers_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("safemig.toml");
        std::fs::write(&path, "dialect = \"sqlite\"\nfail_on_warning = true\n").unwrap();

        // file beats detected dialect
        let config = resolve_config(Some(&path), Some("mysql".to_string()), PartialConfiguration::default()).unwrap();
        assert_eq!(config.dialect, "sqlite");
        assert!(config.fail_on_warning);

        // CLI beats file
        let overrides = PartialConfiguration {
            dialect: Some("oracle".to_string()),
            ..Default::default()
        };
        let config = resolve_config(Some(&path), None, overrides).unwrap();
        assert_eq!(config.dialect, "oracle");
    }

    #[test]
    fn origin_includes_location() {
        let issue = Issue::new("SM001", Severity::Error, "blog", "m");
        assert_eq!(issue_origin(&issue), "blog");

        let mut issue = issue;
        issue.migration = Some("0002_add_title".to_string());
        issue.location = Some(Location::with_line("blog/migrations/0002_add_title.py", 12));
        assert_eq!(
            issue_origin(&issue),
            "blog.0002_add_title (blog/migrations/0002_add_title.py:12)"
        );
    }
}
