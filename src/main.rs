mod content;
mod export;
mod graph;
mod sanitize;
mod source;
mod stats;
mod writers;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use export::{summary, Exporter};
use graph::{GraphClient, RefreshConfig};
use source::ContentSource;
use stats::ExportStats;
use writers::TargetFormat;

#[derive(Parser)]
#[command(name = "onenote_export", about = "Export OneNote notebooks to Joplin, Evernote and Obsidian formats")]
struct Cli {
    #[command(flatten)]
    auth: Auth,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Auth {
    /// Microsoft Graph access token
    #[arg(long, global = true, env = "ONENOTE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    /// Refresh token used when the access token expires
    #[arg(long, global = true, env = "ONENOTE_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,
    /// Application (client) id for token refresh
    #[arg(long, global = true, env = "ONENOTE_CLIENT_ID")]
    client_id: Option<String>,
    /// Client secret, for confidential apps
    #[arg(long, global = true, env = "ONENOTE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
    /// Directory tenant
    #[arg(long, global = true, env = "ONENOTE_TENANT", default_value = "common")]
    tenant: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Export notebooks into a timestamped folder
    Export {
        /// Parent directory of the export folder
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
        /// Target formats, comma separated (default: joplin,evernote)
        #[arg(short, long, value_delimiter = ',')]
        format: Vec<TargetFormat>,
        /// Only save raw HTML and attachments
        #[arg(long, conflicts_with = "format")]
        raw_only: bool,
        /// Export only the notebook with this exact name (repeatable)
        #[arg(short, long)]
        notebook: Vec<String>,
        /// Only pages modified after this time (RFC 3339 or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,
        /// Only pages modified in the last N days
        #[arg(long, conflicts_with = "since")]
        days: Option<u16>,
    },
    /// List notebooks, sections and page counts
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let client = connect(cli.auth)?;

    match cli.command {
        Commands::Export { dest, format, raw_only, notebook, since, days } => {
            let formats = selected_formats(format, raw_only);
            let started = Local::now();
            let cutoff = since.or_else(|| days.map(|d| started.with_timezone(&Utc) - Duration::days(d.into())));
            let root = export::prepare_root(&dest, started)?;
            info!(
                "Formats: {}",
                if formats.is_empty() {
                    "raw only".to_string()
                } else {
                    formats.iter().map(|f| f.dir_name()).collect::<Vec<_>>().join(", ")
                }
            );

            if let Some(cutoff) = cutoff {
                info!("Only pages modified after {}", cutoff.to_rfc3339());
            }

            let exporter = Exporter::new(&client, root.clone(), formats.iter().map(|f| f.writer()).collect())
                .with_notebooks(notebook)
                .with_modified_since(cutoff)
                .exported_at(started.with_timezone(&Utc));
            let stats = exporter.run(ExportStats::default()).await?;

            let finished = Local::now();
            summary::write_summary(&root, &stats, finished)?;
            summary::write_readme(&root, &stats, &formats, finished)?;
            summary::print_summary(&stats, &root, t0.elapsed());
            Ok(())
        }
        Commands::List => {
            list(&client).await?;
            let elapsed = t0.elapsed();
            if elapsed.as_secs() >= 1 {
                println!("\nDone in {}", format_duration(elapsed));
            }
            Ok(())
        }
    }
}

fn connect(auth: Auth) -> anyhow::Result<GraphClient> {
    let access_token = auth
        .access_token
        .context("No access token: pass --access-token or set ONENOTE_ACCESS_TOKEN")?;
    let refresh = match (auth.refresh_token, auth.client_id) {
        (Some(refresh_token), Some(client_id)) => Some(RefreshConfig {
            client_id,
            client_secret: auth.client_secret,
            tenant: auth.tenant,
            refresh_token,
        }),
        _ => None,
    };
    GraphClient::new(access_token, refresh)
}

/// Requested formats in canonical order, without duplicates.
fn selected_formats(requested: Vec<TargetFormat>, raw_only: bool) -> Vec<TargetFormat> {
    if raw_only {
        return Vec::new();
    }
    if requested.is_empty() {
        return TargetFormat::DEFAULT.to_vec();
    }
    TargetFormat::ALL
        .into_iter()
        .filter(|f| requested.contains(f))
        .collect()
}

/// `--since` value: an RFC 3339 timestamp, or a date taken as midnight UTC.
fn parse_since(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Ok(date.and_time(NaiveTime::default()).and_utc()),
        Err(_) => bail!("expected RFC 3339 or YYYY-MM-DD, got {:?}", value),
    }
}

async fn list<S: ContentSource>(source: &S) -> anyhow::Result<()> {
    let notebooks = source.list_notebooks().await.context("Failed to list notebooks")?;
    if notebooks.is_empty() {
        println!("No notebooks found.");
        return Ok(());
    }

    println!("{:<32} | {:<32} | {:>5}", "Notebook", "Section", "Pages");
    println!("{}", "-".repeat(75));

    let mut total_pages = 0;
    for notebook in &notebooks {
        let name = truncate(&notebook.name, 32);
        let sections = match source.list_sections(&notebook.id).await {
            Ok(sections) => sections,
            Err(e) => {
                println!("{:<32} | {:<32} | {:>5}", name, format!("(unavailable: {})", truncate(&e.to_string(), 16)), "-");
                continue;
            }
        };
        if sections.is_empty() {
            println!("{:<32} | {:<32} | {:>5}", name, "(no sections)", 0);
        }
        for (i, section) in sections.iter().enumerate() {
            let pages = match source.list_pages(&section.id).await {
                Ok(pages) => {
                    total_pages += pages.len();
                    pages.len().to_string()
                }
                Err(_) => "?".to_string(),
            };
            let notebook_col = if i == 0 { name.as_str() } else { "" };
            println!("{:<32} | {:<32} | {:>5}", notebook_col, truncate(&section.name, 32), pages);
        }
    }

    println!("\n{} notebooks | {} pages", notebooks.len(), total_pages);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn format_selection() {
        assert_eq!(
            selected_formats(vec![], false),
            vec![TargetFormat::Joplin, TargetFormat::Evernote]
        );
        assert_eq!(
            selected_formats(vec![TargetFormat::Obsidian, TargetFormat::Joplin], false),
            vec![TargetFormat::Joplin, TargetFormat::Obsidian]
        );
        assert_eq!(
            selected_formats(vec![TargetFormat::Evernote, TargetFormat::Joplin, TargetFormat::Evernote], false),
            vec![TargetFormat::Joplin, TargetFormat::Evernote]
        );
        assert!(selected_formats(vec![TargetFormat::Joplin], true).is_empty());
    }

    #[test]
    fn cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "onenote_export",
            "export",
            "--format",
            "joplin,evernote",
            "--notebook",
            "Work",
            "--notebook",
            "Home",
            "--access-token",
            "t",
        ])
        .unwrap();
        assert_eq!(cli.auth.access_token.as_deref(), Some("t"));
        assert_eq!(cli.auth.tenant, "common");
        match cli.command {
            Commands::Export { format, notebook, raw_only, .. } => {
                assert_eq!(format, vec![TargetFormat::Joplin, TargetFormat::Evernote]);
                assert_eq!(notebook, vec!["Work", "Home"]);
                assert!(!raw_only);
            }
            Commands::List => panic!("expected export"),
        }
    }

    #[test]
    fn since_and_days_filters() {
        let cli = Cli::try_parse_from(["onenote_export", "export", "--since", "2024-02-01"]).unwrap();
        match cli.command {
            Commands::Export { since, days, .. } => {
                assert_eq!(since, Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
                assert_eq!(days, None);
            }
            Commands::List => panic!("expected export"),
        }
        assert!(Cli::try_parse_from(["onenote_export", "export", "--since", "2024-02-01", "--days", "7"]).is_err());
        assert!(Cli::try_parse_from(["onenote_export", "export", "--since", "last week"]).is_err());
    }

    #[test]
    fn since_accepts_timestamps_and_dates() {
        assert_eq!(
            parse_since("2024-02-01T09:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 7, 30, 0).unwrap()
        );
        assert_eq!(parse_since("2024-02-01").unwrap(), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert!(parse_since("02/01/2024").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_secs(75)), "1m 15s");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
