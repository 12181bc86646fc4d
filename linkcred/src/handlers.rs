use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use linkcred_core::batch::no_delay;
use linkcred_core::config::PipelineConfig;
use linkcred_core::pipeline::PassOutcome;
use linkcred_core::report::{
    ReportFormat, gather_report_data, generate_json_report, generate_text_report, save_report,
    summarize_bucket,
};
use linkcred_core::{AssessmentPipeline, LinkSession, PageContext, Sanitizer};
use linkcred_scanner::harvest::{fetch_document, harvest_links, is_candidate_href};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

// Helper functions for scan handler

/// Load raw hrefs from a newline-delimited file, one pass worth of links
pub fn load_links_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read links file {}", path.display()))?;

    let links: Vec<String> = content.lines().filter_map(parse_link_line).collect();

    if links.is_empty() {
        bail!("No links found in {}", path.display());
    }

    Ok(links)
}

/// A line as the page would have handed it over, or None for lines a page
/// scan would never produce (blank, `#`, `mailto:` and the like)
pub fn parse_link_line(line: &str) -> Option<String> {
    let line = line.trim();
    if is_candidate_href(line) {
        Some(line.to_string())
    } else {
        None
    }
}

/// Reads the config file, falling back to defaults when the default location
/// does not exist yet.
pub fn load_config(path: &str, explicit: bool) -> Result<PipelineConfig> {
    let config = if explicit {
        PipelineConfig::load(path)
    } else {
        PipelineConfig::load_or_default(path)
    };
    config.with_context(|| format!("Failed to load config {}", path))
}

/// Parses a `--keep-query` rule such as `youtube.com=v,t`.
pub fn parse_keep_query(rule: &str) -> Result<(String, Vec<String>)> {
    let (host, params) = rule
        .split_once('=')
        .with_context(|| format!("Expected HOST=PARAM[,PARAM...], got {}", rule))?;
    let host = host.trim().to_lowercase();
    let params: Vec<String> = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if host.is_empty() || params.is_empty() {
        bail!("Expected HOST=PARAM[,PARAM...], got {}", rule);
    }
    Ok((host, params))
}

/// Adds `--keep-query` rules on top of the configured allow-list.
pub fn apply_query_rules(config: PipelineConfig, sub_matches: &ArgMatches) -> Result<PipelineConfig> {
    let Some(rules) = sub_matches.get_many::<String>("keep-query") else {
        return Ok(config);
    };

    let mut allow_list = config.query_allow_list.clone();
    for rule in rules {
        let (host, params) = parse_keep_query(rule)?;
        let params: Vec<&str> = params.iter().map(String::as_str).collect();
        allow_list = allow_list.with_site(&host, &params);
    }
    Ok(config.with_query_allow_list(allow_list))
}

/// Scan flags take precedence over the config file.
pub fn apply_scan_overrides(mut config: PipelineConfig, sub_matches: &ArgMatches) -> Result<PipelineConfig> {
    if let Some(service) = sub_matches.get_one::<Url>("service") {
        config = config.with_service_url(service.as_str());
    }
    if let Some(batch_size) = sub_matches.get_one::<usize>("batch-size") {
        config = config.with_batch_size(*batch_size);
    }
    if let Some(timeout) = sub_matches.get_one::<u64>("timeout") {
        config = config.with_request_timeout(*timeout);
    }
    if let Some(hops) = sub_matches.get_one::<usize>("max-hops") {
        config = config.with_max_redirect_hops(*hops);
    }
    if let Some(user_agent) = sub_matches.get_one::<String>("user-agent") {
        config = config.with_user_agent(user_agent.as_str());
    }
    apply_query_rules(config, sub_matches)
}

/// The link lists for each pass: one per links file, otherwise a single pass
/// harvested from HTML.
pub async fn collect_passes(
    links_files: &[PathBuf],
    html_file: Option<&PathBuf>,
    page: &Url,
    config: &PipelineConfig,
) -> Result<Vec<Vec<String>>> {
    if !links_files.is_empty() {
        return links_files
            .iter()
            .map(|path| load_links_from_file(path))
            .collect();
    }

    let html = match html_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read HTML file {}", path.display()))?,
        None => fetch_document(page.as_str(), config.request_timeout_secs, &config.user_agent)
            .await
            .with_context(|| format!("Failed to fetch {}", page))?,
    };

    let links = harvest_links(&html, None).context("Failed to harvest links")?;
    Ok(vec![links])
}

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn spinner(quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub fn print_banner() {
    print_divider();
    println!(
        "{} {}",
        "  LINKCRED".bright_white().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
    print_divider();
    println!();
}

fn print_pass_summary(index: usize, outcome: &PassOutcome) {
    let r = &outcome.report;
    println!(
        "{} Pass {}: {} new link(s), {} replayed, {} assessed",
        "✓".green().bold(),
        index + 1,
        outcome.new_links.to_string().bright_white(),
        outcome.replayed.len().to_string().cyan(),
        outcome.assessed_links().to_string().green()
    );
    println!(
        "  {} known {} / chased {} / remote {} / cached {}",
        "→".blue(),
        r.server_known.len(),
        r.client_resolved.len(),
        r.fallback_resolved.len(),
        r.cache_hits.len()
    );
    if !r.unavailable.is_empty() {
        println!("  {} {} unavailable", "⚠".yellow(), r.unavailable.len());
    }
    if !r.scheduled_failed.is_empty() {
        println!("  {} {} unresolved", "⚠".yellow(), r.scheduled_failed.len());
    }
    if !outcome.withheld.is_empty() {
        println!(
            "  {} {} withheld, assessments unavailable (retried next pass)",
            "⚠".yellow(),
            outcome.withheld.len()
        );
    }
    for (raw, bucket) in outcome.assessments.iter().filter(|(_, b)| !b.is_empty()) {
        println!("    {} {}", raw.bright_white(), summarize_bucket(bucket).bright_black());
    }
}

pub async fn handle_scan(sub_matches: &ArgMatches, quiet: bool, verbose: bool) -> Result<()> {
    init_tracing(verbose);

    let page_url = sub_matches
        .get_one::<Url>("page")
        .context("--page is required")?;
    let config_path = sub_matches
        .get_one::<String>("config")
        .context("--config has a default")?;
    let explicit_config = sub_matches.value_source("config")
        == Some(clap::parser::ValueSource::CommandLine);
    let format_name = sub_matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    let format = ReportFormat::from_str(format_name)
        .with_context(|| format!("Unknown report format {}", format_name))?;
    let output = sub_matches.get_one::<PathBuf>("output");
    let links_files: Vec<PathBuf> = sub_matches
        .get_many::<PathBuf>("links-file")
        .map(|files| files.cloned().collect())
        .unwrap_or_default();

    let config = apply_scan_overrides(load_config(config_path, explicit_config)?, sub_matches)?;
    if config.service_url.is_none() {
        bail!("No link service configured: pass --service or set service_url in {}", config_path);
    }

    let page = PageContext::new(page_url.as_str())?;
    let passes = collect_passes(
        &links_files,
        sub_matches.get_one::<PathBuf>("html"),
        page_url,
        &config,
    )
    .await?;

    let mut pipeline = AssessmentPipeline::from_config(config)?;
    if sub_matches.get_flag("no-pacing") {
        pipeline = pipeline.with_delay(no_delay());
    }

    if !quiet {
        println!(
            "{} Scanning {} ({} pass(es))",
            "→".blue(),
            page_url.as_str().bright_white(),
            passes.len()
        );
        println!();
    }

    let mut session = LinkSession::new();
    let mut outcomes = Vec::with_capacity(passes.len());
    for (index, links) in passes.iter().enumerate() {
        let pb = spinner(quiet);
        if let Some(pb) = &pb {
            pb.set_message(format!("Pass {}: {} link(s)", index + 1, links.len()));
        }

        let result = pipeline.run_pass(&mut session, &page, links).await;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        let outcome = result.with_context(|| format!("Pass {} failed", index + 1))?;
        if !quiet {
            print_pass_summary(index, &outcome);
        }
        outcomes.push(outcome);
    }

    info!(
        "Session {} finished with {} assessed link(s)",
        session.id,
        session.non_empty().len()
    );

    let data = gather_report_data(&session, page_url.as_str(), &outcomes);
    let report = match format {
        ReportFormat::Text => generate_text_report(&data),
        ReportFormat::Json => generate_json_report(&data).context("Failed to render report")?,
    };

    match output {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!();
                println!(
                    "{} Report saved to {}",
                    "✓".green().bold(),
                    path.display().to_string().bright_white()
                );
            }
        }
        None => {
            if !quiet {
                println!();
            }
            print!("{}", report);
        }
    }

    Ok(())
}

/// Canonical form of each link, or None where it would be dropped
pub fn sanitize_links(sanitizer: &Sanitizer, page: &PageContext, links: &[String]) -> Vec<(String, Option<String>)> {
    links
        .iter()
        .map(|raw| (raw.clone(), sanitizer.sanitize(raw, page).ok()))
        .collect()
}

pub fn handle_sanitize(sub_matches: &ArgMatches, verbose: bool) -> Result<()> {
    init_tracing(verbose);

    let page_url = sub_matches
        .get_one::<Url>("page")
        .context("--page is required")?;
    let config_path = sub_matches
        .get_one::<String>("config")
        .context("--config has a default")?;
    let explicit_config = sub_matches.value_source("config")
        == Some(clap::parser::ValueSource::CommandLine);
    let links: Vec<String> = sub_matches
        .get_many::<String>("LINK")
        .map(|links| links.cloned().collect())
        .unwrap_or_default();

    let config = apply_query_rules(load_config(config_path, explicit_config)?, sub_matches)?;
    let sanitizer = Sanitizer::new(config.query_allow_list);
    let page = PageContext::new(page_url.as_str())?;

    for (raw, canonical) in sanitize_links(&sanitizer, &page, &links) {
        match canonical {
            Some(canonical) => println!("{} {} {}", raw, "→".blue(), canonical.bright_white()),
            None => println!("{} {} {}", raw, "→".blue(), "invalid".red()),
        }
    }

    Ok(())
}
