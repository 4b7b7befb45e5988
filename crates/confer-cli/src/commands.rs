use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use confer_format::ProcessorSelector;
use confer_source::{StreamSource, WriteTarget};
use confer_types::{flatten, scalar_text, Properties, PropertyPacket, Url};

use crate::cli::*;
use crate::config::ConferConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = ConferConfig::load(&cli.config)?;
    let output = match cli.command {
        Command::Repos => cmd_repos(&config, cli.format)?,
        Command::Resolve(args) => cmd_resolve(&config, args, cli.format)?,
        Command::Get(args) => cmd_get(&config, args, cli.format).await?,
        Command::Put(args) => cmd_put(&config, args, cli.format).await?,
    };
    print!("{output}");
    Ok(())
}

fn cmd_repos(config: &ConferConfig, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json_line(&config.repos);
    }
    if config.repos.is_empty() {
        return Ok("No repositories configured.\n".to_string());
    }
    let mut out = String::new();
    for repo in &config.repos {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            repo.name.bold(),
            format!("[{}]", repo.backend).cyan(),
            repo.uri,
            repo.file_name.dimmed()
        );
    }
    Ok(out)
}

fn cmd_resolve(
    config: &ConferConfig,
    args: ResolveArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let location = config.repo(&args.repo)?.location_builder()?.build(&args.path)?;
    match format {
        OutputFormat::Json => json_line(&serde_json::json!({
            "repo": args.repo,
            "path": args.path,
            "location": location.as_str(),
        })),
        OutputFormat::Text => Ok(format!("{location}\n")),
    }
}

async fn cmd_get(config: &ConferConfig, args: GetArgs, format: OutputFormat) -> anyhow::Result<String> {
    let source = open(config, &args.repo).await?;
    let fetched = source.stream(&args.path).await;
    source.close().await?;

    let packet = match fetched? {
        Some(packet) => packet,
        None => {
            let location = source.prototype_location(&args.path)?;
            bail!("no document at {location}");
        }
    };
    if let Some(reason) = packet.decode_failure() {
        let location = packet.location().map(Url::as_str).unwrap_or_default();
        bail!("document at {location} could not be decoded: {reason}");
    }

    let properties = if args.flat {
        packet.flattened()
    } else {
        packet.into_properties()
    };
    match format {
        OutputFormat::Json => json_line(&properties),
        OutputFormat::Text => Ok(render_text(&properties)),
    }
}

async fn cmd_put(config: &ConferConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<String> {
    let packet = read_document(&args.input)?;
    let definition = config.repo(&args.repo)?;
    let target = match args.format_name {
        Some(name) => WriteTarget::new(&args.path, name),
        None => WriteTarget::canonical(definition, &args.path),
    };

    let source = open(config, &args.repo).await?;
    let location = source.prototype_location(&target.path)?;
    let written = source.write(&target, &packet).await;
    source.close().await?;

    if !written? {
        bail!("write to {location} was not acknowledged");
    }
    match format {
        OutputFormat::Json => json_line(&serde_json::json!({
            "location": location.as_str(),
            "format": target.format_name,
            "properties": packet.len(),
        })),
        OutputFormat::Text => Ok(format!(
            "{} Wrote {} properties to {}\n",
            "✓".green().bold(),
            packet.len(),
            location.as_str().bold()
        )),
    }
}

async fn open(config: &ConferConfig, repo: &str) -> anyhow::Result<Arc<dyn StreamSource>> {
    let definition = config.repo(repo)?.clone();
    let source = config.registry()?.build(definition)?;
    source
        .init()
        .await
        .with_context(|| format!("cannot open repository {repo:?}"))?;
    Ok(source)
}

/// Decode a local file by its own extension.
fn read_document(path: &Path) -> anyhow::Result<PropertyPacket> {
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} is not a file", path.display()))?;
    let properties = ProcessorSelector::standard()
        .decode(&name, &data)
        .with_context(|| format!("cannot decode {}", path.display()))?;
    Ok(PropertyPacket::from_properties(properties))
}

/// `key = value` lines over the flattened mapping.
fn render_text(properties: &Properties) -> String {
    let mut out = String::new();
    for (key, value) in flatten(properties) {
        let text = scalar_text(&value).unwrap_or_else(|| value.to_string());
        let _ = writeln!(out, "{} = {}", key.cyan(), text);
    }
    out
}

fn json_line<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}
