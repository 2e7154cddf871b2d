mod calc_ops;
mod timer_ops;

use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::channels::{ChannelTracker, TOTAL_CHANNELS};
use crate::checklist::{Checklist, ChecklistKind, Mark};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::KeyValueStore;
use crate::datetime::{ViewerZone, resolve_viewer_zone};
use crate::render::Renderer;
use crate::schedule::{
    DAILY_RESET_HOUR, DAILY_UTC_OFFSET_HOURS, DailyReset, ResetRule, WeeklyReset,
};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "daily", "weekly", "channels", "timers", "calc", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv, out))]
pub fn dispatch<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    let now = Utc::now();
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "daily" => cmd_checklist(
            store,
            cfg,
            renderer,
            ChecklistKind::DailyMissions,
            &inv.command_args,
            now,
            out,
        ),
        "weekly" => cmd_checklist(
            store,
            cfg,
            renderer,
            ChecklistKind::WeeklyLifestyle,
            &inv.command_args,
            now,
            out,
        ),
        "channels" => cmd_channels(store, cfg, renderer, &inv.command_args, out),
        "timers" => timer_ops::cmd_timers(store, cfg, renderer, &inv.command_args, now, out),
        "calc" => calc_ops::cmd_calc(store, cfg, renderer, &inv.command_args, now, out),
        "help" => cmd_help(out),
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

pub fn viewer_zone(cfg: &Config) -> ViewerZone {
    resolve_viewer_zone(cfg.get("timezone").as_deref())
}

pub fn reset_rule(cfg: &Config, kind: ChecklistKind) -> anyhow::Result<ResetRule> {
    match kind {
        ChecklistKind::DailyMissions => {
            let offset = cfg
                .get_parsed::<i32>("daily.utc_offset")?
                .unwrap_or(DAILY_UTC_OFFSET_HOURS);
            let hour = cfg
                .get_parsed::<u32>("daily.reset_hour")?
                .unwrap_or(DAILY_RESET_HOUR);
            Ok(ResetRule::Daily(DailyReset::new(offset, hour)?))
        }
        ChecklistKind::WeeklyLifestyle => {
            Ok(ResetRule::Weekly(WeeklyReset::new(viewer_zone(cfg))))
        }
    }
}

fn channel_total(cfg: &Config) -> anyhow::Result<u32> {
    let total = cfg
        .get_parsed::<u32>("channels.total")?
        .unwrap_or(TOTAL_CHANNELS);
    if total == 0 {
        return Err(anyhow!("channels.total must be at least 1"));
    }
    Ok(total)
}

#[instrument(skip(store, cfg, renderer, args, now, out))]
fn cmd_checklist<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    kind: ChecklistKind,
    args: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    info!(checklist = kind.title(), "command checklist");
    let zone = viewer_zone(cfg);
    let mut checklist = Checklist::open(store, kind, reset_rule(cfg, kind)?, now)?;

    let (sub, rest) = split_sub(args);
    match sub {
        None | Some("show") | Some("list") => {}
        Some("toggle") => checklist.mark_many(store, &parse_positions(rest)?, Mark::Toggle)?,
        Some("check") => checklist.mark_many(store, &parse_positions(rest)?, Mark::Done)?,
        Some("uncheck") => checklist.mark_many(store, &parse_positions(rest)?, Mark::Undone)?,
        Some("reset") => {
            checklist.perform_reset(store, now)?;
            writeln!(out, "{} reset.", kind.title())?;
        }
        Some(other) => return Err(anyhow!("unknown {} action: {other}", kind.title())),
    }

    renderer.print_checklist(out, &checklist, &zone, now)
}

#[instrument(skip(store, cfg, renderer, args, out))]
fn cmd_channels<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    info!("command channels");
    let mut tracker = ChannelTracker::load(store, channel_total(cfg)?);

    let (sub, rest) = split_sub(args);
    let query = match sub {
        None | Some("list") | Some("show") => String::new(),
        Some("search") => rest.join(" "),
        Some("toggle") => {
            if rest.is_empty() {
                return Err(anyhow!("channels toggle: expected channel number(s)"));
            }
            for token in rest {
                let channel: u32 = token
                    .parse()
                    .map_err(|_| anyhow!("not a channel number: {token}"))?;
                let active = tracker.toggle(channel)?;
                let state = if active { "active" } else { "available" };
                writeln!(out, "Channel {channel} is now {state}.")?;
            }
            tracker.save(store)?;
            String::new()
        }
        Some("clear") => {
            let count = tracker.active().len();
            if count == 0 {
                writeln!(out, "No active channels")?;
                return Ok(());
            }
            if !confirm(cfg, &format!("Clear all {count} active channels?"), out)? {
                writeln!(out, "Nothing cleared.")?;
                return Ok(());
            }
            tracker.clear_active();
            tracker.save(store)?;
            writeln!(out, "Cleared {count} active channel(s).")?;
            String::new()
        }
        // Anything else is a search query.
        Some(_) => args.join(" "),
    };

    renderer.print_channels(out, &tracker.view(&query))
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "\
Commands (any unique prefix works):
  daily   [toggle|check|uncheck <n>...] [reset]
  weekly  [toggle|check|uncheck <n>...] [reset]
  channels [search <query>] [toggle <n>...] [clear]
  timers  [list|add <name> <minutes> <channel>|start|reset|delete <sel>|clear]
          [export [file]|import <file|->|watch]
  calc    [show|set <field> <value>|material ...|outcome ...|defaults]
          [export [file]|import <file|->|interactive]
  help, version"
    )?;
    Ok(())
}

/// Asks a yes/no question on stdin unless `confirmation` is off.
pub(crate) fn confirm<W: Write>(cfg: &Config, prompt: &str, out: &mut W) -> anyhow::Result<bool> {
    if !cfg.get_bool("confirmation").unwrap_or(true) {
        return Ok(true);
    }
    write!(out, "{prompt} (yes/no) ")?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

pub(crate) fn split_sub(args: &[String]) -> (Option<&str>, &[String]) {
    match args.split_first() {
        Some((head, rest)) => (Some(head.as_str()), rest),
        None => (None, args),
    }
}

/// 1-based positions to indices.
pub(crate) fn parse_positions(tokens: &[String]) -> anyhow::Result<Vec<usize>> {
    if tokens.is_empty() {
        return Err(anyhow!("expected one or more item numbers"));
    }
    tokens
        .iter()
        .map(|token| parse_position(token))
        .collect()
}

pub(crate) fn parse_position(token: &str) -> anyhow::Result<usize> {
    match token.trim().parse::<usize>() {
        Ok(position) if position >= 1 => Ok(position - 1),
        _ => Err(anyhow!("not an item number: {token}")),
    }
}

/// Reads a file, or stdin for `-`.
pub(crate) fn read_input(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed reading stdin")?;
        return Ok(text);
    }
    fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

/// Writes an export to `target`, or stdout for `-`.
pub(crate) fn write_output<W: Write>(target: &str, json: &str, out: &mut W) -> anyhow::Result<()> {
    if target == "-" {
        writeln!(out, "{json}")?;
        return Ok(());
    }
    fs::write(Path::new(target), json).with_context(|| format!("failed to write {target}"))?;
    writeln!(out, "Exported to {target}")?;
    Ok(())
}
