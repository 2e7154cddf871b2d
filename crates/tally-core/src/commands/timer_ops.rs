use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

use super::{confirm, read_input, split_sub, viewer_zone, write_output};
use crate::config::Config;
use crate::datastore::KeyValueStore;
use crate::poll::PollEvent;
use crate::render::Renderer;
use crate::timers::{
    NewTimer, Notifier, TerminalNotifier, TimerBoard, TimerSession, TimerStatus, format_remaining,
    ready_notification,
};

const DEFAULT_POLL_MS: u64 = 1000;

#[instrument(skip(store, cfg, renderer, args, now, out))]
pub(super) fn cmd_timers<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    info!("command timers");
    let max_channel = super::channel_total(cfg)?;
    let mut board = TimerBoard::load(store, max_channel);

    let (sub, rest) = split_sub(args);
    match sub {
        None | Some("list") | Some("show") => {}
        Some("add") => {
            let input = parse_new_timer(rest)?;
            let timer = board.add(input)?;
            writeln!(out, "Added {} (channel {}).", timer.name, timer.channel)?;
            board.save(store)?;
        }
        Some("start") => {
            let idx = board.resolve(selector(rest)?)?;
            let timer = board.start(idx, now)?;
            writeln!(out, "Started {}.", timer.name)?;
            board.save(store)?;
        }
        Some("reset") => {
            let idx = board.resolve(selector(rest)?)?;
            let timer = board.reset(idx)?;
            writeln!(out, "Reset {}.", timer.name)?;
            board.save(store)?;
        }
        Some("delete") => {
            let idx = board.resolve(selector(rest)?)?;
            let name = board.timers()[idx].name.clone();
            if !confirm(cfg, &format!("Delete timer {name}?"), out)? {
                writeln!(out, "Nothing deleted.")?;
                return Ok(());
            }
            let timer = board.delete(idx)?;
            writeln!(out, "Deleted {}.", timer.name)?;
            board.save(store)?;
        }
        Some("clear") => {
            if board.is_empty() {
                writeln!(out, "No boss timers yet.")?;
                return Ok(());
            }
            let prompt = format!("Clear all {} timers?", board.len());
            if !confirm(cfg, &prompt, out)? {
                writeln!(out, "Nothing cleared.")?;
                return Ok(());
            }
            let count = board.clear();
            board.save(store)?;
            writeln!(out, "Cleared {count} timer(s).")?;
        }
        Some("export") => {
            let default_name = format!(
                "boss-timers-{}.json",
                viewer_zone(cfg).format(now, "%Y-%m-%d")
            );
            let target = rest.first().map_or(default_name.as_str(), String::as_str);
            write_output(target, &board.export_json(now)?, out)?;
            return Ok(());
        }
        Some("import") => {
            let source = rest
                .first()
                .ok_or_else(|| anyhow!("timers import: expected a file or -"))?;
            let count = board.import_json(&read_input(source)?)?;
            board.save(store)?;
            writeln!(out, "Imported {count} timer(s).")?;
        }
        Some("watch") => return watch(store, cfg, renderer, board, out),
        Some(other) => return Err(anyhow!("unknown timers action: {other}")),
    }

    renderer.print_timers(out, &board, now)
}

fn selector(rest: &[String]) -> anyhow::Result<&str> {
    rest.first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("expected a timer number or id"))
}

/// `<name words...> <minutes> <channel>`. Unparseable numbers count as
/// missing.
fn parse_new_timer(rest: &[String]) -> anyhow::Result<NewTimer> {
    let [name @ .., minutes, channel] = rest else {
        return Err(anyhow!("Please fill in all fields"));
    };
    Ok(NewTimer {
        name: name.join(" "),
        spawn_time_minutes: minutes.trim().parse().unwrap_or(0),
        channel: channel.trim().parse().unwrap_or(0),
    })
}

/// Live countdown. Each running timer has its own poll; lines on stdin
/// (`start <sel>`, `reset <sel>`, `delete <sel>`, `add ...`, `list`,
/// `quit`) edit the board while it runs.
#[instrument(skip_all)]
fn watch<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    board: TimerBoard,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    let period = cfg
        .get_millis("timers.poll_ms")?
        .unwrap_or(std::time::Duration::from_millis(DEFAULT_POLL_MS));
    if period.is_zero() {
        return Err(anyhow!("timers.poll_ms must be greater than zero"));
    }
    let notifier = TerminalNotifier {
        permitted: cfg.get_bool("timers.notify").unwrap_or(true),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start timer runtime")?;

    let result = runtime.block_on(async {
        let (mut session, mut events) = TimerSession::new(board, period);
        let now = Utc::now();
        let resumed = session.resume(now);
        renderer.print_timers(out, session.board(), now)?;
        if resumed == 0 {
            writeln!(out, "No running timers. Type `start <n>` or `quit`.")?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    on_poll_event(&mut session, &event, &notifier, out)?;
                    if session.polls().is_empty() {
                        info!("every running timer is ready");
                        break;
                    }
                }
                line = lines.next_line(), if stdin_open => {
                    match line.context("failed reading stdin")? {
                        Some(line) => {
                            let now = Utc::now();
                            match apply_watch_line(&mut session, &line, now) {
                                Ok(WatchStep::Quit) => break,
                                Ok(WatchStep::Changed) => {
                                    session.board().save(store)?;
                                    renderer.print_timers(out, session.board(), now)?;
                                }
                                Ok(WatchStep::Show) => {
                                    renderer.print_timers(out, session.board(), now)?;
                                }
                                Err(err) => writeln!(out, "error: {err:#}")?,
                            }
                        }
                        None => {
                            debug!("stdin closed");
                            stdin_open = false;
                            if session.polls().is_empty() {
                                break;
                            }
                        }
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    res.context("failed waiting for Ctrl-C")?;
                    info!("interrupted");
                    break;
                }
            }
        }

        session.board().save(store)?;
        anyhow::Ok(())
    });
    // A pending stdin read would otherwise block shutdown.
    runtime.shutdown_background();
    result
}

fn on_poll_event<W: Write>(
    session: &mut TimerSession,
    event: &PollEvent,
    notifier: &dyn Notifier,
    out: &mut W,
) -> anyhow::Result<()> {
    let now = Utc::now();
    if let PollEvent::Tick { id, .. } = event {
        let board = session.board();
        if let Some(timer) = board.position(id).and_then(|idx| board.get(idx))
            && let TimerStatus::Active { remaining } = timer.status(now)
        {
            writeln!(
                out,
                "{} (ch {}) {}",
                timer.name,
                timer.channel,
                format_remaining(remaining)
            )?;
        }
        return Ok(());
    }

    if let Some(timer) = session.handle(event, now) {
        let (title, body) = ready_notification(&timer);
        writeln!(out, "{title} {body}")?;
        if let Err(err) = notifier.notify(&title, &body) {
            warn!(error = %err, "notification failed");
        }
    }
    Ok(())
}

enum WatchStep {
    Changed,
    Show,
    Quit,
}

fn apply_watch_line(
    session: &mut TimerSession,
    line: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<WatchStep> {
    let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    let (sub, rest) = split_sub(&tokens);
    match sub {
        None | Some("list") => Ok(WatchStep::Show),
        Some("quit") | Some("q") | Some("exit") => Ok(WatchStep::Quit),
        Some("add") => {
            session.add(parse_new_timer(rest)?)?;
            Ok(WatchStep::Changed)
        }
        Some("start") => {
            let idx = session.board().resolve(selector(rest)?)?;
            session.start(idx, now)?;
            Ok(WatchStep::Changed)
        }
        Some("reset") => {
            let idx = session.board().resolve(selector(rest)?)?;
            session.reset(idx)?;
            Ok(WatchStep::Changed)
        }
        Some("delete") => {
            let idx = session.board().resolve(selector(rest)?)?;
            session.delete(idx)?;
            Ok(WatchStep::Changed)
        }
        Some("clear") => {
            session.clear();
            Ok(WatchStep::Changed)
        }
        Some(other) => Err(anyhow!("unknown watch command: {other}")),
    }
}
