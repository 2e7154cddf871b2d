use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::calc::{Calculator, Report, format_number};
use crate::channels::ChannelView;
use crate::checklist::{Checklist, Task};
use crate::config::Config;
use crate::datetime::ViewerZone;
use crate::timers::{TimerBoard, TimerStatus};

const BAR_WIDTH: usize = 20;
const GRID_COLUMNS: usize = 10;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_checklist<W: Write>(
        &self,
        out: &mut W,
        checklist: &Checklist,
        zone: &ViewerZone,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let kind = checklist.kind();
        writeln!(out, "{}", self.paint(kind.title(), "1"))?;
        writeln!(out, "{}", zone.format(now, "%A, %-d %B %Y"))?;
        if checklist.reset_on_open() {
            writeln!(out, "{}", self.paint("Progress was reset.", "33"))?;
        }

        let progress = checklist.progress();
        tracing::debug!(
            percent = progress.percent,
            ring_offset = progress.ring_offset(),
            "checklist progress"
        );
        let filled = BAR_WIDTH * progress.percent as usize / 100;
        writeln!(
            out,
            "[{}{}] {}/{} ({}%)",
            self.paint(&"#".repeat(filled), "32"),
            "-".repeat(BAR_WIDTH - filled),
            progress.done,
            progress.total,
            progress.percent
        )?;
        writeln!(out)?;

        for row in checklist.rows() {
            let mark = if row.done {
                self.paint("[x]", "32")
            } else {
                "[ ]".to_string()
            };
            writeln!(out, "{:>2}. {mark} {}", row.index + 1, task_text(row.task))?;
        }

        if let Some(last) = checklist.last_reset() {
            writeln!(out)?;
            writeln!(
                out,
                "last reset {}",
                zone.format(last, "%Y-%m-%d %H:%M")
            )?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_channels<W: Write>(&self, out: &mut W, view: &ChannelView) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} ({})",
            self.paint("Available channels", "1"),
            view.visible.len()
        )?;
        match view.grid_notice() {
            Some(notice) => writeln!(out, "{notice}")?,
            None => write_grid(out, &view.visible)?,
        }

        writeln!(out)?;
        writeln!(
            out,
            "{} ({}/{})",
            self.paint("Active channels", "1"),
            view.active.len(),
            view.total
        )?;
        match view.active_notice() {
            Some(notice) => writeln!(out, "{notice}")?,
            None => {
                let painted: Vec<String> = view
                    .active
                    .iter()
                    .map(|num| self.paint(&num.to_string(), "32"))
                    .collect();
                writeln!(out, "{}", painted.join(" "))?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_timers<W: Write>(
        &self,
        out: &mut W,
        board: &TimerBoard,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let stats = board.stats(now);
        writeln!(
            out,
            "Total: {}  Active: {}  Ready: {}",
            stats.total, stats.active, stats.ready
        )?;
        if board.is_empty() {
            writeln!(out, "No boss timers yet.")?;
            return Ok(());
        }
        writeln!(out)?;

        let headers = ["#", "ID", "Name", "Ch", "Spawn", "Status"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = board
            .timers()
            .iter()
            .enumerate()
            .map(|(idx, timer)| {
                let status = timer.status(now);
                let label = match status {
                    TimerStatus::Ready => self.paint(&status.label(), "32;1"),
                    TimerStatus::Active { .. } => self.paint(&status.label(), "33"),
                    TimerStatus::Stopped => status.label(),
                };
                vec![
                    (idx + 1).to_string(),
                    timer.id.chars().take(8).collect(),
                    timer.name.clone(),
                    timer.channel.to_string(),
                    format!("{}m", timer.spawn_time_minutes),
                    label,
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_calc<W: Write>(
        &self,
        out: &mut W,
        calc: &Calculator,
        report: &Report,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint("Materials", "1"))?;
        if calc.materials.is_empty() {
            writeln!(out, "(none)")?;
        } else {
            let headers = ["#", "Name", "Qty", "Unit", "Cost"]
                .iter()
                .map(|h| h.to_string())
                .collect();
            let rows = calc
                .materials
                .iter()
                .enumerate()
                .map(|(idx, material)| {
                    vec![
                        (idx + 1).to_string(),
                        material.display_name().to_string(),
                        format_number(material.qty),
                        format_number(material.unit),
                        format_number(material.line_cost()),
                    ]
                })
                .collect();
            write_table(&mut *out, headers, rows)?;
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Outcomes", "1"))?;
        let headers = ["#", "Items", "Chance %", "Expected"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = calc
            .outcomes
            .iter()
            .enumerate()
            .map(|(idx, outcome)| {
                vec![
                    (idx + 1).to_string(),
                    format_number(outcome.items),
                    format_number(outcome.pct),
                    format_number(outcome.contribution()),
                ]
            })
            .collect();
        write_table(&mut *out, headers, rows)?;
        let sum = format!("sum {}%", format_number(report.probability_sum));
        if crate::calc::probabilities_balanced(&calc.outcomes) {
            writeln!(out, "{sum}")?;
        } else {
            writeln!(out, "{}", self.paint(&sum, "31"))?;
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Settings", "1"))?;
        for field in crate::calc::Field::ALL {
            let value = calc
                .settings
                .get(field)
                .map(format_number)
                .unwrap_or_default();
            writeln!(out, "  {:<18} {value}", field.key())?;
        }
        for issue in &report.issues {
            writeln!(out, "  {}", self.paint(&issue.message(), "31"))?;
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Per craft", "1"))?;
        let per_craft = [
            ("Material cost", report.material_cost_per_craft),
            ("Expected items", report.expected_items_per_craft),
            ("Revenue", report.revenue_per_craft),
            ("Profit", report.profit_per_craft),
            ("Profit / focus", report.profit_per_focus_point),
        ];
        for (label, value) in per_craft {
            writeln!(out, "  {label:<18} {}", self.money(value))?;
        }
        let breakeven = report
            .breakeven_price
            .map_or_else(|| crate::calc::DASH.to_string(), format_number);
        writeln!(out, "  {:<18} {breakeven}", "Breakeven price")?;

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Per day", "1"))?;
        let per_day = [
            ("Crafts", report.crafts_per_day),
            ("Items", report.items_per_day),
            ("Material cost", report.material_cost_per_day),
            ("Revenue", report.revenue_per_day),
            ("Deposit", report.deposit_per_day),
            ("Profit", report.profit_per_day),
        ];
        for (label, value) in per_day {
            writeln!(out, "  {label:<18} {}", self.money(value))?;
        }
        writeln!(
            out,
            "  {:<18} {}",
            "Materials",
            report.materials_per_day_summary()
        )?;

        if !report.notes.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", self.paint(&report.footer(), "2"))?;
        }
        Ok(())
    }

    fn money(&self, value: f64) -> String {
        let text = format_number(value);
        if value < 0.0 {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn task_text(task: &Task) -> String {
    match (task.quantity, task.exchange) {
        (Some(qty), Some(exchange)) => format!("{} x{qty} ({exchange})", task.label),
        (Some(qty), None) => format!("{} x{qty}", task.label),
        _ => task.label.to_string(),
    }
}

fn write_grid<W: Write>(out: &mut W, numbers: &[u32]) -> anyhow::Result<()> {
    for line in numbers.chunks(GRID_COLUMNS) {
        let cells: Vec<String> = line.iter().map(|num| format!("{num:>3}")).collect();
        writeln!(out, "{}", cells.join(" "))?;
    }
    Ok(())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
