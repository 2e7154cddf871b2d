use std::io::Write;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument};

use super::{parse_position, read_input, split_sub, viewer_zone, write_output};
use crate::calc::{Calculator, Field, parse_input};
use crate::config::Config;
use crate::datastore::KeyValueStore;
use crate::debounce::Debounce;
use crate::render::Renderer;

const DEFAULT_DEBOUNCE_MS: u64 = 150;

#[instrument(skip(store, cfg, renderer, args, now, out))]
pub(super) fn cmd_calc<S, W>(
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
    info!("command calc");
    let mut calc = Calculator::load(store);

    let (sub, rest) = split_sub(args);
    match sub {
        None | Some("show") => {}
        Some("export") => {
            let default_name = format!(
                "craft-calc-{}.json",
                viewer_zone(cfg).format(now, "%Y-%m-%d")
            );
            let target = rest.first().map_or(default_name.as_str(), String::as_str);
            return write_output(target, &calc.export_json(now)?, out);
        }
        Some("import") => {
            let source = rest
                .first()
                .ok_or_else(|| anyhow!("calc import: expected a file or -"))?;
            calc.import_json(&read_input(source)?)?;
            calc.save(store)?;
            writeln!(out, "Configuration imported.")?;
        }
        Some("interactive") | Some("repl") => return interactive(store, cfg, renderer, calc, out),
        Some(_) => {
            apply_calc_edit(&mut calc, args)?;
            calc.save(store)?;
        }
    }

    let report = calc.compute();
    renderer.print_calc(out, &calc, &report)
}

/// Applies one edit command (`set`, `material ...`, `outcome ...`,
/// `defaults`) to the calculator.
pub fn apply_calc_edit(calc: &mut Calculator, args: &[String]) -> anyhow::Result<()> {
    let (sub, rest) = split_sub(args);
    match sub {
        Some("set") => {
            let (field, value) = rest
                .split_first()
                .ok_or_else(|| anyhow!("calc set: expected <field> [value]"))?;
            let field = Field::parse(field)?;
            calc.settings.set(field, parse_input(&value.join(" "))?);
        }
        Some("defaults") => calc.reset_default_materials(),
        Some("material") => edit_material(calc, rest)?,
        Some("outcome") => edit_outcome(calc, rest)?,
        Some(other) => return Err(anyhow!("unknown calc action: {other}")),
        None => return Err(anyhow!("calc: expected an action")),
    }
    Ok(())
}

fn number(token: &str) -> anyhow::Result<f64> {
    Ok(parse_input(token)?.unwrap_or(0.0))
}

fn edit_material(calc: &mut Calculator, args: &[String]) -> anyhow::Result<()> {
    let (sub, rest) = split_sub(args);
    match (sub, rest) {
        (Some("add"), [name @ .., qty, unit]) => {
            let (qty, unit) = (number(qty)?, number(unit)?);
            calc.add_material(&name.join(" "), qty, unit);
        }
        (Some("set"), [position, attr, value @ ..]) => {
            let material = calc.material_mut(parse_position(position)?)?;
            let value = value.join(" ");
            match attr.as_str() {
                "name" => material.name = value,
                "qty" => material.qty = number(&value)?,
                "unit" => material.unit = number(&value)?,
                other => return Err(anyhow!("unknown material attribute: {other}")),
            }
        }
        (Some("remove"), [position]) => {
            calc.remove_material(parse_position(position)?)?;
        }
        _ => {
            return Err(anyhow!(
                "usage: material add <name> <qty> <unit> | set <n> name|qty|unit <value> | remove <n>"
            ));
        }
    }
    Ok(())
}

fn edit_outcome(calc: &mut Calculator, args: &[String]) -> anyhow::Result<()> {
    let (sub, rest) = split_sub(args);
    match (sub, rest) {
        (Some("add"), [items, pct]) => {
            let (items, pct) = (number(items)?, number(pct)?);
            calc.add_outcome(items, pct);
        }
        (Some("set"), [position, attr, value]) => {
            let outcome = calc.outcome_mut(parse_position(position)?)?;
            match attr.as_str() {
                "items" => outcome.items = number(value)?,
                "pct" | "chance" => outcome.pct = number(value)?,
                other => return Err(anyhow!("unknown outcome attribute: {other}")),
            }
        }
        (Some("remove"), [position]) => {
            calc.remove_outcome(parse_position(position)?)?;
        }
        _ => {
            return Err(anyhow!(
                "usage: outcome add <items> <pct> | set <n> items|pct <value> | remove <n>"
            ));
        }
    }
    Ok(())
}

/// Reads edits from stdin and recomputes once input has been quiet for
/// `calc.debounce_ms`. Leaving flushes a pending recompute.
#[instrument(skip_all)]
fn interactive<S, W>(
    store: &mut S,
    cfg: &Config,
    renderer: &Renderer,
    mut calc: Calculator,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: KeyValueStore + ?Sized,
    W: Write,
{
    let delay = cfg
        .get_millis("calc.debounce_ms")?
        .unwrap_or(Duration::from_millis(DEFAULT_DEBOUNCE_MS));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start calculator runtime")?;

    let result = runtime.block_on(async {
        let mut debounce = Debounce::new(delay);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        renderer.print_calc(out, &calc, &calc.compute())?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed reading stdin")? else {
                        debug!("stdin closed");
                        break;
                    };
                    let tokens: Vec<String> =
                        line.split_whitespace().map(str::to_string).collect();
                    match tokens.first().map(String::as_str) {
                        None => continue,
                        Some("quit") | Some("q") | Some("exit") => break,
                        Some("show") => renderer.print_calc(out, &calc, &calc.compute())?,
                        Some(_) => match apply_calc_edit(&mut calc, &tokens) {
                            Ok(()) => debounce.touch(),
                            Err(err) => writeln!(out, "error: {err:#}")?,
                        },
                    }
                }
                () = debounce.fired() => {
                    calc.save(store)?;
                    renderer.print_calc(out, &calc, &calc.compute())?;
                }
            }
        }

        if debounce.take() {
            calc.save(store)?;
            renderer.print_calc(out, &calc, &calc.compute())?;
        }
        anyhow::Ok(())
    });
    runtime.shutdown_background();
    result
}

#[cfg(test)]
mod tests {
    use super::apply_calc_edit;
    use crate::calc::{Calculator, Field};

    fn run(calc: &mut Calculator, line: &str) -> anyhow::Result<()> {
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        apply_calc_edit(calc, &tokens)
    }

    #[test]
    fn edits_materials_outcomes_and_settings() {
        let mut calc = Calculator::default();
        run(&mut calc, "material add Iron Ore 8 174").expect("add");
        assert_eq!(calc.materials[0].name, "Iron Ore");
        run(&mut calc, "material set 1 qty 10").expect("set");
        assert!((calc.materials[0].qty - 10.0).abs() < 1e-9);

        run(&mut calc, "outcome set 3 pct 4").expect("outcome");
        assert!((calc.outcomes[2].pct - 4.0).abs() < 1e-9);
        run(&mut calc, "outcome remove 3").expect("remove");
        assert_eq!(calc.outcomes.len(), 2);

        run(&mut calc, "set fee 5").expect("set fee");
        assert_eq!(calc.settings.get(Field::FeePct), Some(5.0));
        run(&mut calc, "set fee").expect("clear fee");
        assert_eq!(calc.settings.get(Field::FeePct), None);

        run(&mut calc, "defaults").expect("defaults");
        assert_eq!(calc.materials.len(), 2);
    }

    #[test]
    fn rejects_bad_edits() {
        let mut calc = Calculator::default();
        assert!(run(&mut calc, "material remove 1").is_err());
        assert!(run(&mut calc, "outcome add 1").is_err());
        assert!(run(&mut calc, "set price abc").is_err());
        assert!(run(&mut calc, "frobnicate").is_err());
    }
}
