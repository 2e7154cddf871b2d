use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::datastore::{KeyValueStore, load_json, save_json};
use crate::datetime::iso_serde;

pub const STORAGE_KEY: &str = "metalCraftCalcV1";
pub const EXPORT_VERSION: &str = "1.0";
pub const DASH: &str = "—";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub qty: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub unit: f64,
}

impl Material {
    pub fn new(name: &str, qty: f64, unit: f64) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            qty,
            unit,
        }
    }

    pub fn line_cost(&self) -> f64 {
        self.qty * self.unit
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Material"
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub items: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub pct: f64,
}

impl Outcome {
    pub fn new(items: f64, pct: f64) -> Self {
        Self {
            id: new_id(),
            items,
            pct,
        }
    }

    pub fn contribution(&self) -> f64 {
        self.items * (self.pct / 100.0)
    }
}

/// Calculator inputs. `None` means the field was left empty.
///
/// Defaults when empty or out of range: sale price, fee, daily focus and
/// deposit fall back to 0, focus per craft falls back to 1, and an empty
/// crafts-per-day override means "derive from the focus budget".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub sale_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub fee_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub focus_per_craft: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub daily_focus: Option<f64>,
    #[serde(
        default,
        rename = "craftsPerDayInput",
        deserialize_with = "lenient::optional_override"
    )]
    pub crafts_per_day_override: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub deposit_fee: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SalePrice,
    FeePct,
    FocusPerCraft,
    DailyFocus,
    CraftsPerDayOverride,
    DepositFee,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::SalePrice,
        Field::FeePct,
        Field::FocusPerCraft,
        Field::DailyFocus,
        Field::CraftsPerDayOverride,
        Field::DepositFee,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::SalePrice => "salePrice",
            Self::FeePct => "feePct",
            Self::FocusPerCraft => "focusPerCraft",
            Self::DailyFocus => "dailyFocus",
            Self::CraftsPerDayOverride => "craftsPerDayInput",
            Self::DepositFee => "depositFee",
        }
    }

    pub fn parse(name: &str) -> anyhow::Result<Self> {
        let wanted = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
        let aliases: &[(&str, Field)] = &[
            ("price", Field::SalePrice),
            ("fee", Field::FeePct),
            ("focus", Field::FocusPerCraft),
            ("budget", Field::DailyFocus),
            ("crafts", Field::CraftsPerDayOverride),
            ("craftsperday", Field::CraftsPerDayOverride),
            ("deposit", Field::DepositFee),
        ];
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.key().to_ascii_lowercase() == wanted)
            .or_else(|| {
                aliases
                    .iter()
                    .find(|(alias, _)| *alias == wanted)
                    .map(|(_, field)| *field)
            })
            .ok_or_else(|| anyhow!("unknown calculator field: {name}"))
    }

    /// Inclusive valid range.
    pub fn range(self) -> (f64, f64) {
        match self {
            Self::FeePct => (0.0, 100.0),
            Self::FocusPerCraft => (1.0, f64::INFINITY),
            _ => (0.0, f64::INFINITY),
        }
    }

    fn fallback(self) -> f64 {
        match self {
            Self::FocusPerCraft => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldIssue {
    pub field: Field,
    pub value: f64,
}

impl FieldIssue {
    pub fn message(&self) -> String {
        let (min, max) = self.field.range();
        if max.is_finite() {
            format!(
                "{} must be between {min} and {max} (got {})",
                self.field.key(),
                format_number(self.value)
            )
        } else {
            format!(
                "{} must be at least {min} (got {})",
                self.field.key(),
                format_number(self.value)
            )
        }
    }
}

impl Settings {
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::SalePrice => self.sale_price,
            Field::FeePct => self.fee_pct,
            Field::FocusPerCraft => self.focus_per_craft,
            Field::DailyFocus => self.daily_focus,
            Field::CraftsPerDayOverride => self.crafts_per_day_override,
            Field::DepositFee => self.deposit_fee,
        }
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        let slot = match field {
            Field::SalePrice => &mut self.sale_price,
            Field::FeePct => &mut self.fee_pct,
            Field::FocusPerCraft => &mut self.focus_per_craft,
            Field::DailyFocus => &mut self.daily_focus,
            Field::CraftsPerDayOverride => &mut self.crafts_per_day_override,
            Field::DepositFee => &mut self.deposit_fee,
        };
        *slot = value;
    }

    /// Filled fields whose value is outside the field's range.
    pub fn issues(&self) -> Vec<FieldIssue> {
        Field::ALL
            .iter()
            .filter_map(|field| {
                let value = self.get(*field)?;
                let (min, max) = field.range();
                (value < min || value > max).then_some(FieldIssue {
                    field: *field,
                    value,
                })
            })
            .collect()
    }

    /// Value used in arithmetic: the entered value when valid, else the
    /// field's fallback.
    pub fn effective(&self, field: Field) -> f64 {
        let (min, max) = field.range();
        match self.get(field) {
            Some(value) if value >= min && value <= max => value,
            _ => field.fallback(),
        }
    }

    /// Applies an imported `settings` object with falsy values replaced by
    /// the field defaults.
    fn from_import(raw: &Value) -> Self {
        let truthy = |key: &str| -> Option<f64> {
            lenient::value_to_number(raw.get(key)?).filter(|value| *value != 0.0)
        };
        Self {
            sale_price: Some(truthy("salePrice").unwrap_or(0.0)),
            fee_pct: Some(truthy("feePct").unwrap_or(0.0)),
            focus_per_craft: Some(truthy("focusPerCraft").unwrap_or(1.0)),
            daily_focus: Some(truthy("dailyFocus").unwrap_or(0.0)),
            crafts_per_day_override: raw
                .get("craftsPerDayInput")
                .filter(|value| value.as_f64() != Some(0.0))
                .and_then(lenient::override_value),
            deposit_fee: Some(truthy("depositFee").unwrap_or(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note {
    ProbabilitySum,
    NoMarketFee,
    NoDepositFee,
    CraftsOverridden,
}

impl Note {
    pub fn message(self) -> &'static str {
        match self {
            Self::ProbabilitySum => "Probabilities sum ≠ 100%.",
            Self::NoMarketFee => "No market fee applied.",
            Self::NoDepositFee => "No deposit fee applied.",
            Self::CraftsOverridden => "Crafts/day overridden.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub material_cost_per_craft: f64,
    pub probability_sum: f64,
    pub expected_items_per_craft: f64,
    pub revenue_per_craft: f64,
    pub profit_per_craft: f64,
    pub profit_per_focus_point: f64,
    pub breakeven_price: Option<f64>,
    pub crafts_per_day: f64,
    pub items_per_day: f64,
    pub material_cost_per_day: f64,
    pub revenue_per_day: f64,
    pub deposit_per_day: f64,
    pub profit_per_day: f64,
    pub materials_per_day: Vec<(String, f64)>,
    pub notes: Vec<Note>,
    pub issues: Vec<FieldIssue>,
}

impl Report {
    pub fn has_note(&self, note: Note) -> bool {
        self.notes.contains(&note)
    }

    pub fn footer(&self) -> String {
        self.notes
            .iter()
            .map(|note| note.message())
            .collect::<Vec<_>>()
            .join("  ")
    }

    pub fn materials_per_day_summary(&self) -> String {
        if self.materials_per_day.is_empty() {
            return DASH.to_string();
        }
        self.materials_per_day
            .iter()
            .map(|(name, qty)| format!("{} × {name}", format_number(*qty)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn probability_sum(outcomes: &[Outcome]) -> f64 {
    outcomes.iter().map(|outcome| outcome.pct).sum()
}

pub fn probabilities_balanced(outcomes: &[Outcome]) -> bool {
    (probability_sum(outcomes) - 100.0).abs() < 1e-9
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calculator {
    pub materials: Vec<Material>,
    pub outcomes: Vec<Outcome>,
    pub settings: Settings,
}

impl Default for Calculator {
    fn default() -> Self {
        Self {
            materials: Vec::new(),
            outcomes: default_outcomes(),
            settings: Settings::default(),
        }
    }
}

pub fn default_outcomes() -> Vec<Outcome> {
    vec![
        Outcome::new(1.0, 72.0),
        Outcome::new(2.0, 26.0),
        Outcome::new(3.0, 2.0),
    ]
}

pub fn default_materials() -> Vec<Material> {
    vec![
        Material::new("Ore", 8.0, 174.0),
        Material::new("Powder", 1.0, 138.0),
    ]
}

/// Stored form: lists plus the settings flattened to the top level.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCalc {
    #[serde(default)]
    materials: Option<Vec<Material>>,
    #[serde(default)]
    outcomes: Option<Vec<Outcome>>,
    #[serde(flatten)]
    settings: Settings,
}

#[derive(Debug, Serialize)]
pub struct CalcExport<'a> {
    pub version: &'static str,
    #[serde(with = "iso_serde")]
    pub timestamp: DateTime<Utc>,
    pub materials: &'a [Material],
    pub outcomes: &'a [Outcome],
    pub settings: &'a Settings,
}

impl Calculator {
    #[tracing::instrument(skip(store))]
    pub fn load<S>(store: &S) -> Self
    where
        S: KeyValueStore + ?Sized,
    {
        let stored: StoredCalc = load_json(store, STORAGE_KEY);
        let mut calc = Self::default();
        if let Some(materials) = stored.materials {
            calc.materials = materials;
        }
        if let Some(outcomes) = stored.outcomes {
            calc.outcomes = outcomes;
        }
        calc.settings = stored.settings;
        debug!(
            materials = calc.materials.len(),
            outcomes = calc.outcomes.len(),
            "loaded calculator state"
        );
        calc
    }

    pub fn save<S>(&self, store: &mut S) -> anyhow::Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        let stored = StoredCalc {
            materials: Some(self.materials.clone()),
            outcomes: Some(self.outcomes.clone()),
            settings: self.settings.clone(),
        };
        save_json(store, STORAGE_KEY, &stored)
    }

    pub fn add_material(&mut self, name: &str, qty: f64, unit: f64) -> &Material {
        self.materials.push(Material::new(name, qty, unit));
        &self.materials[self.materials.len() - 1]
    }

    pub fn material_mut(&mut self, idx: usize) -> anyhow::Result<&mut Material> {
        self.materials
            .get_mut(idx)
            .ok_or_else(|| anyhow!("no material #{}", idx + 1))
    }

    pub fn remove_material(&mut self, idx: usize) -> anyhow::Result<Material> {
        if idx >= self.materials.len() {
            return Err(anyhow!("no material #{}", idx + 1));
        }
        Ok(self.materials.remove(idx))
    }

    pub fn reset_default_materials(&mut self) {
        self.materials = default_materials();
    }

    pub fn add_outcome(&mut self, items: f64, pct: f64) -> &Outcome {
        self.outcomes.push(Outcome::new(items, pct));
        &self.outcomes[self.outcomes.len() - 1]
    }

    pub fn outcome_mut(&mut self, idx: usize) -> anyhow::Result<&mut Outcome> {
        self.outcomes
            .get_mut(idx)
            .ok_or_else(|| anyhow!("no outcome #{}", idx + 1))
    }

    pub fn remove_outcome(&mut self, idx: usize) -> anyhow::Result<Outcome> {
        if idx >= self.outcomes.len() {
            return Err(anyhow!("no outcome #{}", idx + 1));
        }
        Ok(self.outcomes.remove(idx))
    }

    #[tracing::instrument(skip(self))]
    pub fn compute(&self) -> Report {
        let settings = &self.settings;
        let material_cost_per_craft: f64 = self.materials.iter().map(Material::line_cost).sum();
        let expected_items_per_craft: f64 =
            self.outcomes.iter().map(Outcome::contribution).sum();
        let probability_sum = probability_sum(&self.outcomes);

        let price = settings.effective(Field::SalePrice);
        let fee = settings.effective(Field::FeePct) / 100.0;
        let revenue_per_craft = expected_items_per_craft * price * (1.0 - fee);

        let focus_per_craft = settings.effective(Field::FocusPerCraft);
        let profit_per_craft = revenue_per_craft - material_cost_per_craft;
        let profit_per_focus_point = profit_per_craft / focus_per_craft;
        let breakeven_price = (expected_items_per_craft > 0.0 && 1.0 - fee != 0.0)
            .then(|| material_cost_per_craft / expected_items_per_craft / (1.0 - fee))
            .filter(|value| value.is_finite());

        let computed_crafts = (settings.effective(Field::DailyFocus) / focus_per_craft).floor();
        let crafts_per_day = match settings.crafts_per_day_override {
            Some(value) => value.floor().max(0.0),
            None => computed_crafts,
        };

        let materials_per_day = self
            .materials
            .iter()
            .map(|material| {
                (
                    material.display_name().to_string(),
                    material.qty * crafts_per_day,
                )
            })
            .collect();
        let material_cost_per_day = material_cost_per_craft * crafts_per_day;
        let revenue_per_day = revenue_per_craft * crafts_per_day;
        let items_per_day = expected_items_per_craft * crafts_per_day;
        let deposit_per_day = settings.effective(Field::DepositFee);
        let profit_per_day = revenue_per_day - material_cost_per_day - deposit_per_day;

        let mut notes = Vec::new();
        if (probability_sum - 100.0).abs() > 1e-9 {
            notes.push(Note::ProbabilitySum);
        }
        if fee == 0.0 {
            notes.push(Note::NoMarketFee);
        }
        if deposit_per_day == 0.0 {
            notes.push(Note::NoDepositFee);
        }
        if settings.crafts_per_day_override.is_some() {
            notes.push(Note::CraftsOverridden);
        }

        Report {
            material_cost_per_craft,
            probability_sum,
            expected_items_per_craft,
            revenue_per_craft,
            profit_per_craft,
            profit_per_focus_point,
            breakeven_price,
            crafts_per_day,
            items_per_day,
            material_cost_per_day,
            revenue_per_day,
            deposit_per_day,
            profit_per_day,
            materials_per_day,
            notes,
            issues: settings.issues(),
        }
    }

    pub fn export(&self, now: DateTime<Utc>) -> CalcExport<'_> {
        CalcExport {
            version: EXPORT_VERSION,
            timestamp: now,
            materials: &self.materials,
            outcomes: &self.outcomes,
            settings: &self.settings,
        }
    }

    pub fn export_json(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.export(now))
            .context("failed serializing calculator config")
    }

    /// Replaces lists and settings from an exported config. The file must
    /// carry `materials`, `outcomes` and `settings`; otherwise nothing
    /// changes.
    #[tracing::instrument(skip(self, raw))]
    pub fn import_json(&mut self, raw: &str) -> anyhow::Result<()> {
        let config: Value =
            serde_json::from_str(raw).context("Error parsing configuration file")?;
        let field = |key: &str| {
            config
                .get(key)
                .filter(|value| !value.is_null())
                .ok_or_else(|| anyhow!("Invalid configuration file format (missing {key})"))
        };
        let materials_raw = field("materials")?;
        let outcomes_raw = field("outcomes")?;
        let settings_raw = field("settings")?;

        let materials: Vec<Material> = serde_json::from_value(materials_raw.clone())
            .context("Invalid configuration file format (materials)")?;
        let outcomes: Vec<Outcome> = serde_json::from_value(outcomes_raw.clone())
            .context("Invalid configuration file format (outcomes)")?;
        if !settings_raw.is_object() {
            return Err(anyhow!("Invalid configuration file format (settings)"));
        }

        self.materials = materials
            .into_iter()
            .map(|material| Material {
                id: new_id(),
                ..material
            })
            .collect();
        self.outcomes = outcomes
            .into_iter()
            .map(|outcome| Outcome {
                id: new_id(),
                ..outcome
            })
            .collect();
        self.settings = Settings::from_import(settings_raw);
        info!(
            materials = self.materials.len(),
            outcomes = self.outcomes.len(),
            "imported calculator config"
        );
        Ok(())
    }
}

/// Parses a user-entered number. Empty text clears the field.
pub fn parse_input(raw: &str) -> anyhow::Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: f64 = trimmed
        .parse()
        .with_context(|| format!("not a number: {trimmed}"))?;
    if !value.is_finite() {
        return Err(anyhow!("not a finite number: {trimmed}"));
    }
    Ok(Some(value))
}

/// Grouped thousands, at most two fraction digits, dash for non-finite.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return DASH.to_string();
    }

    let cents = (value.abs() * 100.0).round() as u128;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    match frac {
        0 => format!("{sign}{grouped}"),
        f if f % 10 == 0 => format!("{sign}{grouped}.{}", f / 10),
        f => format!("{sign}{grouped}.{f:02}"),
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn value_to_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(num) => num.as_f64(),
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            _ => None,
        }
        .filter(|num| num.is_finite())
    }

    /// Any non-blank text overrides; text that is not a number counts as 0.
    pub fn override_value(value: &Value) -> Option<f64> {
        match value {
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(_) => Some(value_to_number(value).unwrap_or(0.0)),
            Value::Number(_) => value_to_number(value),
            _ => None,
        }
    }

    pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value_to_number(&value).unwrap_or(0.0))
    }

    pub fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value_to_number(&value))
    }

    pub fn optional_override<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(override_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Calculator, Field, Material, Note, Outcome, Settings, format_number, parse_input,
    };
    use crate::datastore::{KeyValueStore, MemoryStore};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn sample() -> Calculator {
        let mut calc = Calculator::default();
        calc.reset_default_materials();
        calc.settings = Settings {
            sale_price: Some(1200.0),
            fee_pct: Some(5.0),
            focus_per_craft: Some(20.0),
            daily_focus: Some(500.0),
            crafts_per_day_override: None,
            deposit_fee: Some(300.0),
        };
        calc
    }

    #[test]
    fn material_cost_sums_quantity_times_unit() {
        let calc = sample();
        let report = calc.compute();
        assert!(close(report.material_cost_per_craft, 1530.0));
    }

    #[test]
    fn full_report_matches_hand_computation() {
        let report = sample().compute();
        // 1*0.72 + 2*0.26 + 3*0.02
        assert!(close(report.expected_items_per_craft, 1.3));
        assert!(close(report.revenue_per_craft, 1.3 * 1200.0 * 0.95));
        assert!(close(report.profit_per_craft, 1482.0 - 1530.0));
        assert!(close(report.profit_per_focus_point, -48.0 / 20.0));
        let breakeven = report.breakeven_price.expect("defined");
        assert!(close(breakeven, 1530.0 / 1.3 / 0.95));
        assert!(close(report.crafts_per_day, 25.0));
        assert!(close(report.items_per_day, 32.5));
        assert!(close(report.profit_per_day, 25.0 * -48.0 - 300.0));
        assert_eq!(
            report.materials_per_day_summary(),
            "200 × Ore, 25 × Powder"
        );
        assert!(report.notes.is_empty());
    }

    #[test]
    fn unbalanced_probabilities_warn_but_compute() {
        let mut calc = sample();
        calc.outcomes = vec![Outcome::new(1.0, 50.0), Outcome::new(2.0, 30.0)];
        let report = calc.compute();
        assert!(report.has_note(Note::ProbabilitySum));
        assert!(close(report.probability_sum, 80.0));
        assert!(close(report.expected_items_per_craft, 1.1));
        assert!(close(report.material_cost_per_craft, 1530.0));
        assert!(report.profit_per_day.is_finite());
    }

    #[test]
    fn breakeven_undefined_without_items_or_at_full_fee() {
        let mut calc = sample();
        calc.settings.fee_pct = Some(100.0);
        assert_eq!(calc.compute().breakeven_price, None);

        let mut calc = sample();
        calc.outcomes.clear();
        let report = calc.compute();
        assert_eq!(report.breakeven_price, None);
        assert_eq!(format_number(f64::NAN), "—");
    }

    #[test]
    fn override_replaces_focus_budget() {
        let mut calc = sample();
        calc.settings.crafts_per_day_override = Some(7.9);
        let report = calc.compute();
        assert!(close(report.crafts_per_day, 7.0));
        assert!(report.has_note(Note::CraftsOverridden));

        calc.settings.crafts_per_day_override = Some(-3.0);
        assert!(close(calc.compute().crafts_per_day, 0.0));
    }

    #[test]
    fn invalid_inputs_are_flagged_and_fall_back() {
        let mut calc = sample();
        calc.settings.fee_pct = Some(150.0);
        calc.settings.focus_per_craft = Some(0.0);
        let report = calc.compute();

        let flagged: Vec<Field> = report.issues.iter().map(|issue| issue.field).collect();
        assert_eq!(flagged, vec![Field::FeePct, Field::FocusPerCraft]);
        assert!(report.has_note(Note::NoMarketFee));
        // Focus per craft falls back to 1: 500 crafts a day.
        assert!(close(report.crafts_per_day, 500.0));
        assert!(close(report.material_cost_per_craft, 1530.0));
    }

    #[test]
    fn empty_settings_use_defaults() {
        let calc = Calculator::default();
        let report = calc.compute();
        assert!(close(report.crafts_per_day, 0.0));
        assert!(close(report.expected_items_per_craft, 1.3));
        assert!(report.has_note(Note::NoMarketFee));
        assert!(report.has_note(Note::NoDepositFee));
        assert!(!report.has_note(Note::ProbabilitySum));
        assert_eq!(report.materials_per_day_summary(), "—");
    }

    #[test]
    fn persisted_browser_state_loads() {
        let mut store = MemoryStore::new();
        store
            .set_item(
                "metalCraftCalcV1",
                r#"{"materials":[{"id":"m1","name":"Ore","qty":8,"unit":174}],
                    "outcomes":[{"id":"o1","items":1,"pct":100}],
                    "salePrice":"1500","feePct":"","focusPerCraft":"20",
                    "dailyFocus":"400","craftsPerDayInput":"","depositFee":"abc"}"#,
            )
            .expect("set");

        let calc = Calculator::load(&store);
        assert_eq!(calc.materials.len(), 1);
        assert_eq!(calc.settings.sale_price, Some(1500.0));
        assert_eq!(calc.settings.fee_pct, None);
        assert_eq!(calc.settings.crafts_per_day_override, None);
        assert_eq!(calc.settings.deposit_fee, None);
        assert!(close(calc.compute().crafts_per_day, 20.0));

        calc.save(&mut store).expect("save");
        let reloaded = Calculator::load(&store);
        assert_eq!(reloaded, calc);
    }

    #[test]
    fn non_numeric_crafts_override_counts_as_zero() {
        let mut store = MemoryStore::new();
        store
            .set_item(
                "metalCraftCalcV1",
                r#"{"outcomes":[{"id":"o1","items":1,"pct":100}],
                    "focusPerCraft":"20","dailyFocus":"400","craftsPerDayInput":"abc"}"#,
            )
            .expect("set");

        let calc = Calculator::load(&store);
        assert_eq!(calc.settings.crafts_per_day_override, Some(0.0));
        let report = calc.compute();
        assert!(close(report.crafts_per_day, 0.0));
        assert!(report.has_note(Note::CraftsOverridden));

        let mut imported = Calculator::default();
        imported
            .import_json(
                r#"{"materials":[],"outcomes":[],"settings":{"craftsPerDayInput":"many"}}"#,
            )
            .expect("import");
        assert_eq!(imported.settings.crafts_per_day_override, Some(0.0));
    }

    #[test]
    fn missing_state_keeps_default_outcomes() {
        let store = MemoryStore::new();
        let calc = Calculator::load(&store);
        assert!(calc.materials.is_empty());
        assert_eq!(calc.outcomes.len(), 3);
    }

    #[test]
    fn import_requires_settings_and_leaves_state_alone() {
        let mut calc = sample();
        let before = calc.clone();
        let raw = r#"{"version":"1.0","materials":[{"name":"X","qty":1,"unit":1}],"outcomes":[]}"#;
        assert!(calc.import_json(raw).is_err());
        assert!(calc.import_json("{").is_err());
        assert!(
            calc.import_json(r#"{"materials":{},"outcomes":[],"settings":{}}"#)
                .is_err()
        );
        assert_eq!(calc, before);
    }

    #[test]
    fn export_import_roundtrip_assigns_fresh_ids() {
        let calc = sample();
        let now = chrono::Utc::now();
        let json = calc.export_json(now).expect("export");
        assert!(json.contains(r#""version": "1.0""#));
        assert!(json.contains(r#""settings""#));

        let mut other = Calculator::default();
        other.import_json(&json).expect("import");
        assert_eq!(other.materials.len(), 2);
        assert_ne!(other.materials[0].id, calc.materials[0].id);
        assert_eq!(other.materials[0].name, "Ore");
        assert_eq!(other.settings, calc.settings);
        assert!(close(
            other.compute().profit_per_day,
            calc.compute().profit_per_day
        ));
    }

    #[test]
    fn import_applies_falsy_defaults() {
        let mut calc = Calculator::default();
        calc.import_json(
            r#"{"materials":[],"outcomes":[],"settings":{"salePrice":"","focusPerCraft":0}}"#,
        )
        .expect("import");
        assert_eq!(calc.settings.sale_price, Some(0.0));
        assert_eq!(calc.settings.focus_per_craft, Some(1.0));
        assert_eq!(calc.settings.crafts_per_day_override, None);
    }

    #[test]
    fn unnamed_material_is_labelled() {
        let material = Material::new("  ", 2.0, 3.0);
        assert_eq!(material.display_name(), "Material");
        assert!((material.line_cost() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn field_names_and_aliases_parse() {
        assert_eq!(Field::parse("salePrice").expect("field"), Field::SalePrice);
        assert_eq!(Field::parse("fee").expect("field"), Field::FeePct);
        assert_eq!(
            Field::parse("crafts-per-day").expect("field"),
            Field::CraftsPerDayOverride
        );
        assert!(Field::parse("nope").is_err());
    }

    #[test]
    fn parses_user_numbers() {
        assert_eq!(parse_input(" 12.5 ").expect("number"), Some(12.5));
        assert_eq!(parse_input("").expect("empty"), None);
        assert!(parse_input("abc").is_err());
        assert!(parse_input("NaN").is_err());
    }

    #[test]
    fn formats_numbers_like_the_page() {
        assert_eq!(format_number(1530.0), "1,530");
        assert_eq!(format_number(1234567.891), "1,234,567.89");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-48.0), "-48");
        assert_eq!(format_number(-0.001), "0");
        assert_eq!(format_number(f64::INFINITY), "—");
    }
}
