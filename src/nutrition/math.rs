use lazy_static::lazy_static;
use regex::Regex;
use time::{Date, OffsetDateTime};

use super::types::{FoodItem, Macros, MealLog};

/// Units written flush against the number ("150g"); everything else gets a space.
const SYMBOL_UNITS: &[&str] = &["g", "kg", "mg", "mcg", "µg", "ml", "l", "oz", "lb", "lbs"];

/// Element-wise total. Empty input is the zero vector.
pub fn sum<'a, I>(items: I) -> Macros
where
    I: IntoIterator<Item = &'a FoodItem>,
{
    items
        .into_iter()
        .fold(Macros::default(), |acc, item| acc + item.macros)
}

pub fn rescale(macros: Macros, ratio: f64) -> Macros {
    Macros {
        calories: macros.calories * ratio,
        protein: macros.protein * ratio,
        carbs: macros.carbs * ratio,
        fat: macros.fat * ratio,
    }
    .clamped()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Serving {
    pub quantity: f64,
    pub unit: String,
}

impl Serving {
    pub fn same_unit(&self, other: &Serving) -> bool {
        self.unit.eq_ignore_ascii_case(&other.unit)
    }
}

lazy_static! {
    static ref SERVING_RE: Regex =
        Regex::new(r"^\s*(\d+(?:[.,]\d+)?|[.,]\d+)\s*(.*?)\s*$").unwrap();
}

/// Splits "150g" / "1.5 cups" into quantity and unit. Text without a leading
/// number is kept verbatim as the unit with quantity 1; an empty unit is "g".
pub fn parse_serving(text: &str) -> Serving {
    let (quantity, unit) = match SERVING_RE.captures(text) {
        Some(caps) => {
            let number = caps[1].replace(',', ".");
            let quantity = number.parse::<f64>().unwrap_or(1.0);
            (quantity, caps[2].to_string())
        }
        None => (1.0, text.trim().to_string()),
    };

    let unit = if unit.is_empty() { "g".to_string() } else { unit };
    Serving { quantity, unit }
}

pub fn format_serving(quantity: f64, unit: &str) -> String {
    let rounded = (quantity * 1000.0).round() / 1000.0;
    let unit = unit.trim();
    let unit = if unit.is_empty() { "g" } else { unit };

    if SYMBOL_UNITS.iter().any(|u| u.eq_ignore_ascii_case(unit)) {
        format!("{rounded}{unit}")
    } else {
        format!("{rounded} {unit}")
    }
}

pub fn normalize_serving(text: &str) -> String {
    let s = parse_serving(text);
    format_serving(s.quantity, &s.unit)
}

/// Sum of `total_macros` for logs whose timestamp falls on `day` (UTC).
pub fn daily_totals<'a, I>(logs: I, day: Date) -> Macros
where
    I: IntoIterator<Item = &'a MealLog>,
{
    logs.into_iter()
        .filter(|log| log_date(log.timestamp) == Some(day))
        .fold(Macros::default(), |acc, log| acc + log.total_macros)
}

fn log_date(timestamp_ms: i64) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp_nanos(timestamp_ms as i128 * 1_000_000)
        .ok()
        .map(|dt| dt.date())
}
