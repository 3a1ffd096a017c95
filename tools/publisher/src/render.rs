//! Text rendering of grid snapshots for the demo log.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use grid_types::value::Value;
use view_engine::view::ViewState;

/// Two-decimal number with thousands separators, e.g. `1,234.50`.
pub fn format_number(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded);
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Currency cell: `$` prefix on a formatted number.
pub fn format_currency(value: Decimal) -> String {
    format!("${}", format_number(value))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(d)) => format_currency(*d),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// One line per row, up to `limit` rows: `SYMBOL  bid  ask`.
pub fn render_rows(view: &ViewState, limit: usize) -> Vec<String> {
    view.iter()
        .take(limit)
        .map(|row| {
            format!(
                "{:<6} {:>12} {:>12}",
                cell(row.get("symbol")),
                cell(row.get("bid")),
                cell(row.get("ask")),
            )
        })
        .collect()
}
