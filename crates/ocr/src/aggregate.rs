use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tally_core::Money;

use crate::types::{ClassifiedLine, Item, LineLabel, Receipt};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// ASCII digits only, and no line terminators inside a match.
re!(re_price, r"\$?([0-9]+\.[0-9]{2})");
re!(re_date_time, r"[0-9]{2}/[0-9]{2}/[0-9]{2}[^\r\n]*[0-9]{2}:[0-9]{2}[^\r\n]*");

/// Store names recognised when no line was labeled as the merchant.
const STORE_MARKERS: &[&str] = &["STOP & SHOP"];

const TOTAL_MARKERS: &[&str] = &["BALANCE", "$"];

const UNKNOWN_ITEM: &str = "Unknown Item";

// ── Public aggregation API ───────────────────────────────────────────────────

pub struct LineAggregator;

impl LineAggregator {
    /// Fold classified lines into a receipt. Missing fields keep their zero values.
    pub fn format_receipt(lines: &[ClassifiedLine]) -> Receipt {
        Receipt {
            merchant: Self::merchant(lines).unwrap_or_default(),
            date: Self::date(lines).unwrap_or_default(),
            total: Self::total(lines).unwrap_or_default(),
            items: Self::items(lines),
        }
    }

    // ── Merchant ──────────────────────────────────────────────────────────────

    fn merchant(lines: &[ClassifiedLine]) -> Option<String> {
        let line = first_labeled(lines, LineLabel::Merchant).or_else(|| {
            lines
                .iter()
                .find(|l| STORE_MARKERS.iter().any(|m| l.text.contains(m)))
        })?;
        // The address usually follows the store name after a dash.
        let name = line.text.split('-').next().unwrap_or_default();
        Some(name.trim().to_string())
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    fn date(lines: &[ClassifiedLine]) -> Option<String> {
        if let Some(line) = first_labeled(lines, LineLabel::Date) {
            let value = match re_date_time().find(&line.text) {
                Some(m) => m.as_str(),
                None => line.text.trim(),
            };
            return Some(value.to_string());
        }
        lines
            .iter()
            .find_map(|l| re_date_time().find(&l.text))
            .map(|m| m.as_str().to_string())
    }

    // ── Total ────────────────────────────────────────────────────────────────

    fn total(lines: &[ClassifiedLine]) -> Option<Money> {
        let line = first_labeled(lines, LineLabel::Total).or_else(|| {
            lines
                .iter()
                .find(|l| TOTAL_MARKERS.iter().any(|m| l.text.contains(m)))
        })?;
        parse_price(&line.text)
    }

    // ── Items ────────────────────────────────────────────────────────────────

    fn items(lines: &[ClassifiedLine]) -> Vec<Item> {
        let mut items = Vec::new();
        let mut pending_name: Option<String> = None;

        for line in lines.iter().filter(|l| l.label == LineLabel::Item) {
            match re_price().captures(&line.text) {
                Some(caps) => {
                    let name = pending_name.take();
                    // An amount Decimal cannot hold closes the pending item without emitting it.
                    let Some(price) = caps.get(1).and_then(|m| Money::from_str(m.as_str()).ok())
                    else {
                        tracing::debug!("Dropping item with unparseable price {:?}", line.text);
                        continue;
                    };
                    let name = name
                        .or_else(|| name_beside_price(&line.text, caps.get(0)?.range()))
                        .unwrap_or_else(|| UNKNOWN_ITEM.to_string());
                    items.push(Item::new(name, price));
                }
                None => {
                    let text = line.text.trim();
                    if pending_name.is_none() && !text.is_empty() {
                        pending_name = Some(text.to_string());
                    }
                }
            }
        }

        // A name without a price line after it is not an item.
        items
    }
}

fn first_labeled(lines: &[ClassifiedLine], label: LineLabel) -> Option<&ClassifiedLine> {
    lines.iter().find(|l| l.label == label)
}

fn parse_price(text: &str) -> Option<Money> {
    let caps = re_price().captures(text)?;
    Money::from_str(caps.get(1)?.as_str()).ok()
}

/// Text of a price line once the price itself is cut out, e.g. `MILK` from `MILK 2.50`.
fn name_beside_price(text: &str, price: std::ops::Range<usize>) -> Option<String> {
    let name = format!("{} {}", &text[..price.start], &text[price.end..]);
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    (!name.is_empty()).then_some(name)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
