use serde::{Deserialize, Serialize};
use tally_core::Money;

/// Semantic class of one OCR line. The discriminant is the model's output
/// channel, so the order here must match the trained artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineLabel {
    #[default]
    Other = 0,
    Merchant = 1,
    Date = 2,
    Total = 3,
    Item = 4,
}

impl LineLabel {
    /// Channel order of the classifier's logits.
    pub const ALL: [LineLabel; 5] = [
        LineLabel::Other,
        LineLabel::Merchant,
        LineLabel::Date,
        LineLabel::Total,
        LineLabel::Item,
    ];

    pub fn from_channel(channel: usize) -> Option<Self> {
        Self::ALL.get(channel).copied()
    }

    pub fn channel(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for LineLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineLabel::Other => write!(f, "other"),
            LineLabel::Merchant => write!(f, "merchant"),
            LineLabel::Date => write!(f, "date"),
            LineLabel::Total => write!(f, "total"),
            LineLabel::Item => write!(f, "item"),
        }
    }
}

impl std::str::FromStr for LineLabel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "other" => Ok(LineLabel::Other),
            "merchant" => Ok(LineLabel::Merchant),
            "date" => Ok(LineLabel::Date),
            "total" => Ok(LineLabel::Total),
            "item" => Ok(LineLabel::Item),
            other => Err(format!("Unknown line label: '{other}'")),
        }
    }
}

/// One OCR line paired with the label the classifier gave it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub text: String,
    pub label: LineLabel,
}

impl ClassifiedLine {
    pub fn new(text: impl Into<String>, label: LineLabel) -> Self {
        Self { text: text.into(), label }
    }
}

/// Model input for a single line. All three sequences share the configured
/// maximum length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedLine {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl TokenizedLine {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions, including CLS and SEP.
    pub fn content_len(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl Item {
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self { name: name.into(), price, quantity: 1 }
    }
}

/// Structured fields aggregated from the classified lines of one receipt.
/// Fields that could not be found keep their zero values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub merchant: String,
    pub date: String,
    pub total: Money,
    pub items: Vec<Item>,
}

impl Receipt {
    /// Sum of all item prices times their quantities.
    pub fn items_subtotal(&self) -> Money {
        self.items
            .iter()
            .flat_map(|item| std::iter::repeat(item.price).take(item.quantity as usize))
            .sum()
    }
}
