//! Identifier newtypes and the item kind enum.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identity of one taxable unit (a cart line, a fee, a shipping charge).
    ItemId
);
string_id!(
    /// Identity of a merchant origin location.
    LocationId
);
string_id!(
    /// Merchant-side order number.
    OrderId
);
string_id!(
    /// Buyer identifier sent to the tax service.
    CustomerId
);

/// What an item represents on the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Merchandise,
    Fee,
    Shipping,
}

impl ItemKind {
    /// Fee and shipping lines ride along with the anchor location.
    pub fn follows_anchor(&self) -> bool {
        !matches!(self, ItemKind::Merchandise)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Merchandise => "merchandise",
            ItemKind::Fee => "fee",
            ItemKind::Shipping => "shipping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merchandise" => Some(ItemKind::Merchandise),
            "fee" => Some(ItemKind::Fee),
            "shipping" => Some(ItemKind::Shipping),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
