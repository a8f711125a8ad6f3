//! Postal addresses for origins and destinations.

use serde::{Deserialize, Serialize};

/// State codes the tax service accepts as a destination.
const DOMESTIC_STATES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

/// A normalized US postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub address1: String,
    #[serde(default)]
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip5: String,
    #[serde(default)]
    pub zip4: String,
}

impl Address {
    /// Build an address from a free-form postcode such as `12345-6789`.
    pub fn new(
        address1: impl Into<String>,
        address2: impl Into<String>,
        city: impl Into<String>,
        state: &str,
        postcode: &str,
    ) -> Self {
        let (zip5, zip4) = Self::parse_zip(postcode);
        Address {
            address1: address1.into(),
            address2: address2.into(),
            city: city.into(),
            state: state.trim().to_ascii_uppercase(),
            zip5,
            zip4,
        }
    }

    /// Split a postcode into its five- and four-digit parts.
    ///
    /// Non-digit separators are ignored; anything past nine digits is dropped.
    pub fn parse_zip(postcode: &str) -> (String, String) {
        let digits: String = postcode.chars().filter(|c| c.is_ascii_digit()).collect();
        let zip5: String = digits.chars().take(5).collect();
        let zip4: String = digits.chars().skip(5).take(4).collect();
        (zip5, zip4)
    }

    /// True when the address is one the service can tax: a known state and a
    /// five-digit zip.
    pub fn is_domestic(&self) -> bool {
        DOMESTIC_STATES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(self.state.trim()))
            && self.zip5.len() == 5
            && self.zip5.chars().all(|c| c.is_ascii_digit())
    }

    pub fn same_state(&self, state: &str) -> bool {
        self.state.eq_ignore_ascii_case(state.trim())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {} {}", self.address1, self.city, self.state, self.zip5)?;
        if !self.zip4.is_empty() {
            write!(f, "-{}", self.zip4)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zip_plus_four() {
        assert_eq!(
            Address::parse_zip("98101-1234"),
            ("98101".to_string(), "1234".to_string())
        );
        assert_eq!(
            Address::parse_zip(" 10001 "),
            ("10001".to_string(), String::new())
        );
    }

    #[test]
    fn test_new_normalizes_state() {
        let addr = Address::new("1 Main St", "", "Austin", " tx", "78701");
        assert_eq!(addr.state, "TX");
        assert!(addr.same_state("tx"));
    }

    #[test]
    fn test_is_domestic() {
        assert!(Address::new("1 Main St", "", "Austin", "TX", "78701").is_domestic());
        assert!(!Address::new("1 Main St", "", "Toronto", "ON", "M5V").is_domestic());
        assert!(!Address::new("1 Main St", "", "Austin", "TX", "787").is_domestic());
    }

    #[test]
    fn test_display_includes_zip4() {
        let addr = Address::new("1 Main St", "", "Seattle", "WA", "98101-1234");
        assert_eq!(addr.to_string(), "1 Main St, Seattle, WA 98101-1234");
    }
}
