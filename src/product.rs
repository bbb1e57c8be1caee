//! Product identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::LifecycleError;

const MAX_LEN: usize = 255;

/// Identifier of an installed product.
///
/// Also used as the manifest file name and as a registry key segment, so the
/// accepted characters are limited to ASCII alphanumerics and `{ } - _ .`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductId(String);

impl ProductId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProductId {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(LifecycleError::Argument("Product id must not be empty".into()));
        }
        if s.len() > MAX_LEN {
            return Err(LifecycleError::Argument(format!(
                "Product id is longer than {} characters",
                MAX_LEN
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '{' | '}' | '-' | '_' | '.')))
        {
            return Err(LifecycleError::Argument(format!(
                "Invalid character '{}' in product id '{}'",
                c, s
            )));
        }
        if s.chars().all(|c| c == '.') {
            return Err(LifecycleError::Argument(format!("Invalid product id '{}'", s)));
        }
        Ok(ProductId(s.to_string()))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
