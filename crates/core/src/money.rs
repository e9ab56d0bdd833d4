//! Minor-unit amount formatting.
//!
//! Amounts travel as integer cents and are only turned into a decimal string
//! at the presentation edge, without passing through floating point.

use crate::types::Cents;

/// Format an amount in minor units as a decimal string with two places.
///
/// # Examples
///
/// ```
/// use shop_core::money::format_minor_units;
///
/// assert_eq!(format_minor_units(2599), "25.99");
/// assert_eq!(format_minor_units(5), "0.05");
/// assert_eq!(format_minor_units(-150), "-1.50");
/// ```
pub fn format_minor_units(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
