//! Fixed-precision amounts and the `(currency, units, nanos)` money form.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, LedgerError, LedgerResult};

/// Fractional digits kept on every stored amount.
pub const AMOUNT_SCALE: u32 = 9;

const NANOS_PER_UNIT: i64 = 1_000_000_000;

/// Largest representable magnitude: `i64::MAX + 0.999_999_999`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xFFFF_FFFF, 0xFFFF_FFFF, 499_999_999, false, 9);

/// Smallest representable value, `-MAX_AMOUNT`.
pub const MIN_AMOUNT: Decimal = Decimal::from_parts(0xFFFF_FFFF, 0xFFFF_FFFF, 499_999_999, true, 9);

/// Round to 9 decimal places and clamp into `[MIN_AMOUNT, MAX_AMOUNT]`.
pub fn clamp_amount(value: Decimal) -> Decimal {
    let rounded = value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero);
    if rounded > MAX_AMOUNT {
        MAX_AMOUNT
    } else if rounded < MIN_AMOUNT {
        MIN_AMOUNT
    } else {
        rounded
    }
}

/// Render an amount with exactly 9 decimal places.
pub fn format_amount(value: Decimal) -> String {
    let mut scaled = clamp_amount(value);
    scaled.rescale(AMOUNT_SCALE);
    scaled.to_string()
}

/// Parse a decimal string, clamping it into range.
pub fn parse_amount(raw: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map(clamp_amount)
        .map_err(|e| {
            LedgerError::new(ErrorKind::BadDataSupplied)
                .extend(format!("invalid amount '{}'", raw))
                .with_source(e)
        })
}

/// Active ISO-4217 alphabetic codes.
const ISO_4217_CODES: &[&str] = &[
    "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AUD", "AWG", "AZN", "BAM", "BBD", "BDT",
    "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BOV", "BRL", "BSD", "BTN", "BWP", "BYN", "BZD",
    "CAD", "CDF", "CHE", "CHF", "CHW", "CLF", "CLP", "CNY", "COP", "COU", "CRC", "CUC", "CUP",
    "CVE", "CZK", "DJF", "DKK", "DOP", "DZD", "EGP", "ERN", "ETB", "EUR", "FJD", "FKP", "GBP",
    "GEL", "GHS", "GIP", "GMD", "GNF", "GTQ", "GYD", "HKD", "HNL", "HRK", "HTG", "HUF", "IDR",
    "ILS", "INR", "IQD", "IRR", "ISK", "JMD", "JOD", "JPY", "KES", "KGS", "KHR", "KMF", "KPW",
    "KRW", "KWD", "KYD", "KZT", "LAK", "LBP", "LKR", "LRD", "LSL", "LYD", "MAD", "MDL", "MGA",
    "MKD", "MMK", "MNT", "MOP", "MRU", "MUR", "MVR", "MWK", "MXN", "MXV", "MYR", "MZN", "NAD",
    "NGN", "NIO", "NOK", "NPR", "NZD", "OMR", "PAB", "PEN", "PGK", "PHP", "PKR", "PLN", "PYG",
    "QAR", "RON", "RSD", "RUB", "RWF", "SAR", "SBD", "SCR", "SDG", "SEK", "SGD", "SHP", "SLE",
    "SLL", "SOS", "SRD", "SSP", "STN", "SVC", "SYP", "SZL", "THB", "TJS", "TMT", "TND", "TOP",
    "TRY", "TTD", "TWD", "TZS", "UAH", "UGX", "USD", "USN", "UYI", "UYU", "UYW", "UZS", "VED",
    "VES", "VND", "VUV", "WST", "XAF", "XAG", "XAU", "XBA", "XBB", "XBC", "XBD", "XCD", "XDR",
    "XOF", "XPD", "XPF", "XPT", "XSU", "XTS", "XUA", "XXX", "YER", "ZAR", "ZMW", "ZWL",
];

/// A validated ISO-4217 currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a code case-insensitively.
    pub fn parse(code: &str) -> LedgerResult<Self> {
        let upper = code.trim().to_ascii_uppercase();
        if ISO_4217_CODES.binary_search(&upper.as_str()).is_ok() {
            Ok(Self(upper))
        } else {
            Err(LedgerError::new(ErrorKind::CurrencyUnknown).extend(format!("'{}'", code)))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw code.
    pub fn matches(&self, code: &str) -> bool {
        self.0.eq_ignore_ascii_case(code.trim())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Wire money form. Equality is structural on `(code, units, nanos)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub currency_code: String,
    pub units: i64,
    pub nanos: i32,
}

/// Split a decimal into money form. The value is clamped first, so `units`
/// always fits an `i64`; `nanos` carries the sign of the value.
pub fn to_money(code: &str, value: Decimal) -> LedgerResult<Money> {
    let currency = Currency::parse(code)?;
    let value = clamp_amount(value);

    let whole = value.trunc();
    let units = whole.to_i64().ok_or_else(|| {
        LedgerError::new(ErrorKind::BadDataSupplied).extend(format!("units overflow for {}", value))
    })?;

    let fraction = ((value - whole) * Decimal::from(NANOS_PER_UNIT)).trunc();
    let nanos = match fraction.to_i64() {
        Some(n) => n.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        None if fraction.is_sign_negative() => i32::MIN,
        None => i32::MAX,
    };

    Ok(Money {
        currency_code: currency.code().to_string(),
        units,
        nanos,
    })
}

/// Join money form back into a decimal.
pub fn from_money(money: &Money) -> LedgerResult<Decimal> {
    Currency::parse(&money.currency_code)?;

    if (money.nanos as i64).abs() >= NANOS_PER_UNIT {
        return Err(LedgerError::new(ErrorKind::BadDataSupplied)
            .extend(format!("nanos out of range: {}", money.nanos)));
    }
    if money.units != 0
        && money.nanos != 0
        && (money.units.is_negative() != money.nanos.is_negative())
    {
        return Err(LedgerError::new(ErrorKind::BadDataSupplied).extend(format!(
            "units ({}) and nanos ({}) differ in sign",
            money.units, money.nanos
        )));
    }

    let units = Decimal::from(money.units);
    let nanos = Decimal::new(money.nanos as i64, AMOUNT_SCALE);
    Ok(clamp_amount(units + nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_max_amount_value() {
        assert_eq!(MAX_AMOUNT, dec("9223372036854775807.999999999"));
        assert_eq!(MIN_AMOUNT, -MAX_AMOUNT);
    }

    #[test]
    fn test_iso_table_is_sorted() {
        let mut sorted = ISO_4217_CODES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ISO_4217_CODES);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("usd").unwrap().code(), "USD");
        assert!(Currency::parse("EUR").unwrap().matches("eur"));
        let err = Currency::parse("ABC").unwrap_err();
        assert!(err.is(ErrorKind::CurrencyUnknown));
        assert!(Currency::parse("").is_err());
    }

    #[test]
    fn test_clamp_amount() {
        assert_eq!(clamp_amount(dec("1.1234567899")), dec("1.123456789"));
        assert_eq!(
            clamp_amount(dec("99999999999999999999.5")),
            MAX_AMOUNT
        );
        assert_eq!(
            clamp_amount(dec("-99999999999999999999.5")),
            MIN_AMOUNT
        );
    }

    #[test]
    fn test_format_amount_has_nine_places() {
        assert_eq!(format_amount(dec("50")), "50.000000000");
        assert_eq!(format_amount(dec("-0.5")), "-0.500000000");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 12.5 ").unwrap(), dec("12.5"));
        assert_eq!(parse_amount("1e2").unwrap(), dec("100"));
        assert!(parse_amount("twelve").unwrap_err().is(ErrorKind::BadDataSupplied));
    }

    #[test]
    fn test_to_money_splits_sign_consistently() {
        let m = to_money("usd", dec("-12.345")).unwrap();
        assert_eq!(
            m,
            Money {
                currency_code: "USD".into(),
                units: -12,
                nanos: -345_000_000
            }
        );

        let m = to_money("USD", dec("0.000000001")).unwrap();
        assert_eq!((m.units, m.nanos), (0, 1));
    }

    #[test]
    fn test_to_money_clamps() {
        let m = to_money("USD", dec("99999999999999999999")).unwrap();
        assert_eq!(m.units, i64::MAX);
        assert_eq!(m.nanos, 999_999_999);
    }

    #[test]
    fn test_to_money_unknown_currency() {
        assert!(to_money("QQQ", Decimal::ONE)
            .unwrap_err()
            .is(ErrorKind::CurrencyUnknown));
    }

    #[test]
    fn test_money_round_trip() {
        let m = Money {
            currency_code: "EUR".into(),
            units: 42,
            nanos: 7,
        };
        let d = from_money(&m).unwrap();
        assert_eq!(d, dec("42.000000007"));
        assert_eq!(to_money("EUR", d).unwrap(), m);
    }

    #[test]
    fn test_from_money_rejects_mixed_signs() {
        let m = Money {
            currency_code: "USD".into(),
            units: 1,
            nanos: -5,
        };
        assert!(from_money(&m).unwrap_err().is(ErrorKind::BadDataSupplied));

        let m = Money {
            currency_code: "USD".into(),
            units: 0,
            nanos: 1_000_000_000,
        };
        assert!(from_money(&m).is_err());
    }

    #[test]
    fn test_from_money_extremes() {
        let m = Money {
            currency_code: "USD".into(),
            units: i64::MIN,
            nanos: -999_999_999,
        };
        // i64::MIN - 0.999999999 is below MIN_AMOUNT and clamps.
        assert_eq!(from_money(&m).unwrap(), MIN_AMOUNT);
    }
}
