//! Domain error types.

use chrono::NaiveDate;

use super::price::Currency;

/// Rejection of a single order by the portfolio ledger.
///
/// Raised before any state mutation; the portfolio is unchanged when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("insufficient cash: order needs {required:.2}, have {available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("insufficient shares of {ticker}: requested {requested}, held {held}")]
    InsufficientShares {
        ticker: String,
        requested: u64,
        held: u64,
    },
}

/// A strategy asked for price data dated after its decision date.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("look-ahead violation: requested {requested} while deciding on {as_of}")]
pub struct LookAheadViolation {
    pub requested: NaiveDate,
    pub as_of: NaiveDate,
}

/// Top-level error type for portsim.
#[derive(Debug, thiserror::Error)]
pub enum PortsimError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no exchange rate {from}->{to} on or before {date}")]
    MissingExchangeRate {
        from: Currency,
        to: Currency,
        date: NaiveDate,
    },

    #[error("no price for {ticker} on {date}")]
    MissingPrice { ticker: String, date: NaiveDate },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    LookAhead(#[from] LookAheadViolation),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&PortsimError> for std::process::ExitCode {
    fn from(err: &PortsimError) -> Self {
        let code: u8 = match err {
            PortsimError::Io(_) => 1,
            PortsimError::ConfigParse { .. }
            | PortsimError::ConfigMissing { .. }
            | PortsimError::ConfigInvalid { .. } => 2,
            PortsimError::DataSource { .. } => 3,
            PortsimError::Order(_) => 4,
            PortsimError::MissingPrice { .. } => 5,
            PortsimError::MissingExchangeRate { .. } | PortsimError::LookAhead(_) => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_error_messages() {
        let err = OrderError::InsufficientShares {
            ticker: "AAA".into(),
            requested: 10,
            held: 0,
        };
        assert_eq!(
            err.to_string(),
            "insufficient shares of AAA: requested 10, held 0"
        );

        let err = OrderError::InsufficientCash {
            required: 1000.0,
            available: 250.5,
        };
        assert_eq!(
            err.to_string(),
            "insufficient cash: order needs 1000.00, have 250.50"
        );
    }

    #[test]
    fn order_error_converts_to_top_level() {
        let err: PortsimError = OrderError::InvalidOrder {
            reason: "shares must be positive".into(),
        }
        .into();
        assert!(matches!(err, PortsimError::Order(OrderError::InvalidOrder { .. })));
    }

    #[test]
    fn missing_exchange_rate_message() {
        let err = PortsimError::MissingExchangeRate {
            from: Currency::new("eur"),
            to: Currency::usd(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "no exchange rate EUR->USD on or before 2024-01-15"
        );
    }

    #[test]
    fn look_ahead_message() {
        let err = LookAheadViolation {
            requested: NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            as_of: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        };
        assert!(err.to_string().contains("2024-01-16"));
    }
}
