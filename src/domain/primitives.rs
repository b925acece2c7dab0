//! Domain primitives: TimeMs, identifiers, Role, Track.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MS_PER_DAY: i64 = 86_400_000;

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Midnight UTC of the given calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        TimeMs(midnight.and_utc().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Shift by a whole number of calendar days (UTC, no DST).
    pub fn plus_days(&self, days: u32) -> Self {
        TimeMs(self.0.saturating_add(Duration::days(i64::from(days)).num_milliseconds()))
    }

    /// Shift by `weeks` seven-day windows.
    pub fn plus_weeks(&self, weeks: u32) -> Self {
        TimeMs(
            self.0
                .saturating_add(i64::from(weeks).saturating_mul(7 * MS_PER_DAY)),
        )
    }

    /// UTC calendar date containing this instant.
    pub fn date(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .map(|dt| dt.date_naive())
            .unwrap_or_default()
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Marketplace participant: buyer entity, supplier, or incentive holder.
    EntityId
);
string_id!(
    /// Checkout order identifier.
    OrderId
);
string_id!(
    /// Incentive grant identifier.
    GrantId
);

impl GrantId {
    /// Fresh random grant id.
    pub fn generate() -> Self {
        GrantId(uuid::Uuid::new_v4().to_string())
    }
}

/// Marketplace role that an incentive configuration is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Farmer,
    Wholesaler,
    Grocer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Wholesaler => "wholesaler",
            Role::Grocer => "grocer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "farmer" => Ok(Role::Farmer),
            "wholesaler" => Ok(Role::Wholesaler),
            "grocer" => Ok(Role::Grocer),
            "consumer" => Ok(Role::Consumer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Which side of the settlement an evidence event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Buyer pays the platform.
    Buyer,
    /// Platform remits wholesale cost to the supplier.
    Supplier,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Buyer => write!(f, "buyer"),
            Track::Supplier => write!(f, "supplier"),
        }
    }
}
