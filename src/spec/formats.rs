//! Format handlers for schema fields.
//!
//! A format handler owns the wire rendering, parsing and validation of one
//! declared `format` name. The `date` and `date-time` formats ship built in;
//! hosts may register additional handlers when loading a spec, and those are
//! consulted during validate/unmarshal exactly like the built-ins.

use crate::error::{Error, Result};
use crate::model::Value;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

/// Custom rendering/parsing/validation for one `format` name
pub trait FormatHandler: Send + Sync {
    /// The `format` value this handler covers
    fn name(&self) -> &str;

    /// Render a typed field value into its wire form
    fn to_wire(&self, value: &Value) -> Result<JsonValue>;

    /// Parse a wire value into its typed field value
    fn from_wire(&self, wire: &JsonValue) -> Result<Value>;

    /// Check a wire value without constructing anything
    fn validate(&self, wire: &JsonValue) -> Result<()>;
}

/// ISO 8601 `date-time`, rendered as RFC 3339 in UTC
pub struct DateTimeFormat;

impl FormatHandler for DateTimeFormat {
    fn name(&self) -> &str {
        "date-time"
    }

    fn to_wire(&self, value: &Value) -> Result<JsonValue> {
        match value {
            Value::DateTime(dt) => Ok(JsonValue::String(dt.to_rfc3339())),
            // Already-rendered strings pass through once they parse
            Value::Str(s) => {
                parse_date_time(s)?;
                Ok(JsonValue::String(s.clone()))
            }
            other => Err(Error::validation(format!(
                "{other:?} is not of type 'date-time'"
            ))),
        }
    }

    fn from_wire(&self, wire: &JsonValue) -> Result<Value> {
        let s = wire
            .as_str()
            .ok_or_else(|| Error::validation(format!("{wire} is not of type 'string'")))?;
        Ok(Value::DateTime(parse_date_time(s)?))
    }

    fn validate(&self, wire: &JsonValue) -> Result<()> {
        self.from_wire(wire).map(|_| ())
    }
}

fn parse_date_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("'{s}' is not a valid date-time: {e}")))
}

/// `date`, rendered as `YYYY-MM-DD`
pub struct DateFormat;

impl FormatHandler for DateFormat {
    fn name(&self) -> &str {
        "date"
    }

    fn to_wire(&self, value: &Value) -> Result<JsonValue> {
        match value {
            Value::Date(d) => Ok(JsonValue::String(d.format("%Y-%m-%d").to_string())),
            Value::Str(s) => {
                parse_date(s)?;
                Ok(JsonValue::String(s.clone()))
            }
            other => Err(Error::validation(format!("{other:?} is not of type 'date'"))),
        }
    }

    fn from_wire(&self, wire: &JsonValue) -> Result<Value> {
        let s = wire
            .as_str()
            .ok_or_else(|| Error::validation(format!("{wire} is not of type 'string'")))?;
        Ok(Value::Date(parse_date(s)?))
    }

    fn validate(&self, wire: &JsonValue) -> Result<()> {
        self.from_wire(wire).map(|_| ())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("'{s}' is not a valid date: {e}")))
}
