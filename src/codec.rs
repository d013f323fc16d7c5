//! Conversion between directory wire values and typed values.
use std::{fmt, sync::Arc};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use thiserror::Error;

/// Format of generalized time values written to the directory; seconds are
/// always zero
const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M00Z";

/// An attribute value as cached on an entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawValue {
	/// Exactly one value
	Single(String),
	/// Any number of values; an empty list means "no value"
	Many(Vec<String>),
}

impl RawValue {
	/// The "no value" marker
	#[must_use]
	pub fn none() -> Self {
		Self::Many(Vec::new())
	}

	/// Build from a list of values, flattening one-element lists
	#[must_use]
	pub fn from_values(mut values: Vec<String>) -> Self {
		if values.len() == 1 {
			Self::Single(values.remove(0))
		} else {
			Self::Many(values)
		}
	}

	/// The non-empty values
	pub fn values(&self) -> impl Iterator<Item = &str> {
		let values = match self {
			Self::Single(value) => std::slice::from_ref(value),
			Self::Many(values) => values.as_slice(),
		};
		values.iter().map(String::as_str).filter(|value| !value.is_empty())
	}

	/// The non-empty values, owned
	#[must_use]
	pub fn to_vec(&self) -> Vec<String> {
		self.values().map(str::to_owned).collect()
	}

	/// The first non-empty value
	#[must_use]
	pub fn first(&self) -> Option<&str> {
		self.values().next()
	}

	/// Whether there is no non-empty value
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.first().is_none()
	}
}

impl From<String> for RawValue {
	fn from(value: String) -> Self {
		Self::Single(value)
	}
}

impl From<&str> for RawValue {
	fn from(value: &str) -> Self {
		Self::Single(value.to_owned())
	}
}

impl From<Vec<String>> for RawValue {
	fn from(values: Vec<String>) -> Self {
		Self::Many(values)
	}
}

impl From<Vec<&str>> for RawValue {
	fn from(values: Vec<&str>) -> Self {
		Self::Many(values.into_iter().map(str::to_owned).collect())
	}
}

impl fmt::Display for RawValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.values().join(", "))
	}
}

/// A typed attribute value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
	/// No value
	None,
	/// Free text
	Text(String),
	/// A calendar date
	Date(NaiveDate),
	/// A date and time, minute precision
	DateTime(NaiveDateTime),
	/// A decimal integer
	Integer(i64),
	/// Several text values
	List(Vec<String>),
}

impl Value {
	/// Whether this is [`Value::None`] or an empty list
	#[must_use]
	pub fn is_none(&self) -> bool {
		match self {
			Self::None => true,
			Self::List(values) => values.is_empty(),
			_ => false,
		}
	}

	/// The text, if this is a text value
	#[must_use]
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text(text) => Some(text),
			_ => None,
		}
	}

	/// The text, if this is a text value
	#[must_use]
	pub fn into_text(self) -> Option<String> {
		match self {
			Self::Text(text) => Some(text),
			_ => None,
		}
	}

	/// The date, if this is a date value
	#[must_use]
	pub fn as_date(&self) -> Option<NaiveDate> {
		match self {
			Self::Date(date) => Some(*date),
			Self::DateTime(datetime) => Some(datetime.date()),
			_ => None,
		}
	}

	/// The date and time, if this is a datetime value
	#[must_use]
	pub fn as_datetime(&self) -> Option<NaiveDateTime> {
		match self {
			Self::DateTime(datetime) => Some(*datetime),
			_ => None,
		}
	}

	/// The integer, if this is an integer value
	#[must_use]
	pub fn as_integer(&self) -> Option<i64> {
		match self {
			Self::Integer(integer) => Some(*integer),
			_ => None,
		}
	}

	/// All values as a list: a single text becomes a one-element list
	#[must_use]
	pub fn into_list(self) -> Vec<String> {
		match self {
			Self::None => Vec::new(),
			Self::Text(text) => vec![text],
			Self::List(values) => values,
			other => vec![other.to_string()],
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::None => Ok(()),
			Self::Text(text) => f.write_str(text),
			Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
			Self::DateTime(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M")),
			Self::Integer(integer) => write!(f, "{integer}"),
			Self::List(values) => f.write_str(&values.join(", ")),
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::Text(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

impl From<NaiveDate> for Value {
	fn from(value: NaiveDate) -> Self {
		Self::Date(value)
	}
}

impl From<NaiveDateTime> for Value {
	fn from(value: NaiveDateTime) -> Self {
		Self::DateTime(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Integer(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Self::Integer(value.into())
	}
}

impl From<u32> for Value {
	fn from(value: u32) -> Self {
		Self::Integer(value.into())
	}
}

impl From<Vec<String>> for Value {
	fn from(values: Vec<String>) -> Self {
		Self::List(values)
	}
}

impl From<Vec<&str>> for Value {
	fn from(values: Vec<&str>) -> Self {
		Self::List(values.into_iter().map(str::to_owned).collect())
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::None, Into::into)
	}
}

/// The kind of typed value an attribute holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
	/// Free text
	Text,
	/// A calendar date
	Date,
	/// A date and time
	DateTime,
	/// A decimal integer
	Integer,
	/// Several text values
	List,
}

impl fmt::Display for ValueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Text => "text",
			Self::Date => "date",
			Self::DateTime => "datetime",
			Self::Integer => "integer",
			Self::List => "list",
		})
	}
}

/// Conversion failures
#[derive(Debug, Error)]
pub enum CodecError {
	/// A wire value does not have the expected shape
	#[error("malformed {kind} value `{raw}`: {reason}")]
	Malformed {
		/// The offending wire value
		raw: String,
		/// The kind it was decoded as
		kind: ValueKind,
		/// What is wrong with it
		reason: &'static str,
	},
	/// Binary data is not valid in any candidate charset
	#[error("value of {len} bytes is not valid in any of {charsets:?}")]
	Charset {
		/// Length of the rejected data
		len: usize,
		/// The charsets that were tried
		charsets: Vec<Charset>,
	},
	/// No codec can write this value
	#[error("no codec can serialize {value:?}")]
	Unserializable {
		/// The rejected value
		value: Value,
	},
}

/// A character set binary attribute values may be encoded in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
	/// UTF-8
	Utf8,
	/// ISO-8859-1, which accepts any byte sequence
	Latin1,
}

impl Charset {
	/// Decode `bytes`, or `None` if they are invalid in this charset
	#[must_use]
	pub fn decode(self, bytes: &[u8]) -> Option<String> {
		match self {
			Self::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
			Self::Latin1 => Some(bytes.iter().copied().map(char::from).collect()),
		}
	}
}

/// A conversion between one kind of typed value and wire values
pub trait Codec: fmt::Debug + Send + Sync {
	/// The kind this codec decodes to
	fn kind(&self) -> ValueKind;

	/// Whether this codec can encode `value`
	fn handles(&self, value: &Value) -> bool;

	/// Decode a present wire value
	fn decode(&self, raw: &RawValue) -> Result<Value, CodecError>;

	/// Encode a value this codec handles
	fn encode(&self, value: &Value) -> Result<RawValue, CodecError>;
}

/// Generalized time codec, for either dates or minute-precision datetimes
#[derive(Clone, Copy, Debug)]
pub struct GeneralizedTimeCodec {
	/// Whether the hour and minute are significant
	with_time: bool,
}

impl GeneralizedTimeCodec {
	/// Codec for [`Value::Date`]
	pub const DATE: Self = Self { with_time: false };
	/// Codec for [`Value::DateTime`]
	pub const DATETIME: Self = Self { with_time: true };

	/// Parse the leading digits of a generalized time string
	fn parse(self, raw: &str) -> Result<NaiveDateTime, CodecError> {
		let kind = self.kind();
		let malformed =
			|reason| CodecError::Malformed { raw: raw.to_owned(), kind, reason };
		let width = if self.with_time { 12 } else { 8 };

		let digits = raw
			.get(..width)
			.filter(|digits| digits.bytes().all(|byte| byte.is_ascii_digit()))
			.ok_or_else(|| malformed("expected leading YYYYMMDD[HHMM] digits"))?;
		let field = |start: usize, end: usize| {
			digits[start..end].parse::<u32>().map_err(|_| malformed("invalid digits"))
		};

		let year = i32::try_from(field(0, 4)?).map_err(|_| malformed("invalid year"))?;
		let date = NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)
			.ok_or_else(|| malformed("no such date"))?;
		let time = if self.with_time {
			NaiveTime::from_hms_opt(field(8, 10)?, field(10, 12)?, 0)
				.ok_or_else(|| malformed("no such time"))?
		} else {
			NaiveTime::MIN
		};

		Ok(date.and_time(time))
	}
}

impl Codec for GeneralizedTimeCodec {
	fn kind(&self) -> ValueKind {
		if self.with_time { ValueKind::DateTime } else { ValueKind::Date }
	}

	fn handles(&self, value: &Value) -> bool {
		match value {
			Value::Date(_) => !self.with_time,
			Value::DateTime(_) => self.with_time,
			_ => false,
		}
	}

	fn decode(&self, raw: &RawValue) -> Result<Value, CodecError> {
		let Some(raw) = raw.first() else {
			return Ok(Value::None);
		};
		let parsed = self.parse(raw)?;
		Ok(if self.with_time { Value::DateTime(parsed) } else { Value::Date(parsed.date()) })
	}

	fn encode(&self, value: &Value) -> Result<RawValue, CodecError> {
		let datetime = match value {
			Value::Date(date) if !self.with_time => date.and_time(NaiveTime::MIN),
			Value::DateTime(datetime) if self.with_time => *datetime,
			other => return Err(CodecError::Unserializable { value: other.clone() }),
		};
		Ok(RawValue::Single(datetime.format(GENERALIZED_TIME_FORMAT).to_string()))
	}
}

/// Decimal integer codec
#[derive(Clone, Copy, Debug)]
pub struct IntegerCodec;

impl Codec for IntegerCodec {
	fn kind(&self) -> ValueKind {
		ValueKind::Integer
	}

	fn handles(&self, value: &Value) -> bool {
		matches!(value, Value::Integer(_))
	}

	fn decode(&self, raw: &RawValue) -> Result<Value, CodecError> {
		Ok(raw
			.first()
			.filter(|raw| raw.bytes().all(|byte| byte.is_ascii_digit()))
			.and_then(|raw| raw.parse::<i64>().ok())
			.map_or(Value::None, Value::Integer))
	}

	fn encode(&self, value: &Value) -> Result<RawValue, CodecError> {
		match value {
			Value::Integer(integer) => Ok(RawValue::Single(integer.to_string())),
			other => Err(CodecError::Unserializable { value: other.clone() }),
		}
	}
}

/// Multi-valued text codec
#[derive(Clone, Copy, Debug)]
pub struct ListCodec;

impl Codec for ListCodec {
	fn kind(&self) -> ValueKind {
		ValueKind::List
	}

	fn handles(&self, value: &Value) -> bool {
		matches!(value, Value::List(_))
	}

	fn decode(&self, raw: &RawValue) -> Result<Value, CodecError> {
		Ok(Value::List(raw.to_vec()))
	}

	fn encode(&self, value: &Value) -> Result<RawValue, CodecError> {
		match value {
			Value::List(values) => Ok(RawValue::Many(values.clone())),
			other => Err(CodecError::Unserializable { value: other.clone() }),
		}
	}
}

/// Plain text codec; several values decode to a list
#[derive(Clone, Copy, Debug)]
pub struct TextCodec;

impl Codec for TextCodec {
	fn kind(&self) -> ValueKind {
		ValueKind::Text
	}

	fn handles(&self, value: &Value) -> bool {
		matches!(value, Value::Text(_))
	}

	fn decode(&self, raw: &RawValue) -> Result<Value, CodecError> {
		let mut values = raw.to_vec();
		Ok(match values.len() {
			0 => Value::None,
			1 => Value::Text(values.remove(0)),
			_ => Value::List(values),
		})
	}

	fn encode(&self, value: &Value) -> Result<RawValue, CodecError> {
		match value {
			Value::Text(text) => Ok(RawValue::Single(text.clone())),
			other => Err(CodecError::Unserializable { value: other.clone() }),
		}
	}
}

/// An ordered set of codecs plus the charsets tried on binary values
#[derive(Clone, Debug)]
pub struct CodecRegistry {
	/// Codecs in priority order
	codecs: Vec<Arc<dyn Codec>>,
	/// Candidate charsets for binary values, in order
	charsets: Vec<Charset>,
}

impl Default for CodecRegistry {
	fn default() -> Self {
		Self::empty()
			.with_codec(GeneralizedTimeCodec::DATETIME)
			.with_codec(GeneralizedTimeCodec::DATE)
			.with_codec(IntegerCodec)
			.with_codec(ListCodec)
			.with_codec(TextCodec)
			.with_charsets(vec![Charset::Utf8, Charset::Latin1])
	}
}

impl CodecRegistry {
	/// A registry without codecs, which only passes text through
	#[must_use]
	pub fn empty() -> Self {
		Self { codecs: Vec::new(), charsets: vec![Charset::Utf8] }
	}

	/// Append a codec with the lowest priority so far
	#[must_use]
	pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
		self.codecs.push(Arc::new(codec));
		self
	}

	/// Replace the candidate charsets
	#[must_use]
	pub fn with_charsets(mut self, charsets: Vec<Charset>) -> Self {
		self.charsets = charsets;
		self
	}

	/// Decode a cached value as `kind`. Absent values decode to the kind's
	/// empty value.
	pub fn decode(&self, raw: Option<&RawValue>, kind: ValueKind) -> Result<Value, CodecError> {
		let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
			return Ok(if kind == ValueKind::List { Value::List(Vec::new()) } else { Value::None });
		};

		match self.codecs.iter().find(|codec| codec.kind() == kind) {
			Some(codec) => codec.decode(raw),
			None => TextCodec.decode(raw),
		}
	}

	/// Encode a value with the first codec that handles it
	pub fn encode(&self, value: &Value) -> Result<RawValue, CodecError> {
		if matches!(value, Value::None) {
			return Ok(RawValue::none());
		}

		match self.codecs.iter().find(|codec| codec.handles(value)) {
			Some(codec) => codec.encode(value),
			None => match value {
				Value::Text(text) => Ok(RawValue::Single(text.clone())),
				other => Err(CodecError::Unserializable { value: other.clone() }),
			},
		}
	}

	/// Turn a binary attribute value into text with the first charset that
	/// accepts it
	pub fn transcode(&self, bytes: &[u8]) -> Result<String, CodecError> {
		self.charsets
			.iter()
			.find_map(|charset| charset.decode(bytes))
			.ok_or_else(|| CodecError::Charset {
				len: bytes.len(),
				charsets: self.charsets.clone(),
			})
	}
}
