//! Minimal modify requests computed from two snapshots of an entry.
use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use ldap3::Mod;

/// Attribute values of an entry, keyed by directory attribute name
pub type Snapshot = BTreeMap<String, Vec<String>>;

/// Tuning for [`build`]
#[derive(Clone, Debug, Default)]
pub struct ModifyOptions {
	/// Keep attributes that are stored but missing from the new snapshot
	pub ignore_old_existent: bool,
	/// Attributes never touched, compared case-insensitively
	pub ignore_attr_types: Vec<String>,
	/// Attributes whose replaced values are deleted one by one instead of
	/// deleting the whole attribute; never applies to `objectClass`
	pub value_level_delete: Vec<String>,
}

impl ModifyOptions {
	/// Whether `attribute` is in `list`, ignoring case
	fn lists(list: &[String], attribute: &str) -> bool {
		list.iter().any(|listed| listed.eq_ignore_ascii_case(attribute))
	}
}

/// Kind of change applied to one attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModOp {
	/// Add values
	Add,
	/// Delete values, or the whole attribute
	Delete,
	/// Replace all values
	Replace,
}

/// One change in a modify request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
	/// Kind of change
	pub op: ModOp,
	/// Directory attribute name
	pub attribute: String,
	/// Values concerned; `None` addresses the whole attribute
	pub values: Option<Vec<String>>,
}

impl Modification {
	/// Add `values`
	#[must_use]
	pub fn add(attribute: impl Into<String>, values: Vec<String>) -> Self {
		Self { op: ModOp::Add, attribute: attribute.into(), values: Some(values) }
	}

	/// Delete the whole attribute
	#[must_use]
	pub fn delete(attribute: impl Into<String>) -> Self {
		Self { op: ModOp::Delete, attribute: attribute.into(), values: None }
	}

	/// Delete only `values`
	#[must_use]
	pub fn delete_values(attribute: impl Into<String>, values: Vec<String>) -> Self {
		Self { op: ModOp::Delete, attribute: attribute.into(), values: Some(values) }
	}
}

impl From<Modification> for Mod<String> {
	fn from(modification: Modification) -> Self {
		let values: HashSet<String> = modification.values.unwrap_or_default().into_iter().collect();
		match modification.op {
			ModOp::Add => Mod::Add(modification.attribute, values),
			ModOp::Delete => Mod::Delete(modification.attribute, values),
			ModOp::Replace => Mod::Replace(modification.attribute, values),
		}
	}
}

/// Drop empty strings, then attributes left without values
fn non_empty(snapshot: &Snapshot) -> Vec<(&str, Vec<&str>)> {
	snapshot
		.iter()
		.map(|(attribute, values)| {
			let values: Vec<&str> = values
				.iter()
				.map(String::as_str)
				.filter(|value| !value.is_empty())
				.unique()
				.collect();
			(attribute.as_str(), values)
		})
		.filter(|(_, values)| !values.is_empty())
		.collect()
}

/// Compute the changes turning `old` into `new`.
///
/// Attributes whose stored values are all kept only get the missing values
/// added. Attributes losing any value are deleted and re-added in full,
/// since not every server supports deleting single values. Stored attributes
/// missing from `new` are deleted unless
/// [`ModifyOptions::ignore_old_existent`] is set.
#[must_use]
pub fn build(old: &Snapshot, new: &Snapshot, options: &ModifyOptions) -> Vec<Modification> {
	let ignored = |attribute: &str| ModifyOptions::lists(&options.ignore_attr_types, attribute);
	let old = non_empty(old);
	let new = non_empty(new);
	let stored = |attribute: &str| {
		old.iter().find(|(name, _)| name.eq_ignore_ascii_case(attribute)).map(|(_, values)| values)
	};

	let mut modifications = Vec::new();

	for &(attribute, ref values) in &new {
		if ignored(attribute) {
			continue;
		}

		match stored(attribute) {
			Some(old_values) if old_values.iter().any(|value| !values.contains(value)) => {
				let value_level = !attribute.eq_ignore_ascii_case("objectClass")
					&& ModifyOptions::lists(&options.value_level_delete, attribute);
				modifications.push(if value_level {
					Modification::delete_values(
						attribute,
						old_values.iter().map(|value| (*value).to_owned()).collect(),
					)
				} else {
					Modification::delete(attribute)
				});
				modifications.push(Modification::add(
					attribute,
					values.iter().map(|value| (*value).to_owned()).collect(),
				));
			}
			old_values => {
				let added: Vec<String> = values
					.iter()
					.filter(|value| old_values.is_none_or(|old_values| !old_values.contains(value)))
					.map(|value| (*value).to_owned())
					.collect();
				if !added.is_empty() {
					modifications.push(Modification::add(attribute, added));
				}
			}
		}
	}

	if !options.ignore_old_existent {
		for &(attribute, _) in &old {
			let kept = new.iter().any(|(name, _)| name.eq_ignore_ascii_case(attribute));
			if !kept && !ignored(attribute) {
				modifications.push(Modification::delete(attribute));
			}
		}
	}

	modifications
}
