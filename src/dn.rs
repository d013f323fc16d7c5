//! Distinguished names: splitting on unescaped separators, unescaping RDN
//! values and comparing DNs written with different escapes.
use ldap3::dn_escape;

/// Byte offset of the first `separator` not escaped by a backslash
fn find_unescaped(input: &str, separator: u8) -> Option<usize> {
	let bytes = input.as_bytes();
	let mut position = 0;
	while let Some(&byte) = bytes.get(position) {
		match byte {
			b'\\' => position += 2,
			byte if byte == separator => return Some(position),
			_ => position += 1,
		}
	}
	None
}

/// Strip the whitespace around a raw RDN value, keeping an escaped
/// trailing space
fn trim_value(value: &str) -> &str {
	let value = value.trim_start();
	if value.ends_with("\\ ") { value } else { value.trim_end() }
}

/// The first RDN of `dn` and the DN of its parent, if it has one
#[must_use]
pub fn split_first(dn: &str) -> (&str, Option<&str>) {
	match find_unescaped(dn, b',') {
		Some(position) => (&dn[..position], Some(dn[position + 1..].trim_start())),
		None => (dn, None),
	}
}

/// The DN of the parent of `dn`
#[must_use]
pub fn parent(dn: &str) -> Option<&str> {
	split_first(dn).1
}

/// The attribute and the unescaped value of the first RDN of `dn`
#[must_use]
pub fn first_rdn(dn: &str) -> Option<(String, String)> {
	let (rdn, _) = split_first(dn);
	let position = find_unescaped(rdn, b'=')?;
	Some((rdn[..position].trim().to_owned(), unescape_value(trim_value(&rdn[position + 1..]))))
}

/// Resolve the escapes of an RDN value, both `\,` and `\2c`
#[must_use]
pub fn unescape_value(value: &str) -> String {
	let bytes = value.as_bytes();
	let mut unescaped = Vec::with_capacity(bytes.len());
	let mut position = 0;

	while let Some(&byte) = bytes.get(position) {
		if byte != b'\\' {
			unescaped.push(byte);
			position += 1;
			continue;
		}
		let hex = value
			.get(position + 1..position + 3)
			.filter(|hex| hex.bytes().all(|digit| digit.is_ascii_hexdigit()))
			.and_then(|hex| u8::from_str_radix(hex, 16).ok());
		match (hex, bytes.get(position + 1)) {
			(Some(decoded), _) => {
				unescaped.push(decoded);
				position += 3;
			}
			(None, Some(&escaped)) => {
				unescaped.push(escaped);
				position += 2;
			}
			(None, None) => {
				unescaped.push(byte);
				position += 1;
			}
		}
	}

	String::from_utf8_lossy(&unescaped).into_owned()
}

/// `dn` lowercased, with every value escaped the same way
#[must_use]
pub fn normalize(dn: &str) -> String {
	let mut rdns = Vec::new();
	let mut rest = Some(dn.trim());
	while let Some(current) = rest.filter(|current| !current.is_empty()) {
		let (rdn, parent) = split_first(current);
		rdns.push(match find_unescaped(rdn, b'=') {
			Some(position) => {
				let value = unescape_value(trim_value(&rdn[position + 1..]));
				format!("{}={}", rdn[..position].trim(), dn_escape(value)).to_lowercase()
			}
			None => rdn.trim().to_lowercase(),
		});
		rest = parent;
	}
	rdns.join(",")
}

/// Case-insensitive DN comparison, ignoring how values are escaped
#[must_use]
pub fn dn_eq(left: &str, right: &str) -> bool {
	normalize(left) == normalize(right)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn escaped_separators_stay_in_the_value() {
		let dn = r"cn=Doe\, John,ou=groups,dc=example,dc=org";
		assert_eq!(split_first(dn), (r"cn=Doe\, John", Some("ou=groups,dc=example,dc=org")));
		assert_eq!(first_rdn(dn), Some(("cn".to_owned(), "Doe, John".to_owned())));
		assert_eq!(
			first_rdn(r"cn=a\3db\2cc\\d,dc=org"),
			Some(("cn".to_owned(), r"a=b,c\d".to_owned()))
		);
		assert_eq!(first_rdn(r"cn=Ren\c3\a9"), Some(("cn".to_owned(), "René".to_owned())));
		assert_eq!(parent("dc=org"), None);
		assert_eq!(parent("uid=a, ou=people"), Some("ou=people"));
	}

	#[test]
	fn plus_signs_are_not_read_as_hex() {
		assert_eq!(unescape_value(r"a\+1"), "a+1");
		assert_eq!(unescape_value(r"trailing\"), r"trailing\");
		assert_eq!(unescape_value(r"\ padded\ "), " padded ");
	}

	#[test]
	fn escapes_do_not_change_identity() {
		assert!(dn_eq(
			r"cn=Doe\, John,ou=groups,dc=example,dc=org",
			r"CN=doe\2C john, ou=Groups,dc=example,dc=org"
		));
		assert!(dn_eq(&format!("cn={},dc=org", dn_escape("a+b")), r"cn=a\+b,dc=org"));
		assert!(!dn_eq(r"cn=Doe\, John,dc=org", "cn=Doe,cn=John,dc=org"));
	}
}
