//! Association members: users with a birth date, a postal address and a
//! history of payments.
use std::sync::Arc;

use chrono::NaiveDate;
use ldap3::Scope;

use crate::{
	codec::Value,
	connection::SearchRequest,
	entry::Entry,
	err::Result,
	models::{GroupMember, Identifiable, PasswordCheckable, payment::Payment},
	schema::{AttributeDescriptor, EntryClass},
};

/// Object of payments made without saying what for
pub const DEFAULT_PAYMENT_OBJECT: &str = "personnal membership";

/// The `member` class, a `user` that is also an `associationMember`
#[must_use]
pub fn member_class(user: &EntryClass) -> EntryClass {
	user.extend("member")
		.default("objectClass", vec![
			"top",
			"person",
			"associationMember",
			"organizationalPerson",
			"inetOrgPerson",
		])
		.default("st", "FR")
		.attribute(AttributeDescriptor::string("emailAlias").with_title("E-mail alias"))
		.attribute(AttributeDescriptor::string("labeledURI").with_title("Website"))
		.attribute(AttributeDescriptor::date("birthDate").with_title("Birth date"))
		.attribute(AttributeDescriptor::unicode("street").with_title("Street"))
		.attribute(AttributeDescriptor::string("postalCode").with_title("Postal code"))
		.attribute(AttributeDescriptor::unicode("l").with_title("City"))
		.attribute(AttributeDescriptor::string("st").with_title("Country"))
		.attribute(
			AttributeDescriptor::date("membershipExpirationDate")
				.with_title("Membership expiration"),
		)
		.build()
}

/// An association member
#[derive(Clone, Debug)]
pub struct Member {
	/// The member's entry
	entry: Entry,
}

impl Member {
	/// Wrap `entry`
	#[must_use]
	pub fn new(entry: Entry) -> Self {
		Self { entry }
	}

	/// Unwrap the entry
	#[must_use]
	pub fn into_entry(self) -> Entry {
		self.entry
	}

	/// When the membership ends
	pub async fn membership_expiration(&mut self) -> Result<Option<NaiveDate>> {
		Ok(self.entry.get("membershipExpirationDate").await?.as_date())
	}

	/// Whether the membership is still running on `today`
	pub async fn is_active(&mut self, today: NaiveDate) -> Result<bool> {
		Ok(self.membership_expiration().await?.is_some_and(|expiration| expiration >= today))
	}

	/// The member's payments, oldest first
	#[tracing::instrument(skip_all, fields(dn = ?self.entry.dn()))]
	pub async fn payments(&self) -> Result<Vec<Payment>> {
		let conn = self.entry.connection().ok_or_else(|| self.entry.unbound())?;
		let dn = self.entry.dn().ok_or_else(|| self.entry.unbound())?;
		let class = conn.catalog().get("payment")?;

		let request =
			SearchRequest::new("(objectClass=payment)").with_base(dn).with_scope(Scope::OneLevel);
		let mut dated = Vec::new();
		for entry in conn.search_entries(&class, &request).await? {
			let mut payment = Payment::new(entry);
			dated.push((payment.date().await?, payment));
		}
		dated.sort_by_key(|(date, _)| *date);
		Ok(dated.into_iter().map(|(_, payment)| payment).collect())
	}

	/// A payment below this member, not stored yet
	pub async fn new_payment(
		&mut self,
		date: NaiveDate,
		object: Option<&str>,
		amount: i64,
		invoice_reference: Option<&str>,
	) -> Result<Payment> {
		let class = match self.entry.connection() {
			Some(conn) => conn.catalog().get("payment")?,
			None => Arc::new(super::payment::payment_class(&super::node_class())),
		};
		let mut payment = Entry::with_attrs(class, Arc::clone(self.entry.codecs()), [
			("paymentDate", Value::from(date)),
			("paymentObject", Value::from(object.unwrap_or(DEFAULT_PAYMENT_OBJECT))),
			("paymentAmount", Value::from(amount)),
			("invoiceReference", invoice_reference.map_or(Value::None, Value::from)),
		])?;
		self.entry.append_unsaved(&mut payment).await?;
		Ok(Payment::new(payment))
	}

	/// Store `payment` below this member
	pub async fn add_payment(&mut self, payment: &mut Payment) -> Result<()> {
		self.entry.append(payment.entry_mut()).await
	}
}

impl Identifiable for Member {
	fn entry(&self) -> &Entry {
		&self.entry
	}

	fn entry_mut(&mut self) -> &mut Entry {
		&mut self.entry
	}
}

impl PasswordCheckable for Member {}

impl GroupMember for Member {}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use test_log::test;

	use super::*;
	use crate::{models::test_helpers, schema::Role};

	fn date(year: i32, month: u32, day: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
	}

	#[test(tokio::test)]
	async fn payments_are_listed_oldest_first() {
		let (directory, mut conn) = test_helpers::connection().await;
		conn.set_role(Role::User, conn.catalog().get("member").expect("member class"));
		let mut member = Member::new(conn.get_user("gawel"));
		assert!(member.payments().await.expect("search must succeed").is_empty());

		for year in [2021, 2019, 2020] {
			let mut payment =
				member.new_payment(date(year, 1, 1), None, 20, None).await.expect("payment builds");
			member.add_payment(&mut payment).await.expect("payment is stored");
		}
		assert!(
			directory.contains("paymentDate=20190101000000Z,uid=gawel,ou=members,dc=example,dc=org")
		);

		let mut payments = member.payments().await.expect("search must succeed");
		let mut dates = Vec::new();
		for payment in &mut payments {
			dates.push(payment.date().await.expect("payment loads"));
		}
		assert_eq!(dates, [Some(date(2019, 1, 1)), Some(date(2020, 1, 1)), Some(date(2021, 1, 1))]);
		assert_eq!(payments[0].amount().await.expect("payment loads"), Some(20));
		assert_eq!(
			payments[0].object().await.expect("payment loads").as_deref(),
			Some(DEFAULT_PAYMENT_OBJECT)
		);
	}

	#[test(tokio::test)]
	async fn storing_a_payment_twice_updates_it() {
		let (directory, conn) = test_helpers::connection().await;
		let mut member = Member::new(conn.get_user("gawel"));
		let dn = "paymentDate=20200101000000Z,uid=gawel,ou=members,dc=example,dc=org";

		let mut first =
			member.new_payment(date(2020, 1, 1), None, 20, None).await.expect("payment builds");
		member.add_payment(&mut first).await.expect("payment is stored");
		let mut second = member
			.new_payment(date(2020, 1, 1), Some("donation"), 50, Some("F-2020-1"))
			.await
			.expect("payment builds");
		member.add_payment(&mut second).await.expect("payment is updated");

		let stored = directory.attributes(dn).expect("payment exists");
		assert_eq!(stored.get("paymentAmount"), Some(&vec!["50".to_owned()]));
		assert_eq!(stored.get("invoiceReference"), Some(&vec!["F-2020-1".to_owned()]));
	}

	#[test(tokio::test)]
	async fn expiration_decides_activity() {
		let (_, conn) = test_helpers::connection().await;
		let class = conn.catalog().get("member").expect("member class");
		let mut member = Member::new(
			conn.new_entry_with(class, [("uid", Value::from("ada")), (
				"membershipExpirationDate",
				Value::from(date(2021, 6, 30)),
			)])
			.expect("attributes must encode"),
		);

		assert!(member.is_active(date(2021, 6, 30)).await.expect("cached"));
		assert!(!member.is_active(date(2021, 7, 1)).await.expect("cached"));
	}
}
