//! Membership payments, stored below the paying member.
use chrono::NaiveDate;

use crate::{
	entry::Entry,
	err::Result,
	models::Identifiable,
	schema::{AttributeDescriptor, EntryClass},
};

/// The `payment` class, named after its date
#[must_use]
pub fn payment_class(node: &EntryClass) -> EntryClass {
	node.extend("payment")
		.naming_attribute("paymentDate")
		.object_class("payment")
		.default("objectClass", vec!["top", "payment"])
		.attribute(AttributeDescriptor::date("paymentDate").with_title("Payment date").required())
		.attribute(AttributeDescriptor::integer("paymentAmount").with_title("Amount"))
		.attribute(AttributeDescriptor::string("paymentObject").with_title("Object"))
		.attribute(AttributeDescriptor::string("invoiceReference").with_title("Invoice"))
		.build()
}

/// One payment of a member
#[derive(Clone, Debug)]
pub struct Payment {
	/// The payment's entry
	entry: Entry,
}

impl Payment {
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

	/// When the payment was made
	pub async fn date(&mut self) -> Result<Option<NaiveDate>> {
		Ok(self.entry.get("paymentDate").await?.as_date())
	}

	/// Paid amount
	pub async fn amount(&mut self) -> Result<Option<i64>> {
		Ok(self.entry.get("paymentAmount").await?.as_integer())
	}

	/// What the payment was for
	pub async fn object(&mut self) -> Result<Option<String>> {
		Ok(self.entry.get("paymentObject").await?.into_text())
	}

	/// Reference of the invoice, if any
	pub async fn invoice_reference(&mut self) -> Result<Option<String>> {
		Ok(self.entry.get("invoiceReference").await?.into_text())
	}
}

impl Identifiable for Payment {
	fn entry(&self) -> &Entry {
		&self.entry
	}

	fn entry_mut(&mut self) -> &mut Entry {
		&mut self.entry
	}
}
