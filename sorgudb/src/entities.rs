//! Financial record types and their field declarations.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::document::{Entity, FieldMap, FieldReader};
use crate::error::Error;
use crate::schema::{FieldSchema, RangeDomain, SchemaRegistry};
use crate::value::FieldValue;

/// Upper bound of an account balance.
pub const MAX_BALANCE: f64 = 10_000_000.0;

/// Upper bound of a transaction amount.
pub const MAX_AMOUNT: f64 = 1_000_000.0;

/// A customer account.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Document id
    pub id: String,
    /// Customer name, stored in clear
    pub customer_name: String,
    /// Account number, equality-queryable
    pub account_number: String,
    /// Balance, range-queryable within `[0, MAX_BALANCE]` at cent precision
    pub balance: f64,
    /// Social security number, equality-queryable
    pub ssn: String,
    /// Contact email, stored in clear
    pub email: String,
    /// Creation time in seconds since the Unix epoch
    pub created_at: i64,
}

impl Account {
    /// Field name of the customer name.
    pub const CUSTOMER_NAME: &'static str = "customerName";
    /// Field name of the account number.
    pub const ACCOUNT_NUMBER: &'static str = "accountNumber";
    /// Field name of the balance.
    pub const BALANCE: &'static str = "balance";
    /// Field name of the SSN.
    pub const SSN: &'static str = "ssn";
    /// Field name of the email.
    pub const EMAIL: &'static str = "email";
    /// Field name of the creation time.
    pub const CREATED_AT: &'static str = "createdAt";

    /// Creates an account stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        customer_name: impl Into<String>,
        account_number: impl Into<String>,
        balance: f64,
        ssn: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            customer_name: customer_name.into(),
            account_number: account_number.into(),
            balance,
            ssn: ssn.into(),
            email: email.into(),
            created_at: now(),
        }
    }
}

impl Entity for Account {
    const COLLECTION: &'static str = "accounts";

    fn field_schemas() -> Result<Vec<FieldSchema>, Error> {
        let collection = Self::COLLECTION;
        let balance = RangeDomain::new(0.0, MAX_BALANCE, 2)?;
        Ok(vec![
            FieldSchema::plain(collection, Self::CUSTOMER_NAME),
            FieldSchema::equality(collection, Self::ACCOUNT_NUMBER),
            FieldSchema::range(collection, Self::BALANCE, balance),
            FieldSchema::equality(collection, Self::SSN),
            FieldSchema::plain(collection, Self::EMAIL),
            FieldSchema::plain(collection, Self::CREATED_AT),
        ])
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> FieldMap {
        FieldMap::from([
            entry(Self::CUSTOMER_NAME, self.customer_name.as_str()),
            entry(Self::ACCOUNT_NUMBER, self.account_number.as_str()),
            entry(Self::BALANCE, self.balance),
            entry(Self::SSN, self.ssn.as_str()),
            entry(Self::EMAIL, self.email.as_str()),
            entry(Self::CREATED_AT, FieldValue::Timestamp(self.created_at)),
        ])
    }

    fn from_fields(id: &str, fields: FieldMap) -> Result<Self, Error> {
        let mut fields = FieldReader::new(Self::COLLECTION, fields);
        Ok(Self {
            id: id.to_string(),
            customer_name: fields.text(Self::CUSTOMER_NAME)?,
            account_number: fields.text(Self::ACCOUNT_NUMBER)?,
            balance: fields.decimal(Self::BALANCE)?,
            ssn: fields.text(Self::SSN)?,
            email: fields.text(Self::EMAIL)?,
            created_at: fields.timestamp(Self::CREATED_AT)?,
        })
    }
}

/// A card or account transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Document id
    pub id: String,
    /// Account the transaction belongs to, equality-queryable
    pub account_number: String,
    /// Amount, range-queryable within `[0, MAX_AMOUNT]` at cent precision
    pub amount: f64,
    /// `deposit`, `withdrawal` or `transfer`
    pub transaction_type: String,
    /// Free-text description
    pub description: String,
    /// Card number, encrypted and not queryable
    pub card_number: String,
    /// Card verification code, encrypted and not queryable
    pub cvv: String,
    /// Card expiry (`MM/YY`), encrypted and not queryable
    pub expiry_date: String,
    /// Merchant name
    pub merchant_name: String,
    /// Transaction time in seconds since the Unix epoch
    pub transaction_date: i64,
    /// `pending`, `completed` or `failed`
    pub status: String,
}

impl Transaction {
    /// Field name of the account number.
    pub const ACCOUNT_NUMBER: &'static str = "accountNumber";
    /// Field name of the amount.
    pub const AMOUNT: &'static str = "amount";
    /// Field name of the transaction type.
    pub const TRANSACTION_TYPE: &'static str = "transactionType";
    /// Field name of the description.
    pub const DESCRIPTION: &'static str = "description";
    /// Field name of the card number.
    pub const CARD_NUMBER: &'static str = "cardNumber";
    /// Field name of the card verification code.
    pub const CVV: &'static str = "cvv";
    /// Field name of the card expiry.
    pub const EXPIRY_DATE: &'static str = "expiryDate";
    /// Field name of the merchant.
    pub const MERCHANT_NAME: &'static str = "merchantName";
    /// Field name of the transaction time.
    pub const TRANSACTION_DATE: &'static str = "transactionDate";
    /// Field name of the status.
    pub const STATUS: &'static str = "status";

    /// Status of a newly created transaction.
    pub const DEFAULT_STATUS: &'static str = "pending";

    /// Creates a pending transaction stamped with the current time. Card
    /// fields start empty; see [`Transaction::with_card`].
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        account_number: impl Into<String>,
        amount: f64,
        transaction_type: impl Into<String>,
        description: impl Into<String>,
        merchant_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_number: account_number.into(),
            amount,
            transaction_type: transaction_type.into(),
            description: description.into(),
            card_number: String::new(),
            cvv: String::new(),
            expiry_date: String::new(),
            merchant_name: merchant_name.into(),
            transaction_date: now(),
            status: Self::DEFAULT_STATUS.to_string(),
        }
    }

    /// Sets the card details.
    #[must_use]
    pub fn with_card(
        mut self,
        card_number: impl Into<String>,
        cvv: impl Into<String>,
        expiry_date: impl Into<String>,
    ) -> Self {
        self.card_number = card_number.into();
        self.cvv = cvv.into();
        self.expiry_date = expiry_date.into();
        self
    }
}

impl Entity for Transaction {
    const COLLECTION: &'static str = "transactions";

    fn field_schemas() -> Result<Vec<FieldSchema>, Error> {
        let collection = Self::COLLECTION;
        let amount = RangeDomain::new(0.0, MAX_AMOUNT, 2)?;
        Ok(vec![
            FieldSchema::equality(collection, Self::ACCOUNT_NUMBER),
            FieldSchema::range(collection, Self::AMOUNT, amount),
            FieldSchema::plain(collection, Self::TRANSACTION_TYPE),
            FieldSchema::plain(collection, Self::DESCRIPTION),
            FieldSchema::randomized(collection, Self::CARD_NUMBER),
            FieldSchema::randomized(collection, Self::CVV),
            FieldSchema::randomized(collection, Self::EXPIRY_DATE),
            FieldSchema::plain(collection, Self::MERCHANT_NAME),
            FieldSchema::plain(collection, Self::TRANSACTION_DATE),
            FieldSchema::plain(collection, Self::STATUS),
        ])
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn to_fields(&self) -> FieldMap {
        FieldMap::from([
            entry(Self::ACCOUNT_NUMBER, self.account_number.as_str()),
            entry(Self::AMOUNT, self.amount),
            entry(Self::TRANSACTION_TYPE, self.transaction_type.as_str()),
            entry(Self::DESCRIPTION, self.description.as_str()),
            entry(Self::CARD_NUMBER, self.card_number.as_str()),
            entry(Self::CVV, self.cvv.as_str()),
            entry(Self::EXPIRY_DATE, self.expiry_date.as_str()),
            entry(Self::MERCHANT_NAME, self.merchant_name.as_str()),
            entry(Self::TRANSACTION_DATE, FieldValue::Timestamp(self.transaction_date)),
            entry(Self::STATUS, self.status.as_str()),
        ])
    }

    fn from_fields(id: &str, fields: FieldMap) -> Result<Self, Error> {
        let mut fields = FieldReader::new(Self::COLLECTION, fields);
        Ok(Self {
            id: id.to_string(),
            account_number: fields.text(Self::ACCOUNT_NUMBER)?,
            amount: fields.decimal(Self::AMOUNT)?,
            transaction_type: fields.text(Self::TRANSACTION_TYPE)?,
            description: fields.text(Self::DESCRIPTION)?,
            card_number: fields.text(Self::CARD_NUMBER)?,
            cvv: fields.text(Self::CVV)?,
            expiry_date: fields.text(Self::EXPIRY_DATE)?,
            merchant_name: fields.text(Self::MERCHANT_NAME)?,
            transaction_date: fields.timestamp(Self::TRANSACTION_DATE)?,
            status: fields.text(Self::STATUS)?,
        })
    }
}

/// Builds the registry for [`Account`] and [`Transaction`].
///
/// # Errors
///
/// Returns `Error::InvalidSchema` if the declarations are inconsistent.
pub fn financial_schema() -> Result<SchemaRegistry, Error> {
    SchemaRegistry::builder()
        .register::<Account>()
        .register::<Transaction>()
        .build()
}

fn entry(name: &str, value: impl Into<FieldValue>) -> (String, FieldValue) {
    (name.to_string(), value.into())
}

fn now() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
}
