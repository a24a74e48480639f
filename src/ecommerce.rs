//! Ecommerce event builder
//!
//! Maps products, cart lines and transactions into the nested
//! `ecommerce.items[]` schema. This is a pure mapping layer: totals, tax and
//! shipping are computed by the caller and passed through untouched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::emitter::Emitter;
use crate::types::names;

/// Currency used when the caller does not supply one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Catalog product as seen by the tracking layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub category: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// List the product was shown in (e.g. "product_listing")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    /// Explicit position within its list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        brand: impl Into<String>,
        category: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand: brand.into(),
            category: category.into(),
            price,
            variant: None,
            list: None,
            position: None,
        }
    }

    pub fn in_list(mut self, list: impl Into<String>) -> Self {
        self.list = Some(list.into());
        self
    }

    pub fn at_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }
}

/// A product with a quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(flatten)]
    pub product: Product,
    /// Absent or zero quantities are reported as 1
    #[serde(default)]
    pub quantity: Option<u32>,
}

impl CartLine {
    pub fn new(product: Product, quantity: u32) -> Self {
        Self {
            product,
            quantity: Some(quantity),
        }
    }

    /// Quantity as reported, never below 1
    pub fn effective_quantity(&self) -> u32 {
        self.quantity.filter(|q| *q >= 1).unwrap_or(1)
    }
}

impl From<Product> for CartLine {
    fn from(product: Product) -> Self {
        Self {
            product,
            quantity: None,
        }
    }
}

/// A completed order, with caller-computed amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub lines: Vec<CartLine>,
    /// Order subtotal (sum of price × quantity), computed by the caller
    pub value: f64,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub shipping: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Generate a collision-resistant transaction id: `TXN-<epoch micros>-<suffix>`
pub fn new_transaction_id() -> String {
    let micros = Utc::now().timestamp_micros();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TXN-{}-{}", micros, &suffix[..8])
}

/// One entry of `ecommerce.items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcommerceItem {
    pub item_id: String,
    pub item_name: String,
    pub item_brand: String,
    pub item_category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_variant: Option<String>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_list_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl EcommerceItem {
    fn from_product(product: &Product) -> Self {
        Self {
            item_id: product.id.clone(),
            item_name: product.name.clone(),
            item_brand: product.brand.clone(),
            item_category: product.category.clone(),
            item_variant: product.variant.clone(),
            price: product.price,
            item_list_name: None,
            index: None,
            quantity: None,
        }
    }

    /// Item for impression and click lists
    fn listed(product: &Product, index: Option<u32>) -> Self {
        Self {
            item_list_name: product.list.clone(),
            index,
            ..Self::from_product(product)
        }
    }

    /// Item for cart, checkout and purchase events
    fn with_quantity(line: &CartLine) -> Self {
        Self {
            quantity: Some(line.effective_quantity()),
            ..Self::from_product(&line.product)
        }
    }
}

/// Ecommerce view over an [`Emitter`]
#[derive(Debug, Clone, Copy)]
pub struct EcommerceTracker<'a> {
    emitter: &'a Emitter,
}

impl<'a> EcommerceTracker<'a> {
    pub fn new(emitter: &'a Emitter) -> Self {
        Self { emitter }
    }

    /// `view_item_list`; `index` is the product's explicit position, or its
    /// 0-based position in `products`
    pub fn product_impressions(&self, products: &[Product]) {
        let items = products
            .iter()
            .enumerate()
            .map(|(i, p)| EcommerceItem::listed(p, Some(p.position.unwrap_or(i as u32))))
            .collect();
        self.push(names::VIEW_ITEM_LIST, Map::new(), items);
    }

    /// `select_item`; `index` is exactly the supplied position
    pub fn product_click(&self, product: &Product, position: Option<u32>) {
        let items = vec![EcommerceItem::listed(product, position)];
        self.push(names::SELECT_ITEM, Map::new(), items);
    }

    /// `add_to_cart`; `value` defaults to the unit price
    pub fn add_to_cart(&self, line: &CartLine, value: Option<f64>, currency: Option<&str>) {
        self.cart_change(names::ADD_TO_CART, line, value, currency);
    }

    /// `remove_from_cart`; `value` defaults to the unit price
    pub fn remove_from_cart(&self, line: &CartLine, value: Option<f64>, currency: Option<&str>) {
        self.cart_change(names::REMOVE_FROM_CART, line, value, currency);
    }

    /// `begin_checkout` for funnel step `step`
    pub fn checkout_step(&self, step: u32, lines: &[CartLine], option: Option<&str>) {
        let mut fields = Map::new();
        fields.insert("checkout_step".into(), Value::from(step));
        if let Some(option) = option {
            fields.insert("checkout_option".into(), Value::from(option));
        }
        let items = lines.iter().map(EcommerceItem::with_quantity).collect();
        self.push(names::BEGIN_CHECKOUT, fields, items);
    }

    /// `purchase`; amounts are forwarded exactly as supplied
    pub fn purchase(&self, transaction: &Transaction) {
        let mut fields = Map::new();
        fields.insert(
            "transaction_id".into(),
            Value::from(transaction.transaction_id.as_str()),
        );
        fields.insert("value".into(), Value::from(transaction.value));
        if let Some(tax) = transaction.tax {
            fields.insert("tax".into(), Value::from(tax));
        }
        if let Some(shipping) = transaction.shipping {
            fields.insert("shipping".into(), Value::from(shipping));
        }
        fields.insert(
            "currency".into(),
            Value::from(transaction.currency.as_deref().unwrap_or(DEFAULT_CURRENCY)),
        );
        let items = transaction
            .lines
            .iter()
            .map(EcommerceItem::with_quantity)
            .collect();
        self.push(names::PURCHASE, fields, items);
    }

    fn cart_change(
        &self,
        event: &str,
        line: &CartLine,
        value: Option<f64>,
        currency: Option<&str>,
    ) {
        let mut fields = Map::new();
        fields.insert(
            "value".into(),
            Value::from(value.unwrap_or(line.product.price)),
        );
        fields.insert(
            "currency".into(),
            Value::from(currency.unwrap_or(DEFAULT_CURRENCY)),
        );
        self.push(event, fields, vec![EcommerceItem::with_quantity(line)]);
    }

    fn push(&self, event: &str, mut fields: Map<String, Value>, items: Vec<EcommerceItem>) {
        let items = items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();
        fields.insert("items".into(), Value::Array(items));

        let mut attributes = Map::new();
        attributes.insert("ecommerce".into(), Value::Object(fields));
        self.emitter.emit(event, attributes);
    }
}

impl Emitter {
    /// Ecommerce helpers writing through this emitter
    pub fn ecommerce(&self) -> EcommerceTracker<'_> {
        EcommerceTracker::new(self)
    }
}
