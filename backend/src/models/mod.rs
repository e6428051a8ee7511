use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// One `{trait, value}` pair from a listing's attribute list. Values are
/// mixed scalars (numbers and strings) straight from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "trait", alias = "trait_type")]
    pub trait_name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ListingType {
    Buy,
    Lease,
}

/// Catalog-resident property record. The catalog is authoritative for every
/// field here; sale progress lives on the ledger and is never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_asset_id: Option<u64>,
    pub attributes: Vec<Attribute>,
    pub listed_at: i64,
}

impl PropertyRecord {
    fn attribute(&self, trait_name: &str) -> Option<&serde_json::Value> {
        self.attributes
            .iter()
            .find(|a| a.trait_name.eq_ignore_ascii_case(trait_name))
            .map(|a| &a.value)
    }

    /// Listed purchase price, parsed from the `Purchase Price` attribute.
    pub fn listed_price(&self) -> Option<Decimal> {
        self.attribute("purchase price").and_then(decimal_from_value)
    }

    /// Records without a `Listing Type` attribute are treated as sale
    /// listings, matching the default browse filter of the original data set.
    pub fn listing_type(&self) -> ListingType {
        match self.attribute("listing type").and_then(|v| v.as_str()) {
            Some(t) if t.eq_ignore_ascii_case("lease") || t.eq_ignore_ascii_case("rent") => {
                ListingType::Lease
            }
            _ => ListingType::Buy,
        }
    }
}

/// Parse a decimal out of a JSON scalar. Numbers go through their literal
/// representation so `1.5` stays exactly `1.5`.
pub fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Payload for creating a catalog record. The owner wallet is filled in from
/// the authenticated caller, never from the request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    pub name: String,
    pub address: String,
    pub description: String,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(skip)]
    pub owner: String,
}

/// Owner-gated update. `owner` may be echoed back unchanged but any attempt
/// to change it is rejected at the store boundary; `ledger_asset_id` is not
/// patchable at all.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub image_ref: Option<String>,
    pub attributes: Option<Vec<Attribute>>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::properties)]
pub struct PropertyRow {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub description: String,
    pub image_ref: Option<String>,
    pub owner_wallet: String,
    pub ledger_asset_id: Option<i64>,
    pub attributes: serde_json::Value,
    pub listed_at: i64,
}

impl PropertyRow {
    pub fn into_record(self) -> PropertyRecord {
        let attributes = serde_json::from_value(self.attributes).unwrap_or_else(|e| {
            log::warn!("malformed attributes on listing {}: {}", self.id, e);
            Vec::new()
        });
        PropertyRecord {
            id: self.id,
            name: self.name,
            address: self.address,
            description: self.description,
            image_ref: self.image_ref,
            owner: self.owner_wallet,
            ledger_asset_id: self.ledger_asset_id.map(|v| v as u64),
            attributes,
            listed_at: self.listed_at,
        }
    }

    pub fn from_record(record: &PropertyRecord) -> Self {
        PropertyRow {
            id: record.id,
            name: record.name.clone(),
            address: record.address.clone(),
            description: record.description.clone(),
            image_ref: record.image_ref.clone(),
            owner_wallet: record.owner.clone(),
            ledger_asset_id: record.ledger_asset_id.map(|v| v as i64),
            attributes: serde_json::to_value(&record.attributes)
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            listed_at: record.listed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(attributes: Vec<Attribute>) -> PropertyRecord {
        PropertyRecord {
            id: Uuid::new_v4(),
            name: "Test Home".into(),
            address: "1 Main St".into(),
            description: "".into(),
            image_ref: None,
            owner: "0xAbC".into(),
            ledger_asset_id: None,
            attributes,
            listed_at: 0,
        }
    }

    fn attr(name: &str, value: serde_json::Value) -> Attribute {
        Attribute {
            trait_name: name.into(),
            value,
        }
    }

    #[test]
    fn listed_price_parses_strings_and_numbers() {
        let record = record_with(vec![attr("Purchase Price", serde_json::json!("1.5"))]);
        assert_eq!(record.listed_price(), Some(Decimal::from_str("1.5").unwrap()));

        let record = record_with(vec![attr("purchase price", serde_json::json!(2.25))]);
        assert_eq!(record.listed_price(), Some(Decimal::from_str("2.25").unwrap()));

        let record = record_with(vec![attr("Bed Rooms", serde_json::json!(3))]);
        assert_eq!(record.listed_price(), None);
    }

    #[test]
    fn listing_type_defaults_to_buy() {
        let record = record_with(vec![]);
        assert_eq!(record.listing_type(), ListingType::Buy);

        let record = record_with(vec![attr("Listing Type", serde_json::json!("lease"))]);
        assert_eq!(record.listing_type(), ListingType::Lease);

        // the original data set wrote "rent" for lease listings
        let record = record_with(vec![attr("Listing Type", serde_json::json!("rent"))]);
        assert_eq!(record.listing_type(), ListingType::Lease);
    }

    #[test]
    fn attributes_serialize_with_trait_key() {
        let a = attr("Square Feet", serde_json::json!(1200));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["trait"], "Square Feet");
        assert_eq!(json["value"], 1200);

        // legacy documents used trait_type
        let legacy: Attribute =
            serde_json::from_value(serde_json::json!({"trait_type": "Year Built", "value": 1990}))
                .unwrap();
        assert_eq!(legacy.trait_name, "Year Built");
    }
}
