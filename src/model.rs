// ABOUTME: Serde data models for QuickBooks OAuth and accounting API payloads
// ABOUTME: Tolerant parsing with optional fields and string-or-number SyncTokens

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Access/refresh token pair for one realm.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Item,
    Account,
}

impl EntityKind {
    /// Entity name as used in queries and the `QueryResponse` envelope.
    pub fn remote_name(self) -> &'static str {
        match self {
            EntityKind::Item => "Item",
            EntityKind::Account => "Account",
        }
    }

    /// Lower-case path segment of the update endpoint.
    pub fn resource(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Account => "account",
        }
    }

    pub fn select_all(self) -> String {
        format!("select * from {}", self.remote_name())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// Id and concurrency token observed on a remote entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityVersion {
    pub id: String,
    pub sync_token: u64,
}

impl EntityVersion {
    pub fn new(id: impl Into<String>, sync_token: u64) -> Self {
        EntityVersion {
            id: id.into(),
            sync_token,
        }
    }

    /// Extracts `Id` and `SyncToken` from a raw entity. Returns `None` when
    /// either is absent or the token is not a non-negative integer.
    pub fn from_entity(entity: &Value) -> Option<Self> {
        let id = match entity.get("Id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let sync_token = sync_token_value(entity.get("SyncToken")?)?;
        Some(EntityVersion { id, sync_token })
    }
}

fn sync_token_value(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn de_sync_token<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(sync_token_value))
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetaData {
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub last_updated_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fully_qualified_name: Option<String>,
    #[serde(default, rename = "domain")]
    pub domain: Option<String>,
    #[serde(default)]
    pub track_qty_on_hand: Option<bool>,
    #[serde(default, rename = "Type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub purchase_cost: Option<f64>,
    #[serde(default)]
    pub qty_on_hand: Option<f64>,
    #[serde(default)]
    pub income_account_ref: Option<Reference>,
    #[serde(default)]
    pub asset_account_ref: Option<Reference>,
    #[serde(default)]
    pub expense_account_ref: Option<Reference>,
    #[serde(default)]
    pub taxable: Option<bool>,
    #[serde(default)]
    pub meta_data: Option<MetaData>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "de_sync_token")]
    pub sync_token: Option<u64>,
    #[serde(default)]
    pub inv_start_date: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub purchase_desc: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sub_account: Option<bool>,
    #[serde(default)]
    pub fully_qualified_name: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub account_sub_type: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default, deserialize_with = "de_sync_token")]
    pub sync_token: Option<u64>,
}


/// One locally staged item change. Carries the full field set of a
/// full (non-sparse) item update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEdit {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "FullyQualifiedName", default)]
    pub fully_qualified_name: String,
    #[serde(rename = "domain", default)]
    pub domain: String,
    #[serde(rename = "TrackQtyOnHand", default)]
    pub track_qty_on_hand: String,
    #[serde(rename = "Type", default)]
    pub item_type: String,
    #[serde(rename = "PurchaseCost", default)]
    pub purchase_cost: String,
    #[serde(rename = "QtyOnHand", default)]
    pub qty_on_hand: String,
    #[serde(rename = "IncomeAccountRef_value", default)]
    pub income_account_ref: String,
    #[serde(rename = "AssetAccountRef_value", default)]
    pub asset_account_ref: String,
    #[serde(rename = "Taxable", default)]
    pub taxable: String,
    #[serde(rename = "MetaData_CreateTime", default)]
    pub create_time: String,
    #[serde(rename = "Active", default)]
    pub active: String,
    #[serde(rename = "InvStartDate", default)]
    pub inv_start_date: String,
    #[serde(rename = "UnitPrice", default)]
    pub unit_price: String,
    #[serde(rename = "ExpenseAccountRef_value", default)]
    pub expense_account_ref: String,
    #[serde(rename = "PurchaseDesc", default)]
    pub purchase_desc: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}
