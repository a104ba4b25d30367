// ABOUTME: Reads staged item edits from CSV and builds full-entity update payloads
// ABOUTME: Converts CSV text cells into the JSON types the remote update endpoint expects

use crate::{model::ItemEdit, Error, Result};
use serde_json::{json, Map, Number, Value};
use std::io::Read;
use std::path::Path;

pub fn read_item_edits(path: &Path) -> Result<Vec<ItemEdit>> {
    let file = std::fs::File::open(path)?;
    let edits = read_item_edits_from(file)?;
    tracing::debug!(path = %path.display(), count = edits.len(), "loaded item edits");
    Ok(edits)
}

pub fn read_item_edits_from<R: Read>(reader: R) -> Result<Vec<ItemEdit>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut edits = Vec::new();
    for row in rdr.deserialize() {
        let edit: ItemEdit = row?;
        edits.push(edit);
    }
    Ok(edits)
}

impl ItemEdit {
    /// Full update body for this item carrying `sync_token` unchanged and
    /// `last_updated` as `MetaData.LastUpdatedTime`.
    pub fn to_payload(&self, sync_token: u64, last_updated: &str) -> Result<Value> {
        if self.id.is_empty() {
            return Err(self.invalid("Id is empty"));
        }

        let mut body = Map::new();
        body.insert("Id".into(), json!(self.id));
        body.insert("SyncToken".into(), json!(sync_token.to_string()));
        body.insert("sparse".into(), json!(false));
        body.insert("Name".into(), json!(self.name));

        insert_text(&mut body, "FullyQualifiedName", &self.fully_qualified_name);
        insert_text(&mut body, "domain", &self.domain);
        insert_text(&mut body, "Type", &self.item_type);
        insert_text(&mut body, "InvStartDate", &self.inv_start_date);
        body.insert("PurchaseDesc".into(), json!(self.purchase_desc));
        body.insert("Description".into(), json!(self.description));

        self.insert_bool(&mut body, "TrackQtyOnHand", &self.track_qty_on_hand)?;
        self.insert_bool(&mut body, "Taxable", &self.taxable)?;
        self.insert_bool(&mut body, "Active", &self.active)?;

        self.insert_number(&mut body, "PurchaseCost", &self.purchase_cost)?;
        self.insert_number(&mut body, "QtyOnHand", &self.qty_on_hand)?;
        self.insert_number(&mut body, "UnitPrice", &self.unit_price)?;

        insert_ref(&mut body, "IncomeAccountRef", &self.income_account_ref);
        insert_ref(&mut body, "AssetAccountRef", &self.asset_account_ref);
        insert_ref(&mut body, "ExpenseAccountRef", &self.expense_account_ref);

        let mut meta = Map::new();
        insert_text(&mut meta, "CreateTime", &self.create_time);
        meta.insert("LastUpdatedTime".into(), json!(last_updated));
        body.insert("MetaData".into(), Value::Object(meta));

        Ok(Value::Object(body))
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidEdit {
            entity_id: self.id.clone(),
            reason: reason.into(),
        }
    }

    fn insert_bool(&self, body: &mut Map<String, Value>, key: &str, raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }
        let value = match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => return Err(self.invalid(format!("{} is not a boolean: {:?}", key, raw))),
        };
        body.insert(key.into(), Value::Bool(value));
        Ok(())
    }

    fn insert_number(&self, body: &mut Map<String, Value>, key: &str, raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }
        let number = if let Ok(i) = raw.parse::<i64>() {
            Number::from(i)
        } else {
            raw.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| self.invalid(format!("{} is not a number: {:?}", key, raw)))?
        };
        body.insert(key.into(), Value::Number(number));
        Ok(())
    }
}

fn insert_text(body: &mut Map<String, Value>, key: &str, raw: &str) {
    if !raw.is_empty() {
        body.insert(key.into(), json!(raw));
    }
}

fn insert_ref(body: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        body.insert(key.into(), json!({ "value": value }));
    }
}
