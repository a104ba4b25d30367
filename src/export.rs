// ABOUTME: Writes queried accounts and items to flat CSV files
// ABOUTME: Item exports share column names with the edit input so rows can be edited and pushed

use crate::{
    model::{Account, Item, Reference},
    storage::write_atomic,
    Error, Result,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

pub const ACCOUNT_COLUMNS: &[&str] = &[
    "Name",
    "SubAccount",
    "FullyQualifiedName",
    "AccountType",
    "AccountSubType",
    "Id",
    "Classification",
];

pub const ITEM_COLUMNS: &[&str] = &[
    "FullyQualifiedName",
    "domain",
    "Id",
    "Name",
    "TrackQtyOnHand",
    "Type",
    "PurchaseCost",
    "QtyOnHand",
    "IncomeAccountRef_name",
    "IncomeAccountRef_value",
    "AssetAccountRef_name",
    "AssetAccountRef_value",
    "Taxable",
    "MetaData_CreateTime",
    "MetaData_LastUpdatedTime",
    "Active",
    "SyncToken",
    "InvStartDate",
    "UnitPrice",
    "ExpenseAccountRef_name",
    "ExpenseAccountRef_value",
    "PurchaseDesc",
    "Description",
];

fn text(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn flag(v: Option<bool>) -> String {
    v.map(|b| b.to_string()).unwrap_or_default()
}

fn num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn ref_parts(r: &Option<Reference>) -> (String, String) {
    match r {
        Some(r) => (text(&r.name), r.value.clone()),
        None => (String::new(), String::new()),
    }
}

fn item_row(item: &Item) -> Vec<String> {
    let (income_name, income_value) = ref_parts(&item.income_account_ref);
    let (asset_name, asset_value) = ref_parts(&item.asset_account_ref);
    let (expense_name, expense_value) = ref_parts(&item.expense_account_ref);
    let meta = item.meta_data.clone().unwrap_or_default();

    vec![
        text(&item.fully_qualified_name),
        text(&item.domain),
        item.id.clone(),
        text(&item.name),
        flag(item.track_qty_on_hand),
        text(&item.item_type),
        num(item.purchase_cost),
        num(item.qty_on_hand),
        income_name,
        income_value,
        asset_name,
        asset_value,
        flag(item.taxable),
        text(&meta.create_time),
        text(&meta.last_updated_time),
        flag(item.active),
        item.sync_token.map(|t| t.to_string()).unwrap_or_default(),
        text(&item.inv_start_date),
        num(item.unit_price),
        expense_name,
        expense_value,
        text(&item.purchase_desc),
        text(&item.description),
    ]
}

fn account_row(account: &Account) -> Vec<String> {
    vec![
        text(&account.name),
        flag(account.sub_account),
        text(&account.fully_qualified_name),
        text(&account.account_type),
        text(&account.account_sub_type),
        account.id.clone(),
        text(&account.classification),
    ]
}

/// Deserializes each raw entity, skipping (and logging) any that do not fit
/// the typed model rather than dropping the whole export.
fn typed<T: DeserializeOwned>(entities: &[Value]) -> Vec<T> {
    entities
        .iter()
        .filter_map(|raw| match serde_json::from_value(raw.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(id = ?raw.get("Id"), error = %e, "skipping entity in export");
                None
            }
        })
        .collect()
}

fn render(columns: &[&str], rows: impl Iterator<Item = Vec<String>>) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(columns)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.into_inner().map_err(|e| Error::Filesystem(e.into_error()))
}

pub fn write_items_csv(entities: &[Value], path: &Path, tmp_dir: &Path) -> Result<usize> {
    let items: Vec<Item> = typed(entities);
    let bytes = render(ITEM_COLUMNS, items.iter().map(item_row))?;
    write_atomic(path, &bytes, tmp_dir)?;
    Ok(items.len())
}

pub fn write_accounts_csv(entities: &[Value], path: &Path, tmp_dir: &Path) -> Result<usize> {
    let accounts: Vec<Account> = typed(entities);
    let bytes = render(ACCOUNT_COLUMNS, accounts.iter().map(account_row))?;
    write_atomic(path, &bytes, tmp_dir)?;
    Ok(accounts.len())
}
