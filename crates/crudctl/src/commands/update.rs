//! Update command implementation.

use anyhow::{anyhow, Context, Result};
use crudstream::{Store, StoreConfig};
use serde::Serialize;

use super::parse_value;
use crate::OutputFormat;

#[derive(Serialize)]
struct UpdateOutput {
    statement: String,
    rows_affected: u64,
}

pub async fn run(config: StoreConfig, sql: &str, params: &[String], format: OutputFormat) -> Result<()> {
    let store = Store::open(config).context("failed to open store")?;

    let rows_affected = store
        .update(sql)
        .execute(params.iter().map(|raw| parse_value(raw)))
        .single()
        .await
        .context("update failed")?
        .ok_or_else(|| anyhow!("update produced no result"))?;

    match format {
        OutputFormat::Text => {
            println!("{} row(s) affected", rows_affected);
        }
        OutputFormat::Json => {
            let output = UpdateOutput {
                statement: sql.to_string(),
                rows_affected,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
