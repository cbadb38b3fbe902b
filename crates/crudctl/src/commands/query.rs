//! Query command implementation.

use anyhow::{anyhow, Context, Result};
use crudstream::{
    Parameter, ReadableResource, StatementTemplate, Store, StoreConfig, Termination, Value,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::signal;

use super::{parse_named, parse_value};
use crate::OutputFormat;

#[derive(Serialize)]
struct QuerySummary {
    rows: u64,
    outcome: &'static str,
}

/// Render a value for tabular output. Text is printed in full.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_template(sql: &str, params: &[String], named: &[String]) -> Result<StatementTemplate> {
    let parameters: Vec<Parameter> = match (params.is_empty(), named.is_empty()) {
        (_, true) => params
            .iter()
            .enumerate()
            .map(|(i, raw)| Parameter::at(i + 1, parse_value(raw)))
            .collect(),
        (true, false) => named
            .iter()
            .map(|raw| parse_named(raw).map(|(name, value)| Parameter::named(name, value)))
            .collect::<Result<_>>()?,
        (false, false) => return Err(anyhow!("cannot mix positional and named parameters")),
    };
    StatementTemplate::new(sql, parameters).context("invalid statement")
}

pub async fn run(
    config: StoreConfig,
    sql: &str,
    params: &[String],
    named: &[String],
    limit: u64,
    format: OutputFormat,
) -> Result<()> {
    let template = build_template(sql, params, named)?;
    let store = Store::open(config).context("failed to open store")?;
    let mut rows = store.query(template).get();

    let mut received: u64 = 0;
    let mut header_printed = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                rows.cancel();
                if format == OutputFormat::Text {
                    eprintln!("\nCancelled after {} row(s)", received);
                }
                break;
            }
            next = rows.next() => {
                match next {
                    Some(Ok(record)) => {
                        received += 1;
                        match format {
                            OutputFormat::Text => {
                                if !header_printed {
                                    println!("{}", record.columns().join("\t"));
                                    header_printed = true;
                                }
                                let cells: Vec<String> =
                                    record.values().iter().map(cell).collect();
                                println!("{}", cells.join("\t"));
                            }
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string(&record)?);
                            }
                        }

                        if limit > 0 && received >= limit {
                            rows.cancel();
                            if format == OutputFormat::Text {
                                eprintln!("\nReached row limit ({})", limit);
                            }
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(e).context("query failed"),
                    None => break,
                }
            }
        }
    }

    let outcome = match rows.termination() {
        Some(Termination::Completed) => "completed",
        Some(Termination::Failed) => "failed",
        _ => "cancelled",
    };
    match format {
        OutputFormat::Text => eprintln!("{} row(s), {}", received, outcome),
        OutputFormat::Json => eprintln!(
            "{}",
            serde_json::to_string(&QuerySummary {
                rows: received,
                outcome
            })?
        ),
    }

    Ok(())
}
