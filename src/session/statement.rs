//! Raw statements on a session's own connection.

use tokio_util::sync::CancellationToken;

use super::StatementDelegate;
use crate::backend::Record;
use crate::error::{Error, Result};
use crate::exec::task::{execute_on, query_on};
use crate::exec::RowWindow;
use crate::statement::StatementTemplate;

pub(super) fn query<D: StatementDelegate>(
    delegate: &mut D,
    template: &StatementTemplate,
    window: RowWindow,
) -> Result<Vec<Record>> {
    let connection = delegate.connection()?;
    let mut rows = Vec::new();
    // Nothing cancels work that the caller is blocked on.
    query_on(template, connection, window, &CancellationToken::new(), &mut |row| rows.push(row))?;
    Ok(rows)
}

pub(super) fn query_unique<D: StatementDelegate>(
    delegate: &mut D,
    template: &StatementTemplate,
) -> Result<Option<Record>> {
    let mut rows = query(delegate, template, RowWindow::ALL.limit(2))?;
    if rows.len() > 1 {
        return Err(Error::illegal_state(format!(
            "expected at most one row from {template}"
        )));
    }
    Ok(rows.pop())
}

pub(super) fn execute<D: StatementDelegate>(delegate: &mut D, template: &StatementTemplate) -> Result<u64> {
    execute_on(template, delegate.connection()?)
}
