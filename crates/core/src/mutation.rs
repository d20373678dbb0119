use thiserror::Error;

use crate::error_classifier::{classify_error, ErrorCategory};
use crate::row_store::{RowStore, StoreError};
use crate::value::{row_id, CellValue, Row};

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("row {row_index} is out of range ({len} rows loaded)")]
    RowOutOfRange { row_index: usize, len: usize },
    #[error("row {row_index} has no `id` field and cannot be changed")]
    MissingIdentity { row_index: usize },
    #[error("another edit is still waiting for the store to confirm it")]
    EditInFlight,
    #[error("no edit is pending")]
    NoPendingEdit,
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("{category}")]
    Store {
        category: ErrorCategory,
        #[source]
        source: StoreError,
    },
}

impl MutationError {
    fn store(source: StoreError) -> Self {
        Self::Store {
            category: classify_error(&source),
            source,
        }
    }
}

/// A staged cell change together with the row as it looked before.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEdit {
    pub row_index: usize,
    pub column: String,
    pub previous_value: Option<CellValue>,
    pub new_value: CellValue,
    pub snapshot: Row,
}

impl OptimisticEdit {
    /// Puts the snapshot back at `row_index` of `current`.
    ///
    /// Only the snapshot is consulted, so reverting after later changes to
    /// other rows, or reverting twice, gives the same row back.
    #[must_use]
    pub fn revert(&self, current: &[Row]) -> Vec<Row> {
        let mut rows = current.to_vec();
        if let Some(row) = rows.get_mut(self.row_index) {
            row.clone_from(&self.snapshot);
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate {
    pub new_rows: Vec<Row>,
    pub edit: OptimisticEdit,
}

/// Copies `rows` with a single cell replaced; `rows` itself is left as is.
pub fn apply_optimistic_update(
    rows: &[Row],
    row_index: usize,
    column: &str,
    new_value: CellValue,
) -> Result<OptimisticUpdate, MutationError> {
    let snapshot = rows
        .get(row_index)
        .cloned()
        .ok_or(MutationError::RowOutOfRange {
            row_index,
            len: rows.len(),
        })?;

    let mut new_rows = rows.to_vec();
    let previous_value = new_rows[row_index].insert(column.to_string(), new_value.clone());

    Ok(OptimisticUpdate {
        new_rows,
        edit: OptimisticEdit {
            row_index,
            column: column.to_string(),
            previous_value,
            new_value,
            snapshot,
        },
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletedRow {
    pub table: String,
    pub row: Row,
}

#[derive(Debug)]
pub enum EditOutcome {
    Committed,
    RolledBack {
        rows: Vec<Row>,
        error: MutationError,
    },
}

/// Drives the optimistic edit protocol and single-step delete undo.
///
/// Edits are serialized: while one is staged, staging another is refused
/// with [`MutationError::EditInFlight`] so no snapshot is ever overwritten.
#[derive(Debug)]
pub struct MutationController<S: RowStore> {
    store: S,
    pending: Option<(String, OptimisticEdit)>,
    last_deleted: Option<DeletedRow>,
}

impl<S: RowStore> MutationController<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: None,
            last_deleted: None,
        }
    }

    #[must_use]
    pub fn pending_edit(&self) -> Option<&OptimisticEdit> {
        self.pending.as_ref().map(|(_, edit)| edit)
    }

    #[must_use]
    pub fn last_deleted(&self) -> Option<&DeletedRow> {
        self.last_deleted.as_ref()
    }

    /// Step one: returns the rows to show right away and remembers the edit.
    pub fn stage_edit(
        &mut self,
        table: &str,
        rows: &[Row],
        row_index: usize,
        column: &str,
        new_value: CellValue,
    ) -> Result<Vec<Row>, MutationError> {
        if self.pending.is_some() {
            return Err(MutationError::EditInFlight);
        }
        let row = rows.get(row_index).ok_or(MutationError::RowOutOfRange {
            row_index,
            len: rows.len(),
        })?;
        if row_id(row).is_none() {
            return Err(MutationError::MissingIdentity { row_index });
        }

        let update = apply_optimistic_update(rows, row_index, column, new_value)?;
        self.pending = Some((table.to_string(), update.edit));
        Ok(update.new_rows)
    }

    /// Steps two to four: writes the staged edit and, on failure, hands back
    /// `current` with the edited row restored.
    #[tracing::instrument(skip(self, current))]
    pub async fn commit_edit(&mut self, current: &[Row]) -> Result<EditOutcome, MutationError> {
        let (table, edit) = self.pending.take().ok_or(MutationError::NoPendingEdit)?;
        let Some(id) = row_id(&edit.snapshot) else {
            return Ok(EditOutcome::RolledBack {
                rows: edit.revert(current),
                error: MutationError::MissingIdentity {
                    row_index: edit.row_index,
                },
            });
        };

        let patch = Row::from([(edit.column.clone(), edit.new_value.clone())]);
        match self.store.update(&table, id, &patch).await {
            Ok(()) => {
                tracing::info!(table = %table, column = %edit.column, "cell update committed");
                Ok(EditOutcome::Committed)
            }
            Err(source) => {
                tracing::warn!(table = %table, column = %edit.column, error = %source, "cell update rolled back");
                Ok(EditOutcome::RolledBack {
                    rows: edit.revert(current),
                    error: MutationError::store(source),
                })
            }
        }
    }

    /// Stages, shows and commits an edit against the visible `rows`.
    pub async fn edit_cell(
        &mut self,
        table: &str,
        rows: &mut Vec<Row>,
        row_index: usize,
        column: &str,
        new_value: CellValue,
    ) -> Result<(), MutationError> {
        *rows = self.stage_edit(table, rows, row_index, column, new_value)?;
        match self.commit_edit(rows).await? {
            EditOutcome::Committed => Ok(()),
            EditOutcome::RolledBack {
                rows: reverted,
                error,
            } => {
                *rows = reverted;
                Err(error)
            }
        }
    }

    /// Removes the row only after the store confirms the delete.
    #[tracing::instrument(skip(self, rows))]
    pub async fn delete_row(
        &mut self,
        table: &str,
        rows: &mut Vec<Row>,
        row_index: usize,
    ) -> Result<(), MutationError> {
        let row = rows.get(row_index).ok_or(MutationError::RowOutOfRange {
            row_index,
            len: rows.len(),
        })?;
        let id = row_id(row).ok_or(MutationError::MissingIdentity { row_index })?;

        self.store
            .delete(table, id)
            .await
            .map_err(MutationError::store)?;

        let row = rows.remove(row_index);
        tracing::info!(table, "row deleted");
        self.last_deleted = Some(DeletedRow {
            table: table.to_string(),
            row,
        });
        Ok(())
    }

    /// Re-inserts the last deleted row. This is a plain insert: the store
    /// keeps the old `id` only if it honours the field verbatim.
    pub async fn undo_delete(&mut self) -> Result<DeletedRow, MutationError> {
        let deleted = self
            .last_deleted
            .take()
            .ok_or(MutationError::NothingToUndo)?;

        if let Err(source) = self.store.insert(&deleted.table, &deleted.row).await {
            self.last_deleted = Some(deleted);
            return Err(MutationError::store(source));
        }

        tracing::info!(table = %deleted.table, "deleted row restored");
        Ok(deleted)
    }
}
