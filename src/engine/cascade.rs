//! Foreign-key cascades
//!
//! After a parent row is written, the children held in each of its
//! foreign-key fields are written to the child table with the parent
//! identity stamped on them. Deleting a parent deletes its children.
//! Child queries run on an isolated context so they never touch the state
//! of the outer query.
//!
//! A failure on one field is logged and the remaining fields and rows are
//! still processed; the last failure is returned to the caller.

use super::context::QueryContext;
use super::error::{QueryError, Result};
use super::record::{ColumnKind, ForeignKey, ForeignChildren, Record};

/// Cascade the recorded `(row index, foreign key)` pairs of a write.
///
/// In update mode stored children are replaced, and lazy fields that were
/// never loaded are left alone.
pub(crate) fn propagate<R: Record>(
    ctx: &QueryContext,
    rows: &mut [Option<R>],
    pending: Vec<(usize, &'static ForeignKey)>,
    update_mode: bool,
) -> Result<()> {
    let mut last_failure = None;
    for (index, key) in pending {
        let Some(row) = rows.get_mut(index).and_then(Option::as_mut) else {
            continue;
        };
        if let Err(e) = cascade_field(ctx, row, key, update_mode) {
            last_failure = Some(wrap_failure(key, e));
        }
    }
    last_failure.map_or(Ok(()), Err)
}

/// Delete the children of every row about to be removed
pub(crate) fn delete_children<R: Record>(ctx: &QueryContext, mut doomed: Vec<R>) -> Result<()> {
    let mut last_failure = None;
    for row in doomed.iter_mut() {
        for key in R::schema().foreign_keys {
            if let Err(e) = delete_field(ctx, row, key) {
                last_failure = Some(wrap_failure(key, e));
            }
        }
    }
    last_failure.map_or(Ok(()), Err)
}

fn wrap_failure(key: &ForeignKey, e: QueryError) -> QueryError {
    tracing::warn!(field = key.field, table = key.table, error = %e, "Foreign key cascade failed");
    QueryError::Cascade {
        field: key.field.to_string(),
        source: Box::new(e),
    }
}

fn invalid_target(key: &ForeignKey) -> QueryError {
    QueryError::InvalidForeignKeyTarget {
        field: key.field.to_string(),
        column: key.column.to_string(),
    }
}

fn isolated_for(ctx: &QueryContext, key: &ForeignKey) -> QueryContext {
    ctx.isolated(&format!("[@fk]:{}//{}", key.table, key.column))
}

fn cascade_field<R: Record>(ctx: &QueryContext, row: &mut R, key: &'static ForeignKey, update_mode: bool) -> Result<()> {
    let parent_id = row.identity();
    let parent = R::schema();
    let children = row.foreign_children(key.field).ok_or_else(|| invalid_target(key))?;

    if update_mode && children.is_untouched() {
        tracing::trace!(field = key.field, "Skipping unloaded children");
        return Ok(());
    }

    check_relation(parent.name, parent.identity, &*children, key)?;
    if parent_id <= 0 {
        return Err(QueryError::ZeroParentIdentity(key.field.to_string()));
    }

    let isolated = isolated_for(ctx, key);
    let count = children.stamp_parent(key.column, parent_id);
    if count > 0 {
        if update_mode {
            children.delete_children(&isolated, key, parent_id)?;
        }
        children.insert_children(&isolated, key.table)?;
    } else {
        children.delete_children(&isolated, key, parent_id)?;
    }

    tracing::debug!(field = key.field, table = key.table, parent_id, children = count, "Cascaded foreign key");
    Ok(())
}

fn delete_field<R: Record>(ctx: &QueryContext, row: &mut R, key: &'static ForeignKey) -> Result<()> {
    let parent_id = row.identity();
    let parent = R::schema();
    let children = row.foreign_children(key.field).ok_or_else(|| invalid_target(key))?;
    check_relation(parent.name, parent.identity, &*children, key)?;

    let deleted = children.delete_children(&isolated_for(ctx, key), key, parent_id)?;
    tracing::debug!(field = key.field, table = key.table, parent_id, deleted, "Deleted child rows");
    Ok(())
}

/// Both sides need an identity and the child column must hold integers
fn check_relation(
    parent_name: &str,
    parent_identity: Option<&str>,
    children: &dyn ForeignChildren,
    key: &ForeignKey,
) -> Result<()> {
    if parent_identity.is_none() {
        return Err(QueryError::MissingIdentityColumn(format!(
            "'{}' declares foreign key field '{}' but has no identity",
            parent_name, key.field
        )));
    }

    let child = children.child_schema();
    if child.identity.is_none() {
        return Err(QueryError::MissingIdentityColumn(format!(
            "child row type '{}' of field '{}' has no identity",
            child.name, key.field
        )));
    }

    match child.column(key.column) {
        Some(column) if column.kind == ColumnKind::Integer => Ok(()),
        _ => Err(invalid_target(key)),
    }
}
