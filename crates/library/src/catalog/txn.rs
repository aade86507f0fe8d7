//! Operations that run inside a caller-owned write transaction. Every
//! function opens the tables it needs and closes them before returning, so
//! calls compose freely within one transaction.

use std::collections::HashSet;

use redb::{ReadableTable, WriteTransaction};

use super::records::{Link, Record, SEQUENCES};
use super::{decode_value, encode_value, CatalogError};

pub fn load<T: Record>(tx: &WriteTransaction, id: u64) -> Result<T, CatalogError> {
    let rows = tx.open_table(T::ROWS)?;
    let record = match rows.get(id)? {
        Some(value) => decode_value(value.value())?,
        None => return Err(CatalogError::NotFound(format!("{} {}", T::NAME, id))),
    };
    Ok(record)
}

pub fn find<T: Record>(tx: &WriteTransaction, key: &str) -> Result<Option<T>, CatalogError> {
    let id = {
        let keys = tx.open_table(T::KEYS)?;
        let id = keys.get(key)?.map(|value| value.value());
        id
    };
    match id {
        Some(id) => Ok(Some(load(tx, id)?)),
        None => Ok(None),
    }
}

/// Loads by id when set, else by natural key.
pub fn resolve<T: Record>(tx: &WriteTransaction, wanted: &T) -> Result<T, CatalogError> {
    if wanted.id() != 0 {
        return load(tx, wanted.id());
    }
    let key = wanted.natural_key();
    find(tx, &key)?.ok_or_else(|| CatalogError::NotFound(format!("{} {}", T::NAME, key)))
}

pub fn child_ids(tx: &WriteTransaction, link: Link, parent: u64) -> Result<Vec<u64>, CatalogError> {
    let table = tx.open_table(link.table())?;
    let mut ids = Vec::new();
    for entry in table.range((parent, 0)..=(parent, u64::MAX))? {
        let (key, _) = entry?;
        ids.push(key.value().1);
    }
    Ok(ids)
}

pub fn has_children(tx: &WriteTransaction, link: Link, parent: u64) -> Result<bool, CatalogError> {
    let table = tx.open_table(link.table())?;
    let mut range = table.range((parent, 0)..=(parent, u64::MAX))?;
    let found = range.next().transpose()?.is_some();
    Ok(found)
}

pub fn ids<T: Record>(tx: &WriteTransaction) -> Result<Vec<u64>, CatalogError> {
    let rows = tx.open_table(T::ROWS)?;
    let mut ids = Vec::new();
    for entry in rows.iter()? {
        let (key, _) = entry?;
        ids.push(key.value());
    }
    Ok(ids)
}

/// Inserts a new row and assigns its id. A zero id draws the next value
/// from the kind's sequence.
pub fn insert<T: Record>(tx: &WriteTransaction, record: &mut T) -> Result<u64, CatalogError> {
    let key = record.natural_key();
    {
        let keys = tx.open_table(T::KEYS)?;
        if keys.get(key.as_str())?.is_some() {
            return Err(CatalogError::Conflict(format!("{} {}", T::NAME, key)));
        }
    }

    let id = if record.id() == 0 {
        next_id(tx, T::NAME)?
    } else {
        let rows = tx.open_table(T::ROWS)?;
        if rows.get(record.id())?.is_some() {
            return Err(CatalogError::Conflict(format!("{} {}", T::NAME, record.id())));
        }
        drop(rows);
        bump_sequence(tx, T::NAME, record.id())?;
        record.id()
    };
    record.set_id(id);
    check_parents(tx, T::NAME, &record.links())?;

    let bytes = encode_value(record)?;
    {
        let mut rows = tx.open_table(T::ROWS)?;
        rows.insert(id, bytes.as_slice())?;
        let mut keys = tx.open_table(T::KEYS)?;
        keys.insert(key.as_str(), id)?;
    }
    for (link, parent) in record.links() {
        let mut table = tx.open_table(link.table())?;
        table.insert((parent, id), ())?;
    }
    Ok(id)
}

/// Rewrites a row in place, moving its natural key and links when they change.
pub fn update<T: Record>(tx: &WriteTransaction, record: &T) -> Result<(), CatalogError> {
    let previous: T = load(tx, record.id())?;
    let id = record.id();

    let old_key = previous.natural_key();
    let new_key = record.natural_key();
    if old_key != new_key {
        let mut keys = tx.open_table(T::KEYS)?;
        let taken = keys.get(new_key.as_str())?.map(|value| value.value());
        if let Some(other) = taken {
            if other != id {
                return Err(CatalogError::Conflict(format!("{} {}", T::NAME, new_key)));
            }
        }
        keys.remove(old_key.as_str())?;
        keys.insert(new_key.as_str(), id)?;
    }

    let old_links: HashSet<(Link, u64)> = previous.links().into_iter().collect();
    let new_links: HashSet<(Link, u64)> = record.links().into_iter().collect();
    for (link, parent) in old_links.difference(&new_links) {
        let mut table = tx.open_table(link.table())?;
        table.remove((*parent, id))?;
    }
    let added: Vec<(Link, u64)> = new_links.difference(&old_links).copied().collect();
    check_parents(tx, T::NAME, &added)?;
    for (link, parent) in added {
        let mut table = tx.open_table(link.table())?;
        table.insert((parent, id), ())?;
    }

    let bytes = encode_value(record)?;
    let mut rows = tx.open_table(T::ROWS)?;
    rows.insert(id, bytes.as_slice())?;
    Ok(())
}

/// Deletes by id, or by natural key when the id is zero. Returns the
/// removed row. Rows that still have children are refused after the kind's
/// cascade has run.
pub fn delete<T: Record>(tx: &WriteTransaction, wanted: &T) -> Result<T, CatalogError> {
    let record = resolve(tx, wanted)?;
    record.cascade(tx)?;

    let id = record.id();
    for link in T::CHILDREN {
        if has_children(tx, *link, id)? {
            return Err(CatalogError::Constraint(format!(
                "{} {} still has {}",
                T::NAME,
                id,
                link.children()
            )));
        }
    }
    {
        let mut rows = tx.open_table(T::ROWS)?;
        rows.remove(id)?;
        let mut keys = tx.open_table(T::KEYS)?;
        keys.remove(record.natural_key().as_str())?;
    }
    for (link, parent) in record.links() {
        let mut table = tx.open_table(link.table())?;
        table.remove((parent, id))?;
    }
    Ok(record)
}

/// Every parent a row links to must already exist.
fn check_parents(tx: &WriteTransaction, kind: &str, links: &[(Link, u64)]) -> Result<(), CatalogError> {
    for (link, parent) in links {
        let (parent_kind, table) = link.parent();
        let rows = tx.open_table(table)?;
        if rows.get(*parent)?.is_none() {
            return Err(CatalogError::Constraint(format!(
                "{} references missing {} {}",
                kind, parent_kind, parent
            )));
        }
    }
    Ok(())
}

fn next_id(tx: &WriteTransaction, name: &str) -> Result<u64, CatalogError> {
    let mut table = tx.open_table(SEQUENCES)?;
    let next = table.get(name)?.map(|value| value.value()).unwrap_or(0) + 1;
    table.insert(name, next)?;
    Ok(next)
}

fn bump_sequence(tx: &WriteTransaction, name: &str, id: u64) -> Result<(), CatalogError> {
    let mut table = tx.open_table(SEQUENCES)?;
    let current = table.get(name)?.map(|value| value.value()).unwrap_or(0);
    if id > current {
        table.insert(name, id)?;
    }
    Ok(())
}
