use rusqlite::TransactionBehavior;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::db;

/// Category under which device-local JSON documents are stored.
pub(crate) const LOCAL_CATEGORY: &str = "local";

fn parse_local_json(key: &str, raw: Option<String>) -> serde_json::Value {
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return parsed;
        }
        warn!(key, "stored local document is not valid JSON, treating as empty");
    }
    serde_json::Value::Null
}

/// Decode every element of a JSON array document as `T`.
///
/// A missing or malformed document reads as empty. Elements that fail to
/// decode are skipped with a warning rather than poisoning the whole list.
fn decode_vec<T: DeserializeOwned>(key: &str, parsed: serde_json::Value) -> Vec<T> {
    let elements = match parsed {
        serde_json::Value::Array(elements) => elements,
        _ => return Vec::new(),
    };
    let mut out = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<T>(element) {
            Ok(value) => out.push(value),
            Err(e) => warn!(key, index, error = %e, "skipping undecodable local entry"),
        }
    }
    out
}

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(parse_local_json(key, db::get_setting(&conn, LOCAL_CATEGORY, key)))
}

pub(crate) fn read_local_vec<T: DeserializeOwned>(
    db: &db::DbState,
    key: &str,
) -> Result<Vec<T>, String> {
    Ok(decode_vec(key, read_local_json(db, key)?))
}

pub(crate) fn write_local_json<T: Serialize + ?Sized>(
    db: &db::DbState,
    key: &str,
    value: &T,
) -> Result<(), String> {
    let encoded =
        serde_json::to_string(value).map_err(|e| format!("encode local {key}: {e}"))?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, LOCAL_CATEGORY, key, &encoded)
}

/// Read-modify-write a JSON array document as one unit.
///
/// The connection lock is held and an IMMEDIATE transaction is open from
/// the read until the write commits, so concurrent updates to the same key
/// never overwrite each other. `apply` must not block on anything that
/// itself needs the database.
pub(crate) fn update_local_vec<T, R, F>(db: &db::DbState, key: &str, apply: F) -> Result<R, String>
where
    T: DeserializeOwned + Serialize,
    F: FnOnce(&mut Vec<T>) -> R,
{
    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| format!("begin update of local {key}: {e}"))?;

    let mut values: Vec<T> =
        decode_vec(key, parse_local_json(key, db::get_setting(&tx, LOCAL_CATEGORY, key)));
    let result = apply(&mut values);

    let encoded =
        serde_json::to_string(&values).map_err(|e| format!("encode local {key}: {e}"))?;
    db::set_setting(&tx, LOCAL_CATEGORY, key, &encoded)?;
    tx.commit()
        .map_err(|e| format!("commit update of local {key}: {e}"))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_local_vec_tolerates_garbage() {
        let db = db::init_in_memory().unwrap();
        assert!(read_local_vec::<u32>(&db, "numbers").unwrap().is_empty());

        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, LOCAL_CATEGORY, "numbers", "not json").unwrap();
        }
        assert!(read_local_vec::<u32>(&db, "numbers").unwrap().is_empty());

        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, LOCAL_CATEGORY, "numbers", r#"[1, "two", 3]"#).unwrap();
        }
        assert_eq!(read_local_vec::<u32>(&db, "numbers").unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_write_then_read() {
        let db = db::init_in_memory().unwrap();
        write_local_json(&db, "numbers", &[4u32, 5, 6]).unwrap();
        assert_eq!(read_local_vec::<u32>(&db, "numbers").unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_update_local_vec_returns_closure_result() {
        let db = db::init_in_memory().unwrap();
        write_local_json(&db, "numbers", &[1u32]).unwrap();

        let len = update_local_vec(&db, "numbers", |numbers: &mut Vec<u32>| {
            numbers.push(2);
            numbers.len()
        })
        .unwrap();
        assert_eq!(len, 2);
        assert_eq!(read_local_vec::<u32>(&db, "numbers").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let db = std::sync::Arc::new(db::init_in_memory().unwrap());
        let workers: Vec<_> = (0..8u32)
            .map(|worker| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for i in 0..25u32 {
                        update_local_vec(&db, "numbers", |numbers: &mut Vec<u32>| {
                            numbers.push(worker * 100 + i)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut numbers = read_local_vec::<u32>(&db, "numbers").unwrap();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 200);
    }
}
