// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Management of advertisers and ads.
//!
//! Listing supports the same search rules for both entities: the query is
//! split on whitespace and every term must appear (case-insensitively) in at
//! least one of the searched columns.

use crate::db::AdId;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, types::Value};
use serde::Serialize;
use thiserror::Error;

/// Identifier of a row in the `advertisers` table.
pub type AdvertiserId = i64;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("advertiser name must not be empty")]
    EmptyName,

    #[error("ad title must not be empty")]
    EmptyTitle,

    #[error("an advertiser named '{0}' already exists")]
    DuplicateAdvertiser(String),

    #[error("advertiser {0} does not exist")]
    AdvertiserNotFound(AdvertiserId),

    #[error("ad {0} does not exist")]
    AdNotFound(AdId),

    #[error("database error")]
    Database(#[from] rusqlite::Error),
}

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Advertiser {
    pub id: AdvertiserId,
    pub name: String,
}

/// An ad as shown in listings, joined with its advertiser's name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ad {
    pub id: AdId,
    pub title: String,
    pub advertiser_id: AdvertiserId,
    pub advertiser: String,
    pub approve: bool,
}

/// Filters for [`list_ads`]. Empty fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct AdFilter {
    /// Matched against the ad title and the advertiser name.
    pub search: Option<String>,
    pub advertiser_id: Option<AdvertiserId>,
    pub approve: Option<bool>,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
            && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn clean_name(name: &str) -> AdminResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AdminError::EmptyName);
    }
    Ok(name)
}

/// Escape `LIKE` wildcards so a search term matches literally.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Append one `AND (col LIKE ? OR ...)` clause per search term.
fn push_search(sql: &mut String, args: &mut Vec<Value>, search: &str, columns: &[&str]) {
    for term in search.split_whitespace() {
        let clauses: Vec<String> = columns
            .iter()
            .map(|col| {
                args.push(Value::Text(like_pattern(term)));
                format!("{} LIKE ?{} ESCAPE '\\'", col, args.len())
            })
            .collect();
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
    }
}

pub fn add_advertiser(conn: &Connection, name: &str) -> AdminResult<AdvertiserId> {
    let name = clean_name(name)?;
    match conn.execute("INSERT INTO advertisers (name) VALUES (?1)", [name]) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(AdminError::DuplicateAdvertiser(name.to_owned())),
        Err(e) => Err(e.into()),
    }
}

pub fn rename_advertiser(conn: &Connection, id: AdvertiserId, name: &str) -> AdminResult<()> {
    let name = clean_name(name)?;
    match conn.execute(
        "UPDATE advertisers SET name = ?1 WHERE id = ?2",
        params![name, id],
    ) {
        Ok(0) => Err(AdminError::AdvertiserNotFound(id)),
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(AdminError::DuplicateAdvertiser(name.to_owned())),
        Err(e) => Err(e.into()),
    }
}

/// Delete an advertiser together with its ads and their events and stats.
pub fn delete_advertiser(conn: &Connection, id: AdvertiserId) -> AdminResult<()> {
    match conn.execute("DELETE FROM advertisers WHERE id = ?1", [id])? {
        0 => Err(AdminError::AdvertiserNotFound(id)),
        _ => Ok(()),
    }
}

pub fn get_advertiser(conn: &Connection, id: AdvertiserId) -> AdminResult<Advertiser> {
    conn.query_row(
        "SELECT id, name FROM advertisers WHERE id = ?1",
        [id],
        |row| {
            Ok(Advertiser {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or(AdminError::AdvertiserNotFound(id))
}

/// List advertisers, optionally searching by name.
pub fn list_advertisers(conn: &Connection, search: Option<&str>) -> AdminResult<Vec<Advertiser>> {
    let mut sql = String::from("SELECT id, name FROM advertisers WHERE 1 = 1");
    let mut args = Vec::new();
    if let Some(search) = search {
        push_search(&mut sql, &mut args, search, &["name"]);
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
        Ok(Advertiser {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn add_ad(
    conn: &Connection,
    advertiser_id: AdvertiserId,
    title: &str,
    approve: bool,
) -> AdminResult<AdId> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AdminError::EmptyTitle);
    }
    // Checked up front so a missing advertiser is reported by id rather than
    // as a bare foreign key failure.
    get_advertiser(conn, advertiser_id)?;

    conn.execute(
        "INSERT INTO ads (title, advertiser_id, approve) VALUES (?1, ?2, ?3)",
        params![title, advertiser_id, approve],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Set the approval flag of an ad.
pub fn set_ad_approval(conn: &Connection, id: AdId, approve: bool) -> AdminResult<()> {
    match conn.execute(
        "UPDATE ads SET approve = ?1 WHERE id = ?2",
        params![approve, id],
    )? {
        0 => Err(AdminError::AdNotFound(id)),
        _ => Ok(()),
    }
}

/// Delete an ad together with its events and stats.
pub fn delete_ad(conn: &Connection, id: AdId) -> AdminResult<()> {
    match conn.execute("DELETE FROM ads WHERE id = ?1", [id])? {
        0 => Err(AdminError::AdNotFound(id)),
        _ => Ok(()),
    }
}

const AD_SELECT: &str = "SELECT ads.id, ads.title, ads.advertiser_id, advertisers.name, ads.approve
     FROM ads JOIN advertisers ON advertisers.id = ads.advertiser_id";

fn ad_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ad> {
    Ok(Ad {
        id: row.get(0)?,
        title: row.get(1)?,
        advertiser_id: row.get(2)?,
        advertiser: row.get(3)?,
        approve: row.get(4)?,
    })
}

pub fn get_ad(conn: &Connection, id: AdId) -> AdminResult<Ad> {
    conn.query_row(&format!("{} WHERE ads.id = ?1", AD_SELECT), [id], ad_from_row)
        .optional()?
        .ok_or(AdminError::AdNotFound(id))
}

/// List ads matching `filter`.
pub fn list_ads(conn: &Connection, filter: &AdFilter) -> AdminResult<Vec<Ad>> {
    let mut sql = format!("{} WHERE 1 = 1", AD_SELECT);
    let mut args = Vec::new();

    if let Some(advertiser_id) = filter.advertiser_id {
        args.push(Value::Integer(advertiser_id));
        sql.push_str(&format!(" AND ads.advertiser_id = ?{}", args.len()));
    }
    if let Some(approve) = filter.approve {
        args.push(Value::Integer(approve.into()));
        sql.push_str(&format!(" AND ads.approve = ?{}", args.len()));
    }
    if let Some(search) = &filter.search {
        push_search(&mut sql, &mut args, search, &["ads.title", "advertisers.name"]);
    }
    sql.push_str(" ORDER BY ads.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args), ad_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{TimeZone, Utc};

    fn titles(ads: &[Ad]) -> Vec<&str> {
        ads.iter().map(|ad| ad.title.as_str()).collect()
    }

    fn seed() -> Connection {
        let conn = db::init_memory_db().unwrap();
        let acme = add_advertiser(&conn, "Acme Corp").unwrap();
        let globex = add_advertiser(&conn, "Globex").unwrap();
        add_ad(&conn, acme, "Spring sale", true).unwrap();
        add_ad(&conn, acme, "Rocket skates", false).unwrap();
        add_ad(&conn, globex, "Summer sale", false).unwrap();
        add_ad(&conn, globex, "100% off_today", true).unwrap();
        conn
    }

    #[test]
    fn test_advertiser_names_are_unique() {
        let conn = db::init_memory_db().unwrap();
        add_advertiser(&conn, "Acme").unwrap();

        let err = add_advertiser(&conn, "  Acme ").unwrap_err();
        assert!(matches!(err, AdminError::DuplicateAdvertiser(name) if name == "Acme"));

        let other = add_advertiser(&conn, "Initech").unwrap();
        let err = rename_advertiser(&conn, other, "Acme").unwrap_err();
        assert!(matches!(err, AdminError::DuplicateAdvertiser(_)));
    }

    #[test]
    fn test_empty_names_rejected() {
        let conn = db::init_memory_db().unwrap();
        assert!(matches!(
            add_advertiser(&conn, "   "),
            Err(AdminError::EmptyName)
        ));
        let id = add_advertiser(&conn, "Acme").unwrap();
        assert!(matches!(add_ad(&conn, id, "", false), Err(AdminError::EmptyTitle)));
    }

    #[test]
    fn test_rename_and_missing_advertiser() {
        let conn = db::init_memory_db().unwrap();
        let id = add_advertiser(&conn, "Acme").unwrap();
        rename_advertiser(&conn, id, "Acme Inc").unwrap();
        assert_eq!(get_advertiser(&conn, id).unwrap().name, "Acme Inc");

        assert!(matches!(
            rename_advertiser(&conn, 99, "x"),
            Err(AdminError::AdvertiserNotFound(99))
        ));
        assert!(matches!(
            add_ad(&conn, 99, "orphan", false),
            Err(AdminError::AdvertiserNotFound(99))
        ));
    }

    #[test]
    fn test_search_advertisers() {
        let conn = seed();
        let found = list_advertisers(&conn, Some("acme")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Acme Corp");

        assert_eq!(list_advertisers(&conn, None).unwrap().len(), 2);
        assert_eq!(list_advertisers(&conn, Some("")).unwrap().len(), 2);
        assert!(list_advertisers(&conn, Some("acme globex")).unwrap().is_empty());
    }

    #[test]
    fn test_search_ads_by_title_and_advertiser() {
        let conn = seed();
        let search = |q: &str| {
            list_ads(&conn, &AdFilter {
                search: Some(q.to_owned()),
                ..Default::default()
            })
            .unwrap()
        };

        assert_eq!(titles(&search("SALE")), vec!["Spring sale", "Summer sale"]);
        assert_eq!(titles(&search("globex")), vec!["Summer sale", "100% off_today"]);
        // Every term has to match one of the fields.
        assert_eq!(titles(&search("acme sale")), vec!["Spring sale"]);
        // Wildcards are literal.
        assert_eq!(titles(&search("100%")), vec!["100% off_today"]);
        assert!(search("t_s").is_empty());
        assert_eq!(titles(&search("off_")), vec!["100% off_today"]);
    }

    #[test]
    fn test_filter_ads() {
        let conn = seed();
        let approved = list_ads(&conn, &AdFilter {
            approve: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(titles(&approved), vec!["Spring sale", "100% off_today"]);

        let acme_pending = list_ads(&conn, &AdFilter {
            advertiser_id: Some(1),
            approve: Some(false),
            search: None,
        })
        .unwrap();
        assert_eq!(titles(&acme_pending), vec!["Rocket skates"]);
        assert_eq!(acme_pending[0].advertiser, "Acme Corp");
    }

    #[test]
    fn test_toggle_approval() {
        let conn = seed();
        set_ad_approval(&conn, 2, true).unwrap();
        assert!(get_ad(&conn, 2).unwrap().approve);
        set_ad_approval(&conn, 2, false).unwrap();
        assert!(!get_ad(&conn, 2).unwrap().approve);

        assert!(matches!(
            set_ad_approval(&conn, 42, true),
            Err(AdminError::AdNotFound(42))
        ));
    }

    #[test]
    fn test_delete_cascades() {
        let conn = seed();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        db::record_click(&conn, 1, now).unwrap();
        db::record_view(&conn, 3, now).unwrap();

        delete_ad(&conn, 3).unwrap();
        assert!(matches!(get_ad(&conn, 3), Err(AdminError::AdNotFound(3))));
        let views: i64 = conn
            .query_row("SELECT COUNT(*) FROM views", [], |row| row.get(0))
            .unwrap();
        assert_eq!(views, 0);

        delete_advertiser(&conn, 1).unwrap();
        assert_eq!(titles(&list_ads(&conn, &AdFilter::default()).unwrap()), vec![
            "100% off_today"
        ]);
        let clicks: i64 = conn
            .query_row("SELECT COUNT(*) FROM clicks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(clicks, 0);

        assert!(matches!(
            delete_advertiser(&conn, 1),
            Err(AdminError::AdvertiserNotFound(1))
        ));
    }
}
