use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{clamp_paging, summary_from_row, Database};
use crate::types::{Album, AlbumChanges, AlbumQuery, AlbumStatus, NewAlbum};

const ALBUM_SELECT: &str = r#"SELECT
    a.id, a.name, a.draft, a.hidden, a.nsfw, a.favorite, a.featured,
    a.cover_id, a.cover_fallback_id, a.posted_at, a.created_at, a.modified_at,
    (SELECT COUNT(*) FROM files fc WHERE fc.album_id = a.id) AS file_count,
    c.id AS c_id, c.name AS c_name, c.extname AS c_extname, c.format AS c_format,
    c.size AS c_size, c.width AS c_width, c.height AS c_height,
    fb.id AS fb_id, fb.name AS fb_name, fb.extname AS fb_extname, fb.format AS fb_format,
    fb.size AS fb_size, fb.width AS fb_width, fb.height AS fb_height
FROM albums a
LEFT JOIN files c ON c.id = a.cover_id
LEFT JOIN files fb ON fb.id = a.cover_fallback_id"#;

fn album_from_row(row: &SqliteRow) -> Album {
    Album {
        id: row.get("id"),
        name: row.get("name"),
        draft: row.get("draft"),
        hidden: row.get("hidden"),
        nsfw: row.get("nsfw"),
        favorite: row.get("favorite"),
        featured: row.get("featured"),
        cover_id: row.get("cover_id"),
        cover: summary_from_row(row, "c_"),
        cover_fallback_id: row.get("cover_fallback_id"),
        cover_fallback: summary_from_row(row, "fb_"),
        file_count: row.get("file_count"),
        posted_at: row.get("posted_at"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

impl Database {
    pub async fn get_album_by_id(&self, id: &str) -> Result<Option<Album>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE a.id = ?", ALBUM_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(album_from_row))
    }

    /// Case-insensitive lookup.
    pub async fn find_album_by_name(&self, name: &str) -> Result<Option<Album>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE lower(a.name) = lower(?)", ALBUM_SELECT))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(album_from_row))
    }

    pub async fn get_albums(&self, query: &AlbumQuery) -> Result<Vec<Album>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(ALBUM_SELECT);
        qb.push(" WHERE 1 = 1");

        match query.status {
            AlbumStatus::All => {}
            AlbumStatus::Draft => {
                qb.push(" AND a.draft = 1");
            }
            AlbumStatus::Posted => {
                qb.push(" AND a.draft = 0");
            }
        }

        // Both flags widen the match instead of narrowing it.
        match (query.favorites, query.featured) {
            (true, true) => {
                qb.push(" AND (a.favorite = 1 OR a.featured = 1)");
            }
            (true, false) => {
                qb.push(" AND a.favorite = 1");
            }
            (false, true) => {
                qb.push(" AND a.featured = 1");
            }
            (false, false) => {}
        }

        if query.public_only {
            qb.push(" AND a.draft = 0 AND a.hidden = 0");
        }

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND instr(lower(a.name), lower(").push_bind(search.to_string()).push(")) > 0");
        }

        match query.sort {
            Some(sort) => {
                qb.push(format!(" ORDER BY {} {}, a.id", sort.column(), query.order.as_sql()));
            }
            None => {
                qb.push(" ORDER BY a.created_at, a.id");
            }
        }

        let (skip, limit) = clamp_paging(query.skip, query.limit);
        qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(album_from_row).collect())
    }

    pub async fn get_album_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM albums").fetch_one(&self.pool).await
    }

    /// A name already taken (in any case) surfaces as a unique violation.
    pub async fn insert_album(&self, album: &NewAlbum) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO albums (id, name, draft, hidden, nsfw, favorite, featured, posted_at, created_at, modified_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&album.id)
        .bind(&album.name)
        .bind(album.draft)
        .bind(album.hidden)
        .bind(album.nsfw)
        .bind(album.favorite)
        .bind(album.featured)
        .bind(album.posted_at)
        .bind(album.created_at)
        .bind(album.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies the set fields and bumps `modified_at`. Returns false when the album is gone.
    pub async fn update_album(&self, id: &str, changes: &AlbumChanges, modified_at: i64) -> Result<bool, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE albums SET modified_at = ");
        qb.push_bind(modified_at);
        if let Some(name) = &changes.name {
            qb.push(", name = ").push_bind(name.clone());
        }
        for (column, value) in [
            ("draft", changes.draft),
            ("hidden", changes.hidden),
            ("nsfw", changes.nsfw),
            ("favorite", changes.favorite),
            ("featured", changes.featured),
        ] {
            if let Some(value) = value {
                qb.push(format!(", {} = ", column)).push_bind(value);
            }
        }
        if let Some(posted_at) = changes.posted_at {
            qb.push(", posted_at = ").push_bind(posted_at);
        }
        qb.push(" WHERE id = ").push_bind(id.to_string());

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_album_cover(&self, id: &str, cover_id: Option<&str>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE albums SET cover_id = ?, modified_at = ? WHERE id = ?")
            .bind(cover_id)
            .bind(crate::types::now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_album_cover_fallback(&self, id: &str, file_id: Option<&str>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE albums SET cover_fallback_id = ?, modified_at = ? WHERE id = ?")
            .bind(file_id)
            .bind(crate::types::now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_album(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE albums SET modified_at = ? WHERE id = ?")
            .bind(crate::types::now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes the album's files and then the album in one transaction.
    /// Returns false when no album had this id.
    pub async fn delete_album(&self, id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE album_id = ?").bind(id).execute(&mut *tx).await?;
        let result = sqlx::query("DELETE FROM albums WHERE id = ?").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_albums(&self, ids: &[String]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;

        let mut files: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM files WHERE album_id IN (");
        let mut separated = files.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
        files.build().execute(&mut *tx).await?;

        let mut albums: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM albums WHERE id IN (");
        let mut separated = albums.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
        let result = albums.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
