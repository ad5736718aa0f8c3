use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::{clamp_paging, dimensions, Database};
use crate::types::{AlbumRef, Dimensions, FileLocation, FileQuery, MediaFile};

const FILE_SELECT: &str = r#"SELECT
    f.id, f.name, f.extname, f.format, f.size, f.width, f.height, f.location,
    f.album_id, f.created_at, f.modified_at,
    a.id AS a_id, a.name AS a_name, a.draft AS a_draft, a.hidden AS a_hidden, a.nsfw AS a_nsfw
FROM files f
LEFT JOIN albums a ON a.id = f.album_id"#;

fn file_from_row(row: &SqliteRow, include_album: bool) -> MediaFile {
    let album = if include_album {
        row.get::<Option<String>, _>("a_id").map(|id| AlbumRef {
            id,
            name: row.get("a_name"),
            draft: row.get("a_draft"),
            hidden: row.get("a_hidden"),
            nsfw: row.get("a_nsfw"),
        })
    } else {
        None
    };

    MediaFile {
        id: row.get("id"),
        name: row.get("name"),
        extname: row.get("extname"),
        format: row.get("format"),
        size: row.get("size"),
        metadata: dimensions(row.get("width"), row.get("height")),
        location: FileLocation::parse(row.get::<String, _>("location").as_str()),
        album_id: row.get("album_id"),
        album,
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

/// Deletes one file row and repairs the covers pointing at it. Runs on the caller's
/// transaction so bulk deletes stay atomic.
async fn delete_file_on(conn: &mut SqliteConnection, id: &str) -> Result<bool, sqlx::Error> {
    let fallback_owners: Vec<String> = sqlx::query_scalar("SELECT id FROM albums WHERE cover_fallback_id = ?")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    let now = crate::types::now_ms();
    sqlx::query("UPDATE albums SET cover_id = NULL, modified_at = ? WHERE cover_id = ?")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM files WHERE id = ?").bind(id).execute(&mut *conn).await?;

    for album_id in fallback_owners {
        let next: Option<String> =
            sqlx::query_scalar("SELECT id FROM files WHERE album_id = ? ORDER BY created_at, id LIMIT 1")
                .bind(&album_id)
                .fetch_optional(&mut *conn)
                .await?;
        sqlx::query("UPDATE albums SET cover_fallback_id = ?, modified_at = ? WHERE id = ?")
            .bind(next)
            .bind(now)
            .bind(&album_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(result.rows_affected() > 0)
}

impl Database {
    pub async fn get_files(&self, query: &FileQuery) -> Result<Vec<MediaFile>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(FILE_SELECT);
        qb.push(" WHERE 1 = 1");

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND instr(lower(f.name), lower(").push_bind(search.to_string()).push(")) > 0");
        }

        match query.sort {
            Some(sort) => {
                qb.push(format!(" ORDER BY {} {}, f.id", sort.column(), query.order.as_sql()));
            }
            None => {
                qb.push(" ORDER BY f.created_at, f.id");
            }
        }

        let (skip, limit) = clamp_paging(query.skip, query.limit);
        qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| file_from_row(r, query.include_album)).collect())
    }

    pub async fn get_file_by_id(&self, id: &str) -> Result<Option<MediaFile>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE f.id = ?", FILE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(|r| file_from_row(r, true)))
    }

    /// Case-insensitive lookup, with the owning album attached.
    pub async fn find_file_by_name(&self, name: &str) -> Result<Option<MediaFile>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE lower(f.name) = lower(?)", FILE_SELECT))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(|r| file_from_row(r, true)))
    }

    /// Files owned by an album, oldest first. Covers are not owned by the album.
    pub async fn get_album_files(&self, album_id: &str) -> Result<Vec<MediaFile>, sqlx::Error> {
        let rows = sqlx::query(&format!("{} WHERE f.album_id = ? ORDER BY f.created_at, f.id", FILE_SELECT))
            .bind(album_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| file_from_row(r, false)).collect())
    }

    pub async fn get_album_file_count(&self, album_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE album_id = ?")
            .bind(album_id)
            .fetch_one(&self.pool)
            .await
    }

    /// A random sample of files that belong to an album.
    pub async fn get_random_album_files(&self, limit: i64) -> Result<Vec<MediaFile>, sqlx::Error> {
        let rows = sqlx::query(&format!("{} WHERE f.album_id IS NOT NULL ORDER BY random() LIMIT ?", FILE_SELECT))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| file_from_row(r, true)).collect())
    }

    pub async fn get_file_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM files").fetch_one(&self.pool).await
    }

    pub async fn insert_file(&self, file: &MediaFile) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO files (id, name, extname, format, size, width, height, location, album_id, created_at, modified_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&file.id)
        .bind(&file.name)
        .bind(&file.extname)
        .bind(&file.format)
        .bind(file.size)
        .bind(file.metadata.map(|m| m.width as i64))
        .bind(file.metadata.map(|m| m.height as i64))
        .bind(file.location.as_str())
        .bind(&file.album_id)
        .bind(file.created_at)
        .bind(file.modified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_file_metadata(
        &self,
        id: &str,
        format: Option<&str>,
        metadata: Option<Dimensions>,
        size: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE files SET format = ?, width = ?, height = ?, size = ?, modified_at = ? WHERE id = ?")
            .bind(format)
            .bind(metadata.map(|m| m.width as i64))
            .bind(metadata.map(|m| m.height as i64))
            .bind(size)
            .bind(crate::types::now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a file record. Albums using it as cover lose the cover; albums using it
    /// as fallback get their first remaining file, or none.
    pub async fn delete_file(&self, id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_file_on(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn delete_files(&self, ids: &[String]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for id in ids {
            if delete_file_on(&mut *tx, id).await? {
                deleted += 1;
            }
        }
        tx.commit().await?;
        Ok(deleted)
    }
}
