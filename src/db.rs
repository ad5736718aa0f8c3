use sqlx::SqlitePool;

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Cover cleanup relies on ON DELETE SET NULL, so this one is not optional
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;

    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA temp_store=MEMORY;").execute(pool).await {
        tracing::warn!("Failed to set temp_store: {}", e);
    }

    // albums reference files (covers) and files reference albums, so both tables
    // are created before any row exists; SQLite resolves the FKs lazily.
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS albums (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            draft INTEGER NOT NULL DEFAULT 0,
            hidden INTEGER NOT NULL DEFAULT 0,
            nsfw INTEGER NOT NULL DEFAULT 0,
            favorite INTEGER NOT NULL DEFAULT 0,
            featured INTEGER NOT NULL DEFAULT 0,
            cover_id TEXT NULL,
            cover_fallback_id TEXT NULL,
            posted_at INTEGER NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            FOREIGN KEY(cover_id) REFERENCES files(id) ON DELETE SET NULL,
            FOREIGN KEY(cover_fallback_id) REFERENCES files(id) ON DELETE SET NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            extname TEXT NOT NULL,
            format TEXT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            width INTEGER NULL,
            height INTEGER NULL,
            location TEXT NOT NULL DEFAULT 'files',
            album_id TEXT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            FOREIGN KEY(album_id) REFERENCES albums(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS user_metadata (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            avatar TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS user_credentials (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            FOREIGN KEY(id) REFERENCES user_metadata(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    // Uniqueness of names is enforced by the database, failures here are fatal.
    for query in [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_name ON albums(lower(name))",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_name ON files(lower(name))",
    ] {
        sqlx::query(query).execute(pool).await?;
    }

    let indexes = [
        ("idx_files_album_created", "CREATE INDEX IF NOT EXISTS idx_files_album_created ON files(album_id, created_at, id)"),
        ("idx_albums_posted", "CREATE INDEX IF NOT EXISTS idx_albums_posted ON albums(draft, posted_at DESC)"),
        ("idx_albums_cover", "CREATE INDEX IF NOT EXISTS idx_albums_cover ON albums(cover_id)"),
        ("idx_albums_cover_fallback", "CREATE INDEX IF NOT EXISTS idx_albums_cover_fallback ON albums(cover_fallback_id)"),
        ("idx_user_metadata_first_name", "CREATE INDEX IF NOT EXISTS idx_user_metadata_first_name ON user_metadata(lower(first_name))"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            tracing::warn!("Failed to create index {}: {}", name, e);
        }
    }

    Ok(())
}
