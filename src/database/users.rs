use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::types::{NewUser, User};

// The password column is never part of this projection.
const USER_SELECT: &str = r#"SELECT
    m.id, m.first_name, m.last_name, m.role, m.avatar, m.created_at, m.modified_at, c.email
FROM user_metadata m
JOIN user_credentials c ON c.id = m.id"#;

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        role: row.get("role"),
        avatar: row.get("avatar"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

impl Database {
    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?", USER_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Emails compare case-insensitively (`COLLATE NOCASE` on the column).
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE c.email = ?", USER_SELECT))
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn get_user_password_hash(&self, id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT password FROM user_credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// One page of users ordered by first name, case-insensitive.
    pub async fn get_users_sorted(&self, skip: i64, limit: i64) -> Result<Vec<User>, sqlx::Error> {
        let rows = sqlx::query(&format!("{} ORDER BY lower(m.first_name), m.id LIMIT ? OFFSET ?", USER_SELECT))
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn get_user_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_metadata").fetch_one(&self.pool).await
    }

    /// Writes metadata and credentials together. A taken email surfaces as a unique violation.
    pub async fn insert_user(&self, user: &NewUser) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO user_metadata (id, first_name, last_name, role, avatar, created_at, modified_at)
               VALUES (?, ?, ?, ?, '', ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.role)
        .bind(user.created_at)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"INSERT INTO user_credentials (id, email, password, created_at, modified_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(user.email.trim())
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_user_password(&self, id: &str, password_hash: &str) -> Result<(), sqlx::Error> {
        let now = crate::types::now_ms();
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE user_credentials SET password = ?, modified_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE user_metadata SET modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
