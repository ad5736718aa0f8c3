use serde::{Deserialize, Serialize};
use validator::Validate;

/// Current time as Unix milliseconds, the timestamp unit stored everywhere.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Directory a file lives in under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileLocation {
    Files,
    Covers,
}

impl FileLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            FileLocation::Files => "files",
            FileLocation::Covers => "covers",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "covers" => FileLocation::Covers,
            _ => FileLocation::Files,
        }
    }
}

/// Minimal album projection embedded in file listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    pub draft: bool,
    pub hidden: bool,
    pub nsfw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub id: String,
    pub name: String,
    pub extname: String,
    #[serde(rename = "type")]
    pub format: Option<String>,
    pub size: i64,
    pub metadata: Option<Dimensions>,
    pub location: FileLocation,
    pub album_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<AlbumRef>,
    pub created_at: i64,
    pub modified_at: i64,
}

/// File projection joined onto albums as `cover` / `coverFallback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub extname: String,
    #[serde(rename = "type")]
    pub format: Option<String>,
    pub size: i64,
    pub metadata: Option<Dimensions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub name: String,
    pub draft: bool,
    pub hidden: bool,
    pub nsfw: bool,
    pub favorite: bool,
    pub featured: bool,
    pub cover_id: Option<String>,
    pub cover: Option<FileSummary>,
    pub cover_fallback_id: Option<String>,
    pub cover_fallback: Option<FileSummary>,
    pub file_count: i64,
    pub posted_at: Option<i64>,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: Album,
    pub images: Vec<MediaFile>,
}

/// Row inserted by `Database::insert_album`.
#[derive(Debug, Clone)]
pub struct NewAlbum {
    pub id: String,
    pub name: String,
    pub draft: bool,
    pub hidden: bool,
    pub nsfw: bool,
    pub favorite: bool,
    pub featured: bool,
    pub posted_at: Option<i64>,
    pub created_at: i64,
}

/// Partial album update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumChanges {
    pub name: Option<String>,
    pub draft: Option<bool>,
    pub hidden: Option<bool>,
    pub nsfw: Option<bool>,
    pub favorite: Option<bool>,
    pub featured: Option<bool>,
    pub posted_at: Option<i64>,
}

impl AlbumChanges {
    pub fn is_empty(&self) -> bool {
        *self == AlbumChanges::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumStatus {
    #[default]
    All,
    Draft,
    Posted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AlbumSort {
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "modifiedAt")]
    ModifiedAt,
    #[serde(rename = "postedAt")]
    PostedAt,
    #[serde(rename = "fileCount")]
    FileCount,
}

impl AlbumSort {
    pub fn column(self) -> &'static str {
        match self {
            AlbumSort::Name => "lower(a.name)",
            AlbumSort::CreatedAt => "a.created_at",
            AlbumSort::ModifiedAt => "a.modified_at",
            AlbumSort::PostedAt => "a.posted_at",
            AlbumSort::FileCount => "file_count",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumQuery {
    #[serde(default)]
    pub status: AlbumStatus,
    #[serde(default)]
    pub favorites: bool,
    #[serde(default)]
    pub featured: bool,
    /// Only albums that are neither draft nor hidden.
    #[serde(default)]
    pub public_only: bool,
    pub search: Option<String>,
    pub sort: Option<AlbumSort>,
    #[serde(default)]
    pub order: SortOrder,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FileSort {
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "modifiedAt")]
    ModifiedAt,
    #[serde(rename = "size")]
    Size,
}

impl FileSort {
    pub fn column(self) -> &'static str {
        match self {
            FileSort::Name => "lower(f.name)",
            FileSort::CreatedAt => "f.created_at",
            FileSort::ModifiedAt => "f.modified_at",
            FileSort::Size => "f.size",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub search: Option<String>,
    pub sort: Option<FileSort>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub include_album: bool,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub avatar: String,
    pub created_at: i64,
    pub modified_at: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub created_at: i64,
}

// Request bodies

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlbumRequest {
    #[validate(length(min = 1, max = 200, message = "The name must contain 1-200 characters."))]
    pub name: Option<String>,
    pub draft: Option<bool>,
    pub hidden: Option<bool>,
    pub nsfw: Option<bool>,
    pub favorite: Option<bool>,
    pub featured: Option<bool>,
}

pub type UpdateAlbumRequest = CreateAlbumRequest;

#[derive(Debug, Clone, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required."))]
    pub email: String,
    #[validate(length(min = 10, message = "The password must contain at least 10 characters."))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email(message = "A valid email address is required."))]
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    #[serde(flatten)]
    pub user: User,
    pub initial_password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub count: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub album_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
