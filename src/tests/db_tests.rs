#[cfg(test)]
mod tests {
    use crate::db;
    use crate::tests::support::TestApp;
    use crate::types::{AlbumChanges, AlbumQuery, AlbumSort, AlbumStatus, FileQuery, NewAlbum, NewUser, SortOrder};

    fn album(id: &str, name: &str) -> NewAlbum {
        NewAlbum {
            id: id.to_string(),
            name: name.to_string(),
            draft: false,
            hidden: false,
            nsfw: false,
            favorite: false,
            featured: false,
            posted_at: Some(1),
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_init_db() {
        let t = TestApp::new().await;
        let pool = t.state.db.pool();

        let tables: Vec<String> = sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(pool)
            .await
            .unwrap();

        for table in ["albums", "files", "user_credentials", "user_metadata"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }

        // Running the schema again is harmless
        db::init_db(pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_album_names_are_unique_ignoring_case() {
        let t = TestApp::new().await;
        t.state.db.insert_album(&album("a1", "Summer")).await.unwrap();

        let err = t.state.db.insert_album(&album("a2", "SUMMER")).await.unwrap_err();
        match err {
            sqlx::Error::Database(e) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }

        let found = t.state.db.find_album_by_name("summer").await.unwrap().unwrap();
        assert_eq!(found.id, "a1");
    }

    #[tokio::test]
    async fn test_album_filters() {
        let t = TestApp::new().await;
        let mut draft = album("d1", "Draft trip");
        draft.draft = true;
        draft.posted_at = None;
        let mut favorite = album("f1", "Favorite beach");
        favorite.favorite = true;
        let mut featured = album("x1", "Featured city");
        featured.featured = true;
        let mut hidden = album("h1", "Hidden walk");
        hidden.hidden = true;
        for a in [&draft, &favorite, &featured, &hidden] {
            t.state.db.insert_album(a).await.unwrap();
        }

        let ids = |albums: Vec<crate::types::Album>| albums.into_iter().map(|a| a.id).collect::<Vec<_>>();

        let drafts = t.state.db.get_albums(&AlbumQuery { status: AlbumStatus::Draft, ..Default::default() }).await.unwrap();
        assert_eq!(ids(drafts), vec!["d1"]);

        let mut flagged = ids(t
            .state
            .db
            .get_albums(&AlbumQuery { favorites: true, featured: true, ..Default::default() })
            .await
            .unwrap());
        flagged.sort();
        assert_eq!(flagged, vec!["f1", "x1"]);

        let public = t
            .state
            .db
            .get_albums(&AlbumQuery {
                public_only: true,
                sort: Some(AlbumSort::Name),
                order: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(public), vec!["f1", "x1"]);

        let searched = t
            .state
            .db
            .get_albums(&AlbumQuery { search: Some("BEACH".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(ids(searched), vec!["f1"]);

        let paged = t.state.db.get_albums(&AlbumQuery { skip: Some(1), limit: Some(2), ..Default::default() }).await.unwrap();
        assert_eq!(paged.len(), 2);
    }

    #[tokio::test]
    async fn test_update_album_applies_only_set_fields() {
        let t = TestApp::new().await;
        t.state.db.insert_album(&album("a1", "Coast")).await.unwrap();

        let changes = AlbumChanges { featured: Some(true), ..Default::default() };
        assert!(t.state.db.update_album("a1", &changes, 99).await.unwrap());

        let updated = t.state.db.get_album_by_id("a1").await.unwrap().unwrap();
        assert!(updated.featured);
        assert!(!updated.favorite);
        assert_eq!(updated.name, "Coast");
        assert_eq!(updated.modified_at, 99);

        assert!(!t.state.db.update_album("missing", &changes, 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_files_repairs_album_covers() {
        let t = TestApp::new().await;
        let album_id = t.insert_album("Mountains", false).await;
        let first = t.insert_file(Some(&album_id), "first.png", 10).await;
        let second = t.insert_file(Some(&album_id), "second.png", 20).await;
        t.state.db.set_album_cover_fallback(&album_id, Some(&first.id)).await.unwrap();
        t.state.db.set_album_cover(&album_id, Some(&second.id)).await.unwrap();

        let album = t.state.db.get_album_by_id(&album_id).await.unwrap().unwrap();
        assert_eq!(album.file_count, 2);
        assert_eq!(album.cover.as_ref().map(|c| c.name.as_str()), Some("second.png"));
        assert_eq!(album.cover_fallback.as_ref().map(|c| c.name.as_str()), Some("first.png"));

        // Removing the fallback promotes the next file
        assert!(t.state.db.delete_file(&first.id).await.unwrap());
        let album = t.state.db.get_album_by_id(&album_id).await.unwrap().unwrap();
        assert_eq!(album.cover_fallback_id.as_deref(), Some(second.id.as_str()));
        assert_eq!(album.cover_id.as_deref(), Some(second.id.as_str()));

        // Removing the last file clears both references
        assert!(t.state.db.delete_file(&second.id).await.unwrap());
        let album = t.state.db.get_album_by_id(&album_id).await.unwrap().unwrap();
        assert_eq!(album.cover_id, None);
        assert_eq!(album.cover_fallback_id, None);
        assert_eq!(album.file_count, 0);

        assert!(!t.state.db.delete_file(&second.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_albums_removes_owned_files() {
        let t = TestApp::new().await;
        let keep = t.insert_album("Keep", false).await;
        let gone = t.insert_album("Drop", false).await;
        t.insert_file(Some(&keep), "keep.png", 1).await;
        t.insert_file(Some(&gone), "drop-1.png", 2).await;
        t.insert_file(Some(&gone), "drop-2.png", 3).await;

        let deleted = t.state.db.delete_albums(&[gone.clone(), "missing".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(t.state.db.get_album_count().await.unwrap(), 1);
        assert_eq!(t.state.db.get_file_count().await.unwrap(), 1);
        assert_eq!(t.state.db.delete_albums(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_files_listing_and_lookup() {
        let t = TestApp::new().await;
        let album_id = t.insert_album("Lake", false).await;
        t.insert_file(Some(&album_id), "Boat.png", 2).await;
        t.insert_file(None, "loose.png", 1).await;

        let files = t.state.db.get_files(&FileQuery::default()).await.unwrap();
        assert_eq!(files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(), vec!["loose.png", "Boat.png"]);
        assert!(files.iter().all(|f| f.album.is_none()));

        let with_album = t
            .state
            .db
            .get_files(&FileQuery { include_album: true, search: Some("boat".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(with_album.len(), 1);
        assert_eq!(with_album[0].album.as_ref().map(|a| a.name.as_str()), Some("Lake"));

        let found = t.state.db.find_file_by_name("BOAT.PNG").await.unwrap().unwrap();
        assert_eq!(found.album_id.as_deref(), Some(album_id.as_str()));

        let random = t.state.db.get_random_album_files(10).await.unwrap();
        assert_eq!(random.len(), 1);
        assert_eq!(random[0].name, "Boat.png");
    }

    #[tokio::test]
    async fn test_users_by_email_and_sorted() {
        let t = TestApp::new().await;
        t.create_user("zoe@example.com", "zoe", "user").await;
        t.create_user("Bob@Example.com", "Bob", "admin").await;
        t.create_user("al@example.com", "al", "user").await;

        let bob = t.state.db.get_user_by_email("bob@example.com").await.unwrap().unwrap();
        assert!(bob.is_admin());

        let names: Vec<String> =
            t.state.db.get_users_sorted(0, 10).await.unwrap().into_iter().map(|u| u.first_name).collect();
        assert_eq!(names, vec!["al", "Bob", "zoe"]);

        let page: Vec<String> = t.state.db.get_users_sorted(1, 1).await.unwrap().into_iter().map(|u| u.first_name).collect();
        assert_eq!(page, vec!["Bob"]);
        assert_eq!(t.state.db.get_user_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected_atomically() {
        let t = TestApp::new().await;
        t.create_user("same@example.com", "First", "user").await;

        let duplicate = NewUser {
            id: "second".to_string(),
            first_name: "Second".to_string(),
            last_name: String::new(),
            email: "SAME@example.com".to_string(),
            role: "user".to_string(),
            password_hash: "x".to_string(),
            created_at: 1,
        };
        assert!(t.state.db.insert_user(&duplicate).await.is_err());
        // The metadata row of the failed insert was rolled back
        assert_eq!(t.state.db.get_user_count().await.unwrap(), 1);
        assert!(t.state.db.get_user_by_id("second").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_hash_is_stored_apart_from_user() {
        let t = TestApp::new().await;
        let user = t.create_user("pw@example.com", "Pat", "user").await;

        let hash = t.state.db.get_user_password_hash(&user.id).await.unwrap().unwrap();
        assert!(hash.starts_with("$argon2"));

        t.state.db.update_user_password(&user.id, "new-hash").await.unwrap();
        assert_eq!(t.state.db.get_user_password_hash(&user.id).await.unwrap().as_deref(), Some("new-hash"));
    }
}
